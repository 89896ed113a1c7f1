//! In-process store backend.
//!
//! Single-node deployments and the test suites use this backend. The
//! semantics mirror the Redis backend exactly: one mutex-guarded critical
//! section stands in for each Lua script, so the same single-winner
//! guarantees hold for concurrent tasks in one process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use warden_common::{Challenge, ChallengeStatus, WardenError};

use super::{
    ApplyOutcome, ChallengeStore, Clock, CooldownDecision, CooldownGate, Mutation, SystemClock,
};

struct Entry {
    challenge: Challenge,
    /// Eviction deadline; reset to the retention window when the record
    /// settles into a terminal state
    retain_until: i64,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<String, Entry>,
    active_by_subject: HashMap<String, String>,
    cooldown_until: HashMap<String, i64>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    retention_secs: i64,
}

impl MemoryStore {
    pub fn new(retention_secs: u64) -> Self {
        Self::with_clock(Arc::new(SystemClock), retention_secs)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, retention_secs: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            retention_secs: retention_secs as i64,
        }
    }

    /// Drop records past their retention deadline. Runs lazily at the top
    /// of every operation; there is no background sweep to depend on.
    fn evict(inner: &mut Inner, now: i64) {
        inner.by_id.retain(|_, entry| entry.retain_until > now);
        inner
            .active_by_subject
            .retain(|_, id| inner.by_id.contains_key(id));
        inner.cooldown_until.retain(|_, until| *until > now);
    }

    /// An overdue record still marked active reads as expired; the write
    /// happens here so later reads agree.
    fn settle_if_overdue(entry: &mut Entry, now: i64) {
        if entry.challenge.status == ChallengeStatus::Active && entry.challenge.is_expired(now) {
            entry.challenge.status = ChallengeStatus::Expired;
        }
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn put(&self, challenge: Challenge) -> Result<(), WardenError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        Self::evict(&mut inner, now);

        if let Some(prev_id) = inner.active_by_subject.get(&challenge.subject_id).cloned()
            && let Some(prev) = inner.by_id.get_mut(&prev_id)
        {
            Self::settle_if_overdue(prev, now);
            if prev.challenge.status == ChallengeStatus::Active {
                prev.challenge.status = ChallengeStatus::Superseded;
                prev.retain_until = now + self.retention_secs;
            }
        }

        let retain_until = challenge.expires_at + self.retention_secs;
        inner
            .active_by_subject
            .insert(challenge.subject_id.clone(), challenge.id.clone());
        inner.by_id.insert(
            challenge.id.clone(),
            Entry {
                challenge,
                retain_until,
            },
        );

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Challenge>, WardenError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        Self::evict(&mut inner, now);

        Ok(inner.by_id.get_mut(id).map(|entry| {
            Self::settle_if_overdue(entry, now);
            entry.challenge.clone()
        }))
    }

    async fn apply(&self, id: &str, mutation: Mutation) -> Result<ApplyOutcome, WardenError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        Self::evict(&mut inner, now);

        let Some(entry) = inner.by_id.get_mut(id) else {
            return Ok(ApplyOutcome::Missing);
        };

        Self::settle_if_overdue(entry, now);
        if entry.challenge.status != ChallengeStatus::Active {
            return Ok(ApplyOutcome::Rejected(entry.challenge.clone()));
        }

        match mutation {
            Mutation::MarkVerified => {
                entry.challenge.status = ChallengeStatus::Verified;
                entry.challenge.verified_at = Some(now);
                entry.retain_until = now + self.retention_secs;
            }
            Mutation::RecordFailure => {
                entry.challenge.attempts_used += 1;
                if entry.challenge.attempts_used >= entry.challenge.max_attempts {
                    entry.challenge.status = ChallengeStatus::Exhausted;
                    entry.retain_until = now + self.retention_secs;
                }
            }
        }

        Ok(ApplyOutcome::Applied(entry.challenge.clone()))
    }

    async fn active_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<Option<Challenge>, WardenError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        Self::evict(&mut inner, now);

        let Some(id) = inner.active_by_subject.get(subject_id).cloned() else {
            return Ok(None);
        };

        Ok(inner.by_id.get_mut(&id).and_then(|entry| {
            Self::settle_if_overdue(entry, now);
            (entry.challenge.status == ChallengeStatus::Active).then(|| entry.challenge.clone())
        }))
    }
}

#[async_trait]
impl CooldownGate for MemoryStore {
    async fn try_acquire(
        &self,
        subject_id: &str,
        cooldown_secs: u64,
    ) -> Result<CooldownDecision, WardenError> {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();

        if let Some(&until) = inner.cooldown_until.get(subject_id)
            && until > now
        {
            return Ok(CooldownDecision::Blocked {
                retry_after_secs: (until - now) as u64,
            });
        }

        inner
            .cooldown_until
            .insert(subject_id.to_string(), now + cooldown_secs as i64);
        Ok(CooldownDecision::Allowed)
    }
}
