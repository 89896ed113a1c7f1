//! Challenge storage.
//!
//! The store is the only shared mutable resource in the system. Every
//! lifecycle transition goes through its conditional primitives, so
//! concurrent issuers and verifiers serialize here rather than in process
//! memory - which is what lets multiple service instances share one store.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;

use warden_common::{Challenge, WardenError};

/// Time source. Injected so expiry can be exercised in tests without
/// sleeping through a real validity window.
pub trait Clock: Send + Sync {
    /// Current unix time in seconds
    fn now(&self) -> i64;
}

/// Wall-clock time.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Conditional mutation applied through [`ChallengeStore::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// Correct code on an active record: settle it as verified
    MarkVerified,
    /// Wrong code on an active record: count the failure, exhausting the
    /// challenge when the bound is hit
    RecordFailure,
}

/// Result of a conditional mutation.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// The mutation ran; the record is the post-transition state
    Applied(Challenge),
    /// The record was no longer active (or had expired); nothing changed.
    /// The record is the state the losing caller observed.
    Rejected(Challenge),
    /// No record under that id - never existed, or evicted past retention
    Missing,
}

/// Store of verification challenges, keyed by challenge id with a
/// by-subject index for the single-active-challenge rule.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Insert a challenge, atomically marking any prior active challenge
    /// for the same subject as superseded. Single winner under concurrent
    /// puts for one subject.
    async fn put(&self, challenge: Challenge) -> Result<(), WardenError>;

    /// Fetch by id. A record at or past `expires_at` that is still marked
    /// active is reported as expired even though no transition write has
    /// happened yet.
    async fn get(&self, id: &str) -> Result<Option<Challenge>, WardenError>;

    /// Apply a conditional mutation. Only active, unexpired records mutate;
    /// racing callers all observe the winner's terminal state.
    async fn apply(&self, id: &str, mutation: Mutation) -> Result<ApplyOutcome, WardenError>;

    /// The subject's active challenge, if one exists and is unexpired.
    async fn active_for_subject(&self, subject_id: &str)
    -> Result<Option<Challenge>, WardenError>;

    /// Backend liveness probe for readiness checks.
    async fn ping(&self) -> Result<(), WardenError> {
        Ok(())
    }
}

/// Issuance throttle consulted by the boundary before start/resend.
///
/// The verifier core enforces no cooldown beyond the one-active-challenge
/// rule; pacing the notification channel is the caller layer's policy, and
/// this gate is where that policy lives.
#[async_trait]
pub trait CooldownGate: Send + Sync {
    /// Try to claim the issuance slot for a subject.
    async fn try_acquire(
        &self,
        subject_id: &str,
        cooldown_secs: u64,
    ) -> Result<CooldownDecision, WardenError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Allowed,
    Blocked { retry_after_secs: u64 },
}

/// Settable clock for tests.
#[cfg(test)]
pub struct ManualClock(std::sync::atomic::AtomicI64);

#[cfg(test)]
impl ManualClock {
    pub fn at(start: i64) -> Self {
        Self(std::sync::atomic::AtomicI64::new(start))
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
