//! Redis store backend.
//!
//! Challenge records are JSON documents under `otp:challenge:{id}` with a
//! secondary `otp:subject:{subject_id}` index pointing at the subject's
//! current challenge. Every conditional write runs as a Lua script, so the
//! single-winner guarantees hold across service instances, not just across
//! tasks in one process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use warden_common::constants::redis_keys;
use warden_common::{Challenge, ChallengeStatus, WardenError};

use super::{ApplyOutcome, ChallengeStore, Clock, CooldownDecision, CooldownGate, Mutation};

/// Insert + supersede in one step.
///
/// KEYS[1] = new challenge key, KEYS[2] = subject index key
/// ARGV[1] = record json, ARGV[2] = challenge id, ARGV[3] = now,
/// ARGV[4] = ttl secs, ARGV[5] = retention secs
const PUT_SCRIPT: &str = r#"
local now = tonumber(ARGV[3])
local retention = tonumber(ARGV[5])
local prev_id = redis.call('GET', KEYS[2])
if prev_id and prev_id ~= ARGV[2] then
  local prev_key = 'otp:challenge:' .. prev_id
  local raw = redis.call('GET', prev_key)
  if raw then
    local prev = cjson.decode(raw)
    if prev.status == 'active' then
      if now >= prev.expires_at then
        prev.status = 'expired'
      else
        prev.status = 'superseded'
      end
      redis.call('SET', prev_key, cjson.encode(prev), 'EX', retention)
    end
  end
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', tonumber(ARGV[4]) + retention)
redis.call('SET', KEYS[2], ARGV[2], 'EX', tonumber(ARGV[4]))
return 1
"#;

/// Conditional lifecycle transition.
///
/// KEYS[1] = challenge key
/// ARGV[1] = 'verify' | 'failure', ARGV[2] = now, ARGV[3] = retention secs
/// Returns {disposition, record json}.
const APPLY_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return {'missing', ''}
end
local ch = cjson.decode(raw)
local now = tonumber(ARGV[2])
local retention = tonumber(ARGV[3])
if ch.status == 'active' and now >= ch.expires_at then
  ch.status = 'expired'
  local enc = cjson.encode(ch)
  redis.call('SET', KEYS[1], enc, 'EX', retention)
  return {'rejected', enc}
end
if ch.status ~= 'active' then
  return {'rejected', raw}
end
if ARGV[1] == 'verify' then
  ch.status = 'verified'
  ch.verified_at = now
else
  ch.attempts_used = ch.attempts_used + 1
  if ch.attempts_used >= ch.max_attempts then
    ch.status = 'exhausted'
  end
end
local enc = cjson.encode(ch)
if ch.status == 'active' then
  local remaining = ch.expires_at - now + retention
  if remaining < 1 then remaining = 1 end
  redis.call('SET', KEYS[1], enc, 'EX', remaining)
else
  redis.call('SET', KEYS[1], enc, 'EX', retention)
end
return {'applied', enc}
"#;

pub struct RedisStore {
    conn: ConnectionManager,
    clock: Arc<dyn Clock>,
    retention_secs: u64,
    op_timeout: Duration,
    put_script: Script,
    apply_script: Script,
}

impl RedisStore {
    pub fn new(
        conn: ConnectionManager,
        clock: Arc<dyn Clock>,
        retention_secs: u64,
        op_timeout: Duration,
    ) -> Self {
        Self {
            conn,
            clock,
            retention_secs,
            op_timeout,
            put_script: Script::new(PUT_SCRIPT),
            apply_script: Script::new(APPLY_SCRIPT),
        }
    }

    fn challenge_key(id: &str) -> String {
        format!("{}{}", redis_keys::CHALLENGE_PREFIX, id)
    }

    fn subject_key(subject_id: &str) -> String {
        format!("{}{}", redis_keys::SUBJECT_PREFIX, subject_id)
    }

    fn cooldown_key(subject_id: &str) -> String {
        format!("{}{}", redis_keys::COOLDOWN_PREFIX, subject_id)
    }

    /// Run a store operation under the configured deadline. A timeout is
    /// surfaced as its own variant so callers can tell "try again" from
    /// "wrong code".
    async fn bounded<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, WardenError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(WardenError::Store(format!("{what}: {e}"))),
            Err(_) => Err(WardenError::StoreTimeout(what.to_string())),
        }
    }
}

#[async_trait]
impl ChallengeStore for RedisStore {
    async fn put(&self, challenge: Challenge) -> Result<(), WardenError> {
        let record = serde_json::to_string(&challenge)
            .map_err(|e| WardenError::Internal(format!("encode challenge: {e}")))?;
        let now = self.clock.now();
        let ttl_secs = (challenge.expires_at - challenge.created_at).max(1);

        let mut conn = self.conn.clone();
        let mut invocation = self.put_script.prepare_invoke();
        invocation
            .key(Self::challenge_key(&challenge.id))
            .key(Self::subject_key(&challenge.subject_id))
            .arg(record)
            .arg(&challenge.id)
            .arg(now)
            .arg(ttl_secs)
            .arg(self.retention_secs);
        let _: i64 = self
            .bounded("put", invocation.invoke_async(&mut conn))
            .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Challenge>, WardenError> {
        let mut conn = self.conn.clone();
        let key = Self::challenge_key(id);
        let raw: Option<String> = self.bounded("get", conn.get(&key)).await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut challenge: Challenge = serde_json::from_str(&raw)
            .map_err(|e| WardenError::Internal(format!("decode challenge: {e}")))?;

        // Lazy expiry: the view is authoritative even before any
        // transition write lands.
        if challenge.status == ChallengeStatus::Active
            && challenge.is_expired(self.clock.now())
        {
            challenge.status = ChallengeStatus::Expired;
        }

        Ok(Some(challenge))
    }

    async fn apply(&self, id: &str, mutation: Mutation) -> Result<ApplyOutcome, WardenError> {
        let op = match mutation {
            Mutation::MarkVerified => "verify",
            Mutation::RecordFailure => "failure",
        };

        let mut conn = self.conn.clone();
        let mut invocation = self.apply_script.prepare_invoke();
        invocation
            .key(Self::challenge_key(id))
            .arg(op)
            .arg(self.clock.now())
            .arg(self.retention_secs);
        let reply: Vec<String> = self
            .bounded("apply", invocation.invoke_async(&mut conn))
            .await?;

        let (disposition, record) = match reply.as_slice() {
            [disposition, record] => (disposition.as_str(), record.as_str()),
            _ => {
                return Err(WardenError::Internal(
                    "apply script returned a malformed reply".into(),
                ));
            }
        };

        match disposition {
            "missing" => Ok(ApplyOutcome::Missing),
            "rejected" | "applied" => {
                let challenge: Challenge = serde_json::from_str(record)
                    .map_err(|e| WardenError::Internal(format!("decode challenge: {e}")))?;
                if disposition == "applied" {
                    Ok(ApplyOutcome::Applied(challenge))
                } else {
                    Ok(ApplyOutcome::Rejected(challenge))
                }
            }
            other => Err(WardenError::Internal(format!(
                "apply script returned unknown disposition: {other}"
            ))),
        }
    }

    async fn active_for_subject(
        &self,
        subject_id: &str,
    ) -> Result<Option<Challenge>, WardenError> {
        let mut conn = self.conn.clone();
        let key = Self::subject_key(subject_id);
        let id: Option<String> = self.bounded("active_for_subject", conn.get(&key)).await?;

        let Some(id) = id else {
            return Ok(None);
        };

        Ok(self
            .get(&id)
            .await?
            .filter(|challenge| challenge.status == ChallengeStatus::Active))
    }

    async fn ping(&self) -> Result<(), WardenError> {
        let mut conn = self.conn.clone();
        let fut = async move { redis::cmd("PING").query_async(&mut conn).await };
        let _: String = self.bounded("ping", fut).await?;
        Ok(())
    }
}

#[async_trait]
impl CooldownGate for RedisStore {
    async fn try_acquire(
        &self,
        subject_id: &str,
        cooldown_secs: u64,
    ) -> Result<CooldownDecision, WardenError> {
        let key = Self::cooldown_key(subject_id);

        let mut conn = self.conn.clone();
        let count: u32 = self.bounded("cooldown_incr", conn.incr(&key, 1)).await?;

        if count == 1 {
            let mut conn = self.conn.clone();
            self.bounded(
                "cooldown_expire",
                conn.expire::<_, ()>(&key, cooldown_secs as i64),
            )
            .await?;
            return Ok(CooldownDecision::Allowed);
        }

        let mut conn = self.conn.clone();
        let ttl: i64 = self.bounded("cooldown_ttl", conn.ttl(&key)).await?;
        Ok(CooldownDecision::Blocked {
            retry_after_secs: ttl.max(1) as u64,
        })
    }
}
