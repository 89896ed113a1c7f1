//! Challenge lifecycle orchestration.
//!
//! ```text
//! Active ─┬─ correct code ───────────► Verified
//!         ├─ 3rd wrong code ─────────► Exhausted
//!         ├─ validity window elapses ► Expired
//!         └─ newer challenge issued ─► Superseded
//! ```
//!
//! Every state on the right is terminal. The verifier holds no challenge
//! state of its own: each operation re-reads through the store and settles
//! transitions through the store's conditional writes, so concurrent
//! callers (and concurrent service instances) always observe a single
//! winner.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::Serialize;

use warden_common::{Challenge, ChallengePurpose, ChallengeStatus, VerifyOutcome, WardenError};

use crate::store::{ApplyOutcome, ChallengeStore, Clock, Mutation};

use super::{CodeGenerator, SecretHasher};

/// A freshly issued challenge.
///
/// The plaintext code lives here just long enough for the single dispatch
/// call at the boundary; it is never logged and never stored.
pub struct IssuedChallenge {
    pub id: String,
    pub code: String,
    pub expires_at: i64,
}

#[derive(Default)]
struct VerifierStats {
    issued: AtomicU64,
    verified: AtomicU64,
    denied: AtomicU64,
}

/// Counter snapshot for the metrics endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct VerifierStatsSnapshot {
    pub issued: u64,
    pub verified: u64,
    pub denied: u64,
}

/// Drives challenges through their lifecycle.
pub struct ChallengeVerifier {
    store: Arc<dyn ChallengeStore>,
    clock: Arc<dyn Clock>,
    generator: CodeGenerator,
    hasher: SecretHasher,
    ttl_secs: u64,
    max_attempts: u32,
    stats: VerifierStats,
}

impl ChallengeVerifier {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        clock: Arc<dyn Clock>,
        ttl_secs: u64,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            clock,
            generator: CodeGenerator,
            hasher: SecretHasher,
            ttl_secs,
            max_attempts,
            stats: VerifierStats::default(),
        }
    }

    /// Issue a challenge for a subject.
    ///
    /// The put supersedes any prior active challenge for the subject, so
    /// exactly one is active once this returns. The plaintext code goes
    /// back to the caller for dispatch and nowhere else.
    pub async fn start(
        &self,
        subject_id: &str,
        purpose: ChallengePurpose,
    ) -> Result<IssuedChallenge, WardenError> {
        let code = self.generator.generate();
        let now = self.clock.now();

        let challenge = Challenge {
            id: new_challenge_id(),
            subject_id: subject_id.to_string(),
            purpose,
            code_digest: self.hasher.digest(&code),
            created_at: now,
            expires_at: now + self.ttl_secs as i64,
            attempts_used: 0,
            max_attempts: self.max_attempts,
            status: ChallengeStatus::Active,
            verified_at: None,
        };

        let id = challenge.id.clone();
        let expires_at = challenge.expires_at;
        self.store.put(challenge).await?;
        self.stats.issued.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            challenge_id = %id,
            subject_id = %subject_id,
            purpose = ?purpose,
            expires_at = expires_at,
            "Issued challenge"
        );

        Ok(IssuedChallenge {
            id,
            code,
            expires_at,
        })
    }

    /// A resend is a fresh start; the previous challenge is superseded by
    /// the put. Cooldown policy belongs to the boundary, not here.
    pub async fn resend(
        &self,
        subject_id: &str,
        purpose: ChallengePurpose,
    ) -> Result<IssuedChallenge, WardenError> {
        self.start(subject_id, purpose).await
    }

    /// Check a candidate code against a challenge.
    pub async fn verify(
        &self,
        challenge_id: &str,
        candidate: &str,
    ) -> Result<VerifyOutcome, WardenError> {
        let Some(challenge) = self.store.get(challenge_id).await? else {
            return Ok(self.deny(challenge_id, VerifyOutcome::NotFound));
        };

        // Expiry wins over every other check; the store already presents
        // overdue records as expired.
        if challenge.status != ChallengeStatus::Active {
            return Ok(self.deny(challenge_id, outcome_for_settled(&challenge)));
        }

        if self.hasher.verify(candidate, &challenge.code_digest) {
            match self.store.apply(challenge_id, Mutation::MarkVerified).await? {
                ApplyOutcome::Applied(_) => {
                    self.stats.verified.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(challenge_id = %challenge_id, "Challenge verified");
                    Ok(VerifyOutcome::Success)
                }
                // A racing caller settled the record between our read and
                // this write; report what it became.
                ApplyOutcome::Rejected(current) => {
                    Ok(self.deny(challenge_id, outcome_for_settled(&current)))
                }
                ApplyOutcome::Missing => Ok(self.deny(challenge_id, VerifyOutcome::NotFound)),
            }
        } else {
            match self.store.apply(challenge_id, Mutation::RecordFailure).await? {
                ApplyOutcome::Applied(current) => {
                    if current.status == ChallengeStatus::Exhausted {
                        tracing::warn!(
                            challenge_id = %challenge_id,
                            attempts_used = current.attempts_used,
                            "Challenge exhausted"
                        );
                        Ok(self.deny(challenge_id, VerifyOutcome::Exhausted))
                    } else {
                        Ok(self.deny(
                            challenge_id,
                            VerifyOutcome::Invalid {
                                attempts_remaining: current.attempts_remaining(),
                            },
                        ))
                    }
                }
                ApplyOutcome::Rejected(current) => {
                    Ok(self.deny(challenge_id, outcome_for_settled(&current)))
                }
                ApplyOutcome::Missing => Ok(self.deny(challenge_id, VerifyOutcome::NotFound)),
            }
        }
    }

    /// The subject's active challenge, if any.
    pub async fn pending(&self, subject_id: &str) -> Result<Option<Challenge>, WardenError> {
        self.store.active_for_subject(subject_id).await
    }

    pub fn stats_snapshot(&self) -> VerifierStatsSnapshot {
        VerifierStatsSnapshot {
            issued: self.stats.issued.load(Ordering::Relaxed),
            verified: self.stats.verified.load(Ordering::Relaxed),
            denied: self.stats.denied.load(Ordering::Relaxed),
        }
    }

    fn deny(&self, challenge_id: &str, outcome: VerifyOutcome) -> VerifyOutcome {
        self.stats.denied.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(challenge_id = %challenge_id, outcome = ?outcome, "Verification denied");
        outcome
    }
}

/// Map a settled (non-active) record to the caller-facing outcome.
fn outcome_for_settled(challenge: &Challenge) -> VerifyOutcome {
    match challenge.status {
        ChallengeStatus::Verified => VerifyOutcome::AlreadyUsed,
        ChallengeStatus::Expired => VerifyOutcome::Expired,
        ChallengeStatus::Exhausted => VerifyOutcome::Exhausted,
        ChallengeStatus::Superseded => VerifyOutcome::Superseded,
        // The store never hands an active record to this path
        ChallengeStatus::Active => VerifyOutcome::Expired,
    }
}

/// 16 random bytes, URL-safe base64.
fn new_challenge_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};

    fn verifier_at(start: i64) -> (ChallengeVerifier, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(start));
        let store = Arc::new(MemoryStore::with_clock(clock.clone(), 60));
        (ChallengeVerifier::new(store, clock.clone(), 60, 3), clock)
    }

    /// A code guaranteed not to match the issued one.
    fn wrong(code: &str) -> String {
        if code == "000000" {
            "000001".to_string()
        } else {
            "000000".to_string()
        }
    }

    #[tokio::test]
    async fn correct_code_succeeds_exactly_once() {
        let (verifier, _clock) = verifier_at(1_000);
        let issued = verifier.start("user1", ChallengePurpose::Login).await.unwrap();

        let first = verifier.verify(&issued.id, &issued.code).await.unwrap();
        assert_eq!(first, VerifyOutcome::Success);

        // Same code, same id: the one-time-use guarantee
        let second = verifier.verify(&issued.id, &issued.code).await.unwrap();
        assert_eq!(second, VerifyOutcome::AlreadyUsed);

        let third = verifier.verify(&issued.id, &wrong(&issued.code)).await.unwrap();
        assert_eq!(third, VerifyOutcome::AlreadyUsed);
    }

    #[tokio::test]
    async fn three_wrong_codes_exhaust_and_stay_exhausted() {
        let (verifier, _clock) = verifier_at(1_000);
        let issued = verifier.start("user1", ChallengePurpose::Login).await.unwrap();
        let bad = wrong(&issued.code);

        assert_eq!(
            verifier.verify(&issued.id, &bad).await.unwrap(),
            VerifyOutcome::Invalid {
                attempts_remaining: 2
            }
        );
        assert_eq!(
            verifier.verify(&issued.id, &bad).await.unwrap(),
            VerifyOutcome::Invalid {
                attempts_remaining: 1
            }
        );
        assert_eq!(
            verifier.verify(&issued.id, &bad).await.unwrap(),
            VerifyOutcome::Exhausted
        );

        // The correct code never succeeds post-exhaustion
        assert_eq!(
            verifier.verify(&issued.id, &issued.code).await.unwrap(),
            VerifyOutcome::Exhausted
        );
    }

    #[tokio::test]
    async fn expiry_beats_a_correct_code() {
        let (verifier, clock) = verifier_at(1_000);
        let issued = verifier.start("user2", ChallengePurpose::Login).await.unwrap();

        clock.advance(61);

        assert_eq!(
            verifier.verify(&issued.id, &issued.code).await.unwrap(),
            VerifyOutcome::Expired
        );
    }

    #[tokio::test]
    async fn expiry_applies_even_with_attempts_left() {
        let (verifier, clock) = verifier_at(1_000);
        let issued = verifier.start("user2", ChallengePurpose::Login).await.unwrap();

        assert_eq!(
            verifier.verify(&issued.id, &wrong(&issued.code)).await.unwrap(),
            VerifyOutcome::Invalid {
                attempts_remaining: 2
            }
        );

        clock.advance(61);

        assert_eq!(
            verifier.verify(&issued.id, &issued.code).await.unwrap(),
            VerifyOutcome::Expired
        );
    }

    #[tokio::test]
    async fn submission_at_the_expiry_instant_is_expired() {
        let (verifier, clock) = verifier_at(1_000);
        let issued = verifier.start("user2", ChallengePurpose::Login).await.unwrap();

        clock.advance(60);

        assert_eq!(
            verifier.verify(&issued.id, &issued.code).await.unwrap(),
            VerifyOutcome::Expired
        );
    }

    #[tokio::test]
    async fn resend_supersedes_and_only_the_new_code_works() {
        let (verifier, _clock) = verifier_at(1_000);
        let first = verifier.start("user3", ChallengePurpose::Login).await.unwrap();
        let second = verifier.resend("user3", ChallengePurpose::Login).await.unwrap();

        assert_ne!(first.id, second.id);

        assert_eq!(
            verifier.verify(&first.id, &first.code).await.unwrap(),
            VerifyOutcome::Superseded
        );
        assert_eq!(
            verifier.verify(&second.id, &second.code).await.unwrap(),
            VerifyOutcome::Success
        );
    }

    #[tokio::test]
    async fn unknown_ids_read_as_not_found() {
        let (verifier, _clock) = verifier_at(1_000);

        assert_eq!(
            verifier.verify("no-such-challenge", "123456").await.unwrap(),
            VerifyOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn subjects_do_not_interact() {
        let (verifier, _clock) = verifier_at(1_000);
        let a = verifier.start("alice", ChallengePurpose::Login).await.unwrap();
        let b = verifier.start("bob", ChallengePurpose::Signup).await.unwrap();

        assert_eq!(
            verifier.verify(&b.id, &b.code).await.unwrap(),
            VerifyOutcome::Success
        );
        assert_eq!(
            verifier.verify(&a.id, &a.code).await.unwrap(),
            VerifyOutcome::Success
        );
    }

    #[tokio::test]
    async fn pending_reports_the_active_challenge_until_it_settles() {
        let (verifier, clock) = verifier_at(1_000);
        assert!(verifier.pending("user1").await.unwrap().is_none());

        let issued = verifier.start("user1", ChallengePurpose::Login).await.unwrap();
        let pending = verifier.pending("user1").await.unwrap().unwrap();
        assert_eq!(pending.id, issued.id);
        assert_eq!(pending.expires_at, issued.expires_at);

        clock.advance(61);
        assert!(verifier.pending("user1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stats_count_issues_and_outcomes() {
        let (verifier, _clock) = verifier_at(1_000);
        let issued = verifier.start("user1", ChallengePurpose::Login).await.unwrap();

        verifier.verify(&issued.id, &wrong(&issued.code)).await.unwrap();
        verifier.verify(&issued.id, &issued.code).await.unwrap();

        let stats = verifier.stats_snapshot();
        assert_eq!(stats.issued, 1);
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.denied, 1);
    }
}
