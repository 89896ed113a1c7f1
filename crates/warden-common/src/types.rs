//! Core types shared across Warden components.

use serde::{Deserialize, Serialize};

/// What a challenge is proving possession for.
///
/// Carried as metadata (the dispatcher picks its template from it); the
/// one-active-challenge rule is keyed by subject alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengePurpose {
    #[default]
    Login,
    Signup,
}

/// Challenge lifecycle state.
///
/// `Active` is the only state that can transition; every other state is
/// terminal and a record in one of them never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    /// Awaiting verification
    Active,
    /// Correct code was submitted exactly once
    Verified,
    /// The validity window elapsed
    Expired,
    /// The failed-attempt bound was hit
    Exhausted,
    /// A newer challenge for the same subject replaced this one
    Superseded,
}

impl ChallengeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// A second-factor verification challenge.
///
/// The store owns these records exclusively; the verifier re-reads one for
/// every operation and never holds a copy across operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    /// Opaque identifier handed to the caller; never reused
    pub id: String,

    /// Principal being verified (owned by the external account store)
    pub subject_id: String,

    /// Login or signup flow
    #[serde(default)]
    pub purpose: ChallengePurpose,

    /// base64(SHA-256(code)); the plaintext code is never persisted
    pub code_digest: String,

    /// Unix timestamp (seconds)
    pub created_at: i64,

    /// created_at + ttl; reads at or past this instant report Expired
    pub expires_at: i64,

    /// Failed attempts so far; never decreases
    pub attempts_used: u32,

    /// Failed-attempt bound
    pub max_attempts: u32,

    /// Current lifecycle state
    pub status: ChallengeStatus,

    /// Set on the Active -> Verified transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<i64>,
}

impl Challenge {
    /// A submission at the expiry instant counts as expired (fail-closed).
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_used)
    }
}

/// Outcome of a verification attempt.
///
/// A closed set, so every caller branch is exhaustive. `NotFound` is
/// deliberately indistinguishable from an expired challenge on the wire -
/// the response never reveals whether a subject or challenge ever existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// Correct code, first time; the one-time-use transition happened
    Success,
    /// Wrong code, attempts remain
    Invalid { attempts_remaining: u32 },
    /// The validity window elapsed before a correct submission
    Expired,
    /// The challenge was already verified once
    AlreadyUsed,
    /// A newer challenge replaced this one (a resend happened)
    Superseded,
    /// The failed-attempt bound was hit
    Exhausted,
    /// No such challenge (unknown, or gone past retention)
    NotFound,
}

impl VerifyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn attempts_remaining(&self) -> Option<u32> {
        match self {
            Self::Invalid { attempts_remaining } => Some(*attempts_remaining),
            _ => None,
        }
    }
}

/// Wire response for a verification call: `{success, reason,
/// attempts_remaining?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: VerifyOutcome,
}

impl From<VerifyOutcome> for VerifyResponse {
    fn from(outcome: VerifyOutcome) -> Self {
        Self {
            success: outcome.is_success(),
            outcome,
        }
    }
}

/// Wire response for a start/resend call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeReceipt {
    pub challenge_id: String,

    /// Unix timestamp (seconds)
    pub expires_at: i64,

    /// false when the notification channel reported failure; the challenge
    /// itself remains valid for its ttl and can be re-sent
    pub dispatched: bool,
}

/// Wire response for the pending-challenge probe. Shape is identical
/// whether or not the subject exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingStatus {
    pub pending: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}
