//! Common error types for Warden components.

use thiserror::Error;

/// Operational failures across Warden components.
///
/// Verification outcomes (wrong code, expired challenge, ...) are not
/// errors - they are normal [`VerifyOutcome`](crate::types::VerifyOutcome)
/// values returned to the caller. This enum covers the conditions that
/// prevent an operation from completing at all.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store connection/operation error
    #[error("Store error: {0}")]
    Store(String),

    /// Store operation exceeded its deadline
    #[error("Store operation timed out: {0}")]
    StoreTimeout(String),

    /// Notification channel failure (the challenge itself stays valid)
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Issuance cooldown is still running for this subject
    #[error("Cooldown active: retry in {retry_after_secs}s")]
    CooldownActive { retry_after_secs: u64 },

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WardenError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::Store(_) => 503,
            Self::StoreTimeout(_) => 504,
            Self::Dispatch(_) => 502,
            Self::CooldownActive { .. } => 429,
            Self::InvalidInput(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if the caller should retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::StoreTimeout(_))
    }
}
