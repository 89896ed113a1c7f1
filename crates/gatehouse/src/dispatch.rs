//! Outbound notification port.
//!
//! Delivery itself (SMTP relay, SMS gateway, ...) belongs to external
//! collaborators; this module only fixes the seam. Dispatch failure never
//! rolls back a challenge - the code stays valid for its ttl and the
//! caller retries delivery through resend.

use async_trait::async_trait;

use warden_common::{ChallengePurpose, WardenError};

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver `code` to `channel_address` out-of-band. This call is the
    /// only place the plaintext code may leave the process.
    async fn send(
        &self,
        subject_id: &str,
        channel_address: &str,
        code: &str,
        purpose: ChallengePurpose,
    ) -> Result<(), WardenError>;
}

/// Development stand-in: records that a delivery happened, without the
/// code and with the address masked.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(
        &self,
        subject_id: &str,
        channel_address: &str,
        _code: &str,
        purpose: ChallengePurpose,
    ) -> Result<(), WardenError> {
        tracing::info!(
            subject_id = %subject_id,
            channel = %mask_address(channel_address),
            purpose = ?purpose,
            "Dispatched verification code"
        );
        Ok(())
    }
}

/// "alice@example.com" -> "a***@example.com"
fn mask_address(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) => match local.chars().next() {
            Some(first) => format!("{first}***@{domain}"),
            None => format!("***@{domain}"),
        },
        None => "***".to_string(),
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Captures dispatched codes so tests can play the user.
    #[derive(Default)]
    pub struct RecordingDispatcher {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn send(
            &self,
            subject_id: &str,
            _channel_address: &str,
            code: &str,
            _purpose: ChallengePurpose,
        ) -> Result<(), WardenError> {
            if self.fail {
                return Err(WardenError::Dispatch("simulated channel outage".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((subject_id.to_string(), code.to_string()));
            Ok(())
        }
    }
}
