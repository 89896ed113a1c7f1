//! Challenge lifecycle endpoints.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use warden_common::{
    ChallengePurpose, ChallengeReceipt, PendingStatus, VerifyResponse, WardenError,
};

use crate::state::AppState;
use crate::store::CooldownDecision;

use super::ApiError;

#[derive(Deserialize)]
pub struct StartRequest {
    subject_id: String,
    channel_address: String,
    #[serde(default)]
    purpose: ChallengePurpose,
}

/// Start a verification challenge for a subject.
///
/// Issues a fresh code, superseding any active challenge for the subject,
/// and hands the code to the notification channel. Gated by the same
/// per-subject cooldown as resend - both produce outbound notifications.
pub async fn start_challenge(
    State(state): State<AppState>,
    Json(payload): Json<StartRequest>,
) -> Result<Json<ChallengeReceipt>, ApiError> {
    issue(&state, payload).await
}

/// Re-issue a challenge (new code, prior challenge superseded).
pub async fn resend_challenge(
    State(state): State<AppState>,
    Json(payload): Json<StartRequest>,
) -> Result<Json<ChallengeReceipt>, ApiError> {
    issue(&state, payload).await
}

async fn issue(
    state: &AppState,
    payload: StartRequest,
) -> Result<Json<ChallengeReceipt>, ApiError> {
    if payload.subject_id.is_empty() {
        return Err(WardenError::InvalidInput("subject_id is required".into()).into());
    }
    if payload.channel_address.is_empty() {
        return Err(WardenError::InvalidInput("channel_address is required".into()).into());
    }

    // Pacing the notification channel is boundary policy; the verifier
    // core only guarantees at-most-one-active-challenge.
    let cooldown = state.config.resend.cooldown_secs;
    if let CooldownDecision::Blocked { retry_after_secs } = state
        .gate
        .try_acquire(&payload.subject_id, cooldown)
        .await?
    {
        tracing::debug!(
            subject_id = %payload.subject_id,
            retry_after_secs = retry_after_secs,
            "Issuance blocked by cooldown"
        );
        return Err(WardenError::CooldownActive { retry_after_secs }.into());
    }

    let issued = state
        .verifier
        .start(&payload.subject_id, payload.purpose)
        .await?;

    // Dispatch failure is reported, never fatal: the challenge stays
    // valid for its ttl and the caller can retry through resend.
    let dispatched = match state
        .dispatcher
        .send(
            &payload.subject_id,
            &payload.channel_address,
            &issued.code,
            payload.purpose,
        )
        .await
    {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                subject_id = %payload.subject_id,
                error = %e,
                "Dispatch failed; challenge remains valid"
            );
            false
        }
    };

    Ok(Json(ChallengeReceipt {
        challenge_id: issued.id,
        expires_at: issued.expires_at,
        dispatched,
    }))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    challenge_id: String,
    code: String,
}

/// Check a submitted code against a challenge.
pub async fn verify_challenge(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let outcome = state
        .verifier
        .verify(&payload.challenge_id, &payload.code)
        .await?;

    Ok(Json(VerifyResponse::from(outcome)))
}

#[derive(Deserialize)]
pub struct PendingQuery {
    subject_id: String,
}

/// Report whether a subject has an active challenge. The response shape
/// is identical for unknown subjects.
pub async fn pending_challenge(
    State(state): State<AppState>,
    Query(params): Query<PendingQuery>,
) -> Result<Json<PendingStatus>, ApiError> {
    let active = state.verifier.pending(&params.subject_id).await?;

    Ok(Json(PendingStatus {
        pending: active.is_some(),
        expires_at: active.map(|challenge| challenge.expires_at),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use warden_common::VerifyOutcome;

    use crate::config::{AppConfig, StoreBackend};
    use crate::dispatch::testing::RecordingDispatcher;
    use crate::otp::ChallengeVerifier;
    use crate::state::AppState;
    use crate::store::{MemoryStore, SystemClock};

    use super::*;

    fn state_with(dispatcher: Arc<RecordingDispatcher>) -> AppState {
        let config = AppConfig {
            store_backend: StoreBackend::Memory,
            ..AppConfig::default()
        };

        let store = Arc::new(MemoryStore::new(config.challenge.retention_secs));
        let verifier = Arc::new(ChallengeVerifier::new(
            store.clone(),
            Arc::new(SystemClock),
            config.challenge.ttl_secs,
            config.challenge.max_attempts,
        ));
        let node_id = config.node_id.clone();

        AppState {
            config,
            store: store.clone(),
            gate: store,
            verifier,
            dispatcher,
            node_id,
        }
    }

    fn request(subject: &str) -> StartRequest {
        StartRequest {
            subject_id: subject.into(),
            channel_address: format!("{subject}@example.com"),
            purpose: ChallengePurpose::Login,
        }
    }

    #[tokio::test]
    async fn issue_hands_the_code_to_the_dispatcher_only() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let state = state_with(dispatcher.clone());

        let Json(receipt) = issue(&state, request("user1")).await.unwrap();
        assert!(receipt.dispatched);

        let sent_code = {
            let sent = dispatcher.sent.lock().unwrap();
            let (subject, code) = sent.first().expect("one dispatch");
            assert_eq!(subject, "user1");
            code.clone()
        };

        // The dispatched code is the one that verifies
        assert_eq!(
            state
                .verifier
                .verify(&receipt.challenge_id, &sent_code)
                .await
                .unwrap(),
            VerifyOutcome::Success
        );
    }

    #[tokio::test]
    async fn dispatch_failure_is_reported_but_not_fatal() {
        let dispatcher = Arc::new(RecordingDispatcher {
            sent: Default::default(),
            fail: true,
        });
        let state = state_with(dispatcher);

        let Json(receipt) = issue(&state, request("user1")).await.unwrap();
        assert!(!receipt.dispatched);

        // The challenge is live despite the channel outage
        let pending = state.verifier.pending("user1").await.unwrap().unwrap();
        assert_eq!(pending.id, receipt.challenge_id);
    }

    #[tokio::test]
    async fn a_second_issue_inside_the_cooldown_is_blocked() {
        let state = state_with(Arc::new(RecordingDispatcher::default()));

        issue(&state, request("user1")).await.unwrap();
        let blocked = issue(&state, request("user1")).await;
        assert!(blocked.is_err());

        // A different subject is unaffected
        issue(&state, request("user2")).await.unwrap();
    }

    #[tokio::test]
    async fn blank_subjects_are_refused_before_any_work() {
        let state = state_with(Arc::new(RecordingDispatcher::default()));

        let result = issue(
            &state,
            StartRequest {
                subject_id: String::new(),
                channel_address: "a@example.com".into(),
                purpose: ChallengePurpose::Login,
            },
        )
        .await;
        assert!(result.is_err());
    }
}
