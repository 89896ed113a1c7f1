//! Application state and shared resources.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, StoreBackend};
use crate::dispatch::{LogDispatcher, NotificationDispatcher};
use crate::otp::ChallengeVerifier;
use crate::store::{ChallengeStore, CooldownGate, MemoryStore, RedisStore, SystemClock};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Challenge store (redis or in-process)
    pub store: Arc<dyn ChallengeStore>,

    /// Issuance cooldown gate (boundary policy, not core policy)
    pub gate: Arc<dyn CooldownGate>,

    /// Challenge lifecycle driver
    pub verifier: Arc<ChallengeVerifier>,

    /// Outbound notification port
    pub dispatcher: Arc<dyn NotificationDispatcher>,

    /// Node identifier for logs and metrics
    pub node_id: String,
}

impl AppState {
    /// Create new application state, connecting the selected store backend
    pub async fn new(config: AppConfig) -> Result<Self> {
        let clock = Arc::new(SystemClock);
        let op_timeout = Duration::from_millis(config.store_timeout_ms);

        let (store, gate): (Arc<dyn ChallengeStore>, Arc<dyn CooldownGate>) =
            match config.store_backend {
                StoreBackend::Redis => {
                    let client = redis::Client::open(config.redis_url.as_str())
                        .context("Failed to create Redis client")?;
                    let conn = ConnectionManager::new(client)
                        .await
                        .context("Failed to connect to Redis")?;

                    let store = Arc::new(RedisStore::new(
                        conn,
                        clock.clone(),
                        config.challenge.retention_secs,
                        op_timeout,
                    ));
                    (store.clone(), store)
                }
                StoreBackend::Memory => {
                    let store = Arc::new(MemoryStore::new(config.challenge.retention_secs));
                    (store.clone(), store)
                }
            };

        let verifier = Arc::new(ChallengeVerifier::new(
            store.clone(),
            clock,
            config.challenge.ttl_secs,
            config.challenge.max_attempts,
        ));

        let node_id = config.node_id.clone();

        Ok(Self {
            config,
            store,
            gate,
            verifier,
            dispatcher: Arc::new(LogDispatcher),
            node_id,
        })
    }
}
