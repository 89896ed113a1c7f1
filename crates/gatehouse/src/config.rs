//! Configuration management for Gatehouse.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use warden_common::constants::{
    CHALLENGE_TTL_SECS, DEFAULT_LISTEN_ADDR, DEFAULT_REDIS_URL, MAX_ATTEMPTS,
    RESEND_COOLDOWN_SECS, RETENTION_SECS, STORE_TIMEOUT_MS,
};

/// Which store backend holds challenge state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis store; required when running more than one instance
    #[default]
    Redis,
    /// In-process store; single instance only
    Memory,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Store backend selection
    #[serde(default)]
    pub store_backend: StoreBackend,

    /// This node's unique ID (auto-generated if not set)
    #[serde(default = "generate_node_id")]
    pub node_id: String,

    /// Store operation deadline in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Challenge lifecycle configuration
    #[serde(default)]
    pub challenge: ChallengeConfig,

    /// Issuance pacing configuration
    #[serde(default)]
    pub resend: ResendConfig,
}

/// Challenge lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeConfig {
    /// Challenge validity window in seconds
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Failed attempts allowed per challenge
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How long settled challenges stay readable, in seconds
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            max_attempts: default_max_attempts(),
            retention_secs: default_retention(),
        }
    }
}

/// Issuance pacing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ResendConfig {
    /// Cooldown between issuances per subject, in seconds
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for ResendConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_store_timeout_ms() -> u64 { STORE_TIMEOUT_MS }
fn default_ttl() -> u64 { CHALLENGE_TTL_SECS }
fn default_max_attempts() -> u32 { MAX_ATTEMPTS }
fn default_retention() -> u64 { RETENTION_SECS }
fn default_cooldown() -> u64 { RESEND_COOLDOWN_SECS }

fn generate_node_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    format!("node-{:08x}", rng.random::<u32>())
}

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if args.memory_store {
            config.store_backend = StoreBackend::Memory;
        }

        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            listen_addr: default_listen_addr(),
            store_backend: StoreBackend::default(),
            node_id: generate_node_id(),
            store_timeout_ms: default_store_timeout_ms(),
            challenge: ChallengeConfig::default(),
            resend: ResendConfig::default(),
        }
    }
}
