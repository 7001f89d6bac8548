//! Environment-variable configuration (§6 "Config surface", SPEC_FULL A.3).
//!
//! The teacher's `from_env()` idiom (see `rate_limit::RateLimitConfig`),
//! extended with a JSON config file for the agent-key table since that
//! part of the config surface is structured, not scalar.

use crate::auth::AgentKeyRecord;
use std::env;

#[derive(Clone)]
pub struct BridgeConfig {
    pub database_path: String,
    pub max_body_size: u64,
    pub key_salt: Option<String>,
    pub agents_file: Option<String>,
    pub poll_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            database_path: "data/agorai.db".to_string(),
            max_body_size: 1024 * 1024,
            key_salt: None,
            agents_file: None,
            poll_interval_ms: 3000,
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = env::var("AGORAI_DATABASE_PATH") {
            config.database_path = v;
        }
        if let Ok(v) = env::var("AGORAI_MAX_BODY_SIZE")
            && let Ok(n) = v.parse::<u64>()
        {
            config.max_body_size = n;
        }
        config.key_salt = env::var("AGORAI_KEY_SALT").ok();
        config.agents_file = env::var("AGORAI_AGENTS_FILE").ok();
        if let Ok(v) = env::var("AGORAI_POLL_INTERVAL_MS")
            && let Ok(n) = v.parse::<u64>()
        {
            config.poll_interval_ms = n;
        }
        config
    }
}

/// Loads the agent-key table from `AGORAI_AGENTS_FILE`. Absent file or a
/// parse failure is a fatal startup error (§7 "Fatality"); callers should
/// only invoke this once, at liftoff.
pub fn load_agent_records(path: &str) -> Result<Vec<AgentKeyRecord>, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("cannot read {path}: {e}"))?;
    serde_json::from_str(&raw).map_err(|e| format!("invalid agent records in {path}: {e}"))
}
