//! Bearer-token authenticator (C4).
//!
//! Maps a static, config-supplied key table to agent identities, hashes
//! the token (salted HMAC-SHA256 if a salt is configured, plain SHA-256
//! otherwise — the teacher's webhook-signing crates, repurposed from
//! payload signing to key hashing), and upserts the agent record on every
//! successful authentication.

use crate::db::Db;
use crate::models::RegisterAgentInput;
use crate::visibility::Visibility;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentKeyRecord {
    pub key: String,
    pub agent: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub clearance_level: Visibility,
}

pub struct Authenticator {
    records: Vec<AgentKeyRecord>,
    salt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthResult {
    pub agent_id: String,
    pub agent_name: String,
    pub clearance_level: Visibility,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing API key")]
    MissingKey,
    #[error("Invalid API key")]
    InvalidKey,
    #[error(transparent)]
    Store(#[from] crate::error::StoreError),
}

impl Authenticator {
    pub fn new(records: Vec<AgentKeyRecord>, salt: Option<String>) -> Self {
        Self { records, salt }
    }

    fn hash(&self, token: &str) -> String {
        match &self.salt {
            Some(salt) => {
                let mut mac = HmacSha256::new_from_slice(salt.as_bytes())
                    .expect("HMAC accepts a key of any length");
                mac.update(token.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            None => {
                let mut hasher = Sha256::new();
                hasher.update(token.as_bytes());
                hex::encode(hasher.finalize())
            }
        }
    }

    pub fn authenticate(&self, db: &Db, token: &str) -> Result<AuthResult, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingKey);
        }
        let record = self
            .records
            .iter()
            .find(|r| r.key == token)
            .ok_or(AuthError::InvalidKey)?;

        let hash = self.hash(token);

        let agent = db.register_agent(RegisterAgentInput {
            name: record.agent.clone(),
            agent_type: record.agent_type.clone(),
            capabilities: record.capabilities.clone(),
            clearance_level: Some(record.clearance_level),
            api_key_hash: Some(hash),
        })?;

        Ok(AuthResult {
            agent_id: agent.id,
            agent_name: agent.name,
            clearance_level: agent.clearance_level,
        })
    }
}
