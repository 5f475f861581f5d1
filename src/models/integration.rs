use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::crypto::TokenCipher;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Github,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Disconnected,
    Pending,
    Connected,
    Failed,
}

/// A stored third-party credential for one owner. The token never leaves the
/// struct in plaintext except through the cipher seam.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Integration {
    pub id: Uuid,
    pub owner: String,
    pub provider: Provider,
    pub status: IntegrationStatus,
    pub token_encrypted: String,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    pub fn new(owner: &str, provider: Provider, cipher: &impl TokenCipher, token: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            provider,
            status: IntegrationStatus::Disconnected,
            token_encrypted: cipher.encrypt(token),
            last_validated_at: None,
            error_message: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_token(&mut self, cipher: &impl TokenCipher, token: &str) {
        self.token_encrypted = cipher.encrypt(token);
        self.updated_at = Utc::now();
    }

    pub fn token(&self, cipher: &impl TokenCipher) -> Result<String> {
        cipher.decrypt(&self.token_encrypted)
    }
}
