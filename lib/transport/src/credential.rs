//! Credential vault for node authentication material.
//!
//! All node credentials are encrypted at rest. No plaintext credentials are
//! stored in configuration or logs.

use crate::error::CredentialError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowctl_core::{CredentialId, UserId};
use serde::{Deserialize, Serialize};

/// The type of credential a node authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Password,
    PrivateKey,
}

/// Credential data (encrypted at rest).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialData {
    Password { password: String },
    PrivateKey {
        private_key_pem: String,
        passphrase: Option<String>,
    },
}

impl CredentialData {
    #[must_use]
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: password.into(),
        }
    }

    #[must_use]
    pub fn private_key(pem: impl Into<String>, passphrase: Option<String>) -> Self {
        Self::PrivateKey {
            private_key_pem: pem.into(),
            passphrase,
        }
    }

    #[must_use]
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Password { .. } => CredentialType::Password,
            Self::PrivateKey { .. } => CredentialType::PrivateKey,
        }
    }
}

/// A stored credential's metadata (never its secret material).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    /// Owning user, for audit and listing.
    pub owner_id: UserId,
    /// Username to authenticate as; paired with the vaulted secret data.
    pub username: String,
    pub name: String,
    pub credential_type: CredentialType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Credential {
    #[must_use]
    pub fn new(
        owner_id: UserId,
        username: impl Into<String>,
        name: impl Into<String>,
        credential_type: CredentialType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CredentialId::new(),
            owner_id,
            username: username.into(),
            name: name.into(),
            credential_type,
            created_at: now,
            updated_at: now,
            last_used_at: None,
        }
    }

    pub fn mark_used(&mut self) {
        self.last_used_at = Some(Utc::now());
    }
}

/// Trait for credential storage, consumed internally by `DriverFactory`
/// implementations to authenticate SSH/QUIC-SSH sessions.
///
/// Implementations must encrypt credentials at rest.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn store(
        &self,
        credential: Credential,
        data: CredentialData,
    ) -> Result<CredentialId, CredentialError>;

    async fn get_metadata(&self, id: CredentialId) -> Result<Credential, CredentialError>;

    async fn get_data(&self, id: CredentialId) -> Result<CredentialData, CredentialError>;

    async fn update_data(&self, id: CredentialId, data: CredentialData) -> Result<(), CredentialError>;

    async fn delete(&self, id: CredentialId) -> Result<(), CredentialError>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Credential>, CredentialError>;
}

/// In-memory `CredentialVault` for tests and local development.
///
/// Stores `CredentialData` as given; it does not encrypt at rest, so it
/// must never back a real deployment.
#[derive(Default)]
pub struct InMemoryCredentialVault {
    rows: std::sync::Mutex<std::collections::HashMap<CredentialId, (Credential, CredentialData)>>,
}

impl InMemoryCredentialVault {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialVault for InMemoryCredentialVault {
    async fn store(&self, credential: Credential, data: CredentialData) -> Result<CredentialId, CredentialError> {
        let id = credential.id;
        self.rows.lock().expect("lock poisoned").insert(id, (credential, data));
        Ok(id)
    }

    async fn get_metadata(&self, id: CredentialId) -> Result<Credential, CredentialError> {
        self.rows
            .lock()
            .expect("lock poisoned")
            .get(&id)
            .map(|(cred, _)| cred.clone())
            .ok_or(CredentialError::NotFound { id })
    }

    async fn get_data(&self, id: CredentialId) -> Result<CredentialData, CredentialError> {
        self.rows
            .lock()
            .expect("lock poisoned")
            .get(&id)
            .map(|(_, data)| data.clone())
            .ok_or(CredentialError::NotFound { id })
    }

    async fn update_data(&self, id: CredentialId, data: CredentialData) -> Result<(), CredentialError> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        let (_, existing) = rows.get_mut(&id).ok_or(CredentialError::NotFound { id })?;
        *existing = data;
        Ok(())
    }

    async fn delete(&self, id: CredentialId) -> Result<(), CredentialError> {
        self.rows
            .lock()
            .expect("lock poisoned")
            .remove(&id)
            .map(|_| ())
            .ok_or(CredentialError::NotFound { id })
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Credential>, CredentialError> {
        Ok(self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .map(|(cred, _)| cred.clone())
            .filter(|cred| cred.owner_id == user_id)
            .collect())
    }
}
