//! Durable credential storage.
//!
//! One `Account` record per stored identity, at most one per
//! `(provider, account_id)` pair. Backends are interchangeable at process
//! start and expose the same contract; the rest of the system never depends
//! on a concrete backend. The pool treats the store as the sole owner of
//! records and keeps only a read-through index of its own.

mod file;
mod git;
mod object;
mod sqlite;

pub use file::FileStore;
pub use git::GitStore;
pub use object::{ObjectStore, ObjectStoreConfig};
pub use sqlite::SqliteStore;

use crate::provider::Provider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the credential was obtained, which decides whether it can be
/// refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    OAuth,
    ApiKey,
    Cookie,
}

/// Pool-visible lifecycle state. Transitions are restricted:
/// `active → cooling → active`, or `active/cooling → disabled`.
/// Disabling is one-way until an explicit re-enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Cooling,
    Disabled,
}

/// Free-form identity metadata attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One stored identity for a provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct Account {
    pub provider: Provider,
    pub account_id: String,
    pub kind: AccountKind,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: AccountMetadata,
    pub status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// Tokens never appear in Debug output, so an account can be logged safely.
impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("provider", &self.provider)
            .field("account_id", &self.account_id)
            .field("kind", &self.kind)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("status", &self.status)
            .field("cooldown_until", &self.cooldown_until)
            .field("last_used_at", &self.last_used_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Account {
    pub fn new(provider: Provider, account_id: impl Into<String>, kind: AccountKind) -> Self {
        Self {
            provider,
            account_id: account_id.into(),
            kind,
            access_token: String::new(),
            refresh_token: None,
            expires_at: None,
            metadata: AccountMetadata::default(),
            status: AccountStatus::Active,
            cooldown_until: None,
            last_used_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Key uniquely identifying this record in any backend.
    pub fn key(&self) -> String {
        account_key(self.provider, &self.account_id)
    }

    /// Whether the access token expires within `buffer_seconds` from now.
    pub fn expires_within(&self, buffer_seconds: i64) -> bool {
        match self.expires_at {
            Some(at) => (at - Utc::now()).num_seconds() < buffer_seconds,
            None => false,
        }
    }

    /// Whether an elapsed cooldown makes this record eligible for lazy
    /// promotion back to `Active`.
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == AccountStatus::Cooling
            && self.cooldown_until.map(|until| now >= until).unwrap_or(true)
    }

    /// Copy with secrets blanked, for export without credentials.
    pub fn without_secrets(&self) -> Self {
        let mut copy = self.clone();
        copy.access_token = String::new();
        copy.refresh_token = None;
        copy
    }
}

pub fn account_key(provider: Provider, account_id: &str) -> String {
    format!("{}-{}", provider, account_id)
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("account {provider}/{account_id} not found")]
    NotFound { provider: String, account_id: String },

    /// Disk or network failure. Retryable by the caller.
    #[error("store IO failure: {0}")]
    Io(String),

    /// Optimistic-concurrency violation on concurrent save.
    #[error("concurrent update of account {provider}/{account_id}")]
    Conflict { provider: String, account_id: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(provider: Provider, account_id: &str) -> Self {
        StoreError::NotFound {
            provider: provider.to_string(),
            account_id: account_id.to_string(),
        }
    }

    pub fn conflict(provider: Provider, account_id: &str) -> Self {
        StoreError::Conflict {
            provider: provider.to_string(),
            account_id: account_id.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence contract every backend implements.
///
/// `save` bumps `updated_at` and rejects writes whose `updated_at` snapshot
/// is older than the stored record (`StoreError::Conflict`). All methods are
/// safe for concurrent callers.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn list(&self) -> StoreResult<Vec<Account>>;

    async fn get(&self, provider: Provider, account_id: &str) -> StoreResult<Account>;

    /// Persist `account`, returning the stored copy (with the new
    /// `updated_at`).
    async fn save(&self, account: Account) -> StoreResult<Account>;

    async fn delete(&self, provider: Provider, account_id: &str) -> StoreResult<()>;
}

/// Build the configured backend. Called once at process start; everything
/// downstream sees only the trait object.
pub async fn build_store(
    config: &crate::config::StoreConfig,
) -> crate::error::Result<std::sync::Arc<dyn CredentialStore>> {
    use crate::error::GatewayError;

    let store: std::sync::Arc<dyn CredentialStore> = match config.backend.as_str() {
        "file" => std::sync::Arc::new(FileStore::new(&config.dir)?),
        "git" => std::sync::Arc::new(GitStore::open(&config.dir, config.git_remote.clone()).await?),
        "object" => {
            let object = &config.object;
            if object.endpoint.is_empty() || object.bucket.is_empty() {
                return Err(GatewayError::Config(
                    "object store backend needs endpoint and bucket".to_string(),
                ));
            }
            std::sync::Arc::new(ObjectStore::new(object::ObjectStoreConfig {
                endpoint: object.endpoint.clone(),
                bucket: object.bucket.clone(),
                region: object.region.clone(),
                access_key_id: object.access_key_id.clone(),
                secret_access_key: object.secret_access_key.clone(),
                prefix: object.prefix.clone(),
            }))
        }
        "sqlite" => std::sync::Arc::new(SqliteStore::open(&config.sqlite_path)?),
        other => {
            return Err(GatewayError::Config(format!(
                "unknown store backend: {}",
                other
            )))
        }
    };
    Ok(store)
}

/// Shared conflict check: a caller may only overwrite a record whose stored
/// `updated_at` is not newer than the snapshot it started from.
pub(crate) fn check_conflict(existing: Option<&Account>, incoming: &Account) -> StoreResult<()> {
    if let Some(existing) = existing {
        if existing.updated_at > incoming.updated_at {
            return Err(StoreError::conflict(incoming.provider, &incoming.account_id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Account {
        let mut acct = Account::new(Provider::Gemini, "alice", AccountKind::OAuth);
        acct.access_token = "ya29.secret-token".to_string();
        acct.refresh_token = Some("1//01refresh".to_string());
        acct
    }

    #[test]
    fn debug_never_prints_tokens() {
        let printed = format!("{:?}", sample());
        assert!(printed.contains("[REDACTED]"));
        assert!(!printed.contains("ya29"));
        assert!(!printed.contains("1//01"));
    }

    #[test]
    fn export_without_secrets_blanks_tokens() {
        let stripped = sample().without_secrets();
        assert!(stripped.access_token.is_empty());
        assert!(stripped.refresh_token.is_none());
        assert_eq!(stripped.account_id, "alice");
    }

    #[test]
    fn expiry_buffer() {
        let mut acct = sample();
        acct.expires_at = Some(Utc::now() + chrono::Duration::seconds(120));
        assert!(acct.expires_within(300));
        assert!(!acct.expires_within(60));
        acct.expires_at = None;
        assert!(!acct.expires_within(300));
    }

    #[test]
    fn cooldown_promotion_eligibility() {
        let now = Utc::now();
        let mut acct = sample();
        acct.status = AccountStatus::Cooling;
        acct.cooldown_until = Some(now + chrono::Duration::seconds(60));
        assert!(!acct.cooldown_elapsed(now));
        assert!(acct.cooldown_elapsed(now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn conflict_detection() {
        let older = sample();
        let mut newer = older.clone();
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);
        // Stored copy is newer than the caller's snapshot: reject.
        assert!(check_conflict(Some(&newer), &older).is_err());
        // Stored copy is the caller's snapshot or older: accept.
        assert!(check_conflict(Some(&older), &newer).is_ok());
        assert!(check_conflict(None, &older).is_ok());
    }
}
