// File-backed credential store: one JSON document per account

use super::{account_key, check_conflict, Account, CredentialStore, StoreError, StoreResult};
use crate::provider::Provider;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default backend. Each account lives in
/// `<base_dir>/<provider>-<account_id>.json` with owner-only permissions.
/// Writes go through a temp file + rename so a crash never leaves a
/// half-written record.
pub struct FileStore {
    base_dir: PathBuf,
    // Serializes the read-check-write cycle of `save`/`delete`. Reads go
    // straight to disk.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self {
            base_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, provider: Provider, account_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.json", account_key(provider, &sanitize_id(account_id))))
    }

    fn read_record(path: &Path) -> StoreResult<Account> {
        let contents = std::fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
        serde_json::from_str(&contents)
            .map_err(|e| StoreError::Backend(format!("malformed account file {}: {}", path.display(), e)))
    }

    fn write_record(&self, path: &Path, account: &Account) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(account)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        write_owner_only(&tmp, json.as_bytes()).map_err(|e| StoreError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Account ids can carry user-supplied text (emails, labels); keep the file
/// name flat.
fn sanitize_id(account_id: &str) -> String {
    account_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '@' { c } else { '_' })
        .collect()
}

fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(bytes)?;
        Ok(())
    }

    #[cfg(not(unix))]
    {
        std::fs::write(path, bytes)
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn list(&self) -> StoreResult<Vec<Account>> {
        let entries = std::fs::read_dir(&self.base_dir).map_err(|e| StoreError::Io(e.to_string()))?;

        let mut accounts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path) {
                Ok(account) => accounts.push(account),
                Err(e) => warn!("Skipping unreadable account file {}: {}", path.display(), e),
            }
        }

        // Stable order so insertion-order tie-breaks are deterministic.
        accounts.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(accounts)
    }

    async fn get(&self, provider: Provider, account_id: &str) -> StoreResult<Account> {
        let path = self.path_for(provider, account_id);
        if !path.exists() {
            return Err(StoreError::not_found(provider, account_id));
        }
        Self::read_record(&path)
    }

    async fn save(&self, mut account: Account) -> StoreResult<Account> {
        let _guard = self.write_lock.lock().await;

        let path = self.path_for(account.provider, &account.account_id);
        let existing = if path.exists() {
            Some(Self::read_record(&path)?)
        } else {
            None
        };
        check_conflict(existing.as_ref(), &account)?;

        account.updated_at = chrono::Utc::now();
        self.write_record(&path, &account)?;
        debug!("Saved account {} to {}", account.key(), path.display());
        Ok(account)
    }

    async fn delete(&self, provider: Provider, account_id: &str) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.path_for(provider, account_id);
        if !path.exists() {
            return Err(StoreError::not_found(provider, account_id));
        }
        std::fs::remove_file(&path).map_err(|e| StoreError::Io(e.to_string()))
    }
}
