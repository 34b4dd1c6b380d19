// Git-backed credential store: file layout plus commit history

use super::{Account, CredentialStore, FileStore, StoreError, StoreResult};
use crate::provider::Provider;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

/// Wraps [`FileStore`] in a git working tree. Every mutation is committed,
/// and an optional remote is pushed after each commit and pulled before
/// listing, which lets several machines share one pool.
pub struct GitStore {
    inner: FileStore,
    repo_dir: PathBuf,
    remote: Option<String>,
}

impl GitStore {
    pub async fn open(repo_dir: impl Into<PathBuf>, remote: Option<String>) -> StoreResult<Self> {
        let repo_dir = repo_dir.into();
        let inner = FileStore::new(&repo_dir)?;

        let store = Self {
            inner,
            repo_dir,
            remote,
        };

        if !store.repo_dir.join(".git").exists() {
            store.git(&["init", "--quiet"]).await?;
        }
        if let Some(remote) = store.remote.clone() {
            // Idempotent: re-adding an existing remote fails, which is fine.
            let _ = store.git(&["remote", "add", "origin", &remote]).await;
        }

        Ok(store)
    }

    async fn git(&self, args: &[&str]) -> StoreResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .map_err(|e| StoreError::Io(format!("git {:?}: {}", args.first(), e)))?;

        if !output.status.success() {
            return Err(StoreError::Backend(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn commit(&self, message: &str) -> StoreResult<()> {
        self.git(&["add", "--all"]).await?;

        // Nothing staged (e.g. idempotent save) is not an error.
        let status = self.git(&["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            return Ok(());
        }

        self.git(&["commit", "--quiet", "-m", message]).await?;
        if self.remote.is_some() {
            if let Err(e) = self.git(&["push", "--quiet", "origin", "HEAD"]).await {
                // The commit is durable locally; surface the sync failure
                // without failing the save.
                warn!("git push failed, will retry on next mutation: {}", e);
            }
        }
        Ok(())
    }

    async fn sync_remote(&self) {
        if self.remote.is_none() {
            return;
        }
        match self.git(&["pull", "--quiet", "--rebase", "origin", "HEAD"]).await {
            Ok(_) => debug!("Pulled credential updates from origin"),
            Err(e) => warn!("git pull failed, serving local state: {}", e),
        }
    }
}

#[async_trait]
impl CredentialStore for GitStore {
    async fn list(&self) -> StoreResult<Vec<Account>> {
        self.sync_remote().await;
        self.inner.list().await
    }

    async fn get(&self, provider: Provider, account_id: &str) -> StoreResult<Account> {
        self.inner.get(provider, account_id).await
    }

    async fn save(&self, account: Account) -> StoreResult<Account> {
        let key = account.key();
        let saved = self.inner.save(account).await?;
        self.commit(&format!("Update account {}", key)).await?;
        Ok(saved)
    }

    async fn delete(&self, provider: Provider, account_id: &str) -> StoreResult<()> {
        self.inner.delete(provider, account_id).await?;
        self.commit(&format!("Remove account {}-{}", provider, account_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AccountKind;

    // These tests shell out to git; skip silently on machines without it.
    async fn try_store(dir: &std::path::Path) -> Option<GitStore> {
        let store = GitStore::open(dir, None).await.ok()?;
        // Commits need an identity; set a repo-local one.
        store.git(&["config", "user.email", "pool@localhost"]).await.ok()?;
        store.git(&["config", "user.name", "pool"]).await.ok()?;
        Some(store)
    }

    #[tokio::test]
    async fn save_creates_commit() {
        let dir = tempfile::tempdir().unwrap();
        let Some(store) = try_store(dir.path()).await else {
            return;
        };

        let mut acct = Account::new(Provider::Gemini, "alice", AccountKind::OAuth);
        acct.access_token = "tok".to_string();
        store.save(acct).await.unwrap();

        let log = store.git(&["log", "--oneline"]).await.unwrap();
        assert!(log.contains("Update account gemini-alice"));
    }

    #[tokio::test]
    async fn idempotent_save_does_not_fail() {
        let dir = tempfile::tempdir().unwrap();
        let Some(store) = try_store(dir.path()).await else {
            return;
        };

        let mut acct = Account::new(Provider::Gemini, "alice", AccountKind::OAuth);
        acct.access_token = "tok".to_string();
        let saved = store.save(acct).await.unwrap();
        // Saving the identical record stages nothing beyond updated_at.
        store.save(saved).await.unwrap();
    }
}
