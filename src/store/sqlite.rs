// SQLite credential store backend

use super::{Account, CredentialStore, StoreError, StoreResult};
use crate::provider::Provider;
use async_trait::async_trait;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

type Pool = r2d2::Pool<SqliteConnectionManager>;

/// Relational backend. The full record is stored as a JSON column next to
/// the key columns, so schema migrations track the serde model instead of
/// duplicating every field.
pub struct SqliteStore {
    pool: Pool,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    provider    TEXT NOT NULL,
    account_id  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    record      TEXT NOT NULL,
    PRIMARY KEY (provider, account_id)
);
";

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref());
        let pool = r2d2::Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let conn = pool.get().map_err(|e| StoreError::Backend(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { pool })
    }

    fn conn(&self) -> StoreResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// rusqlite is blocking; run each statement off the async executor.
    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(r2d2::PooledConnection<SqliteConnectionManager>) -> StoreResult<T>
            + Send
            + 'static,
    {
        let conn = self.conn()?;
        tokio::task::spawn_blocking(move || op(conn))
            .await
            .map_err(|e| StoreError::Backend(format!("store task panicked: {}", e)))?
    }
}

fn decode(record: String) -> StoreResult<Account> {
    serde_json::from_str(&record).map_err(|e| StoreError::Backend(format!("malformed row: {}", e)))
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn list(&self) -> StoreResult<Vec<Account>> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare("SELECT record FROM accounts ORDER BY provider, account_id")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            let mut accounts = Vec::new();
            for row in rows {
                let record = row.map_err(|e| StoreError::Backend(e.to_string()))?;
                accounts.push(decode(record)?);
            }
            Ok(accounts)
        })
        .await
    }

    async fn get(&self, provider: Provider, account_id: &str) -> StoreResult<Account> {
        let account_id = account_id.to_string();
        self.blocking(move |conn| {
            let record: Option<String> = conn
                .query_row(
                    "SELECT record FROM accounts WHERE provider = ?1 AND account_id = ?2",
                    params![provider.as_str(), account_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            match record {
                Some(record) => decode(record),
                None => Err(StoreError::not_found(provider, &account_id)),
            }
        })
        .await
    }

    async fn save(&self, mut account: Account) -> StoreResult<Account> {
        self.blocking(move |mut conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            let stored_updated_at: Option<String> = tx
                .query_row(
                    "SELECT updated_at FROM accounts WHERE provider = ?1 AND account_id = ?2",
                    params![account.provider.as_str(), account.account_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            if let Some(stored) = stored_updated_at {
                let stored: chrono::DateTime<chrono::Utc> = stored
                    .parse()
                    .map_err(|e| StoreError::Backend(format!("bad updated_at row: {}", e)))?;
                if stored > account.updated_at {
                    return Err(StoreError::conflict(account.provider, &account.account_id));
                }
            }

            account.updated_at = chrono::Utc::now();
            let record =
                serde_json::to_string(&account).map_err(|e| StoreError::Backend(e.to_string()))?;

            tx.execute(
                "INSERT INTO accounts (provider, account_id, updated_at, record)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (provider, account_id)
                 DO UPDATE SET updated_at = ?3, record = ?4",
                params![
                    account.provider.as_str(),
                    account.account_id,
                    account.updated_at.to_rfc3339(),
                    record
                ],
            )
            .map_err(|e| StoreError::Backend(e.to_string()))?;

            tx.commit().map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(account)
        })
        .await
    }

    async fn delete(&self, provider: Provider, account_id: &str) -> StoreResult<()> {
        let account_id = account_id.to_string();
        self.blocking(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM accounts WHERE provider = ?1 AND account_id = ?2",
                    params![provider.as_str(), account_id],
                )
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            if deleted == 0 {
                return Err(StoreError::not_found(provider, &account_id));
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AccountKind;

    fn account(provider: Provider, id: &str) -> Account {
        let mut acct = Account::new(provider, id, AccountKind::ApiKey);
        acct.access_token = "key".to_string();
        acct
    }

    #[tokio::test]
    async fn upsert_and_list() {
        let store = SqliteStore::open_in_memory().unwrap();

        store.save(account(Provider::OpenAi, "a")).await.unwrap();
        let saved = store.save(account(Provider::Claude, "b")).await.unwrap();

        // Re-save updates in place instead of duplicating the row.
        store.save(saved).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].provider, Provider::Claude);
    }

    #[tokio::test]
    async fn stale_snapshot_conflicts() {
        let store = SqliteStore::open_in_memory().unwrap();

        let first = store.save(account(Provider::OpenAi, "a")).await.unwrap();
        store.save(first.clone()).await.unwrap();

        let mut stale = first;
        stale.updated_at = stale.updated_at - chrono::Duration::seconds(30);
        assert!(matches!(
            store.save(stale).await.unwrap_err(),
            StoreError::Conflict { .. }
        ));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.delete(Provider::Gemini, "ghost").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }
}
