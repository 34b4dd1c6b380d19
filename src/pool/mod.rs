//! Account pool and rotation manager.
//!
//! Keeps a per-provider in-memory index over the credential store and hands
//! out one usable account per request. Selection is least-recently-used
//! among `active` records; `cooling` records are promoted lazily once
//! their cooldown elapses; `disabled` records are never selected. The
//! store stays the sole owner of records, the pool is a read-through cache
//! invalidated on every save/delete it performs.

pub mod cooldown;

pub use cooldown::CooldownWindow;

use crate::auth::AuthRegistry;
use crate::error::{GatewayError, Result};
use crate::provider::Provider;
use crate::store::{Account, AccountStatus, CredentialStore};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Single switch that turns every account into "always active".
    pub cooldown_enabled: bool,
    /// Refresh tokens expiring within this many seconds before use.
    pub refresh_buffer_seconds: i64,
    /// Per-provider daily reset hour (UTC). Missing providers reset at
    /// midnight.
    pub reset_hours: HashMap<Provider, u32>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cooldown_enabled: true,
            refresh_buffer_seconds: 300,
            reset_hours: HashMap::new(),
        }
    }
}

struct Entry {
    account: Account,
    /// Tie-break for records that were never used: insertion order.
    inserted_seq: u64,
    in_flight: u32,
}

#[derive(Default)]
struct Bucket {
    entries: Vec<Entry>,
}

impl Bucket {
    fn position(&self, account_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.account.account_id == account_id)
    }

    /// Lazy promotion: any cooled entry whose window elapsed flips back to
    /// active on this pass, without waiting for a sweep.
    fn promote_elapsed(&mut self) {
        let now = Utc::now();
        for entry in &mut self.entries {
            if entry.account.cooldown_elapsed(now) {
                debug!(
                    "Cooldown elapsed for {}, promoting back to active",
                    entry.account.key()
                );
                entry.account.status = AccountStatus::Active;
                entry.account.cooldown_until = None;
            }
        }
    }
}

/// Snapshot of a selected account plus in-flight bookkeeping. Dropping the
/// lease (normal completion or client disconnect alike) releases the slot,
/// so cancellation can never leave an account marked busy.
pub struct AccountLease {
    pub account: Account,
    pool: Arc<AccountPool>,
}

impl AccountLease {
    pub fn provider(&self) -> Provider {
        self.account.provider
    }
}

impl std::fmt::Debug for AccountLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLease")
            .field("account", &self.account)
            .finish()
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        self.pool
            .release(self.account.provider, &self.account.account_id);
    }
}

pub struct AccountPool {
    store: Arc<dyn CredentialStore>,
    registry: Arc<AuthRegistry>,
    config: PoolConfig,
    buckets: HashMap<Provider, Mutex<Bucket>>,
    seq: Mutex<u64>,
}

impl AccountPool {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        registry: Arc<AuthRegistry>,
        config: PoolConfig,
    ) -> Self {
        let buckets = Provider::ALL
            .iter()
            .map(|p| (*p, Mutex::new(Bucket::default())))
            .collect();
        Self {
            store,
            registry,
            config,
            buckets,
            seq: Mutex::new(0),
        }
    }

    fn bucket(&self, provider: Provider) -> &Mutex<Bucket> {
        // Buckets exist for every Provider variant by construction.
        &self.buckets[&provider]
    }

    fn next_seq(&self) -> u64 {
        let mut seq = self.seq.lock();
        *seq += 1;
        *seq
    }

    /// Fill the index from the store. Called once at startup.
    pub async fn load(&self) -> Result<usize> {
        let accounts = self.store.list().await?;
        let count = accounts.len();

        for account in accounts {
            self.index(account);
        }
        info!("Loaded {} accounts into the pool", count);
        Ok(count)
    }

    /// Insert or replace one record in the index (read-through refresh
    /// after an external save).
    pub fn index(&self, account: Account) {
        let seq = self.next_seq();
        let mut bucket = self.bucket(account.provider).lock();
        match bucket.position(&account.account_id) {
            Some(pos) => {
                let in_flight = bucket.entries[pos].in_flight;
                let inserted_seq = bucket.entries[pos].inserted_seq;
                bucket.entries[pos] = Entry {
                    account,
                    inserted_seq,
                    in_flight,
                };
            }
            None => bucket.entries.push(Entry {
                account,
                inserted_seq: seq,
                in_flight: 0,
            }),
        }
    }

    /// Drop one record from the index (after an external delete).
    pub fn evict(&self, provider: Provider, account_id: &str) {
        let mut bucket = self.bucket(provider).lock();
        if let Some(pos) = bucket.position(account_id) {
            bucket.entries.remove(pos);
        }
    }

    pub fn account_count(&self, provider: Provider) -> usize {
        self.bucket(provider).lock().entries.len()
    }

    /// Select one usable account, refreshing its token first when it is
    /// about to expire. `exclude` carries account ids already attempted in
    /// this request so every account is tried at most once.
    pub async fn select(
        self: &Arc<Self>,
        provider: Provider,
        exclude: &HashSet<String>,
    ) -> Result<AccountLease> {
        // Refresh failures extend the exclusion set locally.
        let mut skipped = exclude.clone();

        loop {
            let candidate = self.pick_candidate(provider, &skipped);
            let Some(account) = candidate else {
                return Err(GatewayError::NoAvailableAccount(provider.to_string()));
            };

            if !account.expires_within(self.config.refresh_buffer_seconds) {
                crate::metrics::record_account_selected(provider.as_str(), &account.account_id);
                return Ok(AccountLease {
                    account,
                    pool: Arc::clone(self),
                });
            }

            // Token about to expire: refresh synchronously before handing
            // the account out. No bucket lock is held across this await.
            debug!("Token for {} near expiry, refreshing before use", account.key());
            match self.refresh_account(provider, &account.account_id).await {
                Ok(refreshed) => {
                    crate::metrics::record_account_selected(provider.as_str(), &refreshed.account_id);
                    return Ok(AccountLease {
                        account: refreshed,
                        pool: Arc::clone(self),
                    });
                }
                Err(e) => {
                    warn!("Refresh failed for {}: {}", account.key(), e);
                    self.release(provider, &account.account_id);
                    skipped.insert(account.account_id.clone());
                    // Auth failures already disabled the record inside
                    // refresh_account; anything else just skips it for
                    // this request.
                }
            }
        }
    }

    /// One locked pass over the bucket: promote elapsed cooldowns, then
    /// take the least-recently-used active entry. O(entries).
    fn pick_candidate(&self, provider: Provider, exclude: &HashSet<String>) -> Option<Account> {
        let mut bucket = self.bucket(provider).lock();
        if self.config.cooldown_enabled {
            bucket.promote_elapsed();
        }

        let now = Utc::now();
        let cooldown_enabled = self.config.cooldown_enabled;
        let best = bucket
            .entries
            .iter_mut()
            .filter(|e| !exclude.contains(&e.account.account_id))
            .filter(|e| match e.account.status {
                AccountStatus::Active => true,
                // With cooldown tracking off, cooling records count as
                // active; disabled records never do.
                AccountStatus::Cooling => !cooldown_enabled,
                AccountStatus::Disabled => false,
            })
            .min_by_key(|e| (e.account.last_used_at, e.inserted_seq))?;

        best.account.last_used_at = Some(now);
        best.in_flight += 1;
        Some(best.account.clone())
    }

    fn release(&self, provider: Provider, account_id: &str) {
        let mut bucket = self.bucket(provider).lock();
        if let Some(pos) = bucket.position(account_id) {
            let entry = &mut bucket.entries[pos];
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
    }

    /// The single token-renewal path, shared by pre-selection refresh, the
    /// dispatcher's on-401 retry, forced refresh from the management
    /// surface, and the background sweep. An auth failure disables the
    /// account; it is never silently dropped.
    pub async fn refresh_account(&self, provider: Provider, account_id: &str) -> Result<Account> {
        let account = {
            let bucket = self.bucket(provider).lock();
            let pos = bucket
                .position(account_id)
                .ok_or_else(|| GatewayError::NoAvailableAccount(provider.to_string()))?;
            bucket.entries[pos].account.clone()
        };

        let authenticator = self.registry.get(provider)?;
        match authenticator.refresh(&account).await {
            Ok(refreshed) => {
                crate::metrics::record_token_refresh(provider.as_str(), true);
                let stored = self.persist(refreshed).await?;
                Ok(stored)
            }
            Err(e @ GatewayError::Auth(_)) => {
                crate::metrics::record_token_refresh(provider.as_str(), false);
                warn!(
                    "Refresh token for {} rejected, disabling account: {}",
                    account.key(),
                    e
                );
                self.set_status(provider, account_id, AccountStatus::Disabled)
                    .await?;
                Err(e)
            }
            Err(e) => {
                crate::metrics::record_token_refresh(provider.as_str(), false);
                Err(e)
            }
        }
    }

    /// Quota-exceeded signal from the dispatcher: start a cooldown and
    /// take the account out of rotation until the window elapses.
    pub async fn mark_quota_exceeded(
        &self,
        provider: Provider,
        account_id: &str,
        retry_after: Option<Duration>,
    ) {
        if !self.config.cooldown_enabled {
            debug!("Cooldown tracking disabled, ignoring quota signal for {}", account_id);
            return;
        }

        let reset_hour = self.config.reset_hours.get(&provider).copied().unwrap_or(0);
        let until = cooldown::cooldown_until(retry_after, reset_hour, Utc::now());

        let updated = {
            let mut bucket = self.bucket(provider).lock();
            let Some(pos) = bucket.position(account_id) else {
                return;
            };
            let entry = &mut bucket.entries[pos];
            // Disabled is one-way; a quota signal must not resurrect it.
            if entry.account.status == AccountStatus::Disabled {
                return;
            }
            entry.account.status = AccountStatus::Cooling;
            entry.account.cooldown_until = Some(until);
            entry.account.clone()
        };

        info!("Account {} cooling until {}", updated.key(), until);
        crate::metrics::record_cooldown(provider.as_str());
        if let Err(e) = self.persist(updated).await {
            warn!("Failed to persist cooldown for {}/{}: {}", provider, account_id, e);
        }
    }

    pub async fn set_status(
        &self,
        provider: Provider,
        account_id: &str,
        status: AccountStatus,
    ) -> Result<Account> {
        let updated = {
            let mut bucket = self.bucket(provider).lock();
            let pos = bucket
                .position(account_id)
                .ok_or_else(|| GatewayError::NoAvailableAccount(provider.to_string()))?;
            let entry = &mut bucket.entries[pos];
            entry.account.status = status;
            if status != AccountStatus::Cooling {
                entry.account.cooldown_until = None;
            }
            entry.account.clone()
        };
        self.persist(updated).await
    }

    /// Write one record back to the store and re-index the stored copy.
    async fn persist(&self, account: Account) -> Result<Account> {
        let stored = self.store.save(account).await?;
        self.index(stored.clone());
        Ok(stored)
    }

    /// Current cooldown windows across all providers, for the management
    /// surface.
    pub fn cooldown_summary(&self) -> Vec<CooldownWindow> {
        let mut windows = Vec::new();
        for provider in Provider::ALL {
            let bucket = self.bucket(provider).lock();
            for entry in &bucket.entries {
                if entry.account.status == AccountStatus::Cooling {
                    if let Some(until) = entry.account.cooldown_until {
                        windows.push(CooldownWindow {
                            provider,
                            account_id: entry.account.account_id.clone(),
                            until,
                            reason: "quota_exceeded".to_string(),
                        });
                    }
                }
            }
        }
        windows
    }

    pub fn snapshot(&self, provider: Provider) -> Vec<Account> {
        self.bucket(provider)
            .lock()
            .entries
            .iter()
            .map(|e| e.account.clone())
            .collect()
    }

    /// Periodic housekeeping: promote elapsed cooldowns and proactively
    /// refresh tokens close to expiry, through the same refresh path as
    /// the lazy on-demand refresh.
    pub async fn sweep(&self) {
        for provider in Provider::ALL {
            let near_expiry: Vec<String> = {
                let mut bucket = self.bucket(provider).lock();
                if self.config.cooldown_enabled {
                    bucket.promote_elapsed();
                }
                bucket
                    .entries
                    .iter()
                    .filter(|e| {
                        e.account.status == AccountStatus::Active
                            && e.account.expires_within(self.config.refresh_buffer_seconds)
                    })
                    .map(|e| e.account.account_id.clone())
                    .collect()
            };

            for account_id in near_expiry {
                if let Err(e) = self.refresh_account(provider, &account_id).await {
                    warn!("Background refresh of {}/{} failed: {}", provider, account_id, e);
                }
            }
        }
    }
}
