//! Management surface over the pool and store.
//!
//! Pure read/write operations consumed by external tooling (CLI, TUI,
//! desktop shells): list, remove, force refresh, import/export, cooldown
//! summary. No selection or translation logic lives here.

use crate::error::{GatewayError, Result};
use crate::gateway::routes::AppState;
use crate::pool::CooldownWindow;
use crate::provider::Provider;
use crate::store::{Account, AccountStatus};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Account view with secrets elided, safe for list endpoints and logs.
#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub provider: Provider,
    pub account_id: String,
    pub kind: crate::store::AccountKind,
    pub status: AccountStatus,
    pub email: Option<String>,
    pub label: Option<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub cooldown_until: Option<chrono::DateTime<chrono::Utc>>,
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            provider: account.provider,
            account_id: account.account_id.clone(),
            kind: account.kind,
            status: account.status,
            email: account.metadata.email.clone(),
            label: account.metadata.label.clone(),
            expires_at: account.expires_at,
            cooldown_until: account.cooldown_until,
            last_used_at: account.last_used_at,
            updated_at: account.updated_at,
        }
    }
}

fn parse_provider(raw: &str) -> Result<Provider> {
    raw.parse::<Provider>().map_err(GatewayError::InvalidRequest)
}

/// `GET /admin/accounts`
pub async fn list_accounts(State(state): State<AppState>) -> Result<Json<Vec<AccountSummary>>> {
    let accounts = state.store.list().await?;
    Ok(Json(accounts.iter().map(AccountSummary::from).collect()))
}

/// `DELETE /admin/accounts/:provider/:id`
pub async fn remove_account(
    State(state): State<AppState>,
    Path((provider, account_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    let provider = parse_provider(&provider)?;
    state.store.delete(provider, &account_id).await?;
    state.pool.evict(provider, &account_id);
    info!("Removed account {}/{}", provider, account_id);
    Ok(Json(serde_json::json!({ "removed": true })))
}

/// `POST /admin/accounts/:provider/:id/refresh`
pub async fn refresh_account(
    State(state): State<AppState>,
    Path((provider, account_id)): Path<(String, String)>,
) -> Result<Json<AccountSummary>> {
    let provider = parse_provider(&provider)?;
    let refreshed = state.pool.refresh_account(provider, &account_id).await?;
    Ok(Json(AccountSummary::from(&refreshed)))
}

/// `POST /admin/accounts/:provider/:id/enable` — the explicit re-enable
/// path out of `disabled`.
pub async fn enable_account(
    State(state): State<AppState>,
    Path((provider, account_id)): Path<(String, String)>,
) -> Result<Json<AccountSummary>> {
    let provider = parse_provider(&provider)?;
    let account = state
        .pool
        .set_status(provider, &account_id, AccountStatus::Active)
        .await?;
    info!("Re-enabled account {}/{}", provider, account_id);
    Ok(Json(AccountSummary::from(&account)))
}

/// `POST /admin/accounts/:provider/:id/disable`
pub async fn disable_account(
    State(state): State<AppState>,
    Path((provider, account_id)): Path<(String, String)>,
) -> Result<Json<AccountSummary>> {
    let provider = parse_provider(&provider)?;
    let account = state
        .pool
        .set_status(provider, &account_id, AccountStatus::Disabled)
        .await?;
    Ok(Json(AccountSummary::from(&account)))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    /// Include tokens in the export. Default: stripped.
    #[serde(default)]
    pub secrets: bool,
}

/// `GET /admin/accounts/export?secrets=true|false`
pub async fn export_accounts(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<Vec<Account>>> {
    let accounts = state.store.list().await?;
    let exported = if query.secrets {
        accounts
    } else {
        accounts.iter().map(Account::without_secrets).collect()
    };
    Ok(Json(exported))
}

#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

/// `POST /admin/accounts/import` — records without an access token (a
/// secret-free export) are skipped rather than imported as unusable.
pub async fn import_accounts(
    State(state): State<AppState>,
    Json(accounts): Json<Vec<Account>>,
) -> Result<Json<ImportReport>> {
    let mut imported = 0;
    let mut skipped = 0;

    for mut account in accounts {
        if account.access_token.is_empty() {
            skipped += 1;
            continue;
        }
        // Imported snapshots should never conflict with local edits.
        account.updated_at = chrono::Utc::now();
        let stored = state.store.save(account).await?;
        state.pool.index(stored);
        imported += 1;
    }

    info!("Imported {} accounts ({} skipped)", imported, skipped);
    Ok(Json(ImportReport { imported, skipped }))
}

/// `GET /admin/cooldowns`
pub async fn cooldown_summary(State(state): State<AppState>) -> Json<Vec<CooldownWindow>> {
    Json(state.pool.cooldown_summary())
}
