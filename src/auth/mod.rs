//! Authenticator registry: one login/refresh strategy per provider.
//!
//! Browser OAuth and device-code flows are asynchronous; `start_login`
//! returns immediately and the caller polls until a terminal outcome.
//! API-key imports complete synchronously. All token renewal, lazy or
//! proactive, goes through the single `refresh` entry point.

pub mod callback;
pub mod pkce;

mod claude;
mod codex;
mod gemini;

pub use claude::ClaudeAuthenticator;
pub use codex::CodexAuthenticator;
pub use gemini::GeminiAuthenticator;

use crate::error::{GatewayError, Result};
use crate::provider::Provider;
use crate::store::{Account, AccountKind};
use async_trait::async_trait;
use base64::Engine;
use callback::CallbackServer;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Caller-supplied knobs for a login attempt.
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    /// Explicit account id; otherwise derived from the provider identity
    /// (e.g. the OAuth email claim).
    pub account_id: Option<String>,
    /// Static API key. When set, login completes immediately with an
    /// `api_key` record and no OAuth round trip.
    pub api_key: Option<String>,
    pub label: Option<String>,
}

/// What the client should do next after `start_login`.
pub enum LoginStart {
    /// Open `auth_url` in a browser; the local callback listener in the
    /// session picks up the redirect.
    Browser { auth_url: String },
    /// Show the code, send the user to `verification_uri`, keep polling.
    DeviceCode {
        verification_uri: String,
        user_code: String,
        interval_secs: u64,
    },
    /// API-key and cookie flows finish without any round trip.
    Complete(Account),
}

/// Per-attempt state threaded through `poll`. Owned by the caller, so an
/// abandoned attempt cleans up (the callback listener task ends) on drop.
pub struct LoginSession {
    pub provider: Provider,
    pub state: String,
    pub(crate) verifier: String,
    pub(crate) redirect_uri: String,
    pub(crate) callback: Option<CallbackServer>,
    pub(crate) device_code: Option<String>,
    pub(crate) poll_interval: Duration,
    pub(crate) deadline: Instant,
    pub(crate) options: LoginOptions,
}

impl LoginSession {
    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Polling state machine: `Pending` until a terminal outcome; terminal
/// outcomes stop the loop.
pub enum PollOutcome {
    Authorized(Account),
    Pending,
    Expired,
    Denied(String),
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn provider(&self) -> Provider;

    /// Begin a login attempt. Browser/device flows return a session to
    /// poll; immediate flows return `LoginStart::Complete` and no session.
    async fn start_login(&self, opts: LoginOptions) -> Result<(LoginStart, Option<LoginSession>)>;

    async fn poll(&self, session: &mut LoginSession) -> Result<PollOutcome>;

    /// Exchange the refresh token for a new access token. Fails with an
    /// auth error when the refresh token itself is invalid or revoked; the
    /// caller then disables the account rather than dropping it.
    async fn refresh(&self, account: &Account) -> Result<Account>;
}

/// Explicit provider → strategy map, populated at startup.
pub struct AuthRegistry {
    strategies: HashMap<Provider, Arc<dyn Authenticator>>,
}

impl AuthRegistry {
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// All built-in providers.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ClaudeAuthenticator::new()));
        registry.register(Arc::new(GeminiAuthenticator::new()));
        registry.register(Arc::new(CodexAuthenticator::new()));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Authenticator>) {
        self.strategies.insert(strategy.provider(), strategy);
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn Authenticator>> {
        self.strategies
            .get(&provider)
            .cloned()
            .ok_or_else(|| GatewayError::Auth(format!("no authenticator registered for {}", provider)))
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.strategies.keys().copied().collect()
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive a full login attempt to completion: open the browser or print the
/// device code, then poll until terminal. Used by the `--login` CLI path.
pub async fn run_login(
    registry: &AuthRegistry,
    provider: Provider,
    opts: LoginOptions,
) -> Result<Account> {
    let authenticator = registry.get(provider)?;
    let (start, session) = authenticator.start_login(opts).await?;

    let mut session = match start {
        LoginStart::Complete(account) => return Ok(account),
        LoginStart::Browser { auth_url } => {
            println!("\nOpening browser for {} authentication...", provider);
            println!("If the browser doesn't open, visit:\n{}\n", auth_url);
            if let Err(e) = open::that(&auth_url) {
                eprintln!("Warning: could not open browser automatically: {}", e);
            }
            session.ok_or_else(|| GatewayError::Internal("browser flow without session".into()))?
        }
        LoginStart::DeviceCode {
            verification_uri,
            user_code,
            ..
        } => {
            println!("\nVisit {} and enter code: {}\n", verification_uri, user_code);
            session.ok_or_else(|| GatewayError::Internal("device flow without session".into()))?
        }
    };

    println!("Waiting for authentication...");
    loop {
        match authenticator.poll(&mut session).await? {
            PollOutcome::Authorized(account) => return Ok(account),
            PollOutcome::Pending => {
                tokio::time::sleep(session.poll_interval).await;
            }
            PollOutcome::Expired => {
                return Err(GatewayError::Auth("login attempt expired".to_string()))
            }
            PollOutcome::Denied(reason) => {
                return Err(GatewayError::Auth(format!("login denied: {}", reason)))
            }
        }
    }
}

/// Shared shortcut for providers accepting a static API key.
pub(crate) fn api_key_account(provider: Provider, opts: &LoginOptions) -> Option<Account> {
    let api_key = opts.api_key.clone()?;
    let account_id = opts
        .account_id
        .clone()
        .unwrap_or_else(|| format!("key-{}", uuid::Uuid::new_v4().simple()));

    let mut account = Account::new(provider, account_id, AccountKind::ApiKey);
    account.access_token = api_key;
    account.metadata.label = opts.label.clone();
    Some(account)
}

/// Best-effort email claim from a JWT id_token, used to derive a stable
/// account id when the caller didn't pick one.
pub(crate) fn email_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("email")?.as_str().map(str::to_string)
}
