// OpenAI device-code strategy for Codex accounts

use super::{api_key_account, email_from_id_token, Authenticator, LoginOptions, LoginSession, LoginStart, PollOutcome};
use crate::error::{GatewayError, Result};
use crate::provider::Provider;
use crate::store::{Account, AccountKind};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const DEVICE_AUTH_URL: &str = "https://auth.openai.com/oauth/device/code";
const TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const SCOPE: &str = "openid profile email offline_access";

pub struct CodexAuthenticator {
    client: reqwest::Client,
}

#[derive(serde::Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    id_token: Option<String>,
}

#[derive(serde::Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl CodexAuthenticator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn build_account(&self, tokens: TokenResponse, opts: &LoginOptions) -> Account {
        let email = tokens.id_token.as_deref().and_then(email_from_id_token);
        let account_id = opts
            .account_id
            .clone()
            .or_else(|| email.clone())
            .unwrap_or_else(|| format!("codex-{}", uuid::Uuid::new_v4().simple()));

        let mut account = Account::new(Provider::OpenAi, account_id, AccountKind::OAuth);
        account.access_token = tokens.access_token;
        account.refresh_token = tokens.refresh_token;
        account.expires_at = tokens
            .expires_in
            .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs));
        account.metadata.email = email;
        account.metadata.label = opts.label.clone();
        account
    }
}

impl Default for CodexAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for CodexAuthenticator {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    async fn start_login(&self, opts: LoginOptions) -> Result<(LoginStart, Option<LoginSession>)> {
        if let Some(account) = api_key_account(Provider::OpenAi, &opts) {
            return Ok((LoginStart::Complete(account), None));
        }

        let response = self
            .client
            .post(DEVICE_AUTH_URL)
            .form(&[("client_id", CLIENT_ID), ("scope", SCOPE)])
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("device authorization failed: {}", e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(format!(
                "device authorization rejected: {}",
                body
            )));
        }

        let device: DeviceCodeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Auth(format!("malformed device response: {}", e)))?;

        debug!(
            "Started device flow, code {} expires in {}s",
            device.user_code, device.expires_in
        );

        let session = LoginSession {
            provider: Provider::OpenAi,
            state: device.user_code.clone(),
            verifier: String::new(),
            redirect_uri: String::new(),
            callback: None,
            device_code: Some(device.device_code),
            poll_interval: Duration::from_secs(device.interval),
            deadline: Instant::now() + Duration::from_secs(device.expires_in),
            options: opts,
        };

        Ok((
            LoginStart::DeviceCode {
                verification_uri: device.verification_uri,
                user_code: device.user_code,
                interval_secs: device.interval,
            },
            Some(session),
        ))
    }

    async fn poll(&self, session: &mut LoginSession) -> Result<PollOutcome> {
        if session.expired() {
            return Ok(PollOutcome::Expired);
        }

        let device_code = session
            .device_code
            .as_deref()
            .ok_or_else(|| GatewayError::Internal("codex poll without device code".into()))?;

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("device_code", device_code),
                ("client_id", CLIENT_ID),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("device poll failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            let tokens: TokenResponse = serde_json::from_str(&body)
                .map_err(|e| GatewayError::Auth(format!("malformed token response: {}", e)))?;
            return Ok(PollOutcome::Authorized(
                self.build_account(tokens, &session.options),
            ));
        }

        // RFC 8628: pending states come back as 400 with an error code.
        if status.as_u16() == 400 {
            if let Ok(err) = serde_json::from_str::<TokenError>(&body) {
                return Ok(match err.error.as_str() {
                    "authorization_pending" => PollOutcome::Pending,
                    "slow_down" => {
                        session.poll_interval += Duration::from_secs(5);
                        PollOutcome::Pending
                    }
                    "expired_token" => PollOutcome::Expired,
                    "access_denied" => PollOutcome::Denied("user denied authorization".to_string()),
                    other => PollOutcome::Denied(format!(
                        "{}: {}",
                        other,
                        err.error_description.unwrap_or_default()
                    )),
                });
            }
        }

        Err(GatewayError::Auth(format!(
            "token endpoint returned {}: {}",
            status, body
        )))
    }

    async fn refresh(&self, account: &Account) -> Result<Account> {
        if account.kind != AccountKind::OAuth {
            return Ok(account.clone());
        }
        let refresh_token = account
            .refresh_token
            .as_deref()
            .ok_or_else(|| GatewayError::Auth("account has no refresh token".to_string()))?;

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", CLIENT_ID),
            ])
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("OpenAI OAuth network error: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            if status.is_client_error() {
                return Err(GatewayError::Auth(format!(
                    "refresh rejected ({}): {}",
                    status, body
                )));
            }
            return Err(GatewayError::Transport(format!(
                "refresh failed ({}): {}",
                status, body
            )));
        }

        let tokens: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::Auth(format!("malformed refresh response: {}", e)))?;

        let mut refreshed = account.clone();
        refreshed.access_token = tokens.access_token;
        if tokens.refresh_token.is_some() {
            refreshed.refresh_token = tokens.refresh_token;
        }
        refreshed.expires_at = Some(
            chrono::Utc::now() + chrono::Duration::seconds(tokens.expires_in.unwrap_or(3600)),
        );
        Ok(refreshed)
    }
}
