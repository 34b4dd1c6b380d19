// Anthropic OAuth strategy for Claude accounts

use super::callback::{CallbackResult, CallbackServer};
use super::{api_key_account, pkce, Authenticator, LoginOptions, LoginSession, LoginStart, PollOutcome};
use crate::error::{GatewayError, Result};
use crate::provider::Provider;
use crate::store::{Account, AccountKind};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
const AUTHORIZE_URL: &str = "https://claude.ai/oauth/authorize";
const TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
const CALLBACK_PATH: &str = "/callback";

const SCOPES: &str = "org:create_api_key user:profile user:inference";

const LOGIN_TIMEOUT: Duration = Duration::from_secs(600);

pub struct ClaudeAuthenticator {
    client: reqwest::Client,
}

#[derive(serde::Serialize)]
struct ExchangeRequest<'a> {
    grant_type: &'a str,
    code: &'a str,
    state: &'a str,
    client_id: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
}

#[derive(serde::Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    refresh_token: &'a str,
    client_id: &'a str,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl ClaudeAuthenticator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn token_request<T: serde::Serialize>(&self, body: &T) -> Result<TokenResponse> {
        let response = self
            .client
            .post(TOKEN_URL)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("Anthropic OAuth network error: {}", e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            if status.is_client_error() {
                return Err(GatewayError::Auth(format!("HTTP {}: {}", status, text)));
            }
            return Err(GatewayError::Transport(format!("HTTP {}: {}", status, text)));
        }

        serde_json::from_str(&text)
            .map_err(|e| GatewayError::Auth(format!("malformed token response: {}", e)))
    }

    fn build_account(&self, tokens: TokenResponse, opts: &LoginOptions) -> Account {
        let account_id = opts
            .account_id
            .clone()
            .unwrap_or_else(|| format!("claude-{}", uuid::Uuid::new_v4().simple()));

        let mut account = Account::new(Provider::Claude, account_id, AccountKind::OAuth);
        account.access_token = tokens.access_token;
        account.refresh_token = tokens.refresh_token;
        account.expires_at = tokens
            .expires_in
            .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs));
        account.metadata.label = opts.label.clone();
        account
    }
}

impl Default for ClaudeAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for ClaudeAuthenticator {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn start_login(&self, opts: LoginOptions) -> Result<(LoginStart, Option<LoginSession>)> {
        if let Some(account) = api_key_account(Provider::Claude, &opts) {
            return Ok((LoginStart::Complete(account), None));
        }

        let callback = CallbackServer::start(CALLBACK_PATH).await?;
        let redirect_uri = callback.redirect_uri(CALLBACK_PATH);

        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier);
        let state = pkce::generate_state();

        let auth_url = format!(
            "{}?code=true&client_id={}&response_type=code&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            AUTHORIZE_URL,
            urlencoding::encode(CLIENT_ID),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(&state),
            urlencoding::encode(&challenge),
        );

        let session = LoginSession {
            provider: Provider::Claude,
            state,
            verifier,
            redirect_uri,
            callback: Some(callback),
            device_code: None,
            poll_interval: Duration::from_secs(1),
            deadline: Instant::now() + LOGIN_TIMEOUT,
            options: opts,
        };

        Ok((LoginStart::Browser { auth_url }, Some(session)))
    }

    async fn poll(&self, session: &mut LoginSession) -> Result<PollOutcome> {
        if session.expired() {
            return Ok(PollOutcome::Expired);
        }

        let callback = session
            .callback
            .as_mut()
            .ok_or_else(|| GatewayError::Internal("claude poll without callback server".into()))?;

        match callback.try_take() {
            None => Ok(PollOutcome::Pending),
            Some(CallbackResult::Denied { error }) => Ok(PollOutcome::Denied(error)),
            Some(CallbackResult::Code { code, state }) => {
                // Anthropic's code-copy flow can deliver "code#state".
                let (auth_code, returned_state) = match code.split_once('#') {
                    Some((code, state)) => (code.to_string(), state.to_string()),
                    None => (code, state),
                };
                if returned_state != session.state {
                    return Ok(PollOutcome::Denied("state mismatch".to_string()));
                }

                debug!("Exchanging Anthropic authorization code");
                let tokens = self
                    .token_request(&ExchangeRequest {
                        grant_type: "authorization_code",
                        code: &auth_code,
                        state: &returned_state,
                        client_id: CLIENT_ID,
                        redirect_uri: &session.redirect_uri,
                        code_verifier: &session.verifier,
                    })
                    .await?;

                Ok(PollOutcome::Authorized(
                    self.build_account(tokens, &session.options),
                ))
            }
        }
    }

    async fn refresh(&self, account: &Account) -> Result<Account> {
        if account.kind != AccountKind::OAuth {
            return Ok(account.clone());
        }
        let refresh_token = account
            .refresh_token
            .as_deref()
            .ok_or_else(|| GatewayError::Auth("account has no refresh token".to_string()))?;

        let tokens = self
            .token_request(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token,
                client_id: CLIENT_ID,
            })
            .await?;

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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn browser_flow_includes_pkce() {
        let auth = ClaudeAuthenticator::new();
        let (start, session) = auth.start_login(LoginOptions::default()).await.unwrap();
        assert!(session.is_some());
        match start {
            LoginStart::Browser { auth_url } => {
                assert!(auth_url.starts_with(AUTHORIZE_URL));
                assert!(auth_url.contains("code_challenge="));
                assert!(auth_url.contains("scope=org%3Acreate_api_key"));
            }
            _ => panic!("expected browser flow"),
        }
    }

    #[tokio::test]
    async fn api_key_path_skips_oauth() {
        let auth = ClaudeAuthenticator::new();
        let (start, _) = auth
            .start_login(LoginOptions {
                api_key: Some("sk-ant-xxx".to_string()),
                account_id: Some("work".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(start, LoginStart::Complete(_)));
    }
}
