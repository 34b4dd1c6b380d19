// Google OAuth2 strategy for Gemini accounts

use super::callback::{CallbackResult, CallbackServer};
use super::{
    api_key_account, email_from_id_token, pkce, Authenticator, LoginOptions, LoginSession,
    LoginStart, PollOutcome,
};
use crate::error::{GatewayError, Result};
use crate::provider::Provider;
use crate::store::{Account, AccountKind};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Public client credentials of the Gemini CLI, used for the
/// installed-app OAuth flow.
const OAUTH_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const OAUTH_CLIENT_SECRET: &str = "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";

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CALLBACK_PATH: &str = "/oauth2callback";

const OAUTH_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
];

/// Login attempts expire after ten minutes of waiting for the redirect.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(600);

pub struct GeminiAuthenticator {
    client: reqwest::Client,
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    id_token: Option<String>,
}

impl GeminiAuthenticator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: &str,
    ) -> Result<TokenResponse> {
        let params = [
            ("client_id", OAUTH_CLIENT_ID),
            ("client_secret", OAUTH_CLIENT_SECRET),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
            ("code_verifier", verifier),
        ];

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::Auth(format!("token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(format!("token exchange failed: {}", body)));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Auth(format!("malformed token response: {}", e)))
    }

    fn build_account(&self, tokens: TokenResponse, opts: &LoginOptions) -> Account {
        let email = tokens.id_token.as_deref().and_then(email_from_id_token);
        let account_id = opts
            .account_id
            .clone()
            .or_else(|| email.clone())
            .unwrap_or_else(|| format!("google-{}", uuid::Uuid::new_v4().simple()));

        let mut account = Account::new(Provider::Gemini, account_id, AccountKind::OAuth);
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

impl Default for GeminiAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for GeminiAuthenticator {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn start_login(&self, opts: LoginOptions) -> Result<(LoginStart, Option<LoginSession>)> {
        if let Some(account) = api_key_account(Provider::Gemini, &opts) {
            return Ok((LoginStart::Complete(account), None));
        }

        let callback = CallbackServer::start(CALLBACK_PATH).await?;
        let redirect_uri = callback.redirect_uri(CALLBACK_PATH);

        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier);
        let state = pkce::generate_state();

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}&code_challenge={}&code_challenge_method=S256",
            AUTH_URL,
            urlencoding::encode(OAUTH_CLIENT_ID),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(&OAUTH_SCOPES.join(" ")),
            urlencoding::encode(&state),
            urlencoding::encode(&challenge),
        );

        let session = LoginSession {
            provider: Provider::Gemini,
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
            .ok_or_else(|| GatewayError::Internal("gemini poll without callback server".into()))?;

        match callback.try_take() {
            None => Ok(PollOutcome::Pending),
            Some(CallbackResult::Denied { error }) => Ok(PollOutcome::Denied(error)),
            Some(CallbackResult::Code { code, state }) => {
                if state != session.state {
                    warn!("CSRF state mismatch on Google OAuth callback");
                    return Ok(PollOutcome::Denied("state mismatch".to_string()));
                }
                debug!("Received Google authorization code, exchanging for tokens");
                let tokens = self
                    .exchange_code(&code, &session.redirect_uri, &session.verifier)
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

        let params = [
            ("client_id", OAUTH_CLIENT_ID),
            ("client_secret", OAUTH_CLIENT_SECRET),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("Google OAuth2 network error: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            // 4xx means the refresh token itself is bad; the pool disables
            // the account. 5xx is a transient upstream problem.
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
        debug!(
            "Refreshed Google token for {}, expires in {}s",
            refreshed.account_id,
            tokens.expires_in.unwrap_or(3600)
        );
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn api_key_completes_immediately() {
        let auth = GeminiAuthenticator::new();
        let opts = LoginOptions {
            api_key: Some("AIza-test".to_string()),
            ..Default::default()
        };
        let (start, session) = auth.start_login(opts).await.unwrap();
        assert!(session.is_none());
        match start {
            LoginStart::Complete(account) => assert_eq!(account.kind, AccountKind::ApiKey),
            _ => panic!("expected immediate completion"),
        }
    }

    #[tokio::test]
    async fn browser_flow_builds_auth_url() {
        let auth = GeminiAuthenticator::new();
        let (start, session) = auth.start_login(LoginOptions::default()).await.unwrap();
        let session = session.unwrap();
        match start {
            LoginStart::Browser { auth_url } => {
                assert!(auth_url.starts_with(AUTH_URL));
                assert!(auth_url.contains("code_challenge_method=S256"));
                assert!(auth_url.contains(&session.state));
            }
            _ => panic!("expected browser flow"),
        }
    }

    #[tokio::test]
    async fn refresh_requires_refresh_token() {
        let auth = GeminiAuthenticator::new();
        let mut account = Account::new(Provider::Gemini, "a", AccountKind::OAuth);
        account.refresh_token = None;
        assert!(auth.refresh(&account).await.is_err());
    }
}
