//! Upstream provider HTTP client.
//!
//! One pooled `reqwest` client serves every provider; per-provider logic
//! is limited to endpoint paths and credential headers. Error statuses are
//! classified into the gateway taxonomy here so the dispatcher can apply
//! its retry policy without looking at provider-specific JSON.

use crate::error::{GatewayError, Result};
use crate::provider::Provider;
use crate::store::{Account, AccountKind};
use crate::utils::retry::parse_retry_delay;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL for the Anthropic Messages API.
    #[serde(default = "default_claude_base_url")]
    pub claude_base_url: String,

    /// Base URL for the Google Cloud Code internal API.
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,

    /// Base URL for the OpenAI Responses API.
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// Connection and request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Maximum retries for transport-level failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_claude_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_gemini_base_url() -> String {
    "https://cloudcode-pa.googleapis.com/v1internal".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            claude_base_url: default_claude_base_url(),
            gemini_base_url: default_gemini_base_url(),
            openai_base_url: default_openai_base_url(),
            timeout_seconds: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .use_rustls_tls()
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    fn endpoint(&self, provider: Provider, stream: bool) -> String {
        match provider {
            Provider::Claude => format!("{}/v1/messages", self.config.claude_base_url),
            Provider::Gemini => {
                let method = if stream {
                    ":streamGenerateContent?alt=sse"
                } else {
                    ":generateContent"
                };
                format!("{}{}", self.config.gemini_base_url, method)
            }
            Provider::OpenAi => format!("{}/responses", self.config.openai_base_url),
        }
    }

    fn build_request(
        &self,
        provider: Provider,
        account: &Account,
        body: Vec<u8>,
        stream: bool,
    ) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(self.endpoint(provider, stream))
            .header("Content-Type", "application/json")
            .body(self.prepare_body(provider, account, body));

        builder = match provider {
            Provider::Claude => {
                let with_version = builder.header("anthropic-version", "2023-06-01");
                match account.kind {
                    AccountKind::ApiKey => with_version.header("x-api-key", &account.access_token),
                    _ => with_version
                        .header("Authorization", format!("Bearer {}", account.access_token))
                        .header("anthropic-beta", "oauth-2025-04-20"),
                }
            }
            Provider::Gemini | Provider::OpenAi => {
                builder.header("Authorization", format!("Bearer {}", account.access_token))
            }
        };

        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }
        builder
    }

    /// Provider-specific body fixups that depend on the account rather
    /// than the format: the Cloud Code API wants the GCP project inline.
    fn prepare_body(&self, provider: Provider, account: &Account, body: Vec<u8>) -> Vec<u8> {
        if provider != Provider::Gemini {
            return body;
        }
        let Some(project_id) = account.metadata.project_id.as_deref() else {
            return body;
        };
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(mut value) => {
                if value.is_object() && value.get("project").is_none() {
                    value["project"] = serde_json::Value::String(project_id.to_string());
                }
                serde_json::to_vec(&value).unwrap_or(body)
            }
            Err(_) => body,
        }
    }

    /// Classify a non-success status into the gateway error taxonomy.
    async fn classify_failure(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let retry_after_header = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();

        match status {
            401 | 403 => GatewayError::Auth(format!("upstream rejected credential: {}", body)),
            429 => {
                // Explicit retry-after wins; Google embeds it in the body.
                let retry_after = retry_after_header.or_else(|| parse_retry_delay(&body));
                GatewayError::QuotaExceeded {
                    message: truncate(&body, 500),
                    retry_after,
                }
            }
            400 | 404 | 422 => GatewayError::InvalidRequest(truncate(&body, 500)),
            _ => GatewayError::Transport(format!("HTTP {}: {}", status, truncate(&body, 500))),
        }
    }

    async fn dispatch(
        &self,
        provider: Provider,
        account: &Account,
        body: Vec<u8>,
        stream: bool,
    ) -> Result<reqwest::Response> {
        debug!(
            "Forwarding to {} as {} (stream={})",
            provider, account.account_id, stream
        );
        let started = std::time::Instant::now();

        let response = self
            .build_request(provider, account, body, stream)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("upstream request failed: {}", e)))?;

        let status = response.status();
        crate::metrics::record_upstream_call(
            provider.as_str(),
            status.as_u16(),
            stream,
            started.elapsed().as_secs_f64(),
        );

        if !status.is_success() {
            let err = Self::classify_failure(response).await;
            warn!("Upstream {} returned {}: {}", provider, status, err);
            return Err(err);
        }
        Ok(response)
    }

    /// Non-streaming call: the full upstream body.
    pub async fn send_buffered(
        &self,
        provider: Provider,
        account: &Account,
        body: Vec<u8>,
    ) -> Result<Bytes> {
        let response = self.dispatch(provider, account, body, false).await?;
        response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(format!("failed to read upstream body: {}", e)))
    }

    /// Streaming call: the upstream byte stream, forwarded as it arrives.
    pub async fn send_stream(
        &self,
        provider: Provider,
        account: &Account,
        body: Vec<u8>,
    ) -> Result<ByteStream> {
        let response = self.dispatch(provider, account, body, true).await?;
        Ok(Box::pin(response.bytes_stream()))
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AccountKind;

    fn account(kind: AccountKind) -> Account {
        let mut acct = Account::new(Provider::Gemini, "a", kind);
        acct.access_token = "tok".to_string();
        acct
    }

    #[test]
    fn endpoints_per_provider() {
        let client = UpstreamClient::new(UpstreamConfig::default()).unwrap();
        assert_eq!(
            client.endpoint(Provider::Claude, false),
            "https://api.anthropic.com/v1/messages"
        );
        assert!(client
            .endpoint(Provider::Gemini, true)
            .ends_with(":streamGenerateContent?alt=sse"));
        assert!(client.endpoint(Provider::OpenAi, false).ends_with("/responses"));
    }

    #[test]
    fn gemini_body_gains_project() {
        let client = UpstreamClient::new(UpstreamConfig::default()).unwrap();
        let mut acct = account(AccountKind::OAuth);
        acct.metadata.project_id = Some("proj-1".to_string());

        let body = client.prepare_body(
            Provider::Gemini,
            &acct,
            br#"{"model":"m","request":{}}"#.to_vec(),
        );
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value.get("project").and_then(|v| v.as_str()), Some("proj-1"));
    }

    #[test]
    fn non_gemini_body_untouched() {
        let client = UpstreamClient::new(UpstreamConfig::default()).unwrap();
        let acct = account(AccountKind::ApiKey);
        let body = client.prepare_body(Provider::Claude, &acct, b"raw".to_vec());
        assert_eq!(body, b"raw".to_vec());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let cut = truncate(text, 3);
        assert!(cut.starts_with("h"));
        assert!(cut.ends_with("…"));
        assert_eq!(truncate("short", 10), "short");
    }

    #[tokio::test]
    async fn quota_failure_carries_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .with_header("retry-after", "30")
            .with_body("{\"error\":{\"type\":\"rate_limit_error\"}}")
            .create_async()
            .await;

        let config = UpstreamConfig {
            claude_base_url: server.url(),
            ..Default::default()
        };
        let client = UpstreamClient::new(config).unwrap();
        let mut acct = Account::new(Provider::Claude, "a", AccountKind::ApiKey);
        acct.access_token = "sk".to_string();

        let err = client
            .send_buffered(Provider::Claude, &acct, b"{}".to_vec())
            .await
            .unwrap_err();
        match err {
            GatewayError::QuotaExceeded { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn auth_failure_classified() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(401)
            .with_body("expired")
            .create_async()
            .await;

        let config = UpstreamConfig {
            claude_base_url: server.url(),
            ..Default::default()
        };
        let client = UpstreamClient::new(config).unwrap();
        let mut acct = Account::new(Provider::Claude, "a", AccountKind::ApiKey);
        acct.access_token = "sk".to_string();

        let err = client
            .send_buffered(Provider::Claude, &acct, b"{}".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
    }
}
