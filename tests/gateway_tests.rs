// Dispatcher end-to-end behaviour against a mocked upstream

use async_trait::async_trait;
use polygate::auth::{Authenticator, AuthRegistry, LoginOptions, LoginSession, LoginStart, PollOutcome};
use polygate::error::{GatewayError, Result};
use polygate::formats::FormatRegistry;
use polygate::gateway::{DispatchOutcome, Dispatcher, ModelRouter};
use polygate::pool::{AccountPool, PoolConfig};
use polygate::provider::Provider;
use polygate::store::{Account, AccountKind, AccountStatus, CredentialStore, FileStore};
use polygate::telemetry::UsageSink;
use polygate::translate::TranslationEngine;
use polygate::upstream::{UpstreamClient, UpstreamConfig};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

struct NoopAuthenticator(Provider);

#[async_trait]
impl Authenticator for NoopAuthenticator {
    fn provider(&self) -> Provider {
        self.0
    }

    async fn start_login(&self, _opts: LoginOptions) -> Result<(LoginStart, Option<LoginSession>)> {
        Err(GatewayError::Internal("not used".into()))
    }

    async fn poll(&self, _session: &mut LoginSession) -> Result<PollOutcome> {
        Err(GatewayError::Internal("not used".into()))
    }

    async fn refresh(&self, account: &Account) -> Result<Account> {
        let mut refreshed = account.clone();
        refreshed.access_token = "refreshed-token".to_string();
        refreshed.expires_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));
        Ok(refreshed)
    }
}

struct Gateway {
    dispatcher: Dispatcher,
    pool: Arc<AccountPool>,
    store: Arc<FileStore>,
    _dir: tempfile::TempDir,
    _usage_rx: tokio::sync::mpsc::Receiver<polygate::telemetry::UsageRecord>,
}

async fn gateway(claude_base_url: String, accounts: Vec<Account>) -> Gateway {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()).unwrap());
    for account in accounts {
        store.save(account).await.unwrap();
    }

    let mut registry = AuthRegistry::new();
    registry.register(Arc::new(NoopAuthenticator(Provider::Claude)));

    let pool = Arc::new(AccountPool::new(
        store.clone(),
        Arc::new(registry),
        PoolConfig::default(),
    ));
    pool.load().await.unwrap();

    let upstream = UpstreamClient::new(UpstreamConfig {
        claude_base_url,
        max_retries: 1,
        ..Default::default()
    })
    .unwrap();

    let (usage_sink, usage_rx) = UsageSink::channel(64);
    let dispatcher = Dispatcher::new(
        pool.clone(),
        TranslationEngine::new(Arc::new(FormatRegistry::standard())),
        Arc::new(upstream),
        ModelRouter::new(HashMap::new()),
        usage_sink,
    );

    Gateway {
        dispatcher,
        pool,
        store,
        _dir: dir,
        _usage_rx: usage_rx,
    }
}

fn api_key_account(id: &str) -> Account {
    let mut acct = Account::new(Provider::Claude, id, AccountKind::ApiKey);
    acct.access_token = format!("sk-ant-{}", id);
    acct
}

fn claude_success_body() -> String {
    json!({
        "id": "msg_up",
        "type": "message",
        "role": "assistant",
        "model": "claude-sonnet-4-5",
        "content": [{ "type": "text", "text": "four" }],
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 7, "output_tokens": 3 }
    })
    .to_string()
}

fn openai_request() -> Vec<u8> {
    json!({
        "model": "claude-sonnet-4-5",
        "messages": [{ "role": "user", "content": "2+2?" }]
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn openai_client_served_by_claude_upstream() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_body(claude_success_body())
        .create_async()
        .await;

    let gw = gateway(server.url(), vec![api_key_account("a1")]).await;
    let outcome = gw
        .dispatcher
        .dispatch("openai", openai_request(), None, None)
        .await
        .unwrap();

    mock.assert_async().await;
    let DispatchOutcome::Buffered(body) = outcome else {
        panic!("expected buffered outcome");
    };
    let value: Value = serde_json::from_slice(&body).unwrap();

    // The client sees its own wire format, not the upstream's.
    assert_eq!(value.get("object").and_then(Value::as_str), Some("chat.completion"));
    assert_eq!(
        value.pointer("/choices/0/message/content").and_then(Value::as_str),
        Some("four")
    );
    assert_eq!(
        value.pointer("/choices/0/finish_reason").and_then(Value::as_str),
        Some("stop")
    );
    assert_eq!(value.pointer("/usage/prompt_tokens").and_then(Value::as_u64), Some(7));
}

#[tokio::test]
async fn claude_client_passthrough_is_byte_exact() {
    let mut server = mockito::Server::new_async().await;
    let upstream_body = claude_success_body();
    let _mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_body(upstream_body.clone())
        .create_async()
        .await;

    let gw = gateway(server.url(), vec![api_key_account("a1")]).await;
    let body = json!({
        "model": "claude-sonnet-4-5",
        "max_tokens": 100,
        "messages": [{ "role": "user", "content": "2+2?" }]
    })
    .to_string()
    .into_bytes();

    let outcome = gw
        .dispatcher
        .dispatch("claude", body, None, None)
        .await
        .unwrap();
    let DispatchOutcome::Buffered(returned) = outcome else {
        panic!("expected buffered outcome");
    };
    assert_eq!(returned, upstream_body.into_bytes());
}

#[tokio::test]
async fn quota_exhaustion_rotates_through_every_account_once() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(429)
        .with_body(json!({"error": {"type": "rate_limit_error", "message": "quota"}}).to_string())
        .expect(2)
        .create_async()
        .await;

    let gw = gateway(
        server.url(),
        vec![api_key_account("a1"), api_key_account("a2")],
    )
    .await;

    let err = gw
        .dispatcher
        .dispatch("openai", openai_request(), None, None)
        .await
        .unwrap_err();

    // Exactly one attempt per account, then a single quota-shaped error.
    mock.assert_async().await;
    assert!(matches!(err, GatewayError::QuotaExceeded { .. }));

    // Both accounts are cooling now.
    for id in ["a1", "a2"] {
        let stored = gw.store.get(Provider::Claude, id).await.unwrap();
        assert_eq!(stored.status, AccountStatus::Cooling);
        assert!(stored.cooldown_until.is_some());
    }
    assert_eq!(gw.pool.cooldown_summary().len(), 2);
}

#[tokio::test]
async fn second_account_serves_after_first_hits_quota() {
    let mut server = mockito::Server::new_async().await;
    // First account's key is rejected with 429, second succeeds.
    let _quota = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "sk-ant-a1")
        .with_status(429)
        .with_body("{}")
        .create_async()
        .await;
    let _ok = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "sk-ant-a2")
        .with_status(200)
        .with_body(claude_success_body())
        .create_async()
        .await;

    let gw = gateway(
        server.url(),
        vec![api_key_account("a1"), api_key_account("a2")],
    )
    .await;

    let outcome = gw
        .dispatcher
        .dispatch("openai", openai_request(), None, None)
        .await
        .unwrap();
    assert!(matches!(outcome, DispatchOutcome::Buffered(_)));

    let a1 = gw.store.get(Provider::Claude, "a1").await.unwrap();
    assert_eq!(a1.status, AccountStatus::Cooling);
    let a2 = gw.store.get(Provider::Claude, "a2").await.unwrap();
    assert_eq!(a2.status, AccountStatus::Active);
}

#[tokio::test]
async fn expired_credential_is_refreshed_and_retried_once() {
    let mut server = mockito::Server::new_async().await;
    // Old token rejected once; refreshed token accepted.
    let _reject = server
        .mock("POST", "/v1/messages")
        .match_header("authorization", "Bearer stale-token")
        .with_status(401)
        .with_body("expired")
        .create_async()
        .await;
    let accept = server
        .mock("POST", "/v1/messages")
        .match_header("authorization", "Bearer refreshed-token")
        .with_status(200)
        .with_body(claude_success_body())
        .create_async()
        .await;

    let mut oauth = Account::new(Provider::Claude, "o1", AccountKind::OAuth);
    oauth.access_token = "stale-token".to_string();
    oauth.refresh_token = Some("refresh".to_string());
    oauth.expires_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));

    let gw = gateway(server.url(), vec![oauth]).await;
    let outcome = gw
        .dispatcher
        .dispatch("openai", openai_request(), None, None)
        .await
        .unwrap();

    accept.assert_async().await;
    assert!(matches!(outcome, DispatchOutcome::Buffered(_)));

    let stored = gw.store.get(Provider::Claude, "o1").await.unwrap();
    assert_eq!(stored.access_token, "refreshed-token");
    assert_eq!(stored.status, AccountStatus::Active);
}

#[tokio::test]
async fn streaming_response_is_reframed_for_the_client() {
    use futures::StreamExt;

    let mut server = mockito::Server::new_async().await;
    let sse_body = format!(
        "event: message_start\ndata: {}\n\n\
         event: content_block_delta\ndata: {}\n\n\
         event: message_delta\ndata: {}\n\n\
         event: message_stop\ndata: {}\n\n",
        json!({"type": "message_start",
               "message": {"id": "msg_s", "model": "claude-sonnet-4-5",
                            "usage": {"input_tokens": 4}}}),
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "text_delta", "text": "streamed"}}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"},
               "usage": {"output_tokens": 2}}),
        json!({"type": "message_stop"}),
    );
    let _mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse_body)
        .create_async()
        .await;

    let gw = gateway(server.url(), vec![api_key_account("a1")]).await;
    let body = json!({
        "model": "claude-sonnet-4-5",
        "stream": true,
        "messages": [{ "role": "user", "content": "go" }]
    })
    .to_string()
    .into_bytes();

    let outcome = gw
        .dispatcher
        .dispatch("openai", body, None, None)
        .await
        .unwrap();
    let DispatchOutcome::Stream(stream) = outcome else {
        panic!("expected stream outcome");
    };

    let chunks: Vec<String> = stream
        .map(|r| String::from_utf8_lossy(&r.unwrap()).into_owned())
        .collect()
        .await;
    let joined = chunks.join("");

    // Client-shaped chunks with exactly one [DONE] terminal.
    assert!(joined.contains("chat.completion.chunk"));
    assert!(joined.contains("\"content\":\"streamed\""));
    assert_eq!(joined.matches("[DONE]").count(), 1);
}

#[tokio::test]
async fn unknown_model_is_rejected_before_account_selection() {
    let gw = gateway("http://unused.invalid".to_string(), vec![]).await;
    let body = json!({
        "model": "llama-70b",
        "messages": [{ "role": "user", "content": "?" }]
    })
    .to_string()
    .into_bytes();

    let err = gw
        .dispatcher
        .dispatch("openai", body, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest(_)));
}

#[tokio::test]
async fn empty_pool_surfaces_no_available_account() {
    let gw = gateway("http://unused.invalid".to_string(), vec![]).await;
    let err = gw
        .dispatcher
        .dispatch("openai", openai_request(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NoAvailableAccount(_)));
}
