//! Gateway dispatcher: per-request orchestration.
//!
//! Pipeline per inbound request: identify the client format, route the
//! model to a provider, select an account, translate, forward, translate
//! back, emit. Retry policy: 401 refreshes the same account and retries it
//! once; 429 cools the account down and rotates, bounded by the number of
//! accounts; 5xx retries the same account with exponential backoff; an
//! exhausted pool yields one error shaped in the client's own format.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod routing;

pub use routing::{ModelRouter, RouteTarget};

use crate::error::{GatewayError, Result};
use crate::ir::{ChatRequest, Usage};
use crate::pool::{AccountLease, AccountPool};
use crate::provider::Provider;
use crate::telemetry::{UsageRecord, UsageSink};
use crate::translate::streaming::reframe_stream;
use crate::translate::TranslationEngine;
use crate::upstream::UpstreamClient;
use crate::utils::retry::with_transport_retry;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub type ClientStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, Infallible>> + Send>>;

/// What the handler writes back: a buffered body or an SSE stream, both
/// already in the client's wire format.
pub enum DispatchOutcome {
    Buffered(Vec<u8>),
    Stream(ClientStream),
}

impl std::fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Buffered(body) => {
                f.debug_tuple("Buffered").field(&body.len()).finish()
            }
            DispatchOutcome::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

pub struct Dispatcher {
    pool: Arc<AccountPool>,
    engine: TranslationEngine,
    upstream: Arc<UpstreamClient>,
    router: ModelRouter,
    usage: UsageSink,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<AccountPool>,
        engine: TranslationEngine,
        upstream: Arc<UpstreamClient>,
        router: ModelRouter,
        usage: UsageSink,
    ) -> Self {
        Self {
            pool,
            engine,
            upstream,
            router,
            usage,
        }
    }

    pub fn engine(&self) -> &TranslationEngine {
        &self.engine
    }

    /// Handle one inbound request body in `format`. `model_hint` and
    /// `stream_hint` cover formats that carry these in the URL instead of
    /// the body (the Gemini endpoints).
    pub async fn dispatch(
        &self,
        format: &str,
        body: Vec<u8>,
        model_hint: Option<String>,
        stream_hint: Option<bool>,
    ) -> Result<DispatchOutcome> {
        // IDENTIFIED: parse the client request for routing data. The raw
        // bytes stay around for the passthrough path.
        let client = self.engine.registry().get(format)?;
        let mut parsed = client.parse_request(&body)?;
        if let Some(model) = model_hint {
            parsed.model = model;
        }
        if let Some(stream) = stream_hint {
            parsed.stream = stream;
        }
        if parsed.model.is_empty() {
            return Err(GatewayError::InvalidRequest("request names no model".into()));
        }

        let route = self.router.route(&parsed.model)?;
        let provider = route.provider;
        let to_format = provider.upstream_format();
        let stream = parsed.stream;

        debug!(
            "Dispatch {} -> {} ({} -> {}), stream={}",
            parsed.model, route.upstream_model, format, to_format, stream
        );

        // REQUEST_TRANSLATED: passthrough stays byte-identical; otherwise
        // re-encode the already-parsed IR with the upstream model name.
        let upstream_body = if TranslationEngine::need_convert(format, to_format) {
            let mut ir = parsed.clone();
            ir.model = route.upstream_model.clone();
            ir.stream = stream;
            self.engine.registry().get(to_format)?.encode_request(&ir)?
        } else {
            body
        };

        self.forward(format, to_format, provider, &parsed, &route, upstream_body, stream)
            .await
    }

    /// ACCOUNT_SELECTED → FORWARDED loop with the retry policy.
    #[allow(clippy::too_many_arguments)]
    async fn forward(
        &self,
        from_format: &str,
        to_format: &str,
        provider: Provider,
        parsed: &ChatRequest,
        route: &RouteTarget,
        upstream_body: Vec<u8>,
        stream: bool,
    ) -> Result<DispatchOutcome> {
        let mut tried: HashSet<String> = HashSet::new();
        // Every account is tried at most once per request.
        let account_bound = self.pool.account_count(provider).max(1);
        let mut last_quota_error: Option<GatewayError> = None;

        while tried.len() < account_bound {
            let lease = match self.pool.select(provider, &tried).await {
                Ok(lease) => lease,
                Err(GatewayError::NoAvailableAccount(p)) => {
                    // A quota error from this request is more informative
                    // than the generic empty-pool error.
                    return Err(last_quota_error
                        .unwrap_or(GatewayError::NoAvailableAccount(p)));
                }
                Err(e) => return Err(e),
            };
            let account_id = lease.account.account_id.clone();

            match self
                .send_with_auth_retry(provider, lease, upstream_body.clone(), stream)
                .await
            {
                Ok((lease, outcome)) => {
                    return self
                        .complete(from_format, to_format, parsed, route, lease, outcome, stream)
                        .await;
                }
                Err(GatewayError::QuotaExceeded { message, retry_after }) => {
                    info!(
                        "Account {}/{} hit quota, cooling and rotating",
                        provider, account_id
                    );
                    self.pool
                        .mark_quota_exceeded(provider, &account_id, retry_after)
                        .await;
                    tried.insert(account_id);
                    last_quota_error =
                        Some(GatewayError::QuotaExceeded { message, retry_after });
                }
                Err(e @ GatewayError::Auth(_)) => {
                    // Refresh already ran and failed; the pool disabled the
                    // account. Move to the next candidate.
                    warn!("Account {}/{} unusable: {}", provider, account_id, e);
                    tried.insert(account_id);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_quota_error.unwrap_or(GatewayError::NoAvailableAccount(provider.to_string())))
    }

    /// One upstream attempt, with the 401 policy: refresh the same account
    /// and retry it once before giving up on it.
    async fn send_with_auth_retry(
        &self,
        provider: Provider,
        lease: AccountLease,
        body: Vec<u8>,
        stream: bool,
    ) -> Result<(AccountLease, UpstreamOutcome)> {
        match self.send_once(provider, &lease, body.clone(), stream).await {
            Ok(outcome) => Ok((lease, outcome)),
            Err(GatewayError::Auth(first)) => {
                debug!("Upstream rejected credential, refreshing and retrying once");
                let refreshed = self
                    .pool
                    .refresh_account(provider, &lease.account.account_id)
                    .await?;

                let mut lease = lease;
                lease.account = refreshed;
                match self.send_once(provider, &lease, body, stream).await {
                    Ok(outcome) => Ok((lease, outcome)),
                    Err(e @ GatewayError::Auth(_)) => {
                        // Fresh token still rejected: the credential is
                        // broken beyond refresh. Disable it.
                        let _ = self
                            .pool
                            .set_status(
                                provider,
                                &lease.account.account_id,
                                crate::store::AccountStatus::Disabled,
                            )
                            .await;
                        error!(
                            "Credential for {}/{} rejected after refresh (first error: {})",
                            provider, lease.account.account_id, first
                        );
                        Err(e)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn send_once(
        &self,
        provider: Provider,
        lease: &AccountLease,
        body: Vec<u8>,
        stream: bool,
    ) -> Result<UpstreamOutcome> {
        let max_attempts = self.upstream.max_retries().max(1);
        if stream {
            let stream = with_transport_retry("upstream stream", max_attempts, || {
                self.upstream.send_stream(provider, &lease.account, body.clone())
            })
            .await?;
            Ok(UpstreamOutcome::Stream(stream))
        } else {
            let bytes = with_transport_retry("upstream call", max_attempts, || {
                self.upstream.send_buffered(provider, &lease.account, body.clone())
            })
            .await?;
            Ok(UpstreamOutcome::Buffered(bytes))
        }
    }

    /// RESPONSE_TRANSLATED → EMITTED.
    async fn complete(
        &self,
        from_format: &str,
        to_format: &str,
        parsed: &ChatRequest,
        route: &RouteTarget,
        lease: AccountLease,
        outcome: UpstreamOutcome,
        _stream: bool,
    ) -> Result<DispatchOutcome> {
        let provider = route.provider;
        let requested_model = parsed.model.clone();
        let upstream_model = route.upstream_model.clone();

        match outcome {
            UpstreamOutcome::Buffered(upstream_body) => {
                let usage = self
                    .engine
                    .response_usage(to_format, &upstream_body)
                    .unwrap_or_default();

                let client_body = match self.engine.translate_response(
                    to_format,
                    from_format,
                    &requested_model,
                    &upstream_body,
                ) {
                    Ok(body) => body,
                    Err(e) => {
                        // Recover locally with a best-effort empty body in
                        // the client shape instead of failing the request.
                        warn!("Response translation failed, emitting fallback: {}", e);
                        crate::metrics::record_translation_error("response", e.error_type());
                        self.fallback_response(from_format, &requested_model, usage)?
                    }
                };

                self.emit_usage(provider, &upstream_model, &lease, Some(usage), true);
                Ok(DispatchOutcome::Buffered(client_body))
            }
            UpstreamOutcome::Stream(upstream) => {
                let sink = self.usage.clone();
                let account_id = lease.account.account_id.clone();

                if TranslationEngine::need_convert(to_format, from_format) {
                    let reframer =
                        self.engine
                            .stream_reframer(to_format, from_format, &requested_model)?;

                    // The lease rides inside the callback: client
                    // disconnect drops the stream, the callback, and the
                    // lease with it.
                    let on_complete = move |usage: Option<Usage>| {
                        let usage = usage.unwrap_or_default();
                        sink.emit(UsageRecord {
                            provider,
                            model: upstream_model,
                            account_id,
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                            reasoning_tokens: usage.reasoning_tokens,
                            cached_tokens: usage.cached_tokens,
                            success: true,
                            timestamp: chrono::Utc::now(),
                        });
                        drop(lease);
                    };

                    let frames = reframe_stream(upstream, reframer, on_complete)
                        .map(|r| r.map(Bytes::from));
                    Ok(DispatchOutcome::Stream(Box::pin(frames)))
                } else {
                    // Passthrough: pipe upstream bytes untouched.
                    let piped = async_stream::stream! {
                        let mut upstream = upstream;
                        while let Some(chunk) = upstream.next().await {
                            match chunk {
                                Ok(bytes) => yield Ok::<Bytes, Infallible>(bytes),
                                Err(e) => {
                                    warn!("Passthrough stream error: {}", e);
                                    break;
                                }
                            }
                        }
                        sink.emit(UsageRecord {
                            provider,
                            model: upstream_model,
                            account_id,
                            input_tokens: 0,
                            output_tokens: 0,
                            reasoning_tokens: 0,
                            cached_tokens: 0,
                            success: true,
                            timestamp: chrono::Utc::now(),
                        });
                        drop(lease);
                    };
                    Ok(DispatchOutcome::Stream(Box::pin(piped)))
                }
            }
        }
    }

    fn fallback_response(
        &self,
        format: &str,
        model: &str,
        usage: Usage,
    ) -> Result<Vec<u8>> {
        let response = crate::ir::ChatResponse {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            message: crate::ir::Message::text(crate::ir::Role::Assistant, ""),
            stop_reason: crate::ir::StopReason::Stop,
            usage,
        };
        self.engine.registry().get(format)?.encode_response(&response)
    }

    fn emit_usage(
        &self,
        provider: Provider,
        model: &str,
        lease: &AccountLease,
        usage: Option<Usage>,
        success: bool,
    ) {
        let usage = usage.unwrap_or_default();
        self.usage.emit(UsageRecord {
            provider,
            model: model.to_string(),
            account_id: lease.account.account_id.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            reasoning_tokens: usage.reasoning_tokens,
            cached_tokens: usage.cached_tokens,
            success,
            timestamp: chrono::Utc::now(),
        });
    }
}

enum UpstreamOutcome {
    Buffered(Bytes),
    Stream(crate::upstream::ByteStream),
}
