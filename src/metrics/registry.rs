// Prometheus metrics registry and collectors

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, GaugeVec, HistogramVec, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total inbound requests per client format
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("requests_total", "Total number of gateway requests"),
        &["format", "provider", "status_code"],
        REGISTRY
    ).unwrap();

    /// Inbound request duration histogram
    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("request_duration_seconds", "Request duration in seconds")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["format", "provider"],
        REGISTRY
    ).unwrap();

    /// Upstream provider calls
    pub static ref UPSTREAM_CALLS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("upstream_calls_total", "Total upstream provider calls"),
        &["provider", "status_code", "streaming"],
        REGISTRY
    ).unwrap();

    /// Upstream call duration
    pub static ref UPSTREAM_DURATION: HistogramVec = register_histogram_vec_with_registry!(
        prometheus::HistogramOpts::new("upstream_duration_seconds", "Upstream call duration")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["provider", "streaming"],
        REGISTRY
    ).unwrap();

    /// Token usage per provider and model
    pub static ref TOKENS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("tokens_total", "Total tokens processed"),
        &["provider", "model", "type"], // type: input, output, reasoning, cached
        REGISTRY
    ).unwrap();

    /// Account selections per provider
    pub static ref ACCOUNT_SELECTIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("account_selections_total", "Total account selections"),
        &["provider", "account_id"],
        REGISTRY
    ).unwrap();

    /// Quota cooldowns started per provider
    pub static ref ACCOUNT_COOLDOWNS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("account_cooldowns_total", "Total quota cooldowns started"),
        &["provider"],
        REGISTRY
    ).unwrap();

    /// Accounts per provider and status
    pub static ref POOL_ACCOUNTS: GaugeVec = register_gauge_vec_with_registry!(
        Opts::new("pool_accounts", "Accounts currently in the pool"),
        &["provider", "status"],
        REGISTRY
    ).unwrap();

    /// Token refresh events
    pub static ref TOKEN_REFRESHES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("token_refreshes_total", "Total OAuth token refreshes"),
        &["provider", "status"], // status: success, failure
        REGISTRY
    ).unwrap();

    /// Degenerate-output recoveries (truncated + empty upstream output)
    pub static ref DEGENERATE_RECOVERIES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("degenerate_recoveries_total", "Fallback chunks inserted for empty truncated responses"),
        &["format"],
        REGISTRY
    ).unwrap();

    /// Translation errors by direction
    pub static ref TRANSLATION_ERRORS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("translation_errors_total", "Total translation errors"),
        &["direction", "error_type"],
        REGISTRY
    ).unwrap();
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
