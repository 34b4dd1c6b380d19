// Metrics module for Prometheus observability

mod registry;

pub use registry::{
    gather_metrics, ACCOUNT_COOLDOWNS, ACCOUNT_SELECTIONS, DEGENERATE_RECOVERIES, POOL_ACCOUNTS,
    REQUESTS_TOTAL, REQUEST_DURATION, TOKENS_TOTAL, TOKEN_REFRESHES, TRANSLATION_ERRORS,
    UPSTREAM_CALLS, UPSTREAM_DURATION,
};

/// Record one completed gateway request.
pub fn record_request(format: &str, provider: &str, status_code: u16, duration_secs: f64) {
    REQUESTS_TOTAL
        .with_label_values(&[format, provider, &status_code.to_string()])
        .inc();

    REQUEST_DURATION
        .with_label_values(&[format, provider])
        .observe(duration_secs);
}

/// Record one upstream provider call.
pub fn record_upstream_call(provider: &str, status_code: u16, streaming: bool, duration_secs: f64) {
    UPSTREAM_CALLS
        .with_label_values(&[provider, &status_code.to_string(), &streaming.to_string()])
        .inc();

    UPSTREAM_DURATION
        .with_label_values(&[provider, &streaming.to_string()])
        .observe(duration_secs);
}

/// Record token usage for one completed request.
pub fn record_tokens(provider: &str, model: &str, input: u32, output: u32, reasoning: u32, cached: u32) {
    for (kind, count) in [
        ("input", input),
        ("output", output),
        ("reasoning", reasoning),
        ("cached", cached),
    ] {
        if count > 0 {
            TOKENS_TOTAL
                .with_label_values(&[provider, model, kind])
                .inc_by(count as f64);
        }
    }
}

pub fn record_account_selected(provider: &str, account_id: &str) {
    ACCOUNT_SELECTIONS
        .with_label_values(&[provider, account_id])
        .inc();
}

pub fn record_cooldown(provider: &str) {
    ACCOUNT_COOLDOWNS.with_label_values(&[provider]).inc();
}

pub fn record_token_refresh(provider: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    TOKEN_REFRESHES.with_label_values(&[provider, status]).inc();
}

pub fn record_degenerate_recovery(format: &str) {
    DEGENERATE_RECOVERIES.with_label_values(&[format]).inc();
}

pub fn record_translation_error(direction: &str, error_type: &str) {
    TRANSLATION_ERRORS
        .with_label_values(&[direction, error_type])
        .inc();
}

pub fn update_pool_gauge(provider: &str, status: &str, count: usize) {
    POOL_ACCOUNTS
        .with_label_values(&[provider, status])
        .set(count as f64);
}
