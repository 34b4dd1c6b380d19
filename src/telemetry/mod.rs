//! Usage telemetry sink.
//!
//! The dispatcher emits one `UsageRecord` per completed request. Records
//! flow through a bounded channel to whatever external aggregator drains
//! the receiver; a full channel drops the record (with a warning) rather
//! than stalling request handling. Prometheus counters are updated at the
//! same point, so the two views cannot diverge.

use crate::provider::Provider;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

/// One completed request, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub provider: Provider,
    pub model: String,
    pub account_id: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub reasoning_tokens: u32,
    pub cached_tokens: u32,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UsageSink {
    sender: mpsc::Sender<UsageRecord>,
}

impl UsageSink {
    /// Create the sink plus the receiver the aggregator drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<UsageRecord>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Fire-and-forget emission; never blocks the request path.
    pub fn emit(&self, record: UsageRecord) {
        crate::metrics::record_tokens(
            record.provider.as_str(),
            &record.model,
            record.input_tokens,
            record.output_tokens,
            record.reasoning_tokens,
            record.cached_tokens,
        );

        if let Err(e) = self.sender.try_send(record) {
            warn!("Usage sink full, dropping record: {}", e);
        }
    }
}

/// Drain loop for deployments without an external aggregator: log each
/// record at debug level so the data is still observable.
pub async fn log_drain(mut receiver: mpsc::Receiver<UsageRecord>) {
    while let Some(record) = receiver.recv().await {
        tracing::debug!(
            provider = %record.provider,
            model = %record.model,
            account = %record.account_id,
            input = record.input_tokens,
            output = record.output_tokens,
            success = record.success,
            "usage record"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(success: bool) -> UsageRecord {
        UsageRecord {
            provider: Provider::Gemini,
            model: "gemini-2.5-pro".to_string(),
            account_id: "a1".to_string(),
            input_tokens: 10,
            output_tokens: 20,
            reasoning_tokens: 0,
            cached_tokens: 5,
            success,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn emitted_records_reach_receiver() {
        let (sink, mut receiver) = UsageSink::channel(8);
        sink.emit(record(true));
        sink.emit(record(false));

        let first = receiver.recv().await.unwrap();
        assert!(first.success);
        let second = receiver.recv().await.unwrap();
        assert!(!second.success);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sink, _receiver) = UsageSink::channel(1);
        sink.emit(record(true));
        // Second emit finds the channel full; must return without waiting.
        sink.emit(record(true));
    }
}
