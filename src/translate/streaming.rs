// Incremental SSE re-framing between wire formats

use super::sse::SseDecoder;
use crate::error::Result;
use crate::formats::{StreamEmitter, StreamParser};
use crate::ir::StreamItem;
use bytes::Bytes;
use futures::Stream;
use std::time::Duration;
use tracing::{debug, warn};

/// Interval between keep-alive comments on an idle stream. Comment frames
/// are legal SSE for every client format.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Stateful pipeline for one streamed response: upstream bytes are decoded
/// into SSE events, parsed into IR items, and re-emitted as client frames
/// in the same temporal order. Tracks accumulated visible text so the
/// degenerate-output rule can fire, and guarantees exactly one terminal
/// event per logical response even when the upstream ends abnormally.
pub struct StreamReframer {
    decoder: SseDecoder,
    parser: Box<dyn StreamParser>,
    emitter: Box<dyn StreamEmitter>,
    visible_len: usize,
    closed: bool,
    final_usage: Option<crate::ir::Usage>,
}

impl StreamReframer {
    pub fn new(parser: Box<dyn StreamParser>, emitter: Box<dyn StreamEmitter>) -> Self {
        Self {
            decoder: SseDecoder::new(),
            parser,
            emitter,
            visible_len: 0,
            closed: false,
            final_usage: None,
        }
    }

    /// Usage reported by the upstream terminal event, if one arrived.
    pub fn final_usage(&self) -> Option<crate::ir::Usage> {
        self.final_usage
    }

    /// Feed one upstream chunk and collect the client frames it produced.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        let mut frames = Vec::new();
        for event in self.decoder.feed(chunk) {
            let items = self.parser.parse_event(&event)?;
            for item in items {
                frames.extend(self.emit_item(item)?);
            }
        }
        Ok(frames)
    }

    /// Upstream ended: flush any unterminated tail, then force the
    /// terminal if none was seen (implicit stop).
    pub fn finish(&mut self) -> Result<Vec<String>> {
        let mut frames = Vec::new();
        if let Some(event) = self.decoder.finish() {
            if let Ok(items) = self.parser.parse_event(&event) {
                for item in items {
                    frames.extend(self.emit_item(item)?);
                }
            }
        }
        if !self.closed {
            debug!("Upstream stream ended without explicit terminal, closing with default stop");
            self.closed = true;
            frames.extend(self.emitter.finalize()?);
        }
        Ok(frames)
    }

    fn emit_item(&mut self, item: StreamItem) -> Result<Vec<String>> {
        if let StreamItem::TextDelta(text) = &item {
            self.visible_len += text.len();
        }

        if let StreamItem::Finish { usage, .. } = &item {
            self.final_usage = Some(*usage);
        }

        // Degenerate-output rule, streaming side: a truncation terminal
        // with nothing visible gets a fallback delta first.
        if let StreamItem::Finish { stop_reason, .. } = &item {
            if stop_reason.is_truncation() && self.visible_len == 0 {
                debug!("Truncated stream with no visible text, inserting fallback delta");
                let mut frames = self.emitter.emit(&StreamItem::TextDelta(
                    super::DEGENERATE_FALLBACK_TEXT.to_string(),
                ))?;
                self.visible_len = super::DEGENERATE_FALLBACK_TEXT.len();
                self.closed = true;
                frames.extend(self.emitter.emit(&item)?);
                return Ok(frames);
            }
        }

        if matches!(item, StreamItem::Finish { .. } | StreamItem::Done) {
            self.closed = true;
        }
        self.emitter.emit(&item)
    }
}

/// Connect an upstream byte stream to a client SSE stream through a
/// re-framer. Data is forwarded as it arrives; idle periods produce
/// keep-alive comments so proxies do not drop the connection. Dropping the
/// returned stream (client disconnect) drops the upstream stream with it,
/// cancelling the upstream call.
pub fn reframe_stream<S, E, F>(
    upstream: S,
    mut reframer: StreamReframer,
    on_complete: F,
) -> impl Stream<Item = std::result::Result<String, std::convert::Infallible>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send,
    F: FnOnce(Option<crate::ir::Usage>) + Send + 'static,
{
    async_stream::stream! {
        futures::pin_mut!(upstream);

        loop {
            tokio::select! {
                chunk = futures::StreamExt::next(&mut upstream) => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            match reframer.feed(&bytes) {
                                Ok(frames) => {
                                    for frame in frames {
                                        yield Ok(frame);
                                    }
                                }
                                Err(e) => {
                                    // Recover locally: close the stream
                                    // cleanly instead of crashing it.
                                    warn!("Stream translation error: {}", e);
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Upstream stream error: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                _ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {
                    yield Ok(": keep-alive\n\n".to_string());
                }
            }
        }

        match reframer.finish() {
            Ok(frames) => {
                for frame in frames {
                    yield Ok(frame);
                }
            }
            Err(e) => warn!("Failed to finalize stream: {}", e),
        }
        on_complete(reframer.final_usage());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::FormatRegistry;
    use serde_json::json;

    fn reframer(from: &str, to: &str) -> StreamReframer {
        let registry = FormatRegistry::standard();
        StreamReframer::new(
            registry.get(from).unwrap().stream_parser(),
            registry.get(to).unwrap().stream_emitter("test-model"),
        )
    }

    fn terminal_count(frames: &[String]) -> usize {
        frames.iter().filter(|f| f.contains("message_stop")).count()
    }

    #[test]
    fn gemini_stream_reframed_to_claude() {
        let mut reframer = reframer("gemini-cli", "claude");

        let chunk1 = json!({"response": {"candidates": [
            {"content": {"role": "model", "parts": [{"text": "Hel"}]}}]}});
        let chunk2 = json!({"response": {"candidates": [
            {"content": {"role": "model", "parts": [{"text": "lo"}]},
             "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 5}}});

        let mut frames = Vec::new();
        frames.extend(reframer.feed(format!("data: {}\n\n", chunk1).as_bytes()).unwrap());
        frames.extend(reframer.feed(format!("data: {}\n\n", chunk2).as_bytes()).unwrap());
        frames.extend(reframer.finish().unwrap());

        let joined = frames.join("");
        assert!(joined.contains("message_start"));
        assert!(joined.contains("\"text\":\"Hel\""));
        assert!(joined.contains("\"text\":\"lo\""));
        assert_eq!(terminal_count(&frames), 1);
    }

    #[test]
    fn abnormal_end_still_emits_one_terminal() {
        let mut reframer = reframer("gemini-cli", "claude");

        let chunk = json!({"response": {"candidates": [
            {"content": {"role": "model", "parts": [{"text": "cut off"}]}}]}});
        let mut frames = reframer
            .feed(format!("data: {}\n\n", chunk).as_bytes())
            .unwrap();
        // Upstream dies here with no finishReason.
        frames.extend(reframer.finish().unwrap());

        assert_eq!(terminal_count(&frames), 1);
        assert!(frames.iter().any(|f| f.contains("\"stop_reason\":\"end_turn\"")));
    }

    #[test]
    fn truncated_empty_stream_gets_fallback_delta() {
        let mut reframer = reframer("gemini-cli", "claude");

        let chunk = json!({"response": {"candidates": [
            {"content": {"role": "model", "parts": []},
             "finishReason": "MAX_TOKENS"}]}});
        let mut frames = reframer
            .feed(format!("data: {}\n\n", chunk).as_bytes())
            .unwrap();
        frames.extend(reframer.finish().unwrap());

        let joined = frames.join("");
        assert!(joined.contains("No visible output"));
        assert!(joined.contains("\"stop_reason\":\"max_tokens\""));
        assert_eq!(terminal_count(&frames), 1);
    }

    #[test]
    fn truncated_stream_with_text_gets_no_fallback() {
        let mut reframer = reframer("gemini-cli", "claude");

        let chunk = json!({"response": {"candidates": [
            {"content": {"role": "model", "parts": [{"text": "some output"}]},
             "finishReason": "MAX_TOKENS"}]}});
        let mut frames = reframer
            .feed(format!("data: {}\n\n", chunk).as_bytes())
            .unwrap();
        frames.extend(reframer.finish().unwrap());

        assert!(!frames.join("").contains("No visible output"));
    }

    #[test]
    fn claude_stream_reframed_to_openai() {
        let registry = FormatRegistry::standard();
        let mut reframer = StreamReframer::new(
            registry.get("claude").unwrap().stream_parser(),
            registry.get("openai").unwrap().stream_emitter("gpt-4o"),
        );

        let events = [
            format!(
                "event: message_start\ndata: {}\n\n",
                json!({"type": "message_start",
                       "message": {"id": "msg_1", "model": "m", "usage": {"input_tokens": 3}}})
            ),
            format!(
                "event: content_block_delta\ndata: {}\n\n",
                json!({"type": "content_block_delta", "index": 0,
                       "delta": {"type": "text_delta", "text": "hi"}})
            ),
            format!(
                "event: message_delta\ndata: {}\n\n",
                json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"},
                       "usage": {"output_tokens": 1}})
            ),
            format!(
                "event: message_stop\ndata: {}\n\n",
                json!({"type": "message_stop"})
            ),
        ];

        let mut frames = Vec::new();
        for event in &events {
            frames.extend(reframer.feed(event.as_bytes()).unwrap());
        }
        frames.extend(reframer.finish().unwrap());

        let joined = frames.join("");
        assert!(joined.contains("chat.completion.chunk"));
        assert!(joined.contains("\"content\":\"hi\""));
        let done_count = frames.iter().filter(|f| f.contains("[DONE]")).count();
        assert_eq!(done_count, 1);
    }

    #[tokio::test]
    async fn reframe_stream_forwards_and_closes() {
        use futures::StreamExt;

        let reframer = reframer("gemini-cli", "claude");
        let chunk = json!({"response": {"candidates": [
            {"content": {"role": "model", "parts": [{"text": "ok"}]},
             "finishReason": "STOP"}]}});
        let body = format!("data: {}\n\n", chunk);

        let upstream = futures::stream::iter(vec![Ok::<Bytes, std::io::Error>(Bytes::from(body))]);
        let (usage_tx, usage_rx) = std::sync::mpsc::channel();
        let frames: Vec<String> = reframe_stream(upstream, reframer, move |usage| {
            let _ = usage_tx.send(usage);
        })
        .map(|r| r.unwrap())
        .collect()
        .await;

        assert_eq!(terminal_count(&frames), 1);
        // Completion callback fires with the terminal usage.
        assert!(usage_rx.try_recv().unwrap().is_some());
    }
}
