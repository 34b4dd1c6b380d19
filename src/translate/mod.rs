//! Translation engine: format-pair dispatch through the canonical IR.
//!
//! Identical (or unspecified) formats pass through untouched at the byte
//! level; everything else decodes into the IR and re-encodes with the
//! target codec. The engine also owns the degenerate-output rule: a
//! truncated response with no visible text gains a short fallback chunk so
//! clients never see an empty body with a truncation status.

pub mod sse;
pub mod streaming;

pub use streaming::StreamReframer;

use crate::error::Result;
use crate::formats::FormatRegistry;
use crate::ir::ContentPart;
use std::sync::Arc;
use tracing::debug;

/// Text injected when an upstream reports truncation but produced nothing
/// visible. The trigger condition is the contract; the wording is not.
pub const DEGENERATE_FALLBACK_TEXT: &str =
    "No visible output was produced before the response hit its token limit.";

pub struct TranslationEngine {
    registry: Arc<FormatRegistry>,
}

impl TranslationEngine {
    pub fn new(registry: Arc<FormatRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    /// Whether a conversion is needed between two formats. A passthrough
    /// is a true no-op, never a lossy round trip through the IR.
    pub fn need_convert(from: &str, to: &str) -> bool {
        !(from.is_empty() || to.is_empty() || from == to)
    }

    /// Convert a client request body into the upstream format. The model
    /// name is overridden with the upstream model chosen by routing.
    pub fn translate_request(
        &self,
        from: &str,
        to: &str,
        model: &str,
        raw: &[u8],
    ) -> Result<Vec<u8>> {
        if !Self::need_convert(from, to) {
            return Ok(raw.to_vec());
        }

        let mut request = self.registry.get(from)?.parse_request(raw)?;
        request.model = model.to_string();
        debug!(
            "Translated request {} -> {} ({} messages)",
            from,
            to,
            request.messages.len()
        );
        self.registry.get(to)?.encode_request(&request)
    }

    /// Convert a buffered upstream response into the client format,
    /// applying finish-reason remapping and the degenerate-output rule.
    pub fn translate_response(
        &self,
        from: &str,
        to: &str,
        model: &str,
        raw: &[u8],
    ) -> Result<Vec<u8>> {
        if !Self::need_convert(from, to) {
            return Ok(raw.to_vec());
        }

        let mut response = self.registry.get(from)?.parse_response(raw)?;
        response.model = model.to_string();

        if response.stop_reason.is_truncation() && response.visible_text_len() == 0 {
            debug!("Truncated response with no visible text, inserting fallback chunk");
            crate::metrics::record_degenerate_recovery(to);
            response
                .message
                .parts
                .push(ContentPart::text(DEGENERATE_FALLBACK_TEXT));
        }

        self.registry.get(to)?.encode_response(&response)
    }

    /// Parsed upstream usage for telemetry, regardless of passthrough.
    pub fn response_usage(&self, format: &str, raw: &[u8]) -> Option<crate::ir::Usage> {
        let converter = self.registry.get(format).ok()?;
        converter.parse_response(raw).ok().map(|r| r.usage)
    }

    /// Build the incremental re-framer for one streamed response.
    pub fn stream_reframer(&self, from: &str, to: &str, model: &str) -> Result<StreamReframer> {
        let parser = self.registry.get(from)?.stream_parser();
        let emitter = self.registry.get(to)?.stream_emitter(model);
        Ok(StreamReframer::new(parser, emitter))
    }

    /// Client-native error body for a failed request.
    pub fn error_body(&self, format: &str, status: u16, error_type: &str, message: &str) -> Vec<u8> {
        match self.registry.get(format) {
            Ok(converter) => converter.encode_error(status, error_type, message),
            // Unknown format: neutral envelope.
            Err(_) => serde_json::json!({
                "error": { "type": error_type, "message": message }
            })
            .to_string()
            .into_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn engine() -> TranslationEngine {
        TranslationEngine::new(Arc::new(FormatRegistry::standard()))
    }

    #[test]
    fn need_convert_rules() {
        assert!(!TranslationEngine::need_convert("claude", "claude"));
        assert!(!TranslationEngine::need_convert("", "claude"));
        assert!(!TranslationEngine::need_convert("claude", ""));
        assert!(TranslationEngine::need_convert("claude", "gemini"));
    }

    #[test]
    fn identity_translation_is_byte_identical() {
        let engine = engine();
        // Deliberately not valid JSON: a passthrough must never parse.
        let raw = b"\x00\x01 not json at all";
        let out = engine
            .translate_request("claude", "claude", "any", raw)
            .unwrap();
        assert_eq!(out, raw.to_vec());
    }

    #[test]
    fn claude_request_to_gemini_cli() {
        let engine = engine();
        let raw = json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 64,
            "system": "short answers",
            "messages": [{ "role": "user", "content": "2+2?" }]
        });
        let out = engine
            .translate_request("claude", "gemini-cli", "gemini-2.5-pro", raw.to_string().as_bytes())
            .unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value.get("model").and_then(Value::as_str), Some("gemini-2.5-pro"));
        assert_eq!(
            value.pointer("/request/contents/0/parts/0/text").and_then(Value::as_str),
            Some("2+2?")
        );
        assert_eq!(
            value
                .pointer("/request/systemInstruction/parts/0/text")
                .and_then(Value::as_str),
            Some("short answers")
        );
    }

    #[test]
    fn gemini_truncation_with_empty_text_gains_fallback() {
        let engine = engine();
        let upstream = json!({
            "response": {
                "candidates": [{
                    "content": { "role": "model", "parts": [] },
                    "finishReason": "MAX_TOKENS"
                }],
                "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 0 }
            }
        });
        let out = engine
            .translate_response(
                "gemini-cli",
                "claude",
                "claude-sonnet-4-5",
                upstream.to_string().as_bytes(),
            )
            .unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            value.get("stop_reason").and_then(Value::as_str),
            Some("max_tokens")
        );
        let text = value
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .unwrap();
        assert!(!text.is_empty());
    }

    #[test]
    fn truncation_with_text_is_left_alone() {
        let engine = engine();
        let upstream = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "partial answer" }] },
                "finishReason": "MAX_TOKENS"
            }]
        });
        let out = engine
            .translate_response("gemini", "claude", "m", upstream.to_string().as_bytes())
            .unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        let content = value.get("content").and_then(Value::as_array).unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(
            content[0].get("text").and_then(Value::as_str),
            Some("partial answer")
        );
    }

    #[test]
    fn error_body_is_client_shaped() {
        let engine = engine();
        let claude_err: Value =
            serde_json::from_slice(&engine.error_body("claude", 429, "rate_limit_error", "slow down"))
                .unwrap();
        assert_eq!(claude_err.get("type").and_then(Value::as_str), Some("error"));

        let openai_err: Value =
            serde_json::from_slice(&engine.error_body("openai", 429, "rate_limit_error", "slow down"))
                .unwrap();
        assert!(openai_err.get("error").unwrap().get("message").is_some());
    }
}
