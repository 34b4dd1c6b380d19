//! Wire-format converters.
//!
//! One converter per supported client/provider format, each mapping its
//! native JSON/SSE shape to and from the canonical IR. Converters are
//! registered explicitly at startup; the engine only ever talks to the
//! `Converter` trait.

mod claude;
mod gemini;
mod openai;
mod openai_responses;

pub use claude::ClaudeConverter;
pub use gemini::{GeminiCliConverter, GeminiConverter};
pub use openai::OpenAiConverter;
pub use openai_responses::OpenAiResponsesConverter;

use crate::error::{GatewayError, Result};
use crate::ir::{ChatRequest, ChatResponse, StreamItem};
use crate::translate::sse::SseEvent;
use std::collections::HashMap;
use std::sync::Arc;

/// Static capabilities of one registered wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub name: &'static str,
    pub supports_streaming: bool,
    pub supports_tools: bool,
    pub supports_images: bool,
}

/// Incremental decoder for one upstream SSE stream. Stateful: tool-call
/// arguments arrive in fragments and are assembled across events.
pub trait StreamParser: Send {
    fn parse_event(&mut self, event: &SseEvent) -> Result<Vec<StreamItem>>;
}

/// Incremental encoder producing client-shaped SSE frames. Emitters own
/// the single-terminal guarantee: `finalize` closes the stream if no
/// terminal was emitted, and a second terminal is never produced.
pub trait StreamEmitter: Send {
    fn emit(&mut self, item: &StreamItem) -> Result<Vec<String>>;
    fn finalize(&mut self) -> Result<Vec<String>>;
}

pub trait Converter: Send + Sync {
    fn descriptor(&self) -> &'static FormatDescriptor;

    fn parse_request(&self, raw: &[u8]) -> Result<ChatRequest>;
    fn encode_request(&self, request: &ChatRequest) -> Result<Vec<u8>>;

    fn parse_response(&self, raw: &[u8]) -> Result<ChatResponse>;
    fn encode_response(&self, response: &ChatResponse) -> Result<Vec<u8>>;

    /// Error envelope in this format's native shape. The client must never
    /// see another format's error JSON.
    fn encode_error(&self, status: u16, error_type: &str, message: &str) -> Vec<u8>;

    fn stream_parser(&self) -> Box<dyn StreamParser>;
    fn stream_emitter(&self, model: &str) -> Box<dyn StreamEmitter>;
}

/// Explicit name → converter map built at startup.
pub struct FormatRegistry {
    converters: HashMap<&'static str, Arc<dyn Converter>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// All built-in formats. `codex` shares the openai-responses codec and
    /// `gemini-cli` wraps the gemini codec in the Cloud Code envelope;
    /// both still register as their own descriptors.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiConverter::new()));
        registry.register(Arc::new(OpenAiResponsesConverter::new("openai-responses")));
        registry.register(Arc::new(OpenAiResponsesConverter::new("codex")));
        registry.register(Arc::new(ClaudeConverter::new()));
        registry.register(Arc::new(GeminiConverter::new()));
        registry.register(Arc::new(GeminiCliConverter::new()));
        registry
    }

    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        self.converters.insert(converter.descriptor().name, converter);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Converter>> {
        self.converters
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::Translation(format!("unknown wire format: {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.converters.contains_key(name)
    }

    pub fn descriptors(&self) -> Vec<&'static FormatDescriptor> {
        self.converters.values().map(|c| c.descriptor()).collect()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_has_all_formats() {
        let registry = FormatRegistry::standard();
        for name in ["openai", "openai-responses", "claude", "gemini", "gemini-cli", "codex"] {
            assert!(registry.contains(name), "missing format {}", name);
        }
        assert!(!registry.contains("mistral"));
    }

    #[test]
    fn descriptors_report_streaming_support() {
        let registry = FormatRegistry::standard();
        for descriptor in registry.descriptors() {
            assert!(descriptor.supports_streaming, "{} should stream", descriptor.name);
        }
    }
}
