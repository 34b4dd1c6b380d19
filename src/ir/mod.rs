//! Canonical intermediate representation for chat traffic.
//!
//! Every wire format converts to and from these types, which keeps the
//! converter count linear in the number of formats instead of quadratic.
//! The IR is deliberately lossy for provider-specific extras: unknown
//! fields drop during decoding and never round-trip.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of message content. Tool traffic and images are typed so the
/// encoders can reshape them; everything else is text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    Image {
        media_type: String,
        /// Base64 payload, kept encoded end to end.
        data: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        content: String,
        is_error: bool,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Visible text length, the quantity the degenerate-output rule checks.
    pub fn visible_len(&self) -> usize {
        match self {
            ContentPart::Text { text } => text.len(),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Self { role, parts: Vec::new() }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::text(text)],
        }
    }

    pub fn visible_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Why generation stopped, normalized across providers. Every converter
/// maps this from and to its native label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    Stop,
    MaxTokens,
    ToolUse,
    ContentFilter,
    Unknown,
}

impl StopReason {
    /// Truncation is the trigger for the degenerate-output recovery shim.
    pub fn is_truncation(&self) -> bool {
        matches!(self, StopReason::MaxTokens)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub reasoning_tokens: u32,
    #[serde(default)]
    pub cached_tokens: u32,
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

/// Format-neutral chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            tools: Vec::new(),
            stream: false,
        }
    }
}

/// Format-neutral chat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub message: Message,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl ChatResponse {
    pub fn visible_text_len(&self) -> usize {
        self.message.parts.iter().map(ContentPart::visible_len).sum()
    }
}

/// One logical event inside a streamed response, in upstream emission
/// order. `Finish` carries the final reason and usage; `Done` closes the
/// stream and appears exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Start {
        id: String,
        model: String,
        usage: Usage,
    },
    TextDelta(String),
    ThinkingDelta(String),
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    Finish {
        stop_reason: StopReason,
        usage: Usage,
    },
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visible_text_skips_tool_parts() {
        let msg = Message {
            role: Role::Assistant,
            parts: vec![
                ContentPart::text("Hello "),
                ContentPart::ToolCall {
                    id: "t1".to_string(),
                    name: "search".to_string(),
                    arguments: serde_json::json!({}),
                },
                ContentPart::text("world"),
            ],
        };
        assert_eq!(msg.visible_text(), "Hello world");
    }

    #[test]
    fn truncation_detection() {
        assert!(StopReason::MaxTokens.is_truncation());
        assert!(!StopReason::Stop.is_truncation());
        assert!(!StopReason::ToolUse.is_truncation());
    }

    #[test]
    fn default_stop_reason_is_stop() {
        assert_eq!(StopReason::default(), StopReason::Stop);
    }
}
