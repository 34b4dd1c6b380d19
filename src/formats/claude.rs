// Claude Messages API codec

use super::{Converter, FormatDescriptor, StreamEmitter, StreamParser};
use crate::error::{GatewayError, Result};
use crate::ir::{
    ChatRequest, ChatResponse, ContentPart, Message, Role, StopReason, StreamItem, ToolDefinition,
    Usage,
};
use crate::translate::sse::{frame, SseEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "claude",
    supports_streaming: true,
    supports_tools: true,
    supports_images: true,
};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<SystemPrompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum SystemPrompt {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl SystemPrompt {
    fn to_text(&self) -> String {
        match self {
            SystemPrompt::Text(s) => s.clone(),
            SystemPrompt::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ImageSource {
    Base64 { media_type: String, data: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    fn to_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireTool {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessagesResponse {
    id: String,
    #[serde(rename = "type")]
    response_type: String,
    role: String,
    content: Vec<ContentBlock>,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequence: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    cache_read_input_tokens: u32,
}

fn is_zero(val: &u32) -> bool {
    *val == 0
}

// ---------------------------------------------------------------------------
// Stop-reason tables
// ---------------------------------------------------------------------------

static STOP_REASONS: phf::Map<&'static str, StopReason> = phf::phf_map! {
    "end_turn" => StopReason::Stop,
    "stop_sequence" => StopReason::Stop,
    "max_tokens" => StopReason::MaxTokens,
    "tool_use" => StopReason::ToolUse,
    "refusal" => StopReason::ContentFilter,
};

fn encode_stop_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Stop => "end_turn",
        StopReason::MaxTokens => "max_tokens",
        StopReason::ToolUse => "tool_use",
        StopReason::ContentFilter => "refusal",
        StopReason::Unknown => "end_turn",
    }
}

fn decode_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some(label) => STOP_REASONS.get(label).copied().unwrap_or_else(|| {
            warn!("Unknown Claude stop reason: {}", label);
            StopReason::Unknown
        }),
        None => StopReason::Stop,
    }
}

// ---------------------------------------------------------------------------
// Block <-> part mapping
// ---------------------------------------------------------------------------

fn block_to_part(block: ContentBlock) -> Option<ContentPart> {
    match block {
        ContentBlock::Text { text } => Some(ContentPart::Text { text }),
        ContentBlock::Thinking { thinking } => Some(ContentPart::Thinking { text: thinking }),
        ContentBlock::Image { source } => {
            let ImageSource::Base64 { media_type, data } = source;
            Some(ContentPart::Image { media_type, data })
        }
        ContentBlock::ToolUse { id, name, input } => Some(ContentPart::ToolCall {
            id,
            name,
            arguments: input,
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(ContentPart::ToolResult {
            call_id: tool_use_id,
            content: content.to_text(),
            is_error: is_error.unwrap_or(false),
        }),
    }
}

fn part_to_block(part: &ContentPart) -> ContentBlock {
    match part {
        ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
        ContentPart::Thinking { text } => ContentBlock::Thinking {
            thinking: text.clone(),
        },
        ContentPart::Image { media_type, data } => ContentBlock::Image {
            source: ImageSource::Base64 {
                media_type: media_type.clone(),
                data: data.clone(),
            },
        },
        ContentPart::ToolCall { id, name, arguments } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: arguments.clone(),
        },
        ContentPart::ToolResult {
            call_id,
            content,
            is_error,
        } => ContentBlock::ToolResult {
            tool_use_id: call_id.clone(),
            content: ToolResultContent::Text(content.clone()),
            is_error: if *is_error { Some(true) } else { None },
        },
    }
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

pub struct ClaudeConverter;

impl ClaudeConverter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ClaudeConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter for ClaudeConverter {
    fn descriptor(&self) -> &'static FormatDescriptor {
        &DESCRIPTOR
    }

    fn parse_request(&self, raw: &[u8]) -> Result<ChatRequest> {
        let wire: MessagesRequest = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::InvalidRequest(format!("claude request: {}", e)))?;

        let mut request = ChatRequest::new(wire.model);
        request.system = wire.system.map(|s| s.to_text());
        request.max_tokens = wire.max_tokens;
        request.temperature = wire.temperature;
        request.top_p = wire.top_p;
        request.stop_sequences = wire.stop_sequences;
        request.stream = wire.stream.unwrap_or(false);
        request.tools = wire
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name,
                description: t.description,
                parameters: t.input_schema,
            })
            .collect();

        for msg in wire.messages {
            let role = match msg.role.as_str() {
                "assistant" => Role::Assistant,
                _ => Role::User,
            };
            let parts = match msg.content {
                MessageContent::Text(text) => vec![ContentPart::Text { text }],
                MessageContent::Blocks(blocks) => {
                    blocks.into_iter().filter_map(block_to_part).collect()
                }
            };
            request.messages.push(Message { role, parts });
        }

        Ok(request)
    }

    fn encode_request(&self, request: &ChatRequest) -> Result<Vec<u8>> {
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| WireMessage {
                role: match m.role {
                    Role::Assistant => "assistant".to_string(),
                    // Tool results travel in user messages on this API.
                    _ => "user".to_string(),
                },
                content: MessageContent::Blocks(m.parts.iter().map(part_to_block).collect()),
            })
            .collect();

        let wire = MessagesRequest {
            model: request.model.clone(),
            messages,
            system: request.system.clone().map(SystemPrompt::Text),
            // The Messages API requires max_tokens.
            max_tokens: Some(request.max_tokens.unwrap_or(4096)),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop_sequences.clone(),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(
                    request
                        .tools
                        .iter()
                        .map(|t| WireTool {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            input_schema: t.parameters.clone(),
                        })
                        .collect(),
                )
            },
            stream: if request.stream { Some(true) } else { None },
        };

        Ok(serde_json::to_vec(&wire)?)
    }

    fn parse_response(&self, raw: &[u8]) -> Result<ChatResponse> {
        let wire: MessagesResponse = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::Translation(format!("claude response: {}", e)))?;

        let mut message = Message::new(Role::Assistant);
        message.parts = wire.content.into_iter().filter_map(block_to_part).collect();

        Ok(ChatResponse {
            id: wire.id,
            model: wire.model,
            message,
            stop_reason: decode_stop_reason(wire.stop_reason.as_deref()),
            usage: Usage {
                input_tokens: wire.usage.input_tokens,
                output_tokens: wire.usage.output_tokens,
                reasoning_tokens: 0,
                cached_tokens: wire.usage.cache_read_input_tokens,
            },
        })
    }

    fn encode_response(&self, response: &ChatResponse) -> Result<Vec<u8>> {
        let wire = MessagesResponse {
            id: response.id.clone(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content: response.message.parts.iter().map(part_to_block).collect(),
            model: response.model.clone(),
            stop_reason: Some(encode_stop_reason(response.stop_reason).to_string()),
            stop_sequence: None,
            usage: WireUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
                cache_read_input_tokens: response.usage.cached_tokens,
            },
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    fn encode_error(&self, _status: u16, error_type: &str, message: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "error",
            "error": { "type": error_type, "message": message }
        }))
        .unwrap_or_default()
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(ClaudeStreamParser::default())
    }

    fn stream_emitter(&self, model: &str) -> Box<dyn StreamEmitter> {
        Box::new(ClaudeStreamEmitter::new(model.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Streaming: upstream Claude SSE -> IR items
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ClaudeStreamParser {
    usage: Usage,
    /// Tool-use block under assembly: (id, name, accumulated JSON).
    open_tool: Option<(String, String, String)>,
    finished: bool,
}

impl StreamParser for ClaudeStreamParser {
    fn parse_event(&mut self, event: &SseEvent) -> Result<Vec<StreamItem>> {
        if event.data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let payload: Value = match serde_json::from_str(&event.data) {
            Ok(v) => v,
            Err(e) => {
                debug!("Skipping unparseable Claude SSE payload: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut items = Vec::new();
        match payload.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                let message = payload.get("message").cloned().unwrap_or_default();
                self.usage.input_tokens = message
                    .pointer("/usage/input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                self.usage.cached_tokens = message
                    .pointer("/usage/cache_read_input_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                items.push(StreamItem::Start {
                    id: message
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    model: message
                        .get("model")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    usage: self.usage,
                });
            }
            Some("content_block_start") => {
                let block = payload.get("content_block").cloned().unwrap_or_default();
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    self.open_tool = Some((
                        block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                        block.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                        String::new(),
                    ));
                }
            }
            Some("content_block_delta") => {
                let delta = payload.get("delta").cloned().unwrap_or_default();
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            items.push(StreamItem::TextDelta(text.to_string()));
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(text) = delta.get("thinking").and_then(Value::as_str) {
                            items.push(StreamItem::ThinkingDelta(text.to_string()));
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some((_, _, buffer)) = self.open_tool.as_mut() {
                            if let Some(fragment) = delta.get("partial_json").and_then(Value::as_str)
                            {
                                buffer.push_str(fragment);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                if let Some((id, name, buffer)) = self.open_tool.take() {
                    let arguments =
                        serde_json::from_str(&buffer).unwrap_or_else(|_| json!({}));
                    items.push(StreamItem::ToolCall { id, name, arguments });
                }
            }
            Some("message_delta") => {
                if let Some(output) = payload
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                {
                    self.usage.output_tokens = output as u32;
                }
                let stop_reason = payload
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str);
                if !self.finished {
                    self.finished = true;
                    items.push(StreamItem::Finish {
                        stop_reason: decode_stop_reason(stop_reason),
                        usage: self.usage,
                    });
                }
            }
            Some("message_stop") => {
                items.push(StreamItem::Done);
            }
            // ping and unknown event types pass through silently
            _ => {}
        }

        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Streaming: IR items -> client Claude SSE
// ---------------------------------------------------------------------------

/// Stateful re-encoder producing the Claude event grammar: message_start,
/// block start/delta/stop pairs, one message_delta and one message_stop.
struct ClaudeStreamEmitter {
    message_id: String,
    model: String,
    block_index: i32,
    open_block: Option<OpenBlock>,
    started: bool,
    terminal_sent: bool,
    usage: Usage,
}

#[derive(PartialEq, Clone, Copy)]
enum OpenBlock {
    Text,
    Thinking,
}

impl ClaudeStreamEmitter {
    fn new(model: String) -> Self {
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model,
            block_index: 0,
            open_block: None,
            started: false,
            terminal_sent: false,
            usage: Usage::default(),
        }
    }

    fn message_start_frame(&self) -> String {
        let event = json!({
            "type": "message_start",
            "message": {
                "id": self.message_id,
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": self.model,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": { "input_tokens": self.usage.input_tokens, "output_tokens": 0 }
            }
        });
        frame(Some("message_start"), &event.to_string())
    }

    fn ensure_started(&mut self, frames: &mut Vec<String>) {
        if !self.started {
            self.started = true;
            frames.push(self.message_start_frame());
        }
    }

    fn open(&mut self, kind: OpenBlock, frames: &mut Vec<String>) {
        if self.open_block == Some(kind) {
            return;
        }
        self.close_open(frames);
        let content_block = match kind {
            OpenBlock::Text => json!({ "type": "text", "text": "" }),
            OpenBlock::Thinking => json!({ "type": "thinking", "thinking": "" }),
        };
        let event = json!({
            "type": "content_block_start",
            "index": self.block_index,
            "content_block": content_block
        });
        frames.push(frame(Some("content_block_start"), &event.to_string()));
        self.open_block = Some(kind);
    }

    fn close_open(&mut self, frames: &mut Vec<String>) {
        if self.open_block.take().is_some() {
            let event = json!({ "type": "content_block_stop", "index": self.block_index });
            frames.push(frame(Some("content_block_stop"), &event.to_string()));
            self.block_index += 1;
        }
    }

    fn terminal_frames(&mut self, stop_reason: StopReason) -> Vec<String> {
        let mut frames = Vec::new();
        self.ensure_started(&mut frames);
        self.close_open(&mut frames);
        self.terminal_sent = true;

        let delta = json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": encode_stop_reason(stop_reason),
                "stop_sequence": null
            },
            "usage": { "output_tokens": self.usage.output_tokens }
        });
        frames.push(frame(Some("message_delta"), &delta.to_string()));
        frames.push(frame(
            Some("message_stop"),
            &json!({ "type": "message_stop" }).to_string(),
        ));
        frames
    }
}

impl StreamEmitter for ClaudeStreamEmitter {
    fn emit(&mut self, item: &StreamItem) -> Result<Vec<String>> {
        if self.terminal_sent {
            return Ok(Vec::new());
        }
        let mut frames = Vec::new();

        match item {
            StreamItem::Start { id, usage, .. } => {
                if !id.is_empty() {
                    self.message_id = id.clone();
                }
                self.usage = *usage;
                self.ensure_started(&mut frames);
            }
            StreamItem::TextDelta(text) => {
                self.ensure_started(&mut frames);
                self.open(OpenBlock::Text, &mut frames);
                let event = json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": { "type": "text_delta", "text": text }
                });
                frames.push(frame(Some("content_block_delta"), &event.to_string()));
            }
            StreamItem::ThinkingDelta(text) => {
                self.ensure_started(&mut frames);
                self.open(OpenBlock::Thinking, &mut frames);
                let event = json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": { "type": "thinking_delta", "thinking": text }
                });
                frames.push(frame(Some("content_block_delta"), &event.to_string()));
            }
            StreamItem::ToolCall { id, name, arguments } => {
                self.ensure_started(&mut frames);
                self.close_open(&mut frames);

                // Upstreams deliver assembled calls, so the block opens,
                // streams its arguments once and closes immediately.
                let start = json!({
                    "type": "content_block_start",
                    "index": self.block_index,
                    "content_block": { "type": "tool_use", "id": id, "name": name, "input": {} }
                });
                frames.push(frame(Some("content_block_start"), &start.to_string()));

                let delta = json!({
                    "type": "content_block_delta",
                    "index": self.block_index,
                    "delta": {
                        "type": "input_json_delta",
                        "partial_json": arguments.to_string()
                    }
                });
                frames.push(frame(Some("content_block_delta"), &delta.to_string()));

                let stop = json!({ "type": "content_block_stop", "index": self.block_index });
                frames.push(frame(Some("content_block_stop"), &stop.to_string()));
                self.block_index += 1;
            }
            StreamItem::Finish { stop_reason, usage } => {
                self.usage = *usage;
                frames.extend(self.terminal_frames(*stop_reason));
            }
            StreamItem::Done => {
                if !self.terminal_sent {
                    frames.extend(self.terminal_frames(StopReason::Stop));
                }
            }
        }

        Ok(frames)
    }

    fn finalize(&mut self) -> Result<Vec<String>> {
        if self.terminal_sent {
            return Ok(Vec::new());
        }
        Ok(self.terminal_frames(StopReason::Stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> ClaudeConverter {
        ClaudeConverter::new()
    }

    #[test]
    fn request_roundtrip_preserves_core_fields() {
        let raw = json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 512,
            "system": "Be terse.",
            "messages": [
                { "role": "user", "content": "Hi" },
                { "role": "assistant", "content": [{ "type": "text", "text": "Hello" }] }
            ],
            "stream": true
        });
        let request = converter().parse_request(raw.to_string().as_bytes()).unwrap();
        assert_eq!(request.model, "claude-sonnet-4-5");
        assert_eq!(request.system.as_deref(), Some("Be terse."));
        assert_eq!(request.messages.len(), 2);
        assert!(request.stream);

        let encoded = converter().encode_request(&request).unwrap();
        let reparsed = converter().parse_request(&encoded).unwrap();
        assert_eq!(reparsed.messages, request.messages);
        assert_eq!(reparsed.max_tokens, Some(512));
    }

    #[test]
    fn unknown_request_fields_are_dropped_not_fatal() {
        let raw = json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 10,
            "messages": [{ "role": "user", "content": "x" }],
            "metadata": { "user_id": "abc" },
            "some_future_field": [1, 2, 3]
        });
        assert!(converter().parse_request(raw.to_string().as_bytes()).is_ok());
    }

    #[test]
    fn response_roundtrip_with_tool_call() {
        let response = ChatResponse {
            id: "msg_1".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            message: Message {
                role: Role::Assistant,
                parts: vec![
                    ContentPart::text("Checking."),
                    ContentPart::ToolCall {
                        id: "toolu_1".to_string(),
                        name: "get_weather".to_string(),
                        arguments: json!({"city": "Paris"}),
                    },
                ],
            },
            stop_reason: StopReason::ToolUse,
            usage: Usage { input_tokens: 5, output_tokens: 9, ..Default::default() },
        };

        let encoded = converter().encode_response(&response).unwrap();
        let decoded = converter().parse_response(&encoded).unwrap();
        assert_eq!(decoded.message, response.message);
        assert_eq!(decoded.stop_reason, StopReason::ToolUse);
        assert_eq!(decoded.usage.output_tokens, 9);
    }

    #[test]
    fn stop_reason_table() {
        assert_eq!(decode_stop_reason(Some("max_tokens")), StopReason::MaxTokens);
        assert_eq!(decode_stop_reason(Some("end_turn")), StopReason::Stop);
        assert_eq!(decode_stop_reason(None), StopReason::Stop);
        assert_eq!(decode_stop_reason(Some("mystery")), StopReason::Unknown);
    }

    #[test]
    fn emitter_produces_single_terminal() {
        let mut emitter = ClaudeStreamEmitter::new("claude-sonnet-4-5".to_string());
        let mut frames = Vec::new();
        frames.extend(emitter.emit(&StreamItem::TextDelta("hi".to_string())).unwrap());
        frames.extend(
            emitter
                .emit(&StreamItem::Finish { stop_reason: StopReason::Stop, usage: Usage::default() })
                .unwrap(),
        );
        // Late events and finalize after the terminal are no-ops.
        frames.extend(emitter.emit(&StreamItem::Done).unwrap());
        frames.extend(emitter.finalize().unwrap());

        let stops: usize = frames.iter().filter(|f| f.contains("message_stop")).count();
        assert_eq!(stops, 1);
        assert!(frames[0].contains("message_start"));
    }

    #[test]
    fn emitter_finalize_closes_abnormal_stream() {
        let mut emitter = ClaudeStreamEmitter::new("claude-sonnet-4-5".to_string());
        let _ = emitter.emit(&StreamItem::TextDelta("partial".to_string())).unwrap();
        let frames = emitter.finalize().unwrap();
        let joined = frames.join("");
        assert!(joined.contains("content_block_stop"));
        assert!(joined.contains("\"stop_reason\":\"end_turn\""));
        assert!(joined.contains("message_stop"));
    }

    #[test]
    fn parser_assembles_tool_call_fragments() {
        let mut parser = ClaudeStreamParser::default();
        let events = [
            json!({"type": "content_block_start", "index": 0,
                   "content_block": {"type": "tool_use", "id": "toolu_9", "name": "search", "input": {}}}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}}),
            json!({"type": "content_block_delta", "index": 0,
                   "delta": {"type": "input_json_delta", "partial_json": "\"rust\"}"}}),
            json!({"type": "content_block_stop", "index": 0}),
        ];

        let mut items = Vec::new();
        for event in events {
            items.extend(
                parser
                    .parse_event(&SseEvent { event: None, data: event.to_string() })
                    .unwrap(),
            );
        }
        assert_eq!(items.len(), 1);
        match &items[0] {
            StreamItem::ToolCall { id, name, arguments } => {
                assert_eq!(id, "toolu_9");
                assert_eq!(name, "search");
                assert_eq!(arguments, &json!({"q": "rust"}));
            }
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[test]
    fn parser_reads_finish_and_done() {
        let mut parser = ClaudeStreamParser::default();
        let finish = parser
            .parse_event(&SseEvent {
                event: None,
                data: json!({"type": "message_delta",
                             "delta": {"stop_reason": "max_tokens"},
                             "usage": {"output_tokens": 42}})
                .to_string(),
            })
            .unwrap();
        assert!(matches!(
            finish[0],
            StreamItem::Finish { stop_reason: StopReason::MaxTokens, usage } if usage.output_tokens == 42
        ));

        let done = parser
            .parse_event(&SseEvent {
                event: None,
                data: json!({"type": "message_stop"}).to_string(),
            })
            .unwrap();
        assert!(matches!(done[0], StreamItem::Done));
    }
}
