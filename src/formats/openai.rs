// OpenAI Chat Completions codec

use super::{Converter, FormatDescriptor, StreamEmitter, StreamParser};
use crate::error::{GatewayError, Result};
use crate::ir::{
    ChatRequest, ChatResponse, ContentPart, Message, Role, StopReason, StreamItem, ToolDefinition,
    Usage,
};
use crate::translate::sse::{frame, SseEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

static DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "openai",
    supports_streaming: true,
    supports_tools: true,
    supports_images: true,
};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompletionsRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<StopField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StopField {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded string, per the Chat Completions contract.
    arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionDef {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default = "empty_schema")]
    parameters: Value,
}

fn empty_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

// ---------------------------------------------------------------------------
// Stop-reason tables
// ---------------------------------------------------------------------------

static FINISH_REASONS: phf::Map<&'static str, StopReason> = phf::phf_map! {
    "stop" => StopReason::Stop,
    "length" => StopReason::MaxTokens,
    "tool_calls" => StopReason::ToolUse,
    "function_call" => StopReason::ToolUse,
    "content_filter" => StopReason::ContentFilter,
};

fn encode_finish_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Stop => "stop",
        StopReason::MaxTokens => "length",
        StopReason::ToolUse => "tool_calls",
        StopReason::ContentFilter => "content_filter",
        StopReason::Unknown => "stop",
    }
}

fn decode_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some(label) => FINISH_REASONS.get(label).copied().unwrap_or_else(|| {
            warn!("Unknown OpenAI finish reason: {}", label);
            StopReason::Unknown
        }),
        None => StopReason::Stop,
    }
}

/// Split a `data:` image URL into (media type, base64 payload).
fn split_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, data) = rest.split_once(";base64,")?;
    Some((media_type.to_string(), data.to_string()))
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

pub struct OpenAiConverter;

impl OpenAiConverter {
    pub fn new() -> Self {
        Self
    }

    fn build_usage(usage: &Usage) -> Value {
        json!({
            "prompt_tokens": usage.input_tokens,
            "completion_tokens": usage.output_tokens,
            "total_tokens": usage.input_tokens + usage.output_tokens,
            "prompt_tokens_details": { "cached_tokens": usage.cached_tokens },
            "completion_tokens_details": { "reasoning_tokens": usage.reasoning_tokens }
        })
    }

    fn message_to_wire(message: &Message) -> Vec<WireMessage> {
        // Tool results become their own `tool` role messages; everything
        // else collapses into one wire message.
        let mut wires = Vec::new();
        let mut text_parts: Vec<WirePart> = Vec::new();
        let mut tool_calls = Vec::new();

        for part in &message.parts {
            match part {
                ContentPart::Text { text } => text_parts.push(WirePart::Text { text: text.clone() }),
                // Thinking has no surface on this API.
                ContentPart::Thinking { .. } => {}
                ContentPart::Image { media_type, data } => text_parts.push(WirePart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:{};base64,{}", media_type, data),
                    },
                }),
                ContentPart::ToolCall { id, name, arguments } => tool_calls.push(WireToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: WireFunctionCall {
                        name: name.clone(),
                        arguments: arguments.to_string(),
                    },
                }),
                ContentPart::ToolResult { call_id, content, .. } => wires.push(WireMessage {
                    role: "tool".to_string(),
                    content: Some(WireContent::Text(content.clone())),
                    tool_calls: None,
                    tool_call_id: Some(call_id.clone()),
                }),
            }
        }

        if !text_parts.is_empty() || !tool_calls.is_empty() {
            let role = match message.role {
                Role::System => "system",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
                Role::User => "user",
            };
            let content = match text_parts.len() {
                0 => None,
                1 => match text_parts.into_iter().next() {
                    Some(WirePart::Text { text }) => Some(WireContent::Text(text)),
                    Some(part) => Some(WireContent::Parts(vec![part])),
                    None => None,
                },
                _ => Some(WireContent::Parts(text_parts)),
            };
            wires.insert(
                0,
                WireMessage {
                    role: role.to_string(),
                    content,
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    tool_call_id: None,
                },
            );
        }

        wires
    }

    fn wire_to_message(wire: WireMessage) -> Message {
        let role = match wire.role.as_str() {
            "system" | "developer" => Role::System,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::User,
        };

        let mut parts = Vec::new();
        match wire.content {
            Some(WireContent::Text(text)) => {
                if let Some(call_id) = wire.tool_call_id.clone() {
                    parts.push(ContentPart::ToolResult {
                        call_id,
                        content: text,
                        is_error: false,
                    });
                } else if !text.is_empty() {
                    parts.push(ContentPart::Text { text });
                }
            }
            Some(WireContent::Parts(wire_parts)) => {
                for part in wire_parts {
                    match part {
                        WirePart::Text { text } => parts.push(ContentPart::Text { text }),
                        WirePart::ImageUrl { image_url } => {
                            if let Some((media_type, data)) = split_data_url(&image_url.url) {
                                parts.push(ContentPart::Image { media_type, data });
                            }
                            // Remote URLs drop: the IR carries payloads only.
                        }
                    }
                }
            }
            None => {}
        }

        for call in wire.tool_calls.unwrap_or_default() {
            let arguments =
                serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}));
            parts.push(ContentPart::ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            });
        }

        Message { role, parts }
    }
}

impl Default for OpenAiConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter for OpenAiConverter {
    fn descriptor(&self) -> &'static FormatDescriptor {
        &DESCRIPTOR
    }

    fn parse_request(&self, raw: &[u8]) -> Result<ChatRequest> {
        let wire: CompletionsRequest = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::InvalidRequest(format!("openai request: {}", e)))?;

        let mut request = ChatRequest::new(wire.model);
        request.max_tokens = wire.max_completion_tokens.or(wire.max_tokens);
        request.temperature = wire.temperature;
        request.top_p = wire.top_p;
        request.stream = wire.stream.unwrap_or(false);
        request.stop_sequences = wire.stop.map(|s| match s {
            StopField::One(seq) => vec![seq],
            StopField::Many(seqs) => seqs,
        });
        request.tools = wire
            .tools
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t.tool_type == "function")
            .map(|t| ToolDefinition {
                name: t.function.name,
                description: t.function.description,
                parameters: t.function.parameters,
            })
            .collect();

        for wire_msg in wire.messages {
            let message = Self::wire_to_message(wire_msg);
            // System content travels in the dedicated field of the IR.
            if message.role == Role::System {
                let text = message.visible_text();
                request.system = match request.system.take() {
                    Some(existing) => Some(format!("{}\n{}", existing, text)),
                    None => Some(text),
                };
            } else {
                request.messages.push(message);
            }
        }

        Ok(request)
    }

    fn encode_request(&self, request: &ChatRequest) -> Result<Vec<u8>> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: Some(WireContent::Text(system.clone())),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        for message in &request.messages {
            messages.extend(Self::message_to_wire(message));
        }

        let wire = CompletionsRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            max_completion_tokens: None,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop_sequences.clone().map(StopField::Many),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(
                    request
                        .tools
                        .iter()
                        .map(|t| WireTool {
                            tool_type: "function".to_string(),
                            function: WireFunctionDef {
                                name: t.name.clone(),
                                description: t.description.clone(),
                                parameters: t.parameters.clone(),
                            },
                        })
                        .collect(),
                )
            },
            stream: if request.stream { Some(true) } else { None },
        };

        Ok(serde_json::to_vec(&wire)?)
    }

    fn parse_response(&self, raw: &[u8]) -> Result<ChatResponse> {
        let wire: Value = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::Translation(format!("openai response: {}", e)))?;

        let choice = wire
            .pointer("/choices/0")
            .ok_or_else(|| GatewayError::Translation("openai response without choices".into()))?;

        let message: WireMessage = serde_json::from_value(
            choice.get("message").cloned().unwrap_or_default(),
        )
        .map_err(|e| GatewayError::Translation(format!("openai message: {}", e)))?;

        let usage = Usage {
            input_tokens: wire
                .pointer("/usage/prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            output_tokens: wire
                .pointer("/usage/completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            reasoning_tokens: wire
                .pointer("/usage/completion_tokens_details/reasoning_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            cached_tokens: wire
                .pointer("/usage/prompt_tokens_details/cached_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
        };

        Ok(ChatResponse {
            id: wire
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            model: wire
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            message: Self::wire_to_message(message),
            stop_reason: decode_finish_reason(
                choice.get("finish_reason").and_then(Value::as_str),
            ),
            usage,
        })
    }

    fn encode_response(&self, response: &ChatResponse) -> Result<Vec<u8>> {
        let mut wires = Self::message_to_wire(&response.message);
        let message = if wires.is_empty() {
            WireMessage {
                role: "assistant".to_string(),
                content: Some(WireContent::Text(String::new())),
                tool_calls: None,
                tool_call_id: None,
            }
        } else {
            wires.remove(0)
        };

        let body = json!({
            "id": response.id,
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": response.model,
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": encode_finish_reason(response.stop_reason)
            }],
            "usage": Self::build_usage(&response.usage)
        });

        Ok(serde_json::to_vec(&body)?)
    }

    fn encode_error(&self, _status: u16, error_type: &str, message: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "error": { "message": message, "type": error_type, "param": null, "code": null }
        }))
        .unwrap_or_default()
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(OpenAiStreamParser::default())
    }

    fn stream_emitter(&self, model: &str) -> Box<dyn StreamEmitter> {
        Box::new(OpenAiStreamEmitter::new(model.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[derive(Default)]
struct OpenAiStreamParser {
    started: bool,
    finished: bool,
    usage: Usage,
    /// index -> (id, name, argument fragments)
    open_tools: Vec<(String, String, String)>,
}

impl OpenAiStreamParser {
    fn drain_tools(&mut self, items: &mut Vec<StreamItem>) {
        for (id, name, buffer) in self.open_tools.drain(..) {
            let arguments = serde_json::from_str(&buffer).unwrap_or_else(|_| json!({}));
            items.push(StreamItem::ToolCall { id, name, arguments });
        }
    }
}

impl StreamParser for OpenAiStreamParser {
    fn parse_event(&mut self, event: &SseEvent) -> Result<Vec<StreamItem>> {
        let mut items = Vec::new();

        if event.is_done_marker() {
            self.drain_tools(&mut items);
            items.push(StreamItem::Done);
            return Ok(items);
        }
        let payload: Value = match serde_json::from_str(&event.data) {
            Ok(v) => v,
            Err(_) => return Ok(items),
        };

        if !self.started {
            self.started = true;
            items.push(StreamItem::Start {
                id: payload
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                model: payload
                    .get("model")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                usage: Usage::default(),
            });
        }

        if let Some(usage) = payload.get("usage").filter(|u| !u.is_null()) {
            self.usage.input_tokens = usage
                .get("prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            self.usage.output_tokens = usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
        }

        let Some(choice) = payload.pointer("/choices/0") else {
            return Ok(items);
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    items.push(StreamItem::TextDelta(text.to_string()));
                }
            }
            for call in delta
                .get("tool_calls")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                while self.open_tools.len() <= index {
                    self.open_tools.push((String::new(), String::new(), String::new()));
                }
                let slot = &mut self.open_tools[index];
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    slot.0 = id.to_string();
                }
                if let Some(name) = call.pointer("/function/name").and_then(Value::as_str) {
                    slot.1 = name.to_string();
                }
                if let Some(fragment) = call.pointer("/function/arguments").and_then(Value::as_str) {
                    slot.2.push_str(fragment);
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            if !self.finished {
                self.finished = true;
                self.drain_tools(&mut items);
                items.push(StreamItem::Finish {
                    stop_reason: decode_finish_reason(Some(reason)),
                    usage: self.usage,
                });
            }
        }

        Ok(items)
    }
}

/// Emits `chat.completion.chunk` frames followed by the `[DONE]` marker.
struct OpenAiStreamEmitter {
    id: String,
    model: String,
    created: i64,
    sent_role: bool,
    terminal_sent: bool,
    tool_index: u32,
    usage: Usage,
}

impl OpenAiStreamEmitter {
    fn new(model: String) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model,
            created: chrono::Utc::now().timestamp(),
            sent_role: false,
            terminal_sent: false,
            tool_index: 0,
            usage: Usage::default(),
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> String {
        let body = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason
            }]
        });
        frame(None, &body.to_string())
    }

    fn role_delta(&mut self, frames: &mut Vec<String>) {
        if !self.sent_role {
            self.sent_role = true;
            frames.push(self.chunk(json!({"role": "assistant", "content": ""}), None));
        }
    }

    fn terminal(&mut self, stop_reason: StopReason) -> Vec<String> {
        self.terminal_sent = true;
        let mut frames = Vec::new();

        let final_chunk = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": encode_finish_reason(stop_reason)
            }],
            "usage": OpenAiConverter::build_usage(&self.usage)
        });
        frames.push(frame(None, &final_chunk.to_string()));
        frames.push(frame(None, "[DONE]"));
        frames
    }
}

impl StreamEmitter for OpenAiStreamEmitter {
    fn emit(&mut self, item: &StreamItem) -> Result<Vec<String>> {
        if self.terminal_sent {
            return Ok(Vec::new());
        }
        let mut frames = Vec::new();

        match item {
            StreamItem::Start { usage, .. } => {
                self.usage = *usage;
                self.role_delta(&mut frames);
            }
            StreamItem::TextDelta(text) => {
                self.role_delta(&mut frames);
                frames.push(self.chunk(json!({"content": text}), None));
            }
            // Reasoning text has no chunk surface here; it is dropped.
            StreamItem::ThinkingDelta(_) => {}
            StreamItem::ToolCall { id, name, arguments } => {
                self.role_delta(&mut frames);
                let delta = json!({
                    "tool_calls": [{
                        "index": self.tool_index,
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": arguments.to_string() }
                    }]
                });
                self.tool_index += 1;
                frames.push(self.chunk(delta, None));
            }
            StreamItem::Finish { stop_reason, usage } => {
                self.usage = *usage;
                self.role_delta(&mut frames);
                frames.extend(self.terminal(*stop_reason));
            }
            StreamItem::Done => {
                if !self.terminal_sent {
                    self.role_delta(&mut frames);
                    frames.extend(self.terminal(StopReason::Stop));
                }
            }
        }

        Ok(frames)
    }

    fn finalize(&mut self) -> Result<Vec<String>> {
        if self.terminal_sent {
            return Ok(Vec::new());
        }
        let mut frames = Vec::new();
        self.role_delta(&mut frames);
        frames.extend(self.terminal(StopReason::Stop));
        Ok(frames)
    }
}
