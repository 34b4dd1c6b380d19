// OpenAI Responses API codec (also registered as the codex format)

use super::{Converter, FormatDescriptor, StreamEmitter, StreamParser};
use crate::error::{GatewayError, Result};
use crate::ir::{
    ChatRequest, ChatResponse, ContentPart, Message, Role, StopReason, StreamItem, ToolDefinition,
    Usage,
};
use crate::translate::sse::{frame, SseEvent};
use serde_json::{json, Value};
use tracing::warn;

static RESPONSES_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "openai-responses",
    supports_streaming: true,
    supports_tools: true,
    supports_images: true,
};

static CODEX_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "codex",
    supports_streaming: true,
    supports_tools: true,
    supports_images: true,
};

/// Responses-API codec. The `codex` descriptor shares this implementation;
/// only the registered name differs.
pub struct OpenAiResponsesConverter {
    descriptor: &'static FormatDescriptor,
}

impl OpenAiResponsesConverter {
    pub fn new(name: &str) -> Self {
        let descriptor = match name {
            "codex" => &CODEX_DESCRIPTOR,
            _ => &RESPONSES_DESCRIPTOR,
        };
        Self { descriptor }
    }

    fn parse_input_item(item: &Value, request: &mut ChatRequest) {
        match item.get("type").and_then(Value::as_str) {
            Some("message") | None => {
                let role = match item.get("role").and_then(Value::as_str) {
                    Some("assistant") => Role::Assistant,
                    Some("system") | Some("developer") => Role::System,
                    _ => Role::User,
                };
                let mut parts = Vec::new();
                match item.get("content") {
                    Some(Value::String(text)) => parts.push(ContentPart::text(text.clone())),
                    Some(Value::Array(entries)) => {
                        for entry in entries {
                            match entry.get("type").and_then(Value::as_str) {
                                Some("input_text") | Some("output_text") | Some("text") => {
                                    if let Some(text) = entry.get("text").and_then(Value::as_str) {
                                        parts.push(ContentPart::text(text));
                                    }
                                }
                                Some("input_image") => {
                                    if let Some(url) =
                                        entry.get("image_url").and_then(Value::as_str)
                                    {
                                        if let Some((media_type, data)) = split_data_url(url) {
                                            parts.push(ContentPart::Image { media_type, data });
                                        }
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }

                if role == Role::System {
                    let text = parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text } => Some(text.as_str()),
                            _ => None,
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    request.system = match request.system.take() {
                        Some(existing) => Some(format!("{}\n{}", existing, text)),
                        None => Some(text),
                    };
                } else if !parts.is_empty() {
                    request.messages.push(Message { role, parts });
                }
            }
            Some("function_call") => {
                let arguments = item
                    .get("arguments")
                    .and_then(Value::as_str)
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_else(|| json!({}));
                request.messages.push(Message {
                    role: Role::Assistant,
                    parts: vec![ContentPart::ToolCall {
                        id: item
                            .get("call_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: item
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments,
                    }],
                });
            }
            Some("function_call_output") => {
                request.messages.push(Message {
                    role: Role::Tool,
                    parts: vec![ContentPart::ToolResult {
                        call_id: item
                            .get("call_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        content: item
                            .get("output")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        is_error: false,
                    }],
                });
            }
            // reasoning items and future types drop
            _ => {}
        }
    }

    fn encode_output(response: &ChatResponse) -> Vec<Value> {
        let mut output = Vec::new();
        let mut text = String::new();
        for part in &response.message.parts {
            match part {
                ContentPart::Text { text: t } => text.push_str(t),
                ContentPart::ToolCall { id, name, arguments } => output.push(json!({
                    "type": "function_call",
                    "id": format!("fc_{}", uuid::Uuid::new_v4().simple()),
                    "call_id": id,
                    "name": name,
                    "arguments": arguments.to_string(),
                    "status": "completed"
                })),
                _ => {}
            }
        }
        if !text.is_empty() || output.is_empty() {
            output.insert(
                0,
                json!({
                    "type": "message",
                    "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
                    "status": "completed",
                    "role": "assistant",
                    "content": [{ "type": "output_text", "text": text, "annotations": [] }]
                }),
            );
        }
        output
    }

    fn build_usage(usage: &Usage) -> Value {
        json!({
            "input_tokens": usage.input_tokens,
            "input_tokens_details": { "cached_tokens": usage.cached_tokens },
            "output_tokens": usage.output_tokens,
            "output_tokens_details": { "reasoning_tokens": usage.reasoning_tokens },
            "total_tokens": usage.input_tokens + usage.output_tokens
        })
    }

    fn status_fields(stop_reason: StopReason) -> (&'static str, Value) {
        match stop_reason {
            StopReason::MaxTokens => (
                "incomplete",
                json!({ "reason": "max_output_tokens" }),
            ),
            StopReason::ContentFilter => ("incomplete", json!({ "reason": "content_filter" })),
            _ => ("completed", Value::Null),
        }
    }
}

fn split_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, data) = rest.split_once(";base64,")?;
    Some((media_type.to_string(), data.to_string()))
}

fn decode_status(status: Option<&str>, incomplete_reason: Option<&str>, has_tool_call: bool) -> StopReason {
    match status {
        Some("incomplete") => match incomplete_reason {
            Some("max_output_tokens") => StopReason::MaxTokens,
            Some("content_filter") => StopReason::ContentFilter,
            _ => StopReason::MaxTokens,
        },
        Some("completed") | None => {
            if has_tool_call {
                StopReason::ToolUse
            } else {
                StopReason::Stop
            }
        }
        Some(other) => {
            warn!("Unknown response status: {}", other);
            StopReason::Unknown
        }
    }
}

fn parse_usage(value: Option<&Value>) -> Usage {
    let Some(value) = value else {
        return Usage::default();
    };
    Usage {
        input_tokens: value
            .get("input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        output_tokens: value
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        reasoning_tokens: value
            .pointer("/output_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        cached_tokens: value
            .pointer("/input_tokens_details/cached_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    }
}

impl Converter for OpenAiResponsesConverter {
    fn descriptor(&self) -> &'static FormatDescriptor {
        self.descriptor
    }

    fn parse_request(&self, raw: &[u8]) -> Result<ChatRequest> {
        let wire: Value = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::InvalidRequest(format!("responses request: {}", e)))?;

        let model = wire
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidRequest("responses request without model".into()))?;

        let mut request = ChatRequest::new(model);
        request.system = wire
            .get("instructions")
            .and_then(Value::as_str)
            .map(str::to_string);
        request.max_tokens = wire
            .get("max_output_tokens")
            .and_then(Value::as_u64)
            .map(|v| v as u32);
        request.temperature = wire
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|v| v as f32);
        request.top_p = wire.get("top_p").and_then(Value::as_f64).map(|v| v as f32);
        request.stream = wire.get("stream").and_then(Value::as_bool).unwrap_or(false);

        for tool in wire.get("tools").and_then(Value::as_array).into_iter().flatten() {
            if tool.get("type").and_then(Value::as_str) != Some("function") {
                continue;
            }
            request.tools.push(ToolDefinition {
                name: tool
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                parameters: tool
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            });
        }

        match wire.get("input") {
            Some(Value::String(text)) => request
                .messages
                .push(Message::text(Role::User, text.clone())),
            Some(Value::Array(items)) => {
                for item in items {
                    Self::parse_input_item(item, &mut request);
                }
            }
            _ => {}
        }

        Ok(request)
    }

    fn encode_request(&self, request: &ChatRequest) -> Result<Vec<u8>> {
        let mut input = Vec::new();
        for message in &request.messages {
            for part in &message.parts {
                match part {
                    ContentPart::Text { text } => {
                        let (role, content_type) = match message.role {
                            Role::Assistant => ("assistant", "output_text"),
                            _ => ("user", "input_text"),
                        };
                        input.push(json!({
                            "type": "message",
                            "role": role,
                            "content": [{ "type": content_type, "text": text }]
                        }));
                    }
                    ContentPart::Image { media_type, data } => input.push(json!({
                        "type": "message",
                        "role": "user",
                        "content": [{
                            "type": "input_image",
                            "image_url": format!("data:{};base64,{}", media_type, data)
                        }]
                    })),
                    ContentPart::ToolCall { id, name, arguments } => input.push(json!({
                        "type": "function_call",
                        "call_id": id,
                        "name": name,
                        "arguments": arguments.to_string()
                    })),
                    ContentPart::ToolResult { call_id, content, .. } => input.push(json!({
                        "type": "function_call_output",
                        "call_id": call_id,
                        "output": content
                    })),
                    ContentPart::Thinking { .. } => {}
                }
            }
        }

        let mut body = json!({
            "model": request.model,
            "input": input,
            "stream": request.stream
        });
        if let Some(system) = &request.system {
            body["instructions"] = json!(system);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters
                        })
                    })
                    .collect(),
            );
        }

        Ok(serde_json::to_vec(&body)?)
    }

    fn parse_response(&self, raw: &[u8]) -> Result<ChatResponse> {
        let wire: Value = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::Translation(format!("responses response: {}", e)))?;

        let mut message = Message::new(Role::Assistant);
        let mut has_tool_call = false;

        for item in wire.get("output").and_then(Value::as_array).into_iter().flatten() {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    for entry in item.get("content").and_then(Value::as_array).into_iter().flatten()
                    {
                        if entry.get("type").and_then(Value::as_str) == Some("output_text") {
                            if let Some(text) = entry.get("text").and_then(Value::as_str) {
                                message.parts.push(ContentPart::text(text));
                            }
                        }
                    }
                }
                Some("function_call") => {
                    has_tool_call = true;
                    let arguments = item
                        .get("arguments")
                        .and_then(Value::as_str)
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or_else(|| json!({}));
                    message.parts.push(ContentPart::ToolCall {
                        id: item
                            .get("call_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: item
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments,
                    });
                }
                _ => {}
            }
        }

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
            message,
            stop_reason: decode_status(
                wire.get("status").and_then(Value::as_str),
                wire.pointer("/incomplete_details/reason").and_then(Value::as_str),
                has_tool_call,
            ),
            usage: parse_usage(wire.get("usage")),
        })
    }

    fn encode_response(&self, response: &ChatResponse) -> Result<Vec<u8>> {
        let (status, incomplete_details) = Self::status_fields(response.stop_reason);
        let body = json!({
            "id": response.id,
            "object": "response",
            "created_at": chrono::Utc::now().timestamp(),
            "status": status,
            "incomplete_details": incomplete_details,
            "model": response.model,
            "output": Self::encode_output(response),
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
        Box::new(ResponsesStreamParser::default())
    }

    fn stream_emitter(&self, model: &str) -> Box<dyn StreamEmitter> {
        Box::new(ResponsesStreamEmitter::new(model.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ResponsesStreamParser {
    finished: bool,
}

impl StreamParser for ResponsesStreamParser {
    fn parse_event(&mut self, event: &SseEvent) -> Result<Vec<StreamItem>> {
        if event.is_done_marker() {
            return Ok(vec![StreamItem::Done]);
        }
        let payload: Value = match serde_json::from_str(&event.data) {
            Ok(v) => v,
            Err(_) => return Ok(Vec::new()),
        };

        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .or(event.event.as_deref())
            .unwrap_or_default();

        let mut items = Vec::new();
        match event_type {
            "response.created" => {
                items.push(StreamItem::Start {
                    id: payload
                        .pointer("/response/id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    model: payload
                        .pointer("/response/model")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    usage: Usage::default(),
                });
            }
            "response.output_text.delta" => {
                if let Some(delta) = payload.get("delta").and_then(Value::as_str) {
                    items.push(StreamItem::TextDelta(delta.to_string()));
                }
            }
            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
                if let Some(delta) = payload.get("delta").and_then(Value::as_str) {
                    items.push(StreamItem::ThinkingDelta(delta.to_string()));
                }
            }
            "response.output_item.done" => {
                let item = payload.get("item").cloned().unwrap_or_default();
                if item.get("type").and_then(Value::as_str) == Some("function_call") {
                    let arguments = item
                        .get("arguments")
                        .and_then(Value::as_str)
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or_else(|| json!({}));
                    items.push(StreamItem::ToolCall {
                        id: item
                            .get("call_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: item
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments,
                    });
                }
            }
            "response.completed" | "response.incomplete" | "response.failed" => {
                if !self.finished {
                    self.finished = true;
                    let response = payload.get("response").cloned().unwrap_or_default();
                    let has_tool_call = response
                        .get("output")
                        .and_then(Value::as_array)
                        .map(|output| {
                            output.iter().any(|i| {
                                i.get("type").and_then(Value::as_str) == Some("function_call")
                            })
                        })
                        .unwrap_or(false);
                    items.push(StreamItem::Finish {
                        stop_reason: decode_status(
                            response.get("status").and_then(Value::as_str),
                            response
                                .pointer("/incomplete_details/reason")
                                .and_then(Value::as_str),
                            has_tool_call,
                        ),
                        usage: parse_usage(response.get("usage")),
                    });
                    items.push(StreamItem::Done);
                }
            }
            _ => {}
        }

        Ok(items)
    }
}

/// Emits the Responses event grammar: response.created, text deltas inside
/// one message item, function_call items, and a single
/// response.completed/response.incomplete terminal.
struct ResponsesStreamEmitter {
    id: String,
    model: String,
    accumulated_text: String,
    message_open: bool,
    terminal_sent: bool,
    usage: Usage,
}

impl ResponsesStreamEmitter {
    fn new(model: String) -> Self {
        Self {
            id: format!("resp_{}", uuid::Uuid::new_v4().simple()),
            model,
            accumulated_text: String::new(),
            message_open: false,
            terminal_sent: false,
            usage: Usage::default(),
        }
    }

    fn event(&self, event_type: &str, mut body: Value) -> String {
        body["type"] = json!(event_type);
        frame(Some(event_type), &body.to_string())
    }

    fn response_snapshot(&self, status: &str, incomplete_details: Value) -> Value {
        json!({
            "id": self.id,
            "object": "response",
            "status": status,
            "incomplete_details": incomplete_details,
            "model": self.model,
            "output": [{
                "type": "message",
                "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
                "status": "completed",
                "role": "assistant",
                "content": [{ "type": "output_text", "text": self.accumulated_text, "annotations": [] }]
            }],
            "usage": OpenAiResponsesConverter::build_usage(&self.usage)
        })
    }

    fn terminal(&mut self, stop_reason: StopReason) -> Vec<String> {
        self.terminal_sent = true;
        let mut frames = Vec::new();

        if self.message_open {
            frames.push(self.event(
                "response.output_text.done",
                json!({ "output_index": 0, "text": self.accumulated_text }),
            ));
            self.message_open = false;
        }

        let (status, incomplete_details) = OpenAiResponsesConverter::status_fields(stop_reason);
        let event_type = match status {
            "incomplete" => "response.incomplete",
            _ => "response.completed",
        };
        let snapshot = self.response_snapshot(status, incomplete_details);
        frames.push(self.event(event_type, json!({ "response": snapshot })));
        frames
    }
}

impl StreamEmitter for ResponsesStreamEmitter {
    fn emit(&mut self, item: &StreamItem) -> Result<Vec<String>> {
        if self.terminal_sent {
            return Ok(Vec::new());
        }
        let mut frames = Vec::new();

        match item {
            StreamItem::Start { id, usage, .. } => {
                if !id.is_empty() {
                    self.id = id.clone();
                }
                self.usage = *usage;
                let snapshot = self.response_snapshot("in_progress", Value::Null);
                frames.push(self.event("response.created", json!({ "response": snapshot })));
            }
            StreamItem::TextDelta(text) => {
                if !self.message_open {
                    self.message_open = true;
                    frames.push(self.event(
                        "response.output_item.added",
                        json!({
                            "output_index": 0,
                            "item": { "type": "message", "role": "assistant", "content": [] }
                        }),
                    ));
                }
                self.accumulated_text.push_str(text);
                frames.push(self.event(
                    "response.output_text.delta",
                    json!({ "output_index": 0, "delta": text }),
                ));
            }
            StreamItem::ThinkingDelta(text) => {
                frames.push(self.event(
                    "response.reasoning_text.delta",
                    json!({ "output_index": 0, "delta": text }),
                ));
            }
            StreamItem::ToolCall { id, name, arguments } => {
                frames.push(self.event(
                    "response.output_item.done",
                    json!({
                        "output_index": 0,
                        "item": {
                            "type": "function_call",
                            "call_id": id,
                            "name": name,
                            "arguments": arguments.to_string(),
                            "status": "completed"
                        }
                    }),
                ));
            }
            StreamItem::Finish { stop_reason, usage } => {
                self.usage = *usage;
                frames.extend(self.terminal(*stop_reason));
            }
            StreamItem::Done => {
                if !self.terminal_sent {
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
        Ok(self.terminal(StopReason::Stop))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> OpenAiResponsesConverter {
        OpenAiResponsesConverter::new("openai-responses")
    }

    #[test]
    fn codex_alias_keeps_own_descriptor() {
        assert_eq!(OpenAiResponsesConverter::new("codex").descriptor().name, "codex");
        assert_eq!(converter().descriptor().name, "openai-responses");
    }

    #[test]
    fn string_input_becomes_user_message() {
        let raw = json!({ "model": "gpt-5", "input": "hello", "instructions": "be nice" });
        let request = converter().parse_request(raw.to_string().as_bytes()).unwrap();
        assert_eq!(request.system.as_deref(), Some("be nice"));
        assert_eq!(request.messages[0].visible_text(), "hello");
    }

    #[test]
    fn function_call_items_roundtrip() {
        let raw = json!({
            "model": "gpt-5",
            "input": [
                { "type": "message", "role": "user", "content": "check" },
                { "type": "function_call", "call_id": "call_1", "name": "f", "arguments": "{\"x\":2}" },
                { "type": "function_call_output", "call_id": "call_1", "output": "done" }
            ]
        });
        let request = converter().parse_request(raw.to_string().as_bytes()).unwrap();
        assert_eq!(request.messages.len(), 3);
        assert!(matches!(
            &request.messages[1].parts[0],
            ContentPart::ToolCall { arguments, .. } if arguments == &json!({"x": 2})
        ));

        let encoded = converter().encode_request(&request).unwrap();
        let reparsed = converter().parse_request(&encoded).unwrap();
        assert_eq!(reparsed.messages, request.messages);
    }

    #[test]
    fn max_tokens_encodes_incomplete_with_reason() {
        let response = ChatResponse {
            id: "resp_1".to_string(),
            model: "gpt-5".to_string(),
            message: Message::text(Role::Assistant, "truncated…"),
            stop_reason: StopReason::MaxTokens,
            usage: Usage::default(),
        };
        let encoded = converter().encode_response(&response).unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value.get("status").and_then(Value::as_str), Some("incomplete"));
        assert_eq!(
            value.pointer("/incomplete_details/reason").and_then(Value::as_str),
            Some("max_output_tokens")
        );

        let decoded = converter().parse_response(&encoded).unwrap();
        assert_eq!(decoded.stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn completed_with_tool_call_decodes_as_tool_use() {
        let raw = json!({
            "id": "resp_2",
            "status": "completed",
            "model": "gpt-5",
            "output": [
                { "type": "function_call", "call_id": "call_9", "name": "f", "arguments": "{}" }
            ]
        });
        let decoded = converter().parse_response(raw.to_string().as_bytes()).unwrap();
        assert_eq!(decoded.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn parser_reads_delta_and_terminal() {
        let mut parser = ResponsesStreamParser::default();
        let mut items = Vec::new();
        for payload in [
            json!({"type": "response.created", "response": {"id": "resp_3", "model": "gpt-5"}}),
            json!({"type": "response.output_text.delta", "delta": "hi"}),
            json!({"type": "response.completed",
                   "response": {"status": "completed", "output": [],
                                "usage": {"input_tokens": 3, "output_tokens": 1}}}),
        ] {
            items.extend(
                parser
                    .parse_event(&SseEvent { event: None, data: payload.to_string() })
                    .unwrap(),
            );
        }
        assert!(matches!(items[0], StreamItem::Start { .. }));
        assert!(matches!(&items[1], StreamItem::TextDelta(t) if t == "hi"));
        assert!(matches!(
            items[2],
            StreamItem::Finish { stop_reason: StopReason::Stop, usage } if usage.input_tokens == 3
        ));
        assert!(matches!(items[3], StreamItem::Done));
    }

    #[test]
    fn emitter_marks_truncation_incomplete() {
        let mut emitter = ResponsesStreamEmitter::new("gpt-5".to_string());
        let mut frames = Vec::new();
        frames.extend(emitter.emit(&StreamItem::TextDelta("x".to_string())).unwrap());
        frames.extend(
            emitter
                .emit(&StreamItem::Finish {
                    stop_reason: StopReason::MaxTokens,
                    usage: Usage::default(),
                })
                .unwrap(),
        );
        frames.extend(emitter.finalize().unwrap());

        let terminal_count = frames
            .iter()
            .filter(|f| f.contains("response.incomplete") || f.contains("response.completed"))
            .count();
        assert_eq!(terminal_count, 1);
        assert!(frames.iter().any(|f| f.contains("max_output_tokens")));
    }
}
