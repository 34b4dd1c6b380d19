// Gemini generateContent codec, plus the Cloud Code envelope variant

use super::{Converter, FormatDescriptor, StreamEmitter, StreamParser};
use crate::error::{GatewayError, Result};
use crate::ir::{
    ChatRequest, ChatResponse, ContentPart, Message, Role, StopReason, StreamItem, ToolDefinition,
    Usage,
};
use crate::translate::sse::{frame, SseEvent};
use serde_json::{json, Value};
use tracing::warn;

static GEMINI_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "gemini",
    supports_streaming: true,
    supports_tools: true,
    supports_images: true,
};

static GEMINI_CLI_DESCRIPTOR: FormatDescriptor = FormatDescriptor {
    name: "gemini-cli",
    supports_streaming: true,
    supports_tools: true,
    supports_images: true,
};

// ---------------------------------------------------------------------------
// Stop-reason tables
// ---------------------------------------------------------------------------

static FINISH_REASONS: phf::Map<&'static str, StopReason> = phf::phf_map! {
    "STOP" => StopReason::Stop,
    "MAX_TOKENS" => StopReason::MaxTokens,
    "SAFETY" => StopReason::ContentFilter,
    "RECITATION" => StopReason::ContentFilter,
    "PROHIBITED_CONTENT" => StopReason::ContentFilter,
    "BLOCKLIST" => StopReason::ContentFilter,
};

fn decode_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some(label) => FINISH_REASONS.get(label).copied().unwrap_or_else(|| {
            warn!("Unknown Gemini finish reason: {}", label);
            StopReason::Unknown
        }),
        None => StopReason::Stop,
    }
}

fn encode_finish_reason(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Stop | StopReason::ToolUse | StopReason::Unknown => "STOP",
        StopReason::MaxTokens => "MAX_TOKENS",
        StopReason::ContentFilter => "SAFETY",
    }
}

// ---------------------------------------------------------------------------
// Part mapping
// ---------------------------------------------------------------------------

fn part_to_value(part: &ContentPart, tool_names: &[(String, String)]) -> Option<Value> {
    match part {
        ContentPart::Text { text } => Some(json!({ "text": text })),
        // Thought text is not sent back upstream.
        ContentPart::Thinking { .. } => None,
        ContentPart::Image { media_type, data } => Some(json!({
            "inlineData": { "mimeType": media_type, "data": data }
        })),
        ContentPart::ToolCall { name, arguments, .. } => Some(json!({
            "functionCall": { "name": name, "args": arguments }
        })),
        ContentPart::ToolResult { call_id, content, .. } => {
            // Gemini matches results by function name; recover it from the
            // originating call when the conversation carries one.
            let name = tool_names
                .iter()
                .find(|(id, _)| id == call_id)
                .map(|(_, name)| name.clone())
                .unwrap_or_else(|| call_id.clone());
            Some(json!({
                "functionResponse": { "name": name, "response": { "result": content } }
            }))
        }
    }
}

fn value_to_part(value: &Value) -> Option<ContentPart> {
    if let Some(text) = value.get("text").and_then(Value::as_str) {
        if value.get("thought").and_then(Value::as_bool) == Some(true) {
            return Some(ContentPart::Thinking { text: text.to_string() });
        }
        return Some(ContentPart::text(text));
    }
    if let Some(inline) = value.get("inlineData") {
        return Some(ContentPart::Image {
            media_type: inline
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("application/octet-stream")
                .to_string(),
            data: inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    if let Some(call) = value.get("functionCall") {
        return Some(ContentPart::ToolCall {
            id: format!("toolu_{}", uuid::Uuid::new_v4().simple()),
            name: call
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
        });
    }
    if let Some(response) = value.get("functionResponse") {
        return Some(ContentPart::ToolResult {
            call_id: response
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content: response
                .pointer("/response/result")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    response.get("response").cloned().unwrap_or_default().to_string()
                }),
            is_error: false,
        });
    }
    None
}

fn parse_candidate_parts(candidate: &Value) -> Vec<ContentPart> {
    candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(value_to_part)
        .collect()
}

fn parse_usage(value: Option<&Value>) -> Usage {
    let Some(value) = value else {
        return Usage::default();
    };
    Usage {
        input_tokens: value
            .get("promptTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        output_tokens: value
            .get("candidatesTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        reasoning_tokens: value
            .get("thoughtsTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        cached_tokens: value
            .get("cachedContentTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    }
}

fn usage_metadata(usage: &Usage) -> Value {
    json!({
        "promptTokenCount": usage.input_tokens,
        "candidatesTokenCount": usage.output_tokens,
        "thoughtsTokenCount": usage.reasoning_tokens,
        "cachedContentTokenCount": usage.cached_tokens,
        "totalTokenCount": usage.input_tokens + usage.output_tokens
    })
}

/// The Cloud Code internal API wraps responses in `{"response": ...}`.
/// Accept both shapes everywhere, like the clients do.
fn unwrap_envelope(value: Value) -> Value {
    match value.get("response") {
        Some(inner) => inner.clone(),
        None => value,
    }
}

// ---------------------------------------------------------------------------
// Core codec
// ---------------------------------------------------------------------------

fn parse_request_value(wire: &Value) -> Result<ChatRequest> {
    let model = wire
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let mut request = ChatRequest::new(model);

    request.system = wire
        .pointer("/systemInstruction/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|s| !s.is_empty());

    if let Some(config) = wire.get("generationConfig") {
        request.max_tokens = config
            .get("maxOutputTokens")
            .and_then(Value::as_u64)
            .map(|v| v as u32);
        request.temperature = config
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|v| v as f32);
        request.top_p = config.get("topP").and_then(Value::as_f64).map(|v| v as f32);
        request.stop_sequences = config
            .get("stopSequences")
            .and_then(Value::as_array)
            .map(|seqs| {
                seqs.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            });
    }

    for group in wire.get("tools").and_then(Value::as_array).into_iter().flatten() {
        for decl in group
            .get("functionDeclarations")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            request.tools.push(ToolDefinition {
                name: decl
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                description: decl
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                parameters: decl
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            });
        }
    }

    for content in wire.get("contents").and_then(Value::as_array).into_iter().flatten() {
        let role = match content.get("role").and_then(Value::as_str) {
            Some("model") => Role::Assistant,
            _ => Role::User,
        };
        let parts: Vec<ContentPart> = content
            .get("parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(value_to_part)
            .collect();
        if !parts.is_empty() {
            request.messages.push(Message { role, parts });
        }
    }

    Ok(request)
}

fn encode_request_value(request: &ChatRequest) -> Value {
    // Index tool-call ids to names so functionResponse parts can name the
    // function they answer.
    let tool_names: Vec<(String, String)> = request
        .messages
        .iter()
        .flat_map(|m| m.parts.iter())
        .filter_map(|p| match p {
            ContentPart::ToolCall { id, name, .. } => Some((id.clone(), name.clone())),
            _ => None,
        })
        .collect();

    let contents: Vec<Value> = request
        .messages
        .iter()
        .filter_map(|message| {
            let parts: Vec<Value> = message
                .parts
                .iter()
                .filter_map(|p| part_to_value(p, &tool_names))
                .collect();
            if parts.is_empty() {
                return None;
            }
            let role = match message.role {
                Role::Assistant => "model",
                _ => "user",
            };
            Some(json!({ "role": role, "parts": parts }))
        })
        .collect();

    let mut body = json!({ "contents": contents });
    if !request.model.is_empty() {
        body["model"] = json!(request.model);
    }
    if let Some(system) = &request.system {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(max_tokens) = request.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = request.temperature {
        generation_config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = request.top_p {
        generation_config.insert("topP".to_string(), json!(top_p));
    }
    if let Some(stop) = &request.stop_sequences {
        generation_config.insert("stopSequences".to_string(), json!(stop));
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }

    if !request.tools.is_empty() {
        body["tools"] = json!([{
            "functionDeclarations": request.tools.iter().map(|t| json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.parameters
            })).collect::<Vec<_>>()
        }]);
    }

    body
}

fn parse_response_value(wire: &Value, fallback_model: &str) -> Result<ChatResponse> {
    let candidate = wire
        .pointer("/candidates/0")
        .ok_or_else(|| GatewayError::Translation("no candidates in Gemini response".into()))?;

    let parts = parse_candidate_parts(candidate);
    let has_tool_call = parts.iter().any(|p| matches!(p, ContentPart::ToolCall { .. }));
    let finish = candidate.get("finishReason").and_then(Value::as_str);

    let stop_reason = if has_tool_call && finish == Some("STOP") {
        StopReason::ToolUse
    } else {
        decode_finish_reason(finish)
    };

    Ok(ChatResponse {
        id: wire
            .get("responseId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("gen-{}", uuid::Uuid::new_v4().simple())),
        model: wire
            .get("modelVersion")
            .and_then(Value::as_str)
            .unwrap_or(fallback_model)
            .to_string(),
        message: Message {
            role: Role::Assistant,
            parts,
        },
        stop_reason,
        usage: parse_usage(wire.get("usageMetadata")),
    })
}

fn encode_response_value(response: &ChatResponse) -> Value {
    let tool_names: Vec<(String, String)> = Vec::new();
    let parts: Vec<Value> = response
        .message
        .parts
        .iter()
        .filter_map(|p| part_to_value(p, &tool_names))
        .collect();

    json!({
        "responseId": response.id,
        "modelVersion": response.model,
        "candidates": [{
            "content": { "role": "model", "parts": parts },
            "finishReason": encode_finish_reason(response.stop_reason),
            "index": 0
        }],
        "usageMetadata": usage_metadata(&response.usage)
    })
}

// ---------------------------------------------------------------------------
// Converters
// ---------------------------------------------------------------------------

pub struct GeminiConverter;

impl GeminiConverter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GeminiConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter for GeminiConverter {
    fn descriptor(&self) -> &'static FormatDescriptor {
        &GEMINI_DESCRIPTOR
    }

    fn parse_request(&self, raw: &[u8]) -> Result<ChatRequest> {
        let wire: Value = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::InvalidRequest(format!("gemini request: {}", e)))?;
        parse_request_value(&wire)
    }

    fn encode_request(&self, request: &ChatRequest) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&encode_request_value(request))?)
    }

    fn parse_response(&self, raw: &[u8]) -> Result<ChatResponse> {
        let wire: Value = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::Translation(format!("gemini response: {}", e)))?;
        parse_response_value(&unwrap_envelope(wire), "")
    }

    fn encode_response(&self, response: &ChatResponse) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&encode_response_value(response))?)
    }

    fn encode_error(&self, status: u16, error_type: &str, message: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "error": { "code": status, "message": message, "status": error_type.to_uppercase() }
        }))
        .unwrap_or_default()
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(GeminiStreamParser::default())
    }

    fn stream_emitter(&self, model: &str) -> Box<dyn StreamEmitter> {
        Box::new(GeminiStreamEmitter::new(model.to_string(), false))
    }
}

/// Cloud Code variant: same codec behind the `{"model", "request"}` /
/// `{"response"}` envelopes the gemini-cli wire uses.
pub struct GeminiCliConverter {
    inner: GeminiConverter,
}

impl GeminiCliConverter {
    pub fn new() -> Self {
        Self {
            inner: GeminiConverter::new(),
        }
    }
}

impl Default for GeminiCliConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter for GeminiCliConverter {
    fn descriptor(&self) -> &'static FormatDescriptor {
        &GEMINI_CLI_DESCRIPTOR
    }

    fn parse_request(&self, raw: &[u8]) -> Result<ChatRequest> {
        let wire: Value = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::InvalidRequest(format!("gemini-cli request: {}", e)))?;

        match wire.get("request") {
            Some(inner) => {
                let mut request = parse_request_value(inner)?;
                // The envelope, not the inner request, names the model.
                if let Some(model) = wire.get("model").and_then(Value::as_str) {
                    request.model = model.to_string();
                }
                Ok(request)
            }
            None => parse_request_value(&wire),
        }
    }

    fn encode_request(&self, request: &ChatRequest) -> Result<Vec<u8>> {
        let mut inner = encode_request_value(request);
        if let Some(obj) = inner.as_object_mut() {
            obj.remove("model");
        }
        let body = json!({
            "model": request.model,
            "request": inner
        });
        Ok(serde_json::to_vec(&body)?)
    }

    fn parse_response(&self, raw: &[u8]) -> Result<ChatResponse> {
        self.inner.parse_response(raw)
    }

    fn encode_response(&self, response: &ChatResponse) -> Result<Vec<u8>> {
        let body = json!({ "response": encode_response_value(response) });
        Ok(serde_json::to_vec(&body)?)
    }

    fn encode_error(&self, status: u16, error_type: &str, message: &str) -> Vec<u8> {
        self.inner.encode_error(status, error_type, message)
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(GeminiStreamParser::default())
    }

    fn stream_emitter(&self, model: &str) -> Box<dyn StreamEmitter> {
        Box::new(GeminiStreamEmitter::new(model.to_string(), true))
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GeminiStreamParser {
    started: bool,
    finished: bool,
    usage: Usage,
}

impl StreamParser for GeminiStreamParser {
    fn parse_event(&mut self, event: &SseEvent) -> Result<Vec<StreamItem>> {
        if event.data.trim().is_empty() || event.is_done_marker() {
            return Ok(Vec::new());
        }
        let wire: Value = match serde_json::from_str(&event.data) {
            Ok(v) => v,
            Err(_) => return Ok(Vec::new()),
        };
        let chunk = unwrap_envelope(wire);

        let mut items = Vec::new();
        if let Some(usage) = chunk.get("usageMetadata") {
            self.usage = parse_usage(Some(usage));
        }

        if !self.started {
            self.started = true;
            items.push(StreamItem::Start {
                id: chunk
                    .get("responseId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                model: chunk
                    .get("modelVersion")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                usage: self.usage,
            });
        }

        let Some(candidate) = chunk.pointer("/candidates/0") else {
            return Ok(items);
        };

        let mut saw_tool_call = false;
        for part in parse_candidate_parts(candidate) {
            match part {
                ContentPart::Text { text } => items.push(StreamItem::TextDelta(text)),
                ContentPart::Thinking { text } => items.push(StreamItem::ThinkingDelta(text)),
                ContentPart::ToolCall { id, name, arguments } => {
                    saw_tool_call = true;
                    items.push(StreamItem::ToolCall { id, name, arguments });
                }
                // Images and tool results do not stream incrementally.
                _ => {}
            }
        }

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            if !self.finished {
                self.finished = true;
                let stop_reason = if saw_tool_call && reason == "STOP" {
                    StopReason::ToolUse
                } else {
                    decode_finish_reason(Some(reason))
                };
                items.push(StreamItem::Finish {
                    stop_reason,
                    usage: self.usage,
                });
                items.push(StreamItem::Done);
            }
        }

        Ok(items)
    }
}

/// Streams client-facing chunks in the generateContent shape. The terminal
/// chunk carries `finishReason` and usage, and is emitted exactly once.
struct GeminiStreamEmitter {
    model: String,
    envelope: bool,
    terminal_sent: bool,
    usage: Usage,
}

impl GeminiStreamEmitter {
    fn new(model: String, envelope: bool) -> Self {
        Self {
            model,
            envelope,
            terminal_sent: false,
            usage: Usage::default(),
        }
    }

    fn chunk_frame(&self, chunk: Value) -> String {
        let body = if self.envelope {
            json!({ "response": chunk })
        } else {
            chunk
        };
        frame(None, &body.to_string())
    }

    fn delta_chunk(&self, parts: Vec<Value>) -> Value {
        json!({
            "modelVersion": self.model,
            "candidates": [{ "content": { "role": "model", "parts": parts }, "index": 0 }]
        })
    }

    fn terminal(&mut self, stop_reason: StopReason) -> Vec<String> {
        self.terminal_sent = true;
        let chunk = json!({
            "modelVersion": self.model,
            "candidates": [{
                "content": { "role": "model", "parts": [] },
                "finishReason": encode_finish_reason(stop_reason),
                "index": 0
            }],
            "usageMetadata": usage_metadata(&self.usage)
        });
        vec![self.chunk_frame(chunk)]
    }
}

impl StreamEmitter for GeminiStreamEmitter {
    fn emit(&mut self, item: &StreamItem) -> Result<Vec<String>> {
        if self.terminal_sent {
            return Ok(Vec::new());
        }
        let mut frames = Vec::new();

        match item {
            StreamItem::Start { usage, .. } => {
                self.usage = *usage;
            }
            StreamItem::TextDelta(text) => {
                frames.push(self.chunk_frame(self.delta_chunk(vec![json!({ "text": text })])));
            }
            StreamItem::ThinkingDelta(text) => {
                frames.push(self.chunk_frame(
                    self.delta_chunk(vec![json!({ "text": text, "thought": true })]),
                ));
            }
            StreamItem::ToolCall { name, arguments, .. } => {
                frames.push(self.chunk_frame(self.delta_chunk(vec![json!({
                    "functionCall": { "name": name, "args": arguments }
                })])));
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

    fn converter() -> GeminiConverter {
        GeminiConverter::new()
    }

    #[test]
    fn request_roundtrip() {
        let raw = json!({
            "contents": [
                { "role": "user", "parts": [{ "text": "hi" }] },
                { "role": "model", "parts": [{ "text": "hello" }] }
            ],
            "systemInstruction": { "parts": [{ "text": "be kind" }] },
            "generationConfig": { "maxOutputTokens": 100, "temperature": 0.5 }
        });
        let request = converter().parse_request(raw.to_string().as_bytes()).unwrap();
        assert_eq!(request.system.as_deref(), Some("be kind"));
        assert_eq!(request.max_tokens, Some(100));
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].role, Role::Assistant);

        let encoded = converter().encode_request(&request).unwrap();
        let reparsed = converter().parse_request(&encoded).unwrap();
        assert_eq!(reparsed.messages, request.messages);
    }

    #[test]
    fn tool_result_recovers_function_name() {
        let mut request = ChatRequest::new("gemini-2.5-pro");
        request.messages.push(Message {
            role: Role::Assistant,
            parts: vec![ContentPart::ToolCall {
                id: "toolu_7".to_string(),
                name: "get_weather".to_string(),
                arguments: json!({"city": "Oslo"}),
            }],
        });
        request.messages.push(Message {
            role: Role::Tool,
            parts: vec![ContentPart::ToolResult {
                call_id: "toolu_7".to_string(),
                content: "rainy".to_string(),
                is_error: false,
            }],
        });

        let encoded = converter().encode_request(&request).unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(
            value.pointer("/contents/1/parts/0/functionResponse/name").and_then(Value::as_str),
            Some("get_weather")
        );
    }

    #[test]
    fn response_with_envelope_unwraps() {
        let raw = json!({
            "response": {
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "out" }] },
                    "finishReason": "STOP"
                }],
                "usageMetadata": { "promptTokenCount": 4, "candidatesTokenCount": 2 }
            }
        });
        let response = converter().parse_response(raw.to_string().as_bytes()).unwrap();
        assert_eq!(response.message.visible_text(), "out");
        assert_eq!(response.usage.input_tokens, 4);
        assert_eq!(response.stop_reason, StopReason::Stop);
    }

    #[test]
    fn tool_call_with_stop_maps_to_tool_use() {
        let raw = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [
                    { "functionCall": { "name": "f", "args": {"a": 1} } }
                ]},
                "finishReason": "STOP"
            }]
        });
        let response = converter().parse_response(raw.to_string().as_bytes()).unwrap();
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn cli_request_envelope_roundtrip() {
        let cli = GeminiCliConverter::new();
        let raw = json!({
            "model": "gemini-2.5-pro",
            "project": "my-project",
            "request": {
                "contents": [{ "role": "user", "parts": [{ "text": "ping" }] }]
            }
        });
        let request = cli.parse_request(raw.to_string().as_bytes()).unwrap();
        assert_eq!(request.model, "gemini-2.5-pro");
        assert_eq!(request.messages[0].visible_text(), "ping");

        let encoded = cli.encode_request(&request).unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value.get("model").and_then(Value::as_str), Some("gemini-2.5-pro"));
        assert!(value.pointer("/request/contents").is_some());
    }

    #[test]
    fn parser_emits_finish_and_done_on_final_chunk() {
        let mut parser = GeminiStreamParser::default();
        let chunk = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "end" }] },
                "finishReason": "MAX_TOKENS"
            }],
            "usageMetadata": { "promptTokenCount": 1, "candidatesTokenCount": 50 }
        });
        let items = parser
            .parse_event(&SseEvent { event: None, data: chunk.to_string() })
            .unwrap();
        assert!(matches!(items[0], StreamItem::Start { .. }));
        assert!(matches!(&items[1], StreamItem::TextDelta(t) if t == "end"));
        assert!(matches!(
            items[2],
            StreamItem::Finish { stop_reason: StopReason::MaxTokens, .. }
        ));
        assert!(matches!(items[3], StreamItem::Done));
    }

    #[test]
    fn cli_emitter_wraps_chunks_in_envelope() {
        let mut emitter = GeminiStreamEmitter::new("gemini-2.5-pro".to_string(), true);
        let frames = emitter.emit(&StreamItem::TextDelta("x".to_string())).unwrap();
        assert!(frames[0].contains("\"response\""));

        let terminal = emitter.finalize().unwrap();
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].contains("finishReason"));
        assert!(emitter.finalize().unwrap().is_empty());
    }
}
