// Incremental Server-Sent-Events decoding

/// One decoded SSE event: optional `event:` name plus the joined `data:`
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// The OpenAI-style end-of-stream sentinel.
    pub fn is_done_marker(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Buffering decoder for a byte stream carrying SSE. Events are delimited
/// by a blank line; a chunk boundary can fall anywhere, including inside a
/// UTF-8 sequence, so bytes are accumulated before splitting.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        loop {
            let Some(boundary) = find_event_boundary(&self.buffer) else {
                break;
            };
            let block: Vec<u8> = self.buffer.drain(..boundary.end).collect();
            let text = String::from_utf8_lossy(&block[..boundary.start]);
            if let Some(event) = parse_block(&text) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was never terminated by a blank line.
    /// Some servers end the stream right after the last `data:` line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        parse_block(&text)
    }
}

struct Boundary {
    /// End of the event's content.
    start: usize,
    /// End of the delimiter.
    end: usize,
}

fn find_event_boundary(buf: &[u8]) -> Option<Boundary> {
    // Accept both \n\n and \r\n\r\n delimiters.
    let lf = buf.windows(2).position(|w| w == b"\n\n");
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(l), Some(c)) if c < l => Some(Boundary { start: c, end: c + 4 }),
        (Some(l), _) => Some(Boundary { start: l, end: l + 2 }),
        (None, Some(c)) => Some(Boundary { start: c, end: c + 4 }),
        (None, None) => None,
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data_lines = Vec::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // Comment lines (":") and unknown fields are ignored.
    }

    if data_lines.is_empty() && event.is_none() {
        return None;
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

/// Format one outgoing SSE frame.
pub fn frame(event: Option<&str>, data: &str) -> String {
    match event {
        Some(name) => format!("event: {}\ndata: {}\n\n", name, data),
        None => format!("data: {}\n\n", data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: message\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn handles_chunk_split_mid_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: par").is_empty());
        let events = decoder.feed(b"tial\n\ndata: next\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "partial");
        assert_eq!(events[1].data, "next");
    }

    #[test]
    fn handles_crlf_delimiters() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: one\r\n\r\ndata: two\r\n\r\n");
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn joins_multi_line_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn finish_flushes_unterminated_tail() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        let tail = decoder.finish().unwrap();
        assert_eq!(tail.data, "tail");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn done_marker_detection() {
        let event = SseEvent {
            event: None,
            data: "[DONE]".to_string(),
        };
        assert!(event.is_done_marker());
    }

    #[test]
    fn frame_formatting() {
        assert_eq!(frame(Some("ping"), "{}"), "event: ping\ndata: {}\n\n");
        assert_eq!(frame(None, "x"), "data: x\n\n");
    }
}
