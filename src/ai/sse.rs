//! Server-Sent Events (SSE) parser.
//!
//! Handles frames split across TCP chunks, several frames in one read,
//! comments and `event:` lines. Two layers are exposed:
//! - [`SseParser::feed_frames`] yields raw frames (used to read our own `/chat` stream)
//! - [`SseParser::feed`] decodes `OpenAI` Chat Completions chunks into [`StreamEvent`]s

use serde_json::Value;

/// Events emitted by a Chat Completions streaming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A content delta from `choices[0].delta.content`.
    TextDelta(String),
    /// A choice reported a `finish_reason`.
    Completed,
    /// The server reported an error, or a payload could not be decoded.
    Error(String),
}

/// Result of parsing an SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// A complete event was parsed.
    Event(StreamEvent),
    /// The frame carried no content we care about (role-only delta, usage chunk, ...).
    Ignored,
    /// End of stream signal (`[DONE]`).
    Done,
}

/// One raw SSE frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Value of the `event:` field, if present.
    pub event: Option<String>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

/// Stateful SSE parser that buffers incomplete frames across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feeds a chunk and returns every complete frame that carried data.
    pub fn feed_frames(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some((event_end, boundary_len)) = self.find_event_boundary() {
            let event_text = self.buffer[..event_end].to_string();
            self.buffer.drain(..event_end + boundary_len);

            if let Some(frame) = Self::parse_frame(&event_text) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Feeds a chunk of a Chat Completions stream and returns all decoded events.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParseResult> {
        self.feed_frames(chunk)
            .into_iter()
            .map(|frame| {
                if frame.data == "[DONE]" {
                    ParseResult::Done
                } else {
                    parse_chat_chunk(&frame.data)
                }
            })
            .collect()
    }

    /// Position of the earliest frame terminator and its length.
    fn find_event_boundary(&self) -> Option<(usize, usize)> {
        let lf = self.buffer.find("\n\n").map(|pos| (pos, 2));
        let crlf = self.buffer.find("\r\n\r\n").map(|pos| (pos, 4));
        match (lf, crlf) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    fn parse_frame(event_text: &str) -> Option<SseFrame> {
        let mut frame = SseFrame::default();
        let mut data_lines: Vec<&str> = Vec::new();

        for line in event_text.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);

            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                // A single leading space is part of the field separator.
                data_lines.push(data.strip_prefix(' ').unwrap_or(data));
            } else if let Some(event) = line.strip_prefix("event:") {
                frame.event = Some(event.trim().to_string());
            }
        }

        if data_lines.is_empty() {
            return None;
        }

        frame.data = data_lines.join("\n");
        Some(frame)
    }

    /// Returns any remaining buffered data.
    #[must_use]
    pub fn remaining_buffer(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Decodes one Chat Completions chunk payload.
#[must_use]
pub fn parse_chat_chunk(data: &str) -> ParseResult {
    let json: Value = match serde_json::from_str(data.trim()) {
        Ok(v) => v,
        Err(e) => {
            return ParseResult::Event(StreamEvent::Error(format!(
                "Failed to parse SSE JSON payload: {e}"
            )));
        }
    };

    if json.get("error").is_some_and(|e| !e.is_null()) {
        return ParseResult::Event(StreamEvent::Error(extract_error_message(&json)));
    }

    let Some(choice) = json
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
    else {
        return ParseResult::Ignored;
    };

    if let Some(content) = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        && !content.is_empty()
    {
        return ParseResult::Event(StreamEvent::TextDelta(content.to_string()));
    }

    if choice
        .get("finish_reason")
        .is_some_and(|reason| !reason.is_null())
    {
        return ParseResult::Event(StreamEvent::Completed);
    }

    ParseResult::Ignored
}

/// Extracts an error message from an error payload.
pub(crate) fn extract_error_message(json: &Value) -> String {
    if let Some(error) = json.get("error") {
        if let Some(msg) = error.get("message").and_then(Value::as_str) {
            return msg.to_string();
        }
        if let Some(msg) = error.as_str() {
            return msg.to_string();
        }
    }

    "Unknown error".to_string()
}
