//! SSE (Server-Sent Events) parser
//!
//! Streamable HTTP backends may answer a POST with a `text/event-stream`
//! body. Bytes arrive in arbitrary chunks; the parser buffers partial
//! lines and yields complete events.

use bytes::Bytes;
use tracing::trace;

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, if the server set one
    pub event: Option<String>,
    /// Joined `data:` lines
    pub data: String,
    /// `id:` field, if the server set one
    pub id: Option<String>,
}

/// SSE parser state
#[derive(Debug, Default)]
pub struct SseParser {
    /// Buffer for incomplete lines
    buffer: Vec<u8>,
    /// Current event data being accumulated
    data_buffer: String,
    event_type: Option<String>,
    last_id: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the parser and extract any complete events
    pub fn feed(&mut self, bytes: &Bytes) -> Vec<SseEvent> {
        let mut events = Vec::new();
        self.buffer.extend_from_slice(bytes);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let mut line = &raw[..raw.len() - 1];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing event that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            if let Some(event) = self.process_line(&rest) {
                return Some(event);
            }
        }
        self.dispatch_event()
    }

    fn process_line(&mut self, line: &[u8]) -> Option<SseEvent> {
        // Empty line ends the event
        if line.is_empty() {
            return self.dispatch_event();
        }

        // Comment (keepalive)
        if line.starts_with(b":") {
            trace!("SSE keepalive/comment");
            return None;
        }

        let line = String::from_utf8_lossy(line);
        let (field, value) = match line.find(':') {
            Some(colon) => {
                let (f, v) = line.split_at(colon);
                let v = &v[1..];
                (f, v.strip_prefix(' ').unwrap_or(v))
            }
            None => (line.as_ref(), ""),
        };

        match field {
            "data" => {
                if !self.data_buffer.is_empty() {
                    self.data_buffer.push('\n');
                }
                self.data_buffer.push_str(value);
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            "retry" => trace!("SSE retry: {}", value),
            _ => trace!("SSE unknown field: {}", field),
        }

        None
    }

    fn dispatch_event(&mut self) -> Option<SseEvent> {
        let event_type = self.event_type.take();
        if self.data_buffer.is_empty() {
            return None;
        }

        Some(SseEvent {
            event: event_type,
            data: std::mem::take(&mut self.data_buffer),
            id: self.last_id.clone(),
        })
    }
}
