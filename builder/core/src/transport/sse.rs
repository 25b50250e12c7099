//! Incremental Server-Sent-Events decoder
//!
//! Bytes arrive in arbitrary chunks; frames are emitted once their
//! terminating blank line has been seen. Line endings may be `\n` or `\r\n`,
//! and a chunk boundary may fall anywhere, including inside a UTF-8 sequence.

/// One decoded SSE frame
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `id:` field, if the frame carried one
    pub id: Option<String>,
    /// Value of the `event:` field, if the frame carried one
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

impl SseFrame {
    /// Event name, defaulting to `message`
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

#[derive(Debug, Default)]
struct PendingFrame {
    id: Option<String>,
    event: Option<String>,
    data: Vec<String>,
}

impl PendingFrame {
    fn take(&mut self) -> Option<SseFrame> {
        let pending = std::mem::take(self);
        if pending.data.is_empty() && pending.event.is_none() {
            return None;
        }
        Some(SseFrame {
            id: pending.id,
            event: pending.event,
            data: pending.data.join("\n"),
        })
    }
}

/// Incremental decoder for `text/event-stream` bodies
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    pending: PendingFrame,
}

impl SseDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and drain every frame completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Flush a trailing frame the server did not terminate with a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_string();
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.pending.take()
    }

    /// Whether undispatched input remains
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty() || !self.pending.data.is_empty() || self.pending.event.is_some()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.pending.take();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "id" if !value.contains('\0') => self.pending.id = Some(value.to_string()),
            "event" => self.pending.event = Some(value.to_string()),
            "data" => self.pending.data.push(value.to_string()),
            // `retry` and unknown fields carry nothing we act on
            _ => {}
        }
        None
    }
}
