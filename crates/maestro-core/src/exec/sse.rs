//! Buffered server-sent events decoder
//!
//! Network chunks split SSE events and even UTF-8 sequences at arbitrary
//! byte positions. The decoder buffers text until a blank-line event
//! boundary and carries trailing incomplete UTF-8 into the next feed.

/// One decoded SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Value of the `event:` field when present
    pub event_type: Option<String>,
    /// Joined `data:` lines
    pub data: String,
    /// Value of the `id:` field when present
    pub id: Option<String>,
}

impl SseEvent {
    /// OpenAI-compatible stream termination sentinel
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental SSE parser fed from raw response bytes
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Decoded text waiting for an event boundary
    buffer: String,
    /// Trailing bytes of a UTF-8 sequence cut by the last chunk
    partial_utf8: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let bytes = if self.partial_utf8.is_empty() {
            chunk.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.partial_utf8);
            joined.extend_from_slice(chunk);
            joined
        };
        self.decode_into_buffer(&bytes);

        let mut events = Vec::new();
        while let Some((end, delimiter_len)) = self.event_boundary() {
            let event_text: String = self.buffer.drain(..end).collect();
            self.buffer.drain(..delimiter_len);
            if let Some(event) = parse_event(&event_text) {
                events.push(event);
            }
        }
        events
    }

    /// True when bytes are still waiting for completion
    pub fn has_remaining(&self) -> bool {
        !self.buffer.is_empty() || !self.partial_utf8.is_empty()
    }

    /// Append the valid portion of `bytes` to the text buffer. A trailing
    /// incomplete sequence is carried; interior invalid bytes become U+FFFD.
    fn decode_into_buffer(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&rest[..valid]) {
                        self.buffer.push_str(text);
                    }
                    match err.error_len() {
                        Some(invalid) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + invalid..];
                        }
                        None => {
                            self.partial_utf8 = rest[valid..].to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Position and delimiter width of the next complete event
    fn event_boundary(&self) -> Option<(usize, usize)> {
        let lf = self.buffer.find("\n\n").map(|pos| (pos, 2));
        let crlf = self.buffer.find("\r\n\r\n").map(|pos| (pos, 4));
        match (lf, crlf) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

fn parse_event(text: &str) -> Option<SseEvent> {
    let mut event_type = None;
    let mut id = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let line = line.trim_start_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        } else if let Some(value) = line.strip_prefix("id:") {
            id = Some(value.trim().to_string());
        }
        // retry: and unknown fields are ignored
    }

    if data_lines.is_empty() {
        return None;
    }
    Some(SseEvent {
        event_type,
        data: data_lines.join("\n"),
        id,
    })
}
