//! Server-sent-event framing shared by the streaming backends.
//!
//! Both the native endpoint (`alt=sse`) and the OpenAI-compatible router emit
//! `data:` frames separated by blank lines, with `[DONE]` as the router's
//! terminator.

/// The `data:` payload of one complete SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SsePayload {
    data: String,
}

impl SsePayload {
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_done_sentinel(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Incremental frame splitter over a byte stream.
#[derive(Debug, Default)]
pub struct SseFrameBuffer {
    buffer: String,
}

impl SseFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SsePayload> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut payloads = Vec::new();
        while let Some((idx, len)) = find_event_boundary(&self.buffer) {
            let event = self.buffer[..idx].to_string();
            self.buffer.drain(..idx + len);
            if let Some(payload) = extract_data_payload(&event) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Drain whatever remains after the stream ends. Streams that terminate
    /// without a trailing blank line still carry a final event here.
    pub fn flush(&mut self) -> Option<SsePayload> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            return None;
        }
        extract_data_payload(&rest)
    }
}

fn find_event_boundary(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|idx| (idx, 2));
    let crlf = buffer.find("\r\n\r\n").map(|idx| (idx, 4));
    match (lf, crlf) {
        (Some((l, ll)), Some((c, cl))) => {
            if l <= c {
                Some((l, ll))
            } else {
                Some((c, cl))
            }
        }
        (one, two) => one.or(two),
    }
}

/// Join the `data:` lines of one event; comment and `event:`/`id:` lines are
/// dropped.
fn extract_data_payload(event: &str) -> Option<SsePayload> {
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in event.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start());
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(SsePayload {
            data: data_lines.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_lf_and_crlf_events() {
        let mut frames = SseFrameBuffer::new();
        let payloads = frames.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\r\n\r\n");
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].data(), "{\"a\":1}");
        assert_eq!(payloads[1].data(), "{\"b\":2}");
    }

    #[test]
    fn buffers_partial_events_across_chunks() {
        let mut frames = SseFrameBuffer::new();
        assert!(frames.push(b"data: {\"par").is_empty());
        let payloads = frames.push(b"tial\":true}\n\n");
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].data(), "{\"partial\":true}");
    }

    #[test]
    fn done_sentinel_detected() {
        let mut frames = SseFrameBuffer::new();
        let payloads = frames.push(b"data: [DONE]\n\n");
        assert!(payloads[0].is_done_sentinel());
    }

    #[test]
    fn comments_and_event_names_skipped() {
        let mut frames = SseFrameBuffer::new();
        let payloads = frames.push(b": keepalive\nevent: message\ndata: x\n\n");
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].data(), "x");
    }

    #[test]
    fn flush_recovers_unterminated_tail() {
        let mut frames = SseFrameBuffer::new();
        assert!(frames.push(b"data: {\"tail\":1}").is_empty());
        let tail = frames.flush().unwrap();
        assert_eq!(tail.data(), "{\"tail\":1}");
        assert!(frames.flush().is_none());
    }
}
