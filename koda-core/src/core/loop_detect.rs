//! In-turn loop detection.
//!
//! Two signals halt a turn: the model requesting the same tool call over and
//! over, or streaming the same content chunk over and over. Both counters are
//! per-turn; a fresh detector is built for every turn.

use serde_json::{Map, Value};

const TOOL_CALL_THRESHOLD: u32 = 3;
const CONTENT_CHUNK_THRESHOLD: u32 = 8;

#[derive(Debug, Default)]
pub struct LoopDetector {
    last_tool_call: Option<String>,
    tool_call_repeats: u32,
    last_chunk: Option<String>,
    chunk_repeats: u32,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tool-call request; true means the turn is looping.
    pub fn observe_tool_call(&mut self, name: &str, args: &Map<String, Value>) -> bool {
        let key = format!("{name}:{}", Value::Object(args.clone()));
        if self.last_tool_call.as_deref() == Some(&key) {
            self.tool_call_repeats += 1;
        } else {
            self.last_tool_call = Some(key);
            self.tool_call_repeats = 1;
        }
        self.tool_call_repeats >= TOOL_CALL_THRESHOLD
    }

    /// Record a content chunk; true means the turn is looping.
    pub fn observe_content(&mut self, chunk: &str) -> bool {
        let trimmed = chunk.trim();
        if trimmed.is_empty() {
            return false;
        }
        if self.last_chunk.as_deref() == Some(trimmed) {
            self.chunk_repeats += 1;
        } else {
            self.last_chunk = Some(trimmed.to_string());
            self.chunk_repeats = 1;
        }
        self.chunk_repeats >= CONTENT_CHUNK_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn identical_tool_calls_trip_after_threshold() {
        let mut detector = LoopDetector::new();
        let a = args(json!({"path": "f"}));
        assert!(!detector.observe_tool_call("read_file", &a));
        assert!(!detector.observe_tool_call("read_file", &a));
        assert!(detector.observe_tool_call("read_file", &a));
    }

    #[test]
    fn different_args_reset_the_counter() {
        let mut detector = LoopDetector::new();
        let a = args(json!({"path": "a"}));
        let b = args(json!({"path": "b"}));
        assert!(!detector.observe_tool_call("read_file", &a));
        assert!(!detector.observe_tool_call("read_file", &b));
        assert!(!detector.observe_tool_call("read_file", &a));
        assert!(!detector.observe_tool_call("read_file", &a));
    }

    #[test]
    fn repeated_chunks_trip_after_threshold() {
        let mut detector = LoopDetector::new();
        for _ in 0..CONTENT_CHUNK_THRESHOLD - 1 {
            assert!(!detector.observe_content("same"));
        }
        assert!(detector.observe_content("same"));
    }

    #[test]
    fn whitespace_chunks_are_ignored() {
        let mut detector = LoopDetector::new();
        for _ in 0..20 {
            assert!(!detector.observe_content("  \n"));
        }
    }
}
