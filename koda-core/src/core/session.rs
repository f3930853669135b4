//! Session state: identity, prompt counter, quota flag, and the append-only
//! conversation history with its curated projection.

use std::sync::{Arc, Mutex as StdMutex};

use uuid::Uuid;

use crate::gemini::{Content, Part};
use crate::llm::provider::AuthKind;

/// Read-only view of the session history, handed to components (checkpointing)
/// that must not own the session.
#[derive(Debug, Clone)]
pub struct HistoryAccessor {
    inner: Arc<StdMutex<Vec<Content>>>,
}

impl HistoryAccessor {
    pub fn snapshot(&self) -> Vec<Content> {
        self.inner.lock().expect("history poisoned").clone()
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    prompt_count: u64,
    max_turns: i32,
    quota_error_occurred: bool,
    history: Arc<StdMutex<Vec<Content>>>,
    model: String,
    auth: AuthKind,
}

impl Session {
    pub fn new(model: impl Into<String>, auth: AuthKind, max_turns: i32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            prompt_count: 0,
            max_turns,
            quota_error_occurred: false,
            history: Arc::new(StdMutex::new(Vec::new())),
            model: model.into(),
            auth,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    pub fn auth(&self) -> AuthKind {
        self.auth
    }

    pub fn max_turns(&self) -> i32 {
        self.max_turns
    }

    pub fn prompt_count(&self) -> u64 {
        self.prompt_count
    }

    /// Allocate the prompt id for a fresh (non-continuation) submission.
    /// Continuations reuse the id of the submission they extend.
    pub fn next_prompt_id(&mut self) -> String {
        self.prompt_count += 1;
        format!("{}########{}", self.id, self.prompt_count)
    }

    pub fn quota_error_occurred(&self) -> bool {
        self.quota_error_occurred
    }

    pub fn set_quota_error(&mut self, value: bool) {
        self.quota_error_occurred = value;
    }

    pub fn add_history(&mut self, content: Content) {
        self.history.lock().expect("history poisoned").push(content);
    }

    pub fn history(&self) -> Vec<Content> {
        self.history.lock().expect("history poisoned").clone()
    }

    pub fn history_accessor(&self) -> HistoryAccessor {
        HistoryAccessor {
            inner: Arc::clone(&self.history),
        }
    }

    /// Swap in a compressed history. Only the compression path uses this.
    pub fn replace_history(&mut self, history: Vec<Content>) {
        *self.history.lock().expect("history poisoned") = history;
    }

    /// The projection sent on the wire: model turns with no usable parts are
    /// dropped together with the user turn that provoked them.
    pub fn curated_history(&self) -> Vec<Content> {
        curate(&self.history.lock().expect("history poisoned"))
    }
}

fn is_valid_part(part: &Part) -> bool {
    match part {
        Part::Text { text, .. } => !text.is_empty(),
        _ => true,
    }
}

fn is_valid_model_content(content: &Content) -> bool {
    !content.parts.is_empty() && content.parts.iter().all(is_valid_part)
}

fn curate(history: &[Content]) -> Vec<Content> {
    let mut curated: Vec<Content> = Vec::with_capacity(history.len());
    let mut i = 0;
    while i < history.len() {
        if history[i].role != "model" {
            curated.push(history[i].clone());
            i += 1;
            continue;
        }

        // Collect the consecutive run of model outputs for this exchange.
        let mut model_run = Vec::new();
        let mut all_valid = true;
        while i < history.len() && history[i].role == "model" {
            if !is_valid_model_content(&history[i]) {
                all_valid = false;
            }
            model_run.push(history[i].clone());
            i += 1;
        }

        if all_valid {
            curated.extend(model_run);
        } else if matches!(curated.last(), Some(content) if content.role == "user") {
            // The failed send leaves a dangling user turn; drop it too.
            curated.pop();
        }
    }
    curated
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("gemini-2.5-pro", AuthKind::ApiKey, -1)
    }

    #[test]
    fn prompt_ids_are_session_scoped_and_monotone() {
        let mut s = session();
        let first = s.next_prompt_id();
        let second = s.next_prompt_id();
        assert!(first.starts_with(s.id()));
        assert!(first.ends_with("########1"));
        assert!(second.ends_with("########2"));
        assert_eq!(s.prompt_count(), 2);
    }

    #[test]
    fn curated_history_drops_empty_model_turns_and_their_prompt() {
        let mut s = session();
        s.add_history(Content::user_text("hello"));
        s.add_history(Content::model_text("hi"));
        s.add_history(Content::user_text("again"));
        s.add_history(Content {
            role: "model".into(),
            parts: vec![],
        });

        let curated = s.curated_history();
        assert_eq!(curated.len(), 2);
        assert_eq!(curated[0].role, "user");
        assert_eq!(curated[1].role, "model");
        // Raw history is untouched.
        assert_eq!(s.history().len(), 4);
    }

    #[test]
    fn empty_text_part_invalidates_the_model_run() {
        let mut s = session();
        s.add_history(Content::user_text("q"));
        s.add_history(Content {
            role: "model".into(),
            parts: vec![Part::text("")],
        });
        assert!(s.curated_history().is_empty());
    }

    #[test]
    fn valid_history_passes_through_unchanged() {
        let mut s = session();
        s.add_history(Content::user_text("q"));
        s.add_history(Content::model_text("a"));
        assert_eq!(s.curated_history().len(), 2);
    }

    #[test]
    fn accessor_sees_later_appends() {
        let mut s = session();
        let accessor = s.history_accessor();
        assert!(accessor.snapshot().is_empty());
        s.add_history(Content::user_text("q"));
        assert_eq!(accessor.snapshot().len(), 1);
    }
}
