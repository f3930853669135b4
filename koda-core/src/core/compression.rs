//! History compression: when curated history approaches the context window,
//! older turns are folded into a model-written summary and the tail is kept
//! verbatim.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{debug, info};

use crate::config::constants::defaults;
use crate::gemini::{Content, CountTokensRequest, GenerateContentRequest, SystemInstruction};
use crate::llm::provider::{ContentGenerator, estimate_tokens};

const SUMMARY_PROMPT: &str = "Summarize the conversation so far for your own future reference. \
Capture the user's goals, decisions made, files touched, and any unfinished work. Be dense and \
factual; the summary replaces the original messages.";

const SUMMARY_ACK: &str = "Got it. I have the summary and will continue from there.";

#[derive(Debug, Clone, Copy)]
pub struct CompressionConfig {
    /// Fraction of the context window that triggers compression.
    pub token_threshold: f64,
    /// Fraction of trailing history preserved verbatim.
    pub preserve_fraction: f64,
    pub context_window_tokens: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            token_threshold: defaults::COMPRESSION_TOKEN_THRESHOLD,
            preserve_fraction: defaults::COMPRESSION_PRESERVE_FRACTION,
            context_window_tokens: crate::config::constants::models::DEFAULT_CONTEXT_WINDOW_TOKENS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub old_tokens: u64,
    pub new_tokens: u64,
    pub history: Vec<Content>,
}

pub struct Compressor {
    generator: Arc<dyn ContentGenerator>,
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(generator: Arc<dyn ContentGenerator>, config: CompressionConfig) -> Self {
        Self { generator, config }
    }

    /// Compress if the history is over threshold; `None` means nothing to do.
    pub async fn maybe_compress(
        &self,
        history: &[Content],
        prompt_id: &str,
    ) -> Result<Option<CompressionOutcome>> {
        if history.len() < 4 {
            return Ok(None);
        }

        let old_tokens = self.count_tokens(history).await;
        let threshold =
            (self.config.context_window_tokens as f64 * self.config.token_threshold) as u64;
        if old_tokens < threshold {
            debug!(old_tokens, threshold, "history under compression threshold");
            return Ok(None);
        }

        let split = split_index(history, self.config.preserve_fraction);
        let (head, tail) = history.split_at(split);
        if head.is_empty() {
            return Ok(None);
        }

        info!(old_tokens, dropped_turns = head.len(), "compressing history");
        let summary = self.summarize(head, prompt_id).await?;

        let mut compressed = vec![
            Content::user_text(format!("Context summary of the earlier conversation:\n{summary}")),
            Content::model_text(SUMMARY_ACK),
        ];
        compressed.extend_from_slice(tail);

        let new_tokens = self.count_tokens(&compressed).await;
        Ok(Some(CompressionOutcome {
            old_tokens,
            new_tokens,
            history: compressed,
        }))
    }

    async fn count_tokens(&self, history: &[Content]) -> u64 {
        let request = CountTokensRequest {
            contents: history.to_vec(),
        };
        match self.generator.count_tokens(request).await {
            Ok(count) => count,
            // Counting must never block compression; fall back to the
            // estimate.
            Err(_) => history
                .iter()
                .flat_map(|c| &c.parts)
                .filter_map(|p| p.as_text())
                .map(estimate_tokens)
                .sum(),
        }
    }

    async fn summarize(&self, head: &[Content], prompt_id: &str) -> Result<String> {
        let mut contents = head.to_vec();
        contents.push(Content::user_text(SUMMARY_PROMPT));

        let mut request = GenerateContentRequest::new(contents);
        request.system_instruction = Some(SystemInstruction::Text(
            "You compress conversations into dense state summaries.".to_string(),
        ));

        let response = self
            .generator
            .generate(request, prompt_id)
            .await
            .context("summarization request failed")?;
        response
            .text()
            .context("summarization response had no text")
    }
}

/// First index of the preserved tail: the last `preserve_fraction` of the
/// history, moved forward to a user-turn boundary so the tail never opens
/// with a dangling model reply.
fn split_index(history: &[Content], preserve_fraction: f64) -> usize {
    let keep = ((history.len() as f64) * preserve_fraction).ceil() as usize;
    let mut idx = history.len().saturating_sub(keep.max(2));
    while idx < history.len() && history[idx].role != "user" {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(n: usize) -> Vec<Content> {
        let mut history = Vec::new();
        for i in 0..n {
            history.push(Content::user_text(format!("question {i}")));
            history.push(Content::model_text(format!("answer {i}")));
        }
        history
    }

    #[test]
    fn split_lands_on_a_user_turn() {
        let history = exchange(10);
        let idx = split_index(&history, 0.3);
        assert!(idx < history.len());
        assert_eq!(history[idx].role, "user");
    }

    #[test]
    fn split_preserves_a_tail() {
        let history = exchange(10);
        let idx = split_index(&history, 0.3);
        assert!(history.len() - idx >= 2);
        assert!(idx > 0);
    }
}
