//! System prompt assembly.

use std::path::Path;

const BASE_PROMPT: &str = "\
You are koda, a coding agent that lives in the user's terminal. You help with \
software engineering tasks in the current workspace: reading and editing \
files, running commands, and searching code.

Guidelines:
- Prefer tools over guessing. Read files before editing them.
- Make minimal, focused changes; match the existing style of the codebase.
- When a command or edit could be destructive, explain what it does.
- Keep answers concise. Do not restate file contents you just wrote.";

/// Build the system prompt, folding in saved memories when present.
pub fn system_prompt(workspace: &Path) -> String {
    let mut prompt = format!(
        "{BASE_PROMPT}\n\nWorkspace root: {}",
        workspace.display()
    );

    let memory_path = crate::config::paths::app_dir().join("KODA.md");
    if let Ok(memories) = std::fs::read_to_string(&memory_path) {
        let trimmed = memories.trim();
        if !trimmed.is_empty() {
            prompt.push_str("\n\nSaved memories from previous sessions:\n");
            prompt.push_str(trimmed);
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_the_workspace() {
        let prompt = system_prompt(Path::new("/tmp/project"));
        assert!(prompt.contains("/tmp/project"));
        assert!(prompt.contains("koda"));
    }
}
