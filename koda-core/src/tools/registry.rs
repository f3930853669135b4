//! Name → tool mapping. Built-ins are registered at construction; MCP
//! discovery appends afterwards, and the registry is effectively read-only
//! once discovery completes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::gemini::{FunctionDeclaration, Tool as ToolDeclarations};

use super::Tool;
use super::file_ops::{ReadFileTool, ReplaceTool, WriteFileTool};
use super::memory::MemoryTool;
use super::search::GrepTool;
use super::shell::ShellTool;

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in workspace tools.
    pub fn with_builtins(workspace: &Path) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(ReadFileTool::new(workspace)));
        registry.register(Arc::new(WriteFileTool::new(workspace)));
        registry.register(Arc::new(ReplaceTool::new(workspace)));
        registry.register(Arc::new(ShellTool::new(workspace)));
        registry.register(Arc::new(GrepTool::new(workspace)));
        registry.register(Arc::new(MemoryTool::new()));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = tool.name(), "registering tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn register_unique(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        if self.tools.contains_key(tool.name()) {
            return Err(anyhow!("tool '{}' is already registered", tool.name()));
        }
        self.register(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations advertised to the model, in stable (sorted) order.
    pub fn function_declarations(&self) -> Vec<FunctionDeclaration> {
        self.names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.declaration())
            .collect()
    }

    /// The declarations wrapped the way requests carry them.
    pub fn as_request_tools(&self) -> Vec<ToolDeclarations> {
        let declarations = self.function_declarations();
        if declarations.is_empty() {
            Vec::new()
        } else {
            vec![ToolDeclarations {
                function_declarations: declarations,
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::tools as tool_names;

    #[test]
    fn builtins_are_registered() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::with_builtins(dir.path());
        for name in [
            tool_names::READ_FILE,
            tool_names::WRITE_FILE,
            tool_names::REPLACE,
            tool_names::SHELL,
            tool_names::GREP,
            tool_names::MEMORY,
        ] {
            assert!(registry.get(name).is_some(), "missing builtin {name}");
        }
        assert_eq!(registry.function_declarations().len(), registry.len());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ToolRegistry::with_builtins(dir.path());
        let dup = Arc::new(MemoryTool::new());
        assert!(registry.register_unique(dup).is_err());
    }

    #[test]
    fn empty_registry_advertises_no_tools() {
        let registry = ToolRegistry::empty();
        assert!(registry.as_request_tools().is_empty());
    }
}
