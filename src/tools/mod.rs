//! Tool system: the tools a model may call through tags.

pub mod arguments;
pub mod builtin;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use tool::{AgentTool, CommandRequest, ProposedChange, Tool, ToolAction, ToolContext};
pub use types::AgentToolParameters;
pub use validation::validate_arguments;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Tools available to a turn, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for tool in builtin::all_tools() {
            registry.register(tool);
        }
        registry
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
