use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{Result, ScoutError};
use super::service::ToolSchema;

/// A capability the reasoning service may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the tool input.
    fn parameters(&self) -> Value;

    /// Terminal tools exist only so the service returns a schema-shaped
    /// answer. Their input is the task result; they are never executed.
    fn is_terminal(&self) -> bool {
        false
    }

    async fn execute(&self, args: &Value) -> Result<Value>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters(),
        }
    }
}

/// Error every terminal tool returns from `execute`.
pub fn terminal_execution(name: &str) -> ScoutError {
    ScoutError::TerminalToolExecuted(name.to_string())
}

/// The tools offered for one task, in the order they are declared.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    pub fn with_shared(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Names are unique; a second tool with the same name replaces the first.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Some(slot) = self.tools.iter_mut().find(|t| t.name() == name) {
            warn!("Replacing tool {}", name);
            *slot = tool;
        } else {
            info!("Registering tool: {}", name);
            self.tools.push(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
