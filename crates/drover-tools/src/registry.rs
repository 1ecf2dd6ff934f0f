use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use drover_core::config::ToolsConfig;
use drover_core::error::{DroverError, Result};
use drover_core::traits::Tool;
use drover_core::types::ToolDefinition;

/// Registry of tools the decision pipeline may call.
///
/// Names are matched case-insensitively after trimming, since they come
/// back from model output.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

fn lookup_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(lookup_key(tool.name()), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(&lookup_key(name)).cloned()
    }

    /// List all registered tool names.
    pub fn list(&self) -> Vec<&str> {
        self.tools.values().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of the tools serving `intent`, for offering to the model.
    pub fn definitions_for_intent(&self, intent: &str) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|t| t.intents().is_empty() || t.intents().contains(&intent))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                required_params: t.required_params().iter().map(|p| p.to_string()).collect(),
            })
            .collect()
    }

    /// Execute a tool by name after checking its required params.
    pub async fn execute(&self, name: &str, params: Map<String, Value>) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| DroverError::ToolNotFound(name.trim().to_string()))?;

        let missing: Vec<String> = tool
            .required_params()
            .iter()
            .filter(|p| !params.contains_key(**p))
            .map(|p| p.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(DroverError::MissingToolParams {
                tool: tool.name().to_string(),
                missing,
            });
        }

        let timeout = Duration::from_secs(tool.timeout_secs());
        match tokio::time::timeout(timeout, tool.execute(params)).await {
            Ok(result) => result,
            Err(_) => Err(DroverError::ToolExecution {
                tool: tool.name().to_string(),
                message: format!("timed out after {}s", tool.timeout_secs()),
            }),
        }
    }

    /// Execute a tool, logging any failure and yielding an empty string
    /// instead of an error.
    pub async fn call(&self, name: &str, params: Map<String, Value>) -> String {
        match self.execute(name, params).await {
            Ok(output) => {
                info!(tool = %name.trim(), chars = output.len(), "Tool call succeeded");
                output
            }
            Err(e @ DroverError::ToolNotFound(_)) | Err(e @ DroverError::MissingToolParams { .. }) => {
                warn!(tool = %name.trim(), error = %e, "Tool call rejected");
                String::new()
            }
            Err(e) => {
                error!(tool = %name.trim(), error = %e, "Tool call failed");
                String::new()
            }
        }
    }

    /// Create a registry with the built-in tools registered.
    pub fn with_builtins(config: &ToolsConfig) -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::coupon::UnusedCouponsTool::from_config(config));
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
