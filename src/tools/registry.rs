//! Tool registry
//!
//! Every tool implements Tool (name / description / parameters_schema / execute). ToolRegistry
//! stores them by name; ToolExecutor adds the timeout, ledger bookkeeping and error mapping.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::ToolFailure;

#[async_trait]
pub trait Tool: Send + Sync {
    /// Name used in the `"tool"` field of a call
    fn name(&self) -> &str;

    /// One-line description for the model
    fn description(&self) -> &str;

    /// JSON Schema of `args`
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure>;
}

/// Name-ordered tool table
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolFailure> {
        let tool = self.tools.get(name).ok_or_else(|| {
            ToolFailure::new("unknown_tool", serde_json::json!({ "tool": name }))
        })?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schema JSON for the given tools (all when `only` is None), injected into the system prompt
    pub fn to_schema_json(&self, only: Option<&[String]>) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .filter(|(name, _)| only.map_or(true, |allowed| allowed.iter().any(|a| a == *name)))
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
