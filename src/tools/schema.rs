//! Tool-call JSON Schema (generated with schemars)
//!
//! Injected into the system prompt so the model emits well-formed calls.

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// Shape of a call as parsed by the planner: `{"tool": "...", "args": {...}}` (schema only)
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// Tool name, e.g. geocode_zip, get_census_demographics, delegate
    pub tool: String,
    /// Tool arguments; see each tool's parameter schema
    pub args: serde_json::Map<String, Value>,
}

pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
