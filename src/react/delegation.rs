//! Focused analysts reachable through the `delegate` pseudo-tool

use serde_json::Value;

/// Name of the pseudo-tool the model calls to hand work to an analyst
pub const DELEGATE_TOOL: &str = "delegate";

#[derive(Debug, Clone)]
pub struct Analyst {
    pub name: String,
    pub description: String,
    /// Role text placed before the tool list in the nested loop's system prompt
    pub prompt: String,
    /// Tools the analyst may call; empty means every registered tool
    pub tools: Vec<String>,
}

impl Analyst {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        prompt: impl Into<String>,
        tools: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            prompt: prompt.into(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn allowed_tools(&self) -> Option<&[String]> {
        if self.tools.is_empty() {
            None
        } else {
            Some(&self.tools)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DelegateRequest {
    pub analyst: String,
    pub task: String,
}

/// Accepts `analyst`, `subagent_type` or `agent` for the name and `task`, `prompt` or
/// `description` for the work item. Trailing `-analyst` / `-purpose` suffixes are ignored.
pub fn parse_delegate_args(args: &Value) -> Option<DelegateRequest> {
    let pick = |keys: &[&str]| {
        keys.iter()
            .filter_map(|k| args.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    };
    let analyst = pick(&["analyst", "subagent_type", "agent"])?;
    let task = pick(&["task", "prompt", "description"])?;
    let analyst = analyst
        .to_lowercase()
        .trim_end_matches("-analyst")
        .trim_end_matches("_analyst")
        .trim_end_matches("-purpose")
        .to_string();
    Some(DelegateRequest { analyst, task })
}

pub fn find_analyst<'a>(roster: &'a [Analyst], name: &str) -> Option<&'a Analyst> {
    roster.iter().find(|a| a.name == name)
}

/// Sorted analyst names, used when a delegation is denied
pub fn allowed_names(roster: &[Analyst]) -> Vec<String> {
    let mut names: Vec<String> = roster.iter().map(|a| a.name.clone()).collect();
    names.sort();
    names
}
