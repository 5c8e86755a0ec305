//! Development / permit records from a configured Socrata or ArcGIS endpoint

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::shared::{require_zip, str_arg, truncate_chars, DataSources, ERROR_BODY_LIMIT};
use crate::tools::{Tool, ToolFailure};

const TOOL: &str = "search_new_developments";
const PERMITS_TIMEOUT: Duration = Duration::from_secs(20);
const RECORD_LIMIT: usize = 10;

/// First truthy value among `keys` (non-empty string, non-zero number, true, non-empty container)
fn field(item: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find(|v| match v {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => n.as_f64() != Some(0.0),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        })
        .cloned()
}

pub fn map_record(item: &Value) -> Value {
    json!({
        "name": field(item, &["project_name", "name", "description"]).unwrap_or_else(|| json!("Unknown")),
        "type": field(item, &["permit_type", "type", "category"]),
        "status": field(item, &["status", "permit_status"]),
        "estimated_completion": field(item, &["completion_date", "estimated_completion"]),
        "description": field(item, &["description", "details", "scope"]),
        "address": field(item, &["address", "location", "site_address"]),
    })
}

pub fn render_where(template: &str, zip_code: &str, city: &str) -> String {
    template
        .replace("{zip_code}", zip_code)
        .replace("{city}", city)
}

impl DataSources {
    pub async fn fetch_new_developments(&self, zip_code: &str, city: &str) -> Result<Value, ToolFailure> {
        let Some(base_url) = self.providers.permits_base_url.clone() else {
            return Err(ToolFailure::new(
                "developments_not_configured",
                json!({
                    "tool": TOOL,
                    "message": "Set DEV_PERMITS_BASE_URL to a Socrata/ArcGIS open data endpoint.",
                }),
            ));
        };
        let mut params = vec![("$limit", RECORD_LIMIT.to_string())];
        if let Some(template) = self.providers.permits_query.as_deref() {
            params.push(("$where", render_where(template, zip_code, city)));
        }

        let resp = self
            .http
            .get(&base_url)
            .query(&params)
            .timeout(PERMITS_TIMEOUT)
            .send()
            .await
            .map_err(|e| ToolFailure::transport("developments_request_failed", TOOL, e))?;
        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(ToolFailure::new(
                "developments_request_failed",
                json!({"tool": TOOL, "status": status, "body": truncate_chars(&body, ERROR_BODY_LIMIT)}),
            ));
        }
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ToolFailure::transport("developments_invalid_response", TOOL, e))?;
        let Some(records) = data.as_array() else {
            return Err(ToolFailure::new(
                "developments_invalid_response",
                json!({"tool": TOOL}),
            ));
        };
        let developments: Vec<Value> = records.iter().take(RECORD_LIMIT).map(map_record).collect();
        Ok(json!({
            "zip_code": zip_code,
            "city": (!city.is_empty()).then_some(city),
            "developments": developments,
            "trend_summary": null,
            "source": base_url,
        }))
    }
}

pub struct NewDevelopmentsTool {
    sources: Arc<DataSources>,
}

impl NewDevelopmentsTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for NewDevelopmentsTool {
    fn name(&self) -> &str {
        TOOL
    }

    fn description(&self) -> &str {
        "Fetch development/permit records from a configured open data endpoint."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "zip_code": {"type": "string"},
                "city": {"type": "string"}
            },
            "required": ["zip_code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, TOOL)?;
        self.sources
            .fetch_new_developments(&zip, &str_arg(&args, "city"))
            .await
    }
}
