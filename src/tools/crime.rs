//! Crime statistics gathered by a hosted browsing agent (Browser Use cloud)
//!
//! A task is created with `POST /run-task` and polled with `GET /task/{id}` until it finishes.
//! Two task prompts are tried in turn, each under its own deadline; the first usable output
//! wins and is memoized per ZIP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::geo_profile::zip_only_schema;
use crate::tools::shared::{parse_json_loose, require_zip, truncate_chars, DataSources};
use crate::tools::{Tool, ToolFailure};

const TOOL: &str = "search_crime_safety";
const UNAVAILABLE: &str = "crime_search_unavailable";
const RAW_OUTPUT_LIMIT: usize = 2000;
const ATTEMPT_DEADLINES: [Duration; 2] = [Duration::from_secs(45), Duration::from_secs(35)];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CrimeStats {
    pub zip_code: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub violent_crime_rate: Option<Value>,
    pub property_crime_rate: Option<Value>,
    pub rate_unit: Option<String>,
    pub comparison_to_national: Option<String>,
    pub year: Option<Value>,
    pub sources: Vec<Value>,
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

fn detailed_task(city: &str, state: &str) -> String {
    format!(
        r#"You are collecting crime statistics for {city}, {state}. Follow these steps:
1) Search for "{city} {state} crime rate per capita" and "{city} {state} crime statistics".
2) Prefer official city/county dashboards and annual reports.
3) Secondary sources: AreaVibes, Macrotrends, reputable local news citing official stats.
4) Avoid: crimegrade.org, bestplaces.net, neighborhoodscout.com.

Return a JSON object ONLY with this schema:
{{
  "violent_crime_rate": number | null,
  "property_crime_rate": number | null,
  "rate_unit": "per 1,000" | "per 100,000" | null,
  "comparison_to_national": string | null,
  "year": number | null,
  "sources": [string],
  "notes": string
}}

If data is only city-level, note that in "notes"."#
    )
}

fn short_task(city: &str, state: &str) -> String {
    format!(
        r#"Find the most recent {city}, {state} crime rate per capita.
Return JSON ONLY with:
{{
  "violent_crime_rate": number | null,
  "property_crime_rate": number | null,
  "rate_unit": "per 1,000" | "per 100,000" | null,
  "year": number | null,
  "sources": [string],
  "notes": string
}}"#
    )
}

fn opt_string(v: &Value) -> Option<String> {
    v.as_str().map(String::from)
}

fn non_null(v: &Value) -> Option<Value> {
    (!v.is_null()).then(|| v.clone())
}

/// Structured stats from the agent output, or nulls plus the raw text when it is not an object
pub fn parse_crime_output(zip_code: &str, city: Option<String>, state: Option<String>, output: &str) -> CrimeStats {
    match parse_json_loose(output) {
        Ok(data @ Value::Object(_)) => CrimeStats {
            zip_code: zip_code.to_string(),
            city,
            state,
            violent_crime_rate: non_null(&data["violent_crime_rate"]),
            property_crime_rate: non_null(&data["property_crime_rate"]),
            rate_unit: opt_string(&data["rate_unit"]),
            comparison_to_national: opt_string(&data["comparison_to_national"]),
            year: non_null(&data["year"]),
            sources: data["sources"].as_array().cloned().unwrap_or_default(),
            note: opt_string(&data["notes"]),
            raw_output: None,
        },
        _ => CrimeStats {
            zip_code: zip_code.to_string(),
            city,
            state,
            note: Some(
                "Browser Use returned unstructured output; unable to parse crime rates.".to_string(),
            ),
            raw_output: Some(truncate_chars(output, RAW_OUTPUT_LIMIT)),
            ..CrimeStats::default()
        },
    }
}

impl DataSources {
    /// Create one browsing task and poll it to completion; returns its output text.
    /// Any non-200 answer from the API ends the task with its HTTP status in the details.
    async fn run_browser_task(&self, task: &str, key: &str) -> Result<String, ToolFailure> {
        let base = self.providers.browser_use_url.trim_end_matches('/');
        let created = self
            .json_ok(
                self.http
                    .post(format!("{base}/run-task"))
                    .bearer_auth(key)
                    .json(&json!({"task": task}))
                    .timeout(REQUEST_TIMEOUT),
                UNAVAILABLE,
                TOOL,
            )
            .await?;
        let id = created["id"]
            .as_str()
            .ok_or_else(|| ToolFailure::transport(UNAVAILABLE, TOOL, "Browser Use returned no task id"))?
            .to_string();

        let poll = Duration::from_millis(self.providers.browser_use_poll_ms);
        loop {
            let status = self
                .json_ok(
                    self.http
                        .get(format!("{base}/task/{id}"))
                        .bearer_auth(key)
                        .timeout(REQUEST_TIMEOUT),
                    UNAVAILABLE,
                    TOOL,
                )
                .await?;
            match status["status"].as_str().unwrap_or("") {
                "finished" => return Ok(status["output"].as_str().unwrap_or("").to_string()),
                state @ ("failed" | "stopped") => {
                    return Err(ToolFailure::transport(
                        UNAVAILABLE,
                        TOOL,
                        format!("Browser Use task {state}"),
                    ))
                }
                _ => tokio::time::sleep(poll).await,
            }
        }
    }

    pub async fn fetch_crime_safety(&self, zip_code: &str) -> Result<CrimeStats, ToolFailure> {
        let memo_key = format!("crime:{zip_code}");
        if let Some(hit) = self
            .memo_get(&memo_key)
            .and_then(|v| serde_json::from_value::<CrimeStats>(v).ok())
        {
            return Ok(hit);
        }
        let key = self
            .providers
            .browser_use_api_key
            .clone()
            .ok_or_else(|| ToolFailure::missing_key(TOOL, "BROWSER_USE_API_KEY"))?;
        let geo = self.geocode_zip(zip_code).await?;
        let city = geo.city.clone().unwrap_or_default();
        let state = geo.state.clone().unwrap_or_default();

        let tasks = [detailed_task(&city, &state), short_task(&city, &state)];
        let mut last_error = None;
        for (task, deadline) in tasks.iter().zip(ATTEMPT_DEADLINES) {
            let output = match tokio::time::timeout(deadline, self.run_browser_task(task, &key)).await {
                Err(_) => {
                    last_error = Some("Browser Use timed out".to_string());
                    continue;
                }
                // an HTTP error will not clear up for the second task
                Ok(Err(failure)) if failure.status().is_some() => {
                    tracing::warn!(zip = %zip_code, details = %failure.details, "browser use request rejected");
                    return Err(failure);
                }
                Ok(Err(failure)) => {
                    tracing::warn!(zip = %zip_code, details = %failure.details, "browser task failed");
                    last_error = failure.details["message"].as_str().map(String::from);
                    continue;
                }
                Ok(Ok(output)) if output.trim().is_empty() => {
                    last_error = Some("Empty output from Browser Use".to_string());
                    continue;
                }
                Ok(Ok(output)) => output,
            };
            let stats = parse_crime_output(zip_code, geo.city.clone(), geo.state.clone(), &output);
            if let Ok(value) = serde_json::to_value(&stats) {
                self.memo_put(memo_key, value);
            }
            return Ok(stats);
        }

        Err(ToolFailure::new(
            "crime_search_timeout",
            json!({"tool": TOOL, "message": last_error.unwrap_or_else(|| "No results".to_string())}),
        ))
    }
}

pub struct CrimeSafetyTool {
    sources: Arc<DataSources>,
}

impl CrimeSafetyTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for CrimeSafetyTool {
    fn name(&self) -> &str {
        TOOL
    }

    fn description(&self) -> &str {
        "Search for crime statistics via a hosted browsing agent and return structured summaries."
    }

    fn parameters_schema(&self) -> Value {
        zip_only_schema()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, TOOL)?;
        let stats = self.sources.fetch_crime_safety(&zip).await?;
        serde_json::to_value(stats).map_err(|e| ToolFailure::transport("crime_search_failed", TOOL, e))
    }
}
