//! HUD Fair Market Rents by county, with prior-year and state-level fallbacks

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::shared::{as_f64_loose, int_arg, require_zip, DataSources};
use crate::tools::{Tool, ToolFailure};

const TOOL: &str = "get_hud_fmr";
const HUD_TIMEOUT: Duration = Duration::from_secs(20);
const PAYLOAD_NOTE: &str = "Raw HUD payload omitted to avoid oversized tool output.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FmrRents {
    pub fmr_0br: Option<i64>,
    pub fmr_1br: Option<i64>,
    pub fmr_2br: Option<i64>,
    pub fmr_3br: Option<i64>,
    pub fmr_4br: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HudFmr {
    pub zip_code: String,
    pub county_fips: Option<String>,
    pub state_fips: Option<String>,
    pub year: i32,
    pub fmr: FmrRents,
    pub source: String,
    pub note: String,
}

/// Two-digit state plus three-digit county plus the `99999` suffix HUD expects
pub fn entity_id(state_fips: Option<&str>, county_fips: Option<&str>) -> Option<String> {
    let (state, county) = (state_fips?, county_fips?);
    (state.len() == 2 && county.len() == 3).then(|| format!("{state}{county}99999"))
}

/// `basicdata` may sit at the top level or under `data`, as an object or a one-element list
fn extract_fmr(payload: &Value) -> FmrRents {
    let basic = payload
        .get("basicdata")
        .or_else(|| payload.get("data").and_then(|d| d.get("basicdata")));
    let basic = match basic {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };
    let get = |key: &str| {
        basic
            .and_then(|b| b.get(key))
            .and_then(as_f64_loose)
            .map(|v| v as i64)
    };
    FmrRents {
        fmr_0br: get("fmr0"),
        fmr_1br: get("fmr1"),
        fmr_2br: get("fmr2"),
        fmr_3br: get("fmr3"),
        fmr_4br: get("fmr4"),
    }
}

pub fn default_fmr_year() -> i32 {
    Utc::now().year() - 1
}

impl DataSources {
    async fn hud_get(&self, url: String, year: i32, key: &str) -> Result<Response, ToolFailure> {
        self.http
            .get(url)
            .query(&[("year", year)])
            .bearer_auth(key)
            .timeout(HUD_TIMEOUT)
            .send()
            .await
            .map_err(|e| ToolFailure::transport("hud_fmr_request_failed", TOOL, e))
    }

    pub async fn fetch_hud_fmr(&self, zip_code: &str, year: Option<i32>) -> Result<HudFmr, ToolFailure> {
        let key = self
            .providers
            .hud_api_key
            .clone()
            .ok_or_else(|| ToolFailure::missing_key(TOOL, "HUD_API_KEY"))?;

        let profile = self.resolve_geo_profile(zip_code).await.ok();
        let county = profile.as_ref().and_then(|p| p.county_fips.clone());
        let state_fips = profile.as_ref().and_then(|p| p.state_fips.clone());
        let Some(entity) = entity_id(state_fips.as_deref(), county.as_deref()) else {
            return Err(ToolFailure::new(
                "missing_county_fips",
                json!({"tool": TOOL, "zip_code": zip_code}),
            ));
        };

        let base = self.providers.hud_url.trim_end_matches('/').to_string();
        let done = |year: i32, fmr: FmrRents, source: &str| HudFmr {
            zip_code: zip_code.to_string(),
            county_fips: county.clone(),
            state_fips: state_fips.clone(),
            year,
            fmr,
            source: source.to_string(),
            note: PAYLOAD_NOTE.to_string(),
        };

        let mut year = year.unwrap_or_else(default_fmr_year);
        let county_url = format!("{base}/data/{entity}");
        let resp = self.hud_get(county_url.clone(), year, &key).await?;
        let status = resp.status().as_u16();
        if status == 200 {
            let data: Value = resp.json().await.unwrap_or(Value::Null);
            return Ok(done(year, extract_fmr(&data), "HUD FMR API"));
        }
        let mut failed_body = resp.text().await.unwrap_or_default();
        let mut failed_status = status;

        if matches!(status, 400 | 404) {
            year -= 1;
            tracing::debug!(zip = %zip_code, year, "retrying HUD FMR with previous year");
            let retry = self.hud_get(county_url, year, &key).await?;
            if retry.status().as_u16() == 200 {
                let data: Value = retry.json().await.unwrap_or(Value::Null);
                return Ok(done(year, extract_fmr(&data), "HUD FMR API"));
            }
            failed_status = retry.status().as_u16();
            failed_body = retry.text().await.unwrap_or_default();
        }

        if let Some(state) = profile.as_ref().and_then(|p| p.state.clone()) {
            let fallback = self
                .hud_get(format!("{base}/statedata/{state}"), year, &key)
                .await?;
            if fallback.status().as_u16() == 200 {
                let data: Value = fallback.json().await.unwrap_or(Value::Null);
                return Ok(done(
                    year,
                    extract_fmr(&data),
                    "HUD FMR API (state-level fallback)",
                ));
            }
        }

        Err(ToolFailure::http(
            "hud_fmr_request_failed",
            TOOL,
            failed_status,
            &failed_body,
        ))
    }
}

pub struct HudFmrTool {
    sources: Arc<DataSources>,
}

impl HudFmrTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for HudFmrTool {
    fn name(&self) -> &str {
        TOOL
    }

    fn description(&self) -> &str {
        "Fetch HUD Fair Market Rent data for a ZIP code (via county FIPS)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "zip_code": {"type": "string"},
                "year": {"type": "integer", "description": "FMR year; defaults to last year"}
            },
            "required": ["zip_code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, TOOL)?;
        let year = int_arg(&args, "year").map(|y| y as i32);
        let out = self.sources.fetch_hud_fmr(&zip, year).await?;
        serde_json::to_value(out).map_err(|e| ToolFailure::transport("hud_fmr_request_failed", TOOL, e))
    }
}
