//! Shared plumbing for the data-source tools
//!
//! `ToolFailure` is the structured error every adapter returns; `DataSources` owns the HTTP
//! client, provider settings and the small per-process memo used by Overpass and crime search.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::ProvidersSection;

/// Upstream error bodies are cut to this many characters
pub const ERROR_BODY_LIMIT: usize = 500;
const GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);

/// Structured tool error: a machine code plus free-form details
#[derive(Debug, Clone, Error)]
#[error("{code}")]
pub struct ToolFailure {
    pub code: String,
    pub details: Value,
}

impl ToolFailure {
    pub fn new(code: impl Into<String>, details: Value) -> Self {
        Self {
            code: code.into(),
            details,
        }
    }

    /// `{"status": "error", "error": code, "details": {...}}` as shown to the model
    pub fn payload(&self) -> Value {
        let mut payload = json!({"status": "error", "error": self.code});
        let has_details = self.details.as_object().is_some_and(|m| !m.is_empty());
        if has_details {
            payload["details"] = self.details.clone();
        }
        payload
    }

    pub fn missing_key(tool: &str, env: &str) -> Self {
        Self::new("missing_api_key", json!({"tool": tool, "env": env}))
    }

    /// Transport-level failure (DNS, connect, timeout, decode)
    pub fn transport(code: &str, tool: &str, err: impl std::fmt::Display) -> Self {
        Self::new(code, json!({"tool": tool, "message": err.to_string()}))
    }

    pub fn http(code: &str, tool: &str, status: u16, body: &str) -> Self {
        Self::new(
            code,
            json!({
                "tool": tool,
                "status": status,
                "error_type": classify_http_error(status),
                "body": truncate_chars(body, ERROR_BODY_LIMIT),
            }),
        )
    }

    pub fn status(&self) -> Option<u16> {
        self.details
            .get("status")
            .and_then(Value::as_u64)
            .map(|s| s as u16)
    }
}

pub fn classify_http_error(status: u16) -> &'static str {
    match status {
        401 | 403 => "auth_error",
        429 => "rate_limited",
        400..=499 => "bad_request",
        500.. => "upstream_error",
        _ => "unknown_error",
    }
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

pub fn is_valid_zip(zip: &str) -> bool {
    zip.len() == 5 && zip.bytes().all(|b| b.is_ascii_digit())
}

static ZIP_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\b\d{5}\b").ok());

/// Every standalone 5-digit number in free text, in order, without duplicates
pub fn find_zips(text: &str) -> Vec<String> {
    let Some(re) = ZIP_PATTERN.as_ref() else {
        return Vec::new();
    };
    let mut found: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        let zip = m.as_str().to_string();
        if !found.contains(&zip) {
            found.push(zip);
        }
    }
    found
}

/// JSON parse that tolerates prose around a single object
pub fn parse_json_loose(text: &str) -> Result<Value, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("Empty response".to_string());
    }
    match serde_json::from_str(text) {
        Ok(v) => Ok(v),
        Err(first) => {
            let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
                return Err(first.to_string());
            };
            if end <= start {
                return Err(first.to_string());
            }
            serde_json::from_str(&text[start..=end]).map_err(|e| e.to_string())
        }
    }
}

/// `zip_code` argument, validated
pub fn require_zip(args: &Value, tool: &str) -> Result<String, ToolFailure> {
    let zip = str_arg(args, "zip_code");
    if is_valid_zip(&zip) {
        Ok(zip)
    } else {
        Err(ToolFailure::new(
            "invalid_zip",
            json!({"tool": tool, "zip_code": zip, "message": "zip_code must be a 5-digit string"}),
        ))
    }
}

pub fn str_arg(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Integer argument; numeric strings are accepted, zero counts as absent
pub fn int_arg(args: &Value, key: &str) -> Option<i64> {
    let v = args.get(key)?;
    let n = v
        .as_i64()
        .or_else(|| v.as_f64().map(|f| f as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))?;
    (n != 0).then_some(n)
}

pub fn float_arg(args: &Value, key: &str) -> Option<f64> {
    let v = args.get(key)?;
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Numeric value from a JSON number or numeric string
pub fn as_f64_loose(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

/// ZIP centroid from Zippopotam
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub zip_code: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Shared HTTP client, provider settings and request memo
pub struct DataSources {
    pub(crate) http: Client,
    pub(crate) providers: ProvidersSection,
    memo: Mutex<HashMap<String, Value>>,
}

impl DataSources {
    pub fn new(providers: ProvidersSection) -> Self {
        let http = Client::builder()
            .user_agent(concat!("liveable/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            http,
            providers,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn providers(&self) -> &ProvidersSection {
        &self.providers
    }

    pub(crate) fn memo_get(&self, key: &str) -> Option<Value> {
        self.memo.lock().ok().and_then(|m| m.get(key).cloned())
    }

    pub(crate) fn memo_put(&self, key: String, value: Value) {
        if let Ok(mut m) = self.memo.lock() {
            m.insert(key, value);
        }
    }

    /// Send and return the response only when it is 200; other statuses become `code` failures
    pub(crate) async fn send_ok(
        &self,
        req: RequestBuilder,
        code: &str,
        tool: &str,
    ) -> Result<Response, ToolFailure> {
        let resp = req
            .send()
            .await
            .map_err(|e| ToolFailure::transport(code, tool, e))?;
        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(ToolFailure::http(code, tool, status, &body));
        }
        Ok(resp)
    }

    pub(crate) async fn json_ok(
        &self,
        req: RequestBuilder,
        code: &str,
        tool: &str,
    ) -> Result<Value, ToolFailure> {
        self.send_ok(req, code, tool)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| ToolFailure::transport(code, tool, e))
    }

    /// ZIP → city/state and centroid; the first listed place wins
    pub async fn geocode_zip(&self, zip_code: &str) -> Result<GeoPoint, ToolFailure> {
        let fail = |message: String| {
            ToolFailure::new(
                "geocode_failed",
                json!({"tool": "geocode_zip", "message": message}),
            )
        };
        if !is_valid_zip(zip_code) {
            return Err(fail("zip_code must be a 5-digit string".into()));
        }
        let url = format!(
            "{}/us/{}",
            self.providers.zippopotam_url.trim_end_matches('/'),
            zip_code
        );
        let resp = self
            .http
            .get(url)
            .timeout(GEOCODE_TIMEOUT)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if resp.status().as_u16() != 200 {
            return Err(fail(format!(
                "Geocoding failed with status {}",
                resp.status().as_u16()
            )));
        }
        let data: Value = resp.json().await.map_err(|e| fail(e.to_string()))?;
        let place = data
            .get("places")
            .and_then(Value::as_array)
            .and_then(|p| p.first())
            .ok_or_else(|| fail("No places found for zip code".into()))?;
        let coord = |key: &str| {
            place
                .get(key)
                .and_then(as_f64_loose)
                .ok_or_else(|| fail(format!("Missing {key} for zip code")))
        };
        Ok(GeoPoint {
            zip_code: zip_code.to_string(),
            city: place
                .get("place name")
                .and_then(Value::as_str)
                .map(String::from),
            state: place
                .get("state abbreviation")
                .and_then(Value::as_str)
                .map(String::from),
            latitude: coord("latitude")?,
            longitude: coord("longitude")?,
        })
    }
}
