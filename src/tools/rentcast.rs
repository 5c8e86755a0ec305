//! RentCast market statistics and sale listings

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::tools::shared::{int_arg, require_zip, str_arg, DataSources};
use crate::tools::{Tool, ToolFailure};

const RENTCAST_TIMEOUT: Duration = Duration::from_secs(20);
const LISTING_SUMMARY_LIMIT: usize = 20;
const MARKET_SCALAR_LIMIT: usize = 20;
pub const DEFAULT_LISTING_LIMIT: i64 = 50;

const MARKET_KEYS: [&str; 13] = [
    "medianSalePrice",
    "medianListPrice",
    "medianRent",
    "averageRent",
    "averageSalePrice",
    "pricePerSquareFoot",
    "rentYoY",
    "priceYoY",
    "marketScore",
    "marketTemperature",
    "daysOnMarket",
    "inventory",
    "lastUpdated",
];

const LISTING_KEYS: [&str; 13] = [
    "address",
    "city",
    "state",
    "zipCode",
    "price",
    "listPrice",
    "beds",
    "baths",
    "squareFootage",
    "pricePerSquareFoot",
    "daysOnMarket",
    "propertyType",
    "yearBuilt",
];

fn pick_keys(source: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .filter_map(|k| source.get(*k).filter(|v| !v.is_null()).map(|v| (k.to_string(), v.clone())))
        .collect()
}

/// Whitelisted market keys, else the first scalar values
pub fn summarize_market(market: &Value) -> Value {
    let Some(obj) = market.as_object() else {
        return json!({});
    };
    let picked = pick_keys(obj, &MARKET_KEYS);
    if !picked.is_empty() {
        return Value::Object(picked);
    }
    let scalars: Map<String, Value> = obj
        .iter()
        .filter(|(_, v)| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_)))
        .take(MARKET_SCALAR_LIMIT)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(scalars)
}

/// Whitelisted listing keys; a listing with none of them is kept whole
pub fn summarize_listing(listing: &Value) -> Value {
    match listing.as_object() {
        Some(obj) => {
            let picked = pick_keys(obj, &LISTING_KEYS);
            if picked.is_empty() {
                listing.clone()
            } else {
                Value::Object(picked)
            }
        }
        None => listing.clone(),
    }
}

/// Market object: the nested `market` field when present
pub fn market_object(raw: &Value) -> Value {
    match raw.get("market") {
        Some(inner @ Value::Object(_)) => inner.clone(),
        _ if raw.is_object() => raw.clone(),
        _ => json!({}),
    }
}

/// Listing array from a bare list or a `listings` / `data` wrapper
pub fn listing_items(raw: &Value) -> Vec<Value> {
    let items = match raw {
        Value::Array(items) => Some(items),
        Value::Object(obj) => obj
            .get("listings")
            .and_then(Value::as_array)
            .or_else(|| obj.get("data").and_then(Value::as_array)),
        _ => None,
    };
    items.cloned().unwrap_or_default()
}

impl DataSources {
    fn rentcast_key(&self, tool: &str) -> Result<String, ToolFailure> {
        self.providers
            .rentcast_api_key
            .clone()
            .ok_or_else(|| ToolFailure::missing_key(tool, "RENTCAST_API_KEY"))
    }

    async fn rentcast_get(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        tool: &str,
    ) -> Result<Value, ToolFailure> {
        let key = self.rentcast_key(tool)?;
        let req = self
            .http
            .get(format!(
                "{}{}",
                self.providers.rentcast_url.trim_end_matches('/'),
                endpoint
            ))
            .query(params)
            .header("X-Api-Key", key)
            .header("Accept", "application/json")
            .timeout(RENTCAST_TIMEOUT);
        self.json_ok(req, "rentcast_request_failed", tool).await
    }

    /// Raw `/markets` payload
    pub async fn fetch_rentcast_market(
        &self,
        zip_code: &str,
        data_type: Option<&str>,
        history_months: Option<i64>,
    ) -> Result<Value, ToolFailure> {
        let mut params = vec![("zipCode", zip_code.to_string())];
        if let Some(data_type) = data_type {
            params.push(("dataType", data_type.to_string()));
        }
        if let Some(months) = history_months {
            params.push(("historyRange", months.to_string()));
        }
        self.rentcast_get("/markets", &params, "get_rentcast_market")
            .await
    }

    /// Raw `/listings/sale` payload
    pub async fn fetch_rentcast_sale_listings(
        &self,
        zip_code: &str,
        limit: i64,
    ) -> Result<Value, ToolFailure> {
        self.rentcast_get(
            "/listings/sale",
            &[("zipCode", zip_code.to_string()), ("limit", limit.to_string())],
            "get_rentcast_sale_listings",
        )
        .await
    }

    pub(crate) fn rentcast_source(&self) -> String {
        self.providers.rentcast_url.clone()
    }
}

pub struct RentcastMarketTool {
    sources: Arc<DataSources>,
}

impl RentcastMarketTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for RentcastMarketTool {
    fn name(&self) -> &str {
        "get_rentcast_market"
    }

    fn description(&self) -> &str {
        "Fetch RentCast market statistics for a ZIP code."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "zip_code": {"type": "string"},
                "data_type": {"type": "string", "description": "All, Sale or Rental"},
                "history_months": {"type": "integer"}
            },
            "required": ["zip_code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, self.name())?;
        let data_type = str_arg(&args, "data_type");
        let raw = self
            .sources
            .fetch_rentcast_market(
                &zip,
                (!data_type.is_empty()).then_some(data_type.as_str()),
                int_arg(&args, "history_months"),
            )
            .await?;
        Ok(json!({
            "zip_code": zip,
            "market": summarize_market(&market_object(&raw)),
            "source": self.sources.rentcast_source(),
            "note": "Market payload summarized to avoid oversized responses.",
        }))
    }
}

pub struct RentcastListingsTool {
    sources: Arc<DataSources>,
}

impl RentcastListingsTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for RentcastListingsTool {
    fn name(&self) -> &str {
        "get_rentcast_sale_listings"
    }

    fn description(&self) -> &str {
        "Fetch RentCast sale listings for a ZIP code."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "zip_code": {"type": "string"},
                "limit": {"type": "integer", "default": DEFAULT_LISTING_LIMIT}
            },
            "required": ["zip_code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, self.name())?;
        let limit = int_arg(&args, "limit").unwrap_or(DEFAULT_LISTING_LIMIT);
        let raw = self.sources.fetch_rentcast_sale_listings(&zip, limit).await?;
        let listings: Vec<Value> = listing_items(&raw)
            .iter()
            .take(LISTING_SUMMARY_LIMIT)
            .filter(|item| item.is_object())
            .map(summarize_listing)
            .collect();
        Ok(json!({
            "zip_code": zip,
            "listings": listings,
            "source": self.sources.rentcast_source(),
            "note": "Listings summarized to avoid oversized responses.",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::sources_for;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn market_summary_prefers_whitelist_then_scalars() {
        let whitelisted = summarize_market(&json!({"medianRent": 2400, "history": {"a": 1}, "id": "x"}));
        assert_eq!(whitelisted, json!({"medianRent": 2400}));

        let fallback = summarize_market(&json!({"id": "x", "nested": {"a": 1}, "count": 3}));
        assert_eq!(fallback, json!({"id": "x", "count": 3}));
    }

    #[test]
    fn listings_are_read_from_wrappers() {
        assert_eq!(listing_items(&json!([{"price": 1}])).len(), 1);
        assert_eq!(listing_items(&json!({"data": [{"price": 1}, {"price": 2}]})).len(), 2);
        assert!(listing_items(&json!({"other": 1})).is_empty());
    }

    #[tokio::test]
    async fn market_tool_unwraps_and_summarizes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rentcast/markets"))
            .and(query_param("zipCode", "20001"))
            .and(header("X-Api-Key", "rent-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "market": {"medianRent": 2500, "rentYoY": 3.1, "zipCode": "20001"}
            })))
            .mount(&server)
            .await;

        let tool = RentcastMarketTool::new(Arc::new(sources_for(&server.uri())));
        let out = tool.execute(json!({"zip_code": "20001"})).await.unwrap();
        assert_eq!(out["market"], json!({"medianRent": 2500, "rentYoY": 3.1}));
    }

    #[tokio::test]
    async fn listings_tool_caps_at_twenty() {
        let server = MockServer::start().await;
        let listings: Vec<Value> = (0..30)
            .map(|i| json!({"price": 500000 + i, "id": format!("L{i}"), "beds": 2}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/rentcast/listings/sale"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Array(listings)))
            .mount(&server)
            .await;

        let tool = RentcastListingsTool::new(Arc::new(sources_for(&server.uri())));
        let out = tool.execute(json!({"zip_code": "20001"})).await.unwrap();
        let items = out["listings"].as_array().unwrap();
        assert_eq!(items.len(), 20);
        assert_eq!(items[0], json!({"price": 500000, "beds": 2}));
    }

    #[tokio::test]
    async fn http_failures_carry_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rentcast/markets"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = sources_for(&server.uri())
            .fetch_rentcast_market("20001", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code, "rentcast_request_failed");
        assert_eq!(err.details["error_type"], "rate_limited");
    }
}
