//! Housing price roll-up: RentCast listings and market, HUD FMR for rent when needed

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::rentcast::{listing_items, market_object, DEFAULT_LISTING_LIMIT};
use crate::tools::shared::{as_f64_loose, int_arg, require_zip, DataSources};
use crate::tools::{Tool, ToolFailure};

const TOOL: &str = "search_housing_prices";
const PRICE_KEYS: [&str; 4] = ["listPrice", "price", "listingPrice", "list_price"];
const PPSF_KEYS: [&str; 3] = ["pricePerSquareFoot", "price_per_sqft", "pricePerSqft"];
const RENT_KEYS: [&str; 4] = ["medianRent", "medianRentPrice", "averageRent", "averageRentPrice"];
const NESTED_RENT_KEYS: [&str; 3] = ["median", "average", "medianRent"];
const YOY_KEYS: [&str; 3] = ["rentYoY", "priceYoY", "yoyChange"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HousingPrices {
    pub zip_code: String,
    pub median_home_price: Option<f64>,
    pub median_rent: Option<Value>,
    pub yoy_change: Option<Value>,
    pub price_per_sqft: Option<f64>,
    pub source: String,
    pub note: String,
}

pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// First non-null value among `keys`
fn pick_first(obj: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
        .cloned()
}

/// First numeric value among `keys`; empty strings and non-numbers are skipped
fn first_number(obj: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(as_f64_loose)
}

impl DataSources {
    pub async fn fetch_housing_prices(
        &self,
        zip_code: &str,
        year: Option<i32>,
    ) -> Result<HousingPrices, ToolFailure> {
        let market = match self.fetch_rentcast_market(zip_code, None, None).await {
            Ok(raw) => Some(market_object(&raw)),
            Err(e) => {
                tracing::debug!(zip = %zip_code, error = %e, "rentcast market unavailable");
                None
            }
        };
        let listings = match self
            .fetch_rentcast_sale_listings(zip_code, DEFAULT_LISTING_LIMIT)
            .await
        {
            Ok(raw) => listing_items(&raw),
            Err(e) => {
                tracing::debug!(zip = %zip_code, error = %e, "rentcast listings unavailable");
                Vec::new()
            }
        };

        let mut sources: BTreeSet<String> = BTreeSet::new();
        let median_home_price = median(listings.iter().filter_map(|l| first_number(l, &PRICE_KEYS)).collect());
        let price_per_sqft = median(listings.iter().filter_map(|l| first_number(l, &PPSF_KEYS)).collect());
        if median_home_price.is_some_and(|p| p != 0.0) || price_per_sqft.is_some_and(|p| p != 0.0) {
            sources.insert("RentCast listings".to_string());
        }

        let mut median_rent = None;
        let mut yoy_change = None;
        if let Some(market) = market.as_ref() {
            median_rent = pick_first(market, &RENT_KEYS).or_else(|| {
                market
                    .get("rent")
                    .filter(|r| r.is_object())
                    .and_then(|r| pick_first(r, &NESTED_RENT_KEYS))
            });
            yoy_change = pick_first(market, &YOY_KEYS);
            sources.insert("RentCast market".to_string());
        }

        if median_rent.is_none() {
            let hud = self.fetch_hud_fmr(zip_code, year).await.map_err(|e| {
                ToolFailure::new(
                    "housing_data_unavailable",
                    json!({"tool": TOOL, "details": e.payload()}),
                )
            })?;
            median_rent = hud.fmr.fmr_2br.or(hud.fmr.fmr_1br).map(Value::from);
            sources.insert(hud.source);
        }

        let source = if sources.is_empty() {
            "HUD FMR API".to_string()
        } else {
            sources.into_iter().collect::<Vec<_>>().join(", ")
        };
        Ok(HousingPrices {
            zip_code: zip_code.to_string(),
            median_home_price,
            median_rent,
            yoy_change,
            price_per_sqft,
            source,
            note: "Home price data uses listings where available; rent uses RentCast or HUD FMR."
                .to_string(),
        })
    }
}

pub struct HousingPricesTool {
    sources: Arc<DataSources>,
}

impl HousingPricesTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for HousingPricesTool {
    fn name(&self) -> &str {
        TOOL
    }

    fn description(&self) -> &str {
        "Return median home price, price per sqft, and rent benchmarks (RentCast, HUD FMR fallback)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "zip_code": {"type": "string"},
                "year": {"type": "integer"}
            },
            "required": ["zip_code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, TOOL)?;
        let year = int_arg(&args, "year").map(|y| y as i32);
        let out = self.sources.fetch_housing_prices(&zip, year).await?;
        serde_json::to_value(out)
            .map_err(|e| ToolFailure::transport("housing_data_unavailable", TOOL, e))
    }
}
