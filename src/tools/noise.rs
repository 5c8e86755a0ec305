//! Noise-risk proxies: counts of street furniture and transport infrastructure near a ZIP

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;

use crate::tools::overpass::extract_count;
use crate::tools::shared::{int_arg, require_zip, DataSources};
use crate::tools::{Tool, ToolFailure};

const TOOL: &str = "search_noise_proxies";
pub const DEFAULT_NOISE_RADIUS: i64 = 500;
const COUNT_TIMEOUT: Duration = Duration::from_secs(12);
const MAX_IN_FLIGHT: usize = 3;

/// (name, OSM key, value, value is a regex)
pub static PROXY_TAGS: [(&str, &str, &str, bool); 7] = [
    ("street_lights", "highway", "street_lamp", false),
    ("surveillance", "man_made", "surveillance", false),
    ("benches", "amenity", "bench", false),
    ("post_boxes", "amenity", "post_box", false),
    ("airports", "aeroway", "aerodrome|runway", true),
    ("rail", "railway", "rail", false),
    ("major_roads", "highway", "motorway|trunk|primary", true),
];

pub fn proxy_count_query(lat: f64, lon: f64, radius: i64, key: &str, value: &str, regex: bool) -> String {
    let op = if regex { "~" } else { "=" };
    let around = format!("(around:{radius},{lat},{lon})");
    format!(
        "[out:json][timeout:10];(node[{key}{op}\"{value}\"]{around};way[{key}{op}\"{value}\"]{around};relation[{key}{op}\"{value}\"]{around};);out count;"
    )
}

impl DataSources {
    pub async fn fetch_noise_proxies(&self, zip_code: &str, radius_meters: i64) -> Result<Value, ToolFailure> {
        let key = format!("noise:{zip_code}:{radius_meters}");
        if let Some(hit) = self.memo_get(&key) {
            return Ok(hit);
        }
        let geo = self.geocode_zip(zip_code).await?;
        let (lat, lon) = (geo.latitude, geo.longitude);

        let permits = Semaphore::new(MAX_IN_FLIGHT);
        let lookups = PROXY_TAGS.iter().map(|(name, osm_key, value, regex)| {
            let permits = &permits;
            async move {
                let _permit = permits.acquire().await.ok();
                let query = proxy_count_query(lat, lon, radius_meters, osm_key, value, *regex);
                let count = match self.overpass_query(&query, TOOL, COUNT_TIMEOUT).await {
                    Ok(data) => Some(extract_count(&data)),
                    Err(e) => {
                        tracing::debug!(proxy = %name, error = %e, "noise proxy count failed");
                        None
                    }
                };
                (*name, count)
            }
        });
        let counts = join_all(lookups).await;

        let errors: Vec<&str> = counts
            .iter()
            .filter(|(_, count)| count.is_none())
            .map(|(name, _)| *name)
            .collect();
        let proxy_counts: Map<String, Value> = counts
            .iter()
            .map(|(name, count)| (name.to_string(), json!(count)))
            .collect();

        let result = json!({
            "zip_code": zip_code,
            "radius_meters": radius_meters,
            "center": {"latitude": lat, "longitude": lon},
            "proxy_counts": proxy_counts,
            "errors": (!errors.is_empty()).then_some(errors),
            "source": self.providers.overpass_endpoint(),
            "note": "Proxy counts for neighborhood infrastructure and transport noise signals.",
        });
        self.memo_put(key, result.clone());
        Ok(result)
    }
}

pub struct NoiseProxiesTool {
    sources: Arc<DataSources>,
}

impl NoiseProxiesTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for NoiseProxiesTool {
    fn name(&self) -> &str {
        TOOL
    }

    fn description(&self) -> &str {
        "Assess noise risk proxies (airports, rail, major roads) using Overpass API."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "zip_code": {"type": "string"},
                "radius_meters": {"type": "integer", "default": DEFAULT_NOISE_RADIUS}
            },
            "required": ["zip_code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, TOOL)?;
        let radius = int_arg(&args, "radius_meters").unwrap_or(DEFAULT_NOISE_RADIUS);
        self.sources.fetch_noise_proxies(&zip, radius).await
    }
}
