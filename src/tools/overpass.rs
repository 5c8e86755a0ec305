//! OpenStreetMap amenity counts through the Overpass API
//!
//! Queries are retried once on 429/504 or transport errors. Amenity lookups additionally step
//! the radius down (requested → 800 → 500 m) while the server stays overloaded, and results are
//! memoized in-process by rounded coordinates, category and radius.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::shared::{as_f64_loose, float_arg, int_arg, require_zip, str_arg, DataSources};
use crate::tools::{Tool, ToolFailure};

pub const DEFAULT_AMENITY_RADIUS: i64 = 1500;
const COUNT_RADIUS_CAP: i64 = 800;
const OVERPASS_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 1;
const SAMPLE_NAMES: usize = 5;

const COUNT_ONLY: [&str; 4] = ["police", "fire_stations", "hospitals", "emergency_services"];

/// OSM `key=value` filters per canonical category
pub fn osm_filters(category: &str) -> Option<&'static [(&'static str, &'static str)]> {
    let filters: &'static [(&str, &str)] = match category {
        "restaurants" => &[("amenity", "restaurant")],
        "bars" => &[("amenity", "bar")],
        "nightlife" => &[("amenity", "nightclub"), ("amenity", "pub")],
        "cafes" => &[("amenity", "cafe")],
        "gyms" => &[("leisure", "fitness_centre")],
        "parks" => &[("leisure", "park")],
        "grocery_stores" => &[("shop", "supermarket"), ("shop", "convenience"), ("shop", "grocery")],
        "schools" => &[("amenity", "school")],
        "universities" => &[("amenity", "university"), ("amenity", "college")],
        "hospitals" => &[("amenity", "hospital")],
        "transit_stations" => &[
            ("railway", "station"),
            ("public_transport", "station"),
            ("amenity", "bus_station"),
        ],
        "pharmacies" => &[("amenity", "pharmacy")],
        "libraries" => &[("amenity", "library")],
        "museums" => &[("tourism", "museum")],
        "shopping_malls" => &[("shop", "mall")],
        "movie_theaters" => &[("amenity", "cinema")],
        "police" => &[("amenity", "police")],
        "fire_stations" => &[("amenity", "fire_station")],
        "emergency_services" => &[
            ("amenity", "police"),
            ("amenity", "fire_station"),
            ("amenity", "hospital"),
        ],
        _ => return None,
    };
    Some(filters)
}

pub const OSM_CATEGORIES: [&str; 19] = [
    "bars",
    "cafes",
    "emergency_services",
    "fire_stations",
    "grocery_stores",
    "gyms",
    "hospitals",
    "libraries",
    "movie_theaters",
    "museums",
    "nightlife",
    "parks",
    "pharmacies",
    "police",
    "restaurants",
    "schools",
    "shopping_malls",
    "transit_stations",
    "universities",
];

fn osm_alias(normalized: &str) -> Option<&'static str> {
    Some(match normalized {
        "restaurant" => "restaurants",
        "bar" => "bars",
        "night_club" | "nightclub" => "nightlife",
        "cafe" => "cafes",
        "gym" => "gyms",
        "park" => "parks",
        "grocery" | "supermarket" => "grocery_stores",
        "school" | "primary_school" | "elementary_school" | "middle_school" | "high_school"
        | "secondary_school" | "kindergarten" => "schools",
        "hospital" => "hospitals",
        "transit_station" => "transit_stations",
        "pharmacy" => "pharmacies",
        "library" => "libraries",
        "museum" => "museums",
        "shopping_mall" => "shopping_malls",
        "movie_theater" => "movie_theaters",
        "university" | "college" => "universities",
        "police_station" => "police",
        "fire_station" => "fire_stations",
        "emergency" | "emergency_services" => "emergency_services",
        _ => return None,
    })
}

/// Lowercase, spaces to underscores, then aliases
pub fn canonical_osm_category(raw: &str) -> String {
    let normalized = raw.trim().to_lowercase().replace(' ', "_");
    osm_alias(&normalized)
        .map(String::from)
        .unwrap_or(normalized)
}

fn union_body(filters: &[(&str, &str)], lat: f64, lon: f64, radius: i64) -> String {
    let mut lines = Vec::with_capacity(filters.len() * 3);
    for (key, value) in filters {
        for kind in ["node", "way", "relation"] {
            lines.push(format!(
                "  {kind}(around:{radius},{lat},{lon})[\"{key}\"=\"{value}\"];"
            ));
        }
    }
    lines.join("\n")
}

pub fn amenity_query(filters: &[(&str, &str)], lat: f64, lon: f64, radius: i64) -> String {
    format!(
        "[out:json][timeout:25];\n(\n{}\n);\nout center;",
        union_body(filters, lat, lon, radius)
    )
}

pub fn amenity_count_query(filters: &[(&str, &str)], lat: f64, lon: f64, radius: i64) -> String {
    format!(
        "[out:json][timeout:20];\n(\n{}\n);\nout count;",
        union_body(filters, lat, lon, radius)
    )
}

/// `total` (or `nodes`) tag of the first element of an `out count` answer
pub fn extract_count(data: &Value) -> i64 {
    let Some(tags) = data["elements"]
        .as_array()
        .and_then(|e| e.first())
        .and_then(|e| e.get("tags"))
    else {
        return 0;
    };
    ["total", "nodes"]
        .iter()
        .filter_map(|k| tags.get(*k))
        .find_map(as_f64_loose)
        .map(|n| n as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OsmAmenities {
    pub category: String,
    pub count: i64,
    pub sample_names: Vec<String>,
    pub radius_meters: i64,
    pub source: String,
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<Value>,
}

fn memo_key(lat: f64, lon: f64, category: &str, radius: i64) -> String {
    format!("overpass:{lat:.5}:{lon:.5}:{category}:{radius}")
}

fn is_overloaded(failure: &ToolFailure) -> bool {
    matches!(failure.status(), Some(429 | 504))
}

impl DataSources {
    /// GET the interpreter with `data=query`; one retry on 429/504 or transport failure
    pub(crate) async fn overpass_query(
        &self,
        query: &str,
        tool: &str,
        timeout: Duration,
    ) -> Result<Value, ToolFailure> {
        let endpoint = self.providers.overpass_endpoint().to_string();
        let backoff = Duration::from_millis(self.providers.overpass_retry_ms);
        let mut attempt = 0;
        loop {
            let sent = self
                .http
                .get(&endpoint)
                .query(&[("data", query)])
                .timeout(timeout)
                .send()
                .await;
            let retryable = attempt < MAX_RETRIES;
            match sent {
                Ok(resp) if resp.status().as_u16() == 200 => {
                    return resp.json::<Value>().await.map_err(|e| {
                        ToolFailure::transport("overpass_invalid_response", tool, e)
                    });
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if matches!(status, 429 | 504) && retryable {
                        tracing::debug!(status, attempt, "overpass busy, retrying");
                    } else {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(ToolFailure::http("overpass_request_failed", tool, status, &body));
                    }
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && retryable => {
                    tracing::debug!(error = %e, attempt, "overpass transport error, retrying");
                }
                Err(e) => return Err(ToolFailure::transport("overpass_request_failed", tool, e)),
            }
            attempt += 1;
            tokio::time::sleep(backoff * attempt).await;
        }
    }

    pub async fn fetch_overpass_amenities(
        &self,
        lat: f64,
        lon: f64,
        category: &str,
        radius_meters: i64,
    ) -> Result<OsmAmenities, ToolFailure> {
        const TOOL: &str = "search_overpass_amenities";
        let canonical = canonical_osm_category(category);
        let Some(filters) = osm_filters(&canonical) else {
            return Err(ToolFailure::new(
                "unsupported_category",
                json!({"tool": "search_osm_amenities", "category": category, "supported": OSM_CATEGORIES}),
            ));
        };

        if let Some(hit) = self
            .memo_get(&memo_key(lat, lon, &canonical, radius_meters))
            .and_then(|v| serde_json::from_value::<OsmAmenities>(v).ok())
        {
            return Ok(hit);
        }

        let mut radii = vec![radius_meters];
        if radius_meters > 800 {
            radii.push(800);
        }
        if radius_meters > 500 {
            radii.push(500);
        }
        let source = self.providers.overpass_endpoint().to_string();
        let count_only = COUNT_ONLY.contains(&canonical.as_str());

        let mut last_error = None;
        let mut answer = None;
        for radius in radii {
            if count_only {
                let count_radius = radius.min(COUNT_RADIUS_CAP);
                let query = amenity_count_query(filters, lat, lon, count_radius);
                match self.overpass_query(&query, TOOL, OVERPASS_TIMEOUT).await {
                    Ok(data) => {
                        let result = OsmAmenities {
                            category: canonical.clone(),
                            count: extract_count(&data),
                            sample_names: Vec::new(),
                            radius_meters: count_radius,
                            source,
                            note: "Counts only (fast query) for safety infrastructure.".to_string(),
                            zip_code: None,
                            center: None,
                        };
                        if let Ok(value) = serde_json::to_value(&result) {
                            self.memo_put(memo_key(lat, lon, &canonical, count_radius), value.clone());
                            self.memo_put(memo_key(lat, lon, &canonical, radius), value);
                        }
                        return Ok(result);
                    }
                    Err(e) if is_overloaded(&e) => last_error = Some(e),
                    Err(e) => return Err(e),
                }
                continue;
            }
            let query = amenity_query(filters, lat, lon, radius);
            match self.overpass_query(&query, TOOL, OVERPASS_TIMEOUT).await {
                Ok(data) => {
                    answer = Some((radius, data));
                    break;
                }
                Err(e) if is_overloaded(&e) => {
                    tracing::info!(radius, category = %canonical, "overpass overloaded, shrinking radius");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let Some((radius_used, data)) = answer else {
            return Err(last_error.unwrap_or_else(|| {
                ToolFailure::new("overpass_request_failed", json!({"tool": TOOL}))
            }));
        };
        let Some(elements) = data.get("elements").and_then(Value::as_array) else {
            return Err(ToolFailure::new("overpass_invalid_response", json!({"tool": TOOL})));
        };
        let names: Vec<String> = elements
            .iter()
            .filter_map(|e| e["tags"]["name"].as_str())
            .filter(|n| !n.is_empty())
            .take(SAMPLE_NAMES)
            .map(String::from)
            .collect();
        let result = OsmAmenities {
            category: canonical.clone(),
            count: elements.len() as i64,
            sample_names: names,
            radius_meters: radius_used,
            source,
            note: "OSM amenities provide counts only (no ratings).".to_string(),
            zip_code: None,
            center: None,
        };
        if let Ok(value) = serde_json::to_value(&result) {
            self.memo_put(memo_key(lat, lon, &canonical, radius_used), value);
        }
        Ok(result)
    }

    /// Amenities around a ZIP centroid
    pub async fn fetch_osm_amenities(
        &self,
        zip_code: &str,
        category: &str,
        radius_meters: i64,
    ) -> Result<OsmAmenities, ToolFailure> {
        let geo = self.geocode_zip(zip_code).await?;
        let mut result = self
            .fetch_overpass_amenities(geo.latitude, geo.longitude, category, radius_meters)
            .await?;
        result.zip_code = Some(zip_code.to_string());
        result.center = Some(json!({"latitude": geo.latitude, "longitude": geo.longitude}));
        Ok(result)
    }
}

fn amenity_schema(by_zip: bool) -> Value {
    let mut properties = if by_zip {
        json!({"zip_code": {"type": "string"}})
    } else {
        json!({"lat": {"type": "number"}, "lon": {"type": "number"}})
    };
    properties["category"] = json!({"type": "string", "enum": OSM_CATEGORIES});
    properties["radius_meters"] = json!({"type": "integer", "default": DEFAULT_AMENITY_RADIUS});
    let required = if by_zip {
        json!(["zip_code", "category"])
    } else {
        json!(["lat", "lon", "category"])
    };
    json!({"type": "object", "properties": properties, "required": required})
}

fn to_json(result: OsmAmenities, tool: &str) -> Result<Value, ToolFailure> {
    serde_json::to_value(result).map_err(|e| ToolFailure::transport("overpass_invalid_response", tool, e))
}

pub struct OsmAmenitiesTool {
    sources: Arc<DataSources>,
}

impl OsmAmenitiesTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for OsmAmenitiesTool {
    fn name(&self) -> &str {
        "search_osm_amenities"
    }

    fn description(&self) -> &str {
        "Count amenities using OpenStreetMap Overpass API (no ratings)."
    }

    fn parameters_schema(&self) -> Value {
        amenity_schema(true)
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, self.name())?;
        let radius = int_arg(&args, "radius_meters").unwrap_or(DEFAULT_AMENITY_RADIUS);
        let result = self
            .sources
            .fetch_osm_amenities(&zip, &str_arg(&args, "category"), radius)
            .await?;
        to_json(result, self.name())
    }
}

pub struct OverpassAmenitiesTool {
    sources: Arc<DataSources>,
}

impl OverpassAmenitiesTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for OverpassAmenitiesTool {
    fn name(&self) -> &str {
        "search_overpass_amenities"
    }

    fn description(&self) -> &str {
        "Count amenities using OpenStreetMap Overpass API by coordinates."
    }

    fn parameters_schema(&self) -> Value {
        amenity_schema(false)
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let (lat, lon) = (float_arg(&args, "lat"), float_arg(&args, "lon"));
        let (Some(lat), Some(lon)) = (lat, lon) else {
            return Err(ToolFailure::new(
                "missing_coordinates",
                json!({"tool": self.name(), "lat": lat, "lon": lon}),
            ));
        };
        let radius = int_arg(&args, "radius_meters").unwrap_or(DEFAULT_AMENITY_RADIUS);
        let result = self
            .sources
            .fetch_overpass_amenities(lat, lon, &str_arg(&args, "category"), radius)
            .await?;
        to_json(result, self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{mount_geocode_20001, sources_for, OverpassQueryContains};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn categories_are_normalized_through_aliases() {
        assert_eq!(canonical_osm_category(" Fire Station "), "fire_stations");
        assert_eq!(canonical_osm_category("College"), "universities");
        assert_eq!(canonical_osm_category("cafes"), "cafes");
        assert!(osm_filters("bowling").is_none());
    }

    #[test]
    fn queries_union_nodes_ways_and_relations() {
        let q = amenity_query(&[("amenity", "cafe")], 38.9, -77.0, 1500);
        assert!(q.starts_with("[out:json][timeout:25];"));
        assert!(q.contains("node(around:1500,38.9,-77)[\"amenity\"=\"cafe\"];"));
        assert!(q.contains("relation(around:1500,38.9,-77)"));
        assert!(q.ends_with("out center;"));
        assert!(amenity_count_query(&[("amenity", "police")], 1.0, 2.0, 800).ends_with("out count;"));
    }

    #[test]
    fn count_reads_total_tag() {
        assert_eq!(extract_count(&json!({"elements": [{"tags": {"total": "12"}}]})), 12);
        assert_eq!(extract_count(&json!({"elements": []})), 0);
    }

    #[tokio::test]
    async fn amenities_list_sample_names_and_memoize() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/interpreter"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "elements": [
                    {"tags": {"name": "Compass Coffee"}},
                    {"tags": {}},
                    {"tags": {"name": "Slipstream"}}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sources = sources_for(&server.uri());
        let first = sources
            .fetch_overpass_amenities(38.9122, -77.0177, "cafe", 1500)
            .await
            .unwrap();
        assert_eq!(first.count, 3);
        assert_eq!(first.sample_names, vec!["Compass Coffee", "Slipstream"]);
        let second = sources
            .fetch_overpass_amenities(38.912200001, -77.0177, "cafes", 1500)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn radius_steps_down_while_overloaded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/interpreter"))
            .and(OverpassQueryContains("around:1500,"))
            .respond_with(ResponseTemplate::new(504))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/interpreter"))
            .and(OverpassQueryContains("around:800,"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"elements": [{}]})))
            .mount(&server)
            .await;

        let out = sources_for(&server.uri())
            .fetch_overpass_amenities(38.9, -77.0, "parks", 1500)
            .await
            .unwrap();
        assert_eq!(out.radius_meters, 800);
        assert_eq!(out.count, 1);
    }

    #[tokio::test]
    async fn safety_categories_are_count_only_and_capped() {
        let server = MockServer::start().await;
        mount_geocode_20001(&server).await;
        Mock::given(method("GET"))
            .and(path("/interpreter"))
            .and(OverpassQueryContains("out count;"))
            .and(OverpassQueryContains("around:800,"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "elements": [{"tags": {"total": "4"}}]
            })))
            .mount(&server)
            .await;

        let out = sources_for(&server.uri())
            .fetch_osm_amenities("20001", "police", 1500)
            .await
            .unwrap();
        assert_eq!(out.count, 4);
        assert_eq!(out.radius_meters, 800);
        assert_eq!(out.zip_code.as_deref(), Some("20001"));
        assert!(out.sample_names.is_empty());
    }

    #[tokio::test]
    async fn unknown_categories_and_missing_coordinates_fail() {
        let server = MockServer::start().await;
        let sources = Arc::new(sources_for(&server.uri()));
        let err = sources
            .fetch_overpass_amenities(1.0, 2.0, "bowling", 1500)
            .await
            .unwrap_err();
        assert_eq!(err.code, "unsupported_category");

        let tool = OverpassAmenitiesTool::new(sources);
        let err = tool.execute(json!({"lat": 1.0, "category": "parks"})).await.unwrap_err();
        assert_eq!(err.code, "missing_coordinates");
    }
}
