//! Google Places Nearby Search with an OpenStreetMap fallback
//!
//! Free-form categories are normalized and aliased onto a fixed set of Google place types.
//! Anything Google cannot answer (unknown category, no key) is routed to Overpass instead,
//! with a note that the counts carry no ratings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::shared::{int_arg, require_zip, str_arg, DataSources};
use crate::tools::{Tool, ToolFailure};

const TOOL: &str = "search_nearby_amenities";
pub const DEFAULT_PLACES_RADIUS: i64 = 2000;
const PLACES_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RESULTS: u32 = 20;
const TOP_RATED: usize = 5;
const FIELD_MASK: &str =
    "places.displayName,places.rating,places.userRatingCount,places.formattedAddress";

pub const PLACES_CATEGORIES: [&str; 15] = [
    "bars",
    "cafes",
    "grocery_stores",
    "gyms",
    "hospitals",
    "libraries",
    "movie_theaters",
    "museums",
    "nightlife",
    "parks",
    "pharmacies",
    "restaurants",
    "schools",
    "shopping_malls",
    "transit_stations",
];

pub fn place_type(category: &str) -> Option<&'static str> {
    Some(match category {
        "restaurants" => "restaurant",
        "bars" => "bar",
        "nightlife" => "night_club",
        "cafes" => "cafe",
        "gyms" => "gym",
        "parks" => "park",
        "grocery_stores" => "grocery_store",
        "schools" => "school",
        "hospitals" => "hospital",
        "transit_stations" => "transit_station",
        "pharmacies" => "pharmacy",
        "libraries" => "library",
        "museums" => "museum",
        "shopping_malls" => "shopping_mall",
        "movie_theaters" => "movie_theater",
        _ => return None,
    })
}

fn places_alias(normalized: &str) -> Option<&'static str> {
    Some(match normalized {
        "restaurant" | "restaurants" | "food" => "restaurants",
        "bar" | "bars" => "bars",
        "night_club" | "night_clubs" | "nightclub" | "nightclubs" | "nightlife" => "nightlife",
        "cafe" | "cafes" | "coffee" | "coffee_shop" | "coffee_shops" => "cafes",
        "gym" | "gyms" | "fitness" | "fitness_center" => "gyms",
        "park" | "parks" | "trail" | "trails" => "parks",
        "grocery" | "grocery_store" | "grocery_stores" | "supermarket" | "supermarkets"
        | "grocery_or_supermarket" | "market" | "markets" | "shopping" => "grocery_stores",
        "school" | "schools" | "primary_school" | "elementary_school" | "middle_school"
        | "high_school" | "secondary_school" | "kindergarten" => "schools",
        "hospital" | "hospitals" | "medical_center" | "health" => "hospitals",
        "transit" | "transit_station" | "transit_stations" | "train_station" | "bus_station"
        | "subway_station" => "transit_stations",
        "pharmacy" | "pharmacies" | "drugstore" => "pharmacies",
        "library" | "libraries" => "libraries",
        "museum" | "museums" | "art" | "arts" | "entertainment" => "museums",
        "shopping_mall" | "shopping_malls" | "mall" | "malls" => "shopping_malls",
        "movie_theater" | "movie_theaters" | "cinema" | "cinemas" => "movie_theaters",
        _ => return None,
    })
}

/// Lowercase, `&` → `and`, runs of other characters → `_`, trimmed
pub fn normalize_category(raw: &str) -> String {
    let text = raw.to_lowercase().replace('&', "and");
    let mut out = String::with_capacity(text.len());
    let mut gap = false;
    for c in text.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if gap && !out.is_empty() {
                out.push('_');
            }
            gap = false;
            out.push(c);
        } else {
            gap = true;
        }
    }
    out
}

pub fn canonical_places_category(raw: &str) -> String {
    let normalized = normalize_category(raw);
    places_alias(&normalized)
        .map(String::from)
        .unwrap_or(normalized)
}

/// Count, mean rating and the five best places by (rating, review count)
pub fn summarize_places(places: &[Value]) -> (Vec<Value>, Option<f64>) {
    let ratings: Vec<f64> = places.iter().filter_map(|p| p["rating"].as_f64()).collect();
    let avg = (!ratings.is_empty()).then(|| ratings.iter().sum::<f64>() / ratings.len() as f64);

    let mut sorted: Vec<&Value> = places.iter().collect();
    let key = |p: &Value| {
        (
            p["rating"].as_f64().unwrap_or(0.0),
            p["userRatingCount"].as_i64().unwrap_or(0),
        )
    };
    sorted.sort_by(|a, b| {
        let (ra, ca) = key(a);
        let (rb, cb) = key(b);
        rb.total_cmp(&ra).then(cb.cmp(&ca))
    });
    let top = sorted
        .into_iter()
        .take(TOP_RATED)
        .map(|p| {
            json!({
                "name": p["displayName"]["text"].as_str().unwrap_or(""),
                "rating": p["rating"],
                "user_ratings_total": p["userRatingCount"],
                "vicinity": p["formattedAddress"],
            })
        })
        .collect();
    (top, avg)
}

impl DataSources {
    /// Overpass counts for `canonical` with `note`; on failure the given code is reported
    async fn places_fallback(
        &self,
        zip_code: &str,
        canonical: &str,
        radius: i64,
        note: String,
        failure: impl FnOnce(String) -> ToolFailure,
    ) -> Result<Value, ToolFailure> {
        let attempt = async {
            let geo = self.geocode_zip(zip_code).await?;
            self.fetch_overpass_amenities(geo.latitude, geo.longitude, canonical, radius)
                .await
        };
        match attempt.await {
            Ok(result) => {
                let mut value = serde_json::to_value(result).unwrap_or_else(|_| json!({}));
                value["note"] = json!(note);
                Ok(value)
            }
            Err(e) => Err(failure(e.to_string())),
        }
    }

    pub async fn search_nearby_amenities(
        &self,
        zip_code: &str,
        category: &str,
        radius: i64,
    ) -> Result<Value, ToolFailure> {
        let canonical = canonical_places_category(category);
        let Some(place_type) = place_type(&canonical) else {
            let note = format!(
                "'{canonical}' not supported by Google Places. Counts from OpenStreetMap (no ratings)."
            );
            return self
                .places_fallback(zip_code, &canonical, radius, note, |message| {
                    ToolFailure::new(
                        "unsupported_category",
                        json!({"tool": TOOL, "category": category, "supported": PLACES_CATEGORIES, "message": message}),
                    )
                })
                .await;
        };

        let Some(key) = self.providers.google_places_api_key.clone() else {
            let note = "Google Places key missing. Using OpenStreetMap counts (no ratings).".to_string();
            return self
                .places_fallback(zip_code, &canonical, radius, note, |message| {
                    ToolFailure::new(
                        "missing_api_key",
                        json!({"tool": TOOL, "env": "GOOGLE_PLACES_API_KEY", "message": message}),
                    )
                })
                .await;
        };

        let geo = self.geocode_zip(zip_code).await.map_err(|e| {
            ToolFailure::new("geocode_failed", json!({"tool": TOOL, "message": e.details["message"]}))
        })?;
        let body = json!({
            "includedTypes": [place_type],
            "maxResultCount": MAX_RESULTS,
            "locationRestriction": {"circle": {
                "center": {"latitude": geo.latitude, "longitude": geo.longitude},
                "radius": radius,
            }},
        });
        let req = self
            .http
            .post(format!(
                "{}/places:searchNearby",
                self.providers.google_places_url.trim_end_matches('/')
            ))
            .header("X-Goog-Api-Key", key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&body)
            .timeout(PLACES_TIMEOUT);
        let data = self.json_ok(req, "places_request_failed", TOOL).await?;
        let places = data["places"].as_array().cloned().unwrap_or_default();
        let (top_rated, avg_rating) = summarize_places(&places);

        Ok(json!({
            "category": canonical,
            "count": places.len(),
            "top_rated": top_rated,
            "avg_rating": avg_rating,
            "center": {
                "latitude": geo.latitude,
                "longitude": geo.longitude,
                "city": geo.city,
                "state": geo.state,
            },
        }))
    }
}

pub struct NearbyAmenitiesTool {
    sources: Arc<DataSources>,
}

impl NearbyAmenitiesTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for NearbyAmenitiesTool {
    fn name(&self) -> &str {
        TOOL
    }

    fn description(&self) -> &str {
        "Search nearby amenities using Google Places Nearby Search (ratings and counts)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "zip_code": {"type": "string"},
                "category": {
                    "type": "string",
                    "description": format!("One of {}; other categories fall back to OpenStreetMap", PLACES_CATEGORIES.join(", "))
                },
                "radius_meters": {"type": "integer", "default": DEFAULT_PLACES_RADIUS}
            },
            "required": ["zip_code", "category"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, TOOL)?;
        let radius = int_arg(&args, "radius_meters").unwrap_or(DEFAULT_PLACES_RADIUS);
        self.sources
            .search_nearby_amenities(&zip, &str_arg(&args, "category"), radius)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{mount_geocode_20001, providers_for, sources_for};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn normalization_and_aliases() {
        assert_eq!(normalize_category("  Coffee Shops!! "), "coffee_shops");
        assert_eq!(normalize_category("Arts & Culture"), "arts_and_culture");
        assert_eq!(canonical_places_category("Coffee Shop"), "cafes");
        assert_eq!(canonical_places_category("High School"), "schools");
        assert_eq!(canonical_places_category("fire station"), "fire_station");
    }

    #[test]
    fn top_rated_sorts_by_rating_then_reviews() {
        let places = vec![
            json!({"displayName": {"text": "A"}, "rating": 4.5, "userRatingCount": 10}),
            json!({"displayName": {"text": "B"}, "rating": 4.5, "userRatingCount": 300}),
            json!({"displayName": {"text": "C"}}),
            json!({"displayName": {"text": "D"}, "rating": 3.0, "userRatingCount": 5}),
        ];
        let (top, avg) = summarize_places(&places);
        assert_eq!(top[0]["name"], "B");
        assert_eq!(top[1]["name"], "A");
        assert_eq!(top[3]["name"], "C");
        assert_eq!(avg, Some(4.0));
    }

    #[tokio::test]
    async fn nearby_search_posts_field_mask_and_type() {
        let server = MockServer::start().await;
        mount_geocode_20001(&server).await;
        Mock::given(method("POST"))
            .and(path("/places/places:searchNearby"))
            .and(header("X-Goog-Api-Key", "google-key"))
            .and(header("X-Goog-FieldMask", FIELD_MASK))
            .and(body_partial_json(json!({"includedTypes": ["cafe"], "maxResultCount": 20})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "places": [
                    {"displayName": {"text": "Compass"}, "rating": 4.6, "userRatingCount": 900, "formattedAddress": "1 St"}
                ]
            })))
            .mount(&server)
            .await;

        let out = sources_for(&server.uri())
            .search_nearby_amenities("20001", "coffee", 800)
            .await
            .unwrap();
        assert_eq!(out["category"], "cafes");
        assert_eq!(out["count"], 1);
        assert_eq!(out["top_rated"][0]["vicinity"], "1 St");
        assert_eq!(out["center"]["city"], "Washington");
    }

    #[tokio::test]
    async fn unsupported_category_routes_to_overpass() {
        let server = MockServer::start().await;
        mount_geocode_20001(&server).await;
        Mock::given(method("GET"))
            .and(path("/interpreter"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "elements": [{"tags": {"name": "Howard University"}}]
            })))
            .mount(&server)
            .await;

        let out = sources_for(&server.uri())
            .search_nearby_amenities("20001", "universities", 1500)
            .await
            .unwrap();
        assert_eq!(out["category"], "universities");
        assert!(out["note"].as_str().unwrap().contains("not supported by Google Places"));
    }

    #[tokio::test]
    async fn missing_key_falls_back_then_reports() {
        let server = MockServer::start().await;
        let mut providers = providers_for(&server.uri());
        providers.google_places_api_key = None;
        let err = DataSources::new(providers)
            .search_nearby_amenities("20001", "bars", 1500)
            .await
            .unwrap_err();
        assert_eq!(err.code, "missing_api_key");
        assert_eq!(err.details["env"], "GOOGLE_PLACES_API_KEY");
    }

    #[tokio::test]
    async fn places_errors_are_classified() {
        let server = MockServer::start().await;
        mount_geocode_20001(&server).await;
        Mock::given(method("POST"))
            .and(path("/places/places:searchNearby"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let err = sources_for(&server.uri())
            .search_nearby_amenities("20001", "parks", 1500)
            .await
            .unwrap_err();
        assert_eq!(err.code, "places_request_failed");
        assert_eq!(err.details["error_type"], "auth_error");
    }
}
