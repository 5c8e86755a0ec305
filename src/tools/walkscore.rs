//! Walk Score, Transit Score and Bike Score for a coordinate

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::shared::{float_arg, str_arg, DataSources};
use crate::tools::{Tool, ToolFailure};

const TOOL: &str = "get_walkscore";
const WALKSCORE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WalkScores {
    pub walkscore: Option<i64>,
    pub description: Option<String>,
    pub transit_score: Option<i64>,
    pub bike_score: Option<i64>,
}

impl DataSources {
    pub async fn fetch_walkscore(
        &self,
        lat: Option<f64>,
        lon: Option<f64>,
        address: &str,
    ) -> Result<WalkScores, ToolFailure> {
        let key = self
            .providers
            .walkscore_api_key
            .clone()
            .ok_or_else(|| ToolFailure::missing_key(TOOL, "WALKSCORE_API_KEY"))?;
        let (Some(lat), Some(lon)) = (lat, lon) else {
            return Err(ToolFailure::new(
                "missing_coordinates",
                json!({"tool": TOOL, "lat": lat, "lon": lon}),
            ));
        };

        let url = format!("{}/score", self.providers.walkscore_url.trim_end_matches('/'));
        let req = self
            .http
            .get(url)
            .query(&[
                ("format", "json".to_string()),
                ("address", address.to_string()),
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("transit", "1".to_string()),
                ("bike", "1".to_string()),
                ("wsapikey", key),
            ])
            .timeout(WALKSCORE_TIMEOUT);
        let data = self.json_ok(req, "walkscore_request_failed", TOOL).await?;

        if data.get("status").and_then(Value::as_i64) != Some(1) {
            return Err(ToolFailure::new(
                "walkscore_no_data",
                json!({"tool": TOOL, "response": data}),
            ));
        }
        Ok(WalkScores {
            walkscore: data.get("walkscore").and_then(Value::as_i64),
            description: data
                .get("description")
                .and_then(Value::as_str)
                .map(String::from),
            transit_score: data["transit"].get("score").and_then(Value::as_i64),
            bike_score: data["bike"].get("score").and_then(Value::as_i64),
        })
    }
}

pub struct WalkScoreTool {
    sources: Arc<DataSources>,
}

impl WalkScoreTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for WalkScoreTool {
    fn name(&self) -> &str {
        TOOL
    }

    fn description(&self) -> &str {
        "Get Walk Score, Transit Score, and Bike Score for a coordinate."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "lat": {"type": "number"},
                "lon": {"type": "number"},
                "address": {"type": "string", "description": "Street address or \"City, ST ZIP\""}
            },
            "required": ["lat", "lon", "address"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let scores = self
            .sources
            .fetch_walkscore(
                float_arg(&args, "lat"),
                float_arg(&args, "lon"),
                &str_arg(&args, "address"),
            )
            .await?;
        serde_json::to_value(scores)
            .map_err(|e| ToolFailure::transport("walkscore_request_failed", TOOL, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::sources_for;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn reads_all_three_scores() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/score"))
            .and(query_param("transit", "1"))
            .and(query_param("wsapikey", "walk-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 1,
                "walkscore": 96,
                "description": "Walker's Paradise",
                "transit": {"score": 89},
                "bike": {"score": 92}
            })))
            .mount(&server)
            .await;

        let tool = WalkScoreTool::new(Arc::new(sources_for(&server.uri())));
        let out = tool
            .execute(json!({"lat": 38.9, "lon": "-77.0", "address": "Washington, DC 20001"}))
            .await
            .unwrap();
        assert_eq!(out["walkscore"], 96);
        assert_eq!(out["transit_score"], 89);
        assert_eq!(out["bike_score"], 92);
    }

    #[tokio::test]
    async fn non_success_status_means_no_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/score"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": 2})))
            .mount(&server)
            .await;

        let err = sources_for(&server.uri())
            .fetch_walkscore(Some(1.0), Some(2.0), "")
            .await
            .unwrap_err();
        assert_eq!(err.code, "walkscore_no_data");
    }

    #[tokio::test]
    async fn coordinates_are_required() {
        let server = MockServer::start().await;
        let err = sources_for(&server.uri())
            .fetch_walkscore(None, Some(2.0), "")
            .await
            .unwrap_err();
        assert_eq!(err.code, "missing_coordinates");
    }
}
