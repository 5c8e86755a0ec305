//! ZIP → county / tract / metro identifiers via the Census geocoder

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::shared::{require_zip, DataSources};
use crate::tools::{Tool, ToolFailure};

const GEOCODER_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeoProfile {
    pub zip_code: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub county_name: Option<String>,
    pub county_fips: Option<String>,
    pub state_fips: Option<String>,
    pub tract_geoid: Option<String>,
    pub tract_name: Option<String>,
    pub cbsa_code: Option<String>,
    pub cbsa_title: Option<String>,
    pub source: String,
}

impl GeoProfile {
    /// "City, ST" when both are known, otherwise the ZIP itself
    pub fn label(&self) -> String {
        match (&self.city, &self.state) {
            (Some(city), Some(state)) => format!("{city}, {state}"),
            (Some(city), None) => city.clone(),
            _ => self.zip_code.clone(),
        }
    }
}

fn first_entry<'a>(geographies: &'a Value, key: &str) -> Option<&'a Value> {
    geographies.get(key)?.as_array()?.first()
}

fn field(entry: Option<&Value>, key: &str) -> Option<String> {
    entry?.get(key)?.as_str().map(String::from)
}

impl DataSources {
    pub async fn resolve_geo_profile(&self, zip_code: &str) -> Result<GeoProfile, ToolFailure> {
        let fail = |message: String| {
            ToolFailure::new(
                "geo_profile_failed",
                json!({"tool": "get_geo_profile", "message": message}),
            )
        };
        let base = self
            .geocode_zip(zip_code)
            .await
            .map_err(|e| fail(e.details["message"].as_str().unwrap_or("geocode failed").to_string()))?;

        let url = format!(
            "{}/geographies/coordinates",
            self.providers.census_geocoder_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .get(url)
            .query(&[
                ("x", base.longitude.to_string()),
                ("y", base.latitude.to_string()),
                ("benchmark", "Public_AR_Current".to_string()),
                ("vintage", "Current_Current".to_string()),
                ("format", "json".to_string()),
            ])
            .timeout(GEOCODER_TIMEOUT)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(fail(format!("Census geocoder failed with status {status}")));
        }
        let data: Value = resp.json().await.map_err(|e| fail(e.to_string()))?;
        let geographies = &data["result"]["geographies"];
        let county = first_entry(geographies, "Counties");
        let tract = first_entry(geographies, "Census Tracts");
        let cbsa = first_entry(geographies, "Metropolitan Statistical Areas");

        Ok(GeoProfile {
            zip_code: zip_code.to_string(),
            city: base.city,
            state: base.state,
            latitude: base.latitude,
            longitude: base.longitude,
            county_name: field(county, "NAME"),
            county_fips: field(county, "COUNTY"),
            state_fips: field(county, "STATE"),
            tract_geoid: field(tract, "GEOID"),
            tract_name: field(tract, "NAME"),
            cbsa_code: field(cbsa, "CBSA"),
            cbsa_title: field(cbsa, "NAME"),
            source: "Census Geocoder".to_string(),
        })
    }
}

pub struct GeocodeZipTool {
    sources: std::sync::Arc<DataSources>,
}

impl GeocodeZipTool {
    pub fn new(sources: std::sync::Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for GeocodeZipTool {
    fn name(&self) -> &str {
        "geocode_zip"
    }

    fn description(&self) -> &str {
        "Convert a ZIP code to city/state and latitude/longitude."
    }

    fn parameters_schema(&self) -> Value {
        zip_only_schema()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, self.name())?;
        let point = self.sources.geocode_zip(&zip).await?;
        serde_json::to_value(point).map_err(|e| ToolFailure::transport("geocode_failed", self.name(), e))
    }
}

pub struct GeoProfileTool {
    sources: std::sync::Arc<DataSources>,
}

impl GeoProfileTool {
    pub fn new(sources: std::sync::Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for GeoProfileTool {
    fn name(&self) -> &str {
        "get_geo_profile"
    }

    fn description(&self) -> &str {
        "Resolve ZIP code to city/state, county, tract, and metro identifiers."
    }

    fn parameters_schema(&self) -> Value {
        zip_only_schema()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, self.name())?;
        let profile = self.sources.resolve_geo_profile(&zip).await?;
        serde_json::to_value(profile)
            .map_err(|e| ToolFailure::transport("geo_profile_failed", self.name(), e))
    }
}

pub(crate) fn zip_only_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "zip_code": {"type": "string", "description": "5-digit US ZIP code"}
        },
        "required": ["zip_code"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{mount_geo_profile_20001, sources_for};
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn profile_picks_first_county_tract_and_metro() {
        let server = MockServer::start().await;
        mount_geo_profile_20001(&server).await;

        let profile = sources_for(&server.uri())
            .resolve_geo_profile("20001")
            .await
            .unwrap();
        assert_eq!(profile.county_fips.as_deref(), Some("001"));
        assert_eq!(profile.state_fips.as_deref(), Some("11"));
        assert_eq!(profile.cbsa_code.as_deref(), Some("47900"));
        assert_eq!(profile.label(), "Washington, DC");
        assert_eq!(profile.source, "Census Geocoder");
    }

    #[tokio::test]
    async fn geocoder_errors_map_to_geo_profile_failed() {
        let server = MockServer::start().await;
        crate::tools::test_support::mount_geocode_20001(&server).await;
        Mock::given(method("GET"))
            .and(path("/geocoder/geographies/coordinates"))
            .and(query_param("benchmark", "Public_AR_Current"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let tool = GeoProfileTool::new(Arc::new(sources_for(&server.uri())));
        let err = tool.execute(json!({"zip_code": "20001"})).await.unwrap_err();
        assert_eq!(err.code, "geo_profile_failed");
        assert!(err.details["message"].as_str().unwrap().contains("502"));
    }

    #[tokio::test]
    async fn tools_reject_malformed_zips() {
        let server = MockServer::start().await;
        let tool = GeocodeZipTool::new(Arc::new(sources_for(&server.uri())));
        let err = tool.execute(json!({"zip_code": "2000"})).await.unwrap_err();
        assert_eq!(err.code, "invalid_zip");
    }
}
