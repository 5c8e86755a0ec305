//! ACS 5-year demographics for a ZIP (ZCTA), with a county fallback

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tools::geo_profile::zip_only_schema;
use crate::tools::shared::{classify_http_error, require_zip, truncate_chars, DataSources, ERROR_BODY_LIMIT};
use crate::tools::{Tool, ToolFailure};

const TOOL: &str = "get_census_demographics";
const CENSUS_TIMEOUT: Duration = Duration::from_secs(15);
const MISSING_SENTINEL: i64 = -666_666_666;

/// Travel-time bucket variables and their midpoints in minutes
const COMMUTE_BUCKETS: [(&str, f64); 12] = [
    ("B08303_002E", 2.5),
    ("B08303_003E", 7.0),
    ("B08303_004E", 12.0),
    ("B08303_005E", 17.0),
    ("B08303_006E", 22.0),
    ("B08303_007E", 27.0),
    ("B08303_008E", 32.0),
    ("B08303_009E", 37.0),
    ("B08303_010E", 42.0),
    ("B08303_011E", 52.0),
    ("B08303_012E", 75.0),
    ("B08303_013E", 100.0),
];

const BASE_VARIABLES: [&str; 14] = [
    "B01003_001E", // population
    "B19013_001E", // median household income
    "B01002_001E", // median age
    "B25003_001E", // occupancy total
    "B25003_002E", // owner occupied
    "B17001_001E", // poverty universe
    "B17001_002E", // below poverty
    "B15003_001E", // education total
    "B15003_022E", // bachelor's
    "B15003_023E", // master's
    "B15003_024E", // professional
    "B15003_025E", // doctorate
    "B25064_001E", // median rent
    "B08303_001E", // commute total
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CensusDemographics {
    pub zip_code: String,
    pub population: Option<i64>,
    pub median_household_income: Option<i64>,
    pub median_age: Option<f64>,
    pub pct_college_educated: Option<f64>,
    pub pct_owner_occupied: Option<f64>,
    pub commute_time_avg: Option<f64>,
    pub poverty_rate: Option<f64>,
    pub median_rent: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geography: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geography_fips: Option<String>,
}

fn variables() -> String {
    BASE_VARIABLES
        .iter()
        .copied()
        .chain(COMMUTE_BUCKETS.iter().map(|(k, _)| *k))
        .collect::<Vec<_>>()
        .join(",")
}

fn census_status_type(status: u16) -> &'static str {
    if status == 204 {
        "no_data"
    } else {
        classify_http_error(status)
    }
}

/// One header row plus one value row, keyed by variable
struct AcsRow(HashMap<String, Value>);

impl AcsRow {
    fn from_table(table: &Value) -> Option<Self> {
        let rows = table.as_array()?;
        if rows.len() < 2 {
            return None;
        }
        let header = rows[0].as_array()?;
        let values = rows[1].as_array()?;
        let map = header
            .iter()
            .zip(values.iter())
            .filter_map(|(h, v)| Some((h.as_str()?.to_string(), v.clone())))
            .collect();
        Some(Self(map))
    }

    fn int(&self, key: &str) -> Option<i64> {
        let v = self.0.get(key)?;
        let n = v
            .as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()))?;
        (n != MISSING_SENTINEL).then_some(n)
    }

    fn float(&self, key: &str) -> Option<f64> {
        let v = self.0.get(key)?;
        let n = v
            .as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))?;
        (n != MISSING_SENTINEL as f64).then_some(n)
    }

    fn count(&self, key: &str) -> i64 {
        self.int(key).unwrap_or(0)
    }
}

fn percent(part: i64, total: i64) -> Option<f64> {
    (total != 0).then(|| part as f64 / total as f64 * 100.0)
}

fn summarize(zip_code: &str, row: &AcsRow) -> CensusDemographics {
    let college = ["B15003_022E", "B15003_023E", "B15003_024E", "B15003_025E"]
        .iter()
        .map(|k| row.count(k))
        .sum::<i64>();

    let (weighted, commuters) = COMMUTE_BUCKETS
        .iter()
        .fold((0.0, 0i64), |(w, c), (key, midpoint)| {
            let n = row.count(key);
            (w + n as f64 * midpoint, c + n)
        });

    CensusDemographics {
        zip_code: zip_code.to_string(),
        population: row.int("B01003_001E"),
        median_household_income: row.int("B19013_001E"),
        median_age: row.float("B01002_001E"),
        pct_college_educated: percent(college, row.count("B15003_001E")),
        pct_owner_occupied: percent(row.count("B25003_002E"), row.count("B25003_001E")),
        commute_time_avg: (commuters != 0).then(|| weighted / commuters as f64),
        poverty_rate: percent(row.count("B17001_002E"), row.count("B17001_001E")),
        median_rent: row.int("B25064_001E"),
        geography: None,
        geography_fips: None,
    }
}

impl DataSources {
    async fn acs_query(&self, params: &[(&str, String)]) -> Result<(u16, String), ToolFailure> {
        let resp = self
            .http
            .get(&self.providers.census_acs_url)
            .query(params)
            .timeout(CENSUS_TIMEOUT)
            .send()
            .await
            .map_err(|e| ToolFailure::transport("census_request_failed", TOOL, e))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Ok((status, body))
    }

    pub async fn fetch_census_demographics(
        &self,
        zip_code: &str,
    ) -> Result<CensusDemographics, ToolFailure> {
        let key = self
            .providers
            .census_api_key
            .clone()
            .ok_or_else(|| ToolFailure::missing_key(TOOL, "CENSUS_API_KEY"))?;
        let vars = variables();

        let (status, body) = self
            .acs_query(&[
                ("get", vars.clone()),
                ("for", format!("zip code tabulation area:{zip_code}")),
                ("key", key.clone()),
            ])
            .await?;
        if status != 200 && status != 204 {
            return Err(census_http_failure(status, &body, None));
        }
        let table = if status == 200 {
            parse_table(&body, None)?
        } else {
            Value::Null
        };
        if let Some(row) = AcsRow::from_table(&table) {
            return Ok(summarize(zip_code, &row));
        }

        // No ZCTA for this ZIP: fall back to its county
        let (state_fips, county_fips) = match self.resolve_geo_profile(zip_code).await {
            Ok(p) => (p.state_fips, p.county_fips),
            Err(e) => {
                tracing::debug!(zip = %zip_code, error = %e, "county lookup for census fallback failed");
                (None, None)
            }
        };
        let (Some(state_fips), Some(county_fips)) = (state_fips, county_fips) else {
            return Err(ToolFailure::new(
                "census_no_data",
                json!({"tool": TOOL, "zip_code": zip_code}),
            ));
        };

        let (status, body) = self
            .acs_query(&[
                ("get", vars),
                ("for", format!("county:{county_fips}")),
                ("in", format!("state:{state_fips}")),
                ("key", key),
            ])
            .await?;
        if status != 200 {
            return Err(census_http_failure(status, &body, Some("county")));
        }
        let table = parse_table(&body, Some("county"))?;
        let row = AcsRow::from_table(&table).ok_or_else(|| {
            ToolFailure::new(
                "census_no_data",
                json!({"tool": TOOL, "zip_code": zip_code, "fallback": "county"}),
            )
        })?;
        let mut out = summarize(zip_code, &row);
        out.geography = Some("county".to_string());
        out.geography_fips = Some(format!("{state_fips}{county_fips}"));
        Ok(out)
    }
}

/// Empty body means no rows; anything else must be JSON
fn parse_table(body: &str, fallback: Option<&str>) -> Result<Value, ToolFailure> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| {
        let mut details = json!({
            "tool": TOOL,
            "message": e.to_string(),
            "body": truncate_chars(body, ERROR_BODY_LIMIT),
        });
        if let Some(fallback) = fallback {
            details["fallback"] = json!(fallback);
        }
        ToolFailure::new("census_bad_response", details)
    })
}

fn census_http_failure(status: u16, body: &str, fallback: Option<&str>) -> ToolFailure {
    let mut details = json!({
        "tool": TOOL,
        "status": status,
        "error_type": census_status_type(status),
        "body": truncate_chars(body, ERROR_BODY_LIMIT),
    });
    if let Some(fallback) = fallback {
        details["fallback"] = json!(fallback);
    }
    ToolFailure::new("census_request_failed", details)
}

pub struct CensusTool {
    sources: Arc<DataSources>,
}

impl CensusTool {
    pub fn new(sources: Arc<DataSources>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl Tool for CensusTool {
    fn name(&self) -> &str {
        TOOL
    }

    fn description(&self) -> &str {
        "Get ACS 5-year demographics for a ZIP code."
    }

    fn parameters_schema(&self) -> Value {
        zip_only_schema()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
        let zip = require_zip(&args, TOOL)?;
        let out = self.sources.fetch_census_demographics(&zip).await?;
        serde_json::to_value(out).map_err(|e| ToolFailure::transport("census_request_failed", TOOL, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{mount_geo_profile_20001, providers_for, sources_for};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn table(overrides: &[(&str, &str)]) -> Value {
        let mut header: Vec<String> = variables().split(',').map(String::from).collect();
        let mut values: Vec<String> = header.iter().map(|_| "0".to_string()).collect();
        for (k, v) in overrides {
            if let Some(i) = header.iter().position(|h| h == k) {
                values[i] = v.to_string();
            }
        }
        header.push("zip code tabulation area".into());
        values.push("20001".into());
        json!([header, values])
    }

    #[test]
    fn derived_metrics_use_bucket_midpoints_and_sentinels() {
        let t = table(&[
            ("B01003_001E", "43000"),
            ("B19013_001E", "-666666666"),
            ("B25003_001E", "200"),
            ("B25003_002E", "50"),
            ("B15003_001E", "100"),
            ("B15003_022E", "30"),
            ("B15003_025E", "10"),
            ("B08303_002E", "10"),
            ("B08303_013E", "10"),
        ]);
        let row = AcsRow::from_table(&t).unwrap();
        let out = summarize("20001", &row);
        assert_eq!(out.population, Some(43000));
        assert_eq!(out.median_household_income, None);
        assert_eq!(out.pct_owner_occupied, Some(25.0));
        assert_eq!(out.pct_college_educated, Some(40.0));
        assert_eq!(out.commute_time_avg, Some(51.25));
        assert_eq!(out.poverty_rate, None);
    }

    #[tokio::test]
    async fn zcta_lookup_returns_zip_level_numbers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acs5"))
            .and(query_param("for", "zip code tabulation area:20001"))
            .and(query_param("key", "census-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(table(&[("B25064_001E", "1850")])))
            .mount(&server)
            .await;

        let out = sources_for(&server.uri())
            .fetch_census_demographics("20001")
            .await
            .unwrap();
        assert_eq!(out.median_rent, Some(1850));
        assert!(out.geography.is_none());
    }

    #[tokio::test]
    async fn no_content_falls_back_to_county() {
        let server = MockServer::start().await;
        mount_geo_profile_20001(&server).await;
        Mock::given(method("GET"))
            .and(path("/acs5"))
            .and(query_param("for", "zip code tabulation area:20001"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/acs5"))
            .and(query_param("for", "county:001"))
            .and(query_param("in", "state:11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(table(&[("B01003_001E", "690000")])))
            .mount(&server)
            .await;

        let out = sources_for(&server.uri())
            .fetch_census_demographics("20001")
            .await
            .unwrap();
        assert_eq!(out.population, Some(690000));
        assert_eq!(out.geography.as_deref(), Some("county"));
        assert_eq!(out.geography_fips.as_deref(), Some("11001"));
    }

    #[tokio::test]
    async fn malformed_body_is_a_failure_not_a_fallback() {
        let server = MockServer::start().await;
        mount_geo_profile_20001(&server).await;
        Mock::given(method("GET"))
            .and(path("/acs5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>Service Unavailable</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let err = sources_for(&server.uri())
            .fetch_census_demographics("20001")
            .await
            .unwrap_err();
        assert_eq!(err.code, "census_bad_response");
        assert_eq!(err.details["body"], "<html>Service Unavailable</html>");
        assert!(err.details.get("fallback").is_none());
    }

    #[tokio::test]
    async fn http_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/acs5"))
            .respond_with(ResponseTemplate::new(403).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let err = sources_for(&server.uri())
            .fetch_census_demographics("20001")
            .await
            .unwrap_err();
        assert_eq!(err.code, "census_request_failed");
        assert_eq!(err.details["error_type"], "auth_error");
        assert_eq!(err.details["status"], 403);
    }

    #[tokio::test]
    async fn missing_key_is_reported() {
        let server = MockServer::start().await;
        let mut providers = providers_for(&server.uri());
        providers.census_api_key = None;
        let err = DataSources::new(providers)
            .fetch_census_demographics("20001")
            .await
            .unwrap_err();
        assert_eq!(err.code, "missing_api_key");
        assert_eq!(err.details["env"], "CENSUS_API_KEY");
    }
}
