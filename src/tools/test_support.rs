//! Helpers for adapter tests: every provider endpoint pointed at one mock server

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::ProvidersSection;
use crate::tools::DataSources;

pub(crate) fn providers_for(uri: &str) -> ProvidersSection {
    ProvidersSection {
        google_places_api_key: Some("google-key".into()),
        census_api_key: Some("census-key".into()),
        walkscore_api_key: Some("walk-key".into()),
        rentcast_api_key: Some("rent-key".into()),
        hud_api_key: Some("hud-key".into()),
        browser_use_api_key: Some("bu-key".into()),
        permits_base_url: None,
        permits_query: None,
        zippopotam_url: uri.to_string(),
        census_geocoder_url: format!("{uri}/geocoder"),
        census_acs_url: format!("{uri}/acs5"),
        google_places_url: format!("{uri}/places"),
        walkscore_url: uri.to_string(),
        rentcast_url: format!("{uri}/rentcast"),
        hud_url: format!("{uri}/fmr"),
        overpass_url: Some(format!("{uri}/interpreter")),
        overpass_retry_ms: 1,
        browser_use_url: format!("{uri}/browser-use"),
        browser_use_poll_ms: 10,
    }
}

pub(crate) fn sources_for(uri: &str) -> DataSources {
    DataSources::new(providers_for(uri))
}

/// Zippopotam answer for 20001 (Washington, DC)
pub(crate) async fn mount_geocode_20001(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/us/20001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "places": [{
                "place name": "Washington",
                "state abbreviation": "DC",
                "latitude": "38.9122",
                "longitude": "-77.0177"
            }]
        })))
        .mount(server)
        .await;
}

/// Census geocoder answer placing 20001 in DC county 001
pub(crate) async fn mount_geo_profile_20001(server: &MockServer) {
    mount_geocode_20001(server).await;
    Mock::given(method("GET"))
        .and(path("/geocoder/geographies/coordinates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"geographies": {
                "Counties": [{"NAME": "District of Columbia", "COUNTY": "001", "STATE": "11"}],
                "Census Tracts": [{"GEOID": "11001004702", "NAME": "Census Tract 47.02"}],
                "Metropolitan Statistical Areas": [{"CBSA": "47900", "NAME": "Washington-Arlington-Alexandria, DC-VA-MD-WV Metro Area"}]
            }}
        })))
        .mount(server)
        .await;
}

/// Matches Overpass requests whose `data` query contains `needle`
pub(crate) struct OverpassQueryContains(pub &'static str);

impl wiremock::Match for OverpassQueryContains {
    fn matches(&self, request: &wiremock::Request) -> bool {
        request
            .url
            .query_pairs()
            .any(|(k, v)| k == "data" && v.contains(self.0))
    }
}
