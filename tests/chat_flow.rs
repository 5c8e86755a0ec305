//! End-to-end REPL flow against mocked providers and a scripted model

use std::sync::Arc;

use liveable::agent::create_agent_components;
use liveable::config::{AppConfig, ProvidersSection};
use liveable::llm::MockLlmClient;
use liveable::memory::Role;
use liveable::observability::ToolLedger;
use liveable::repl::{Flow, Repl};
use liveable::tools::DataSources;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_providers() -> MockServer {
    let server = MockServer::start().await;
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
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/geocoder/geographies/coordinates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"geographies": {
                "Counties": [{"NAME": "District of Columbia", "COUNTY": "001", "STATE": "11"}]
            }}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/score"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 1,
            "walkscore": 98,
            "description": "Walker's Paradise",
            "transit": {"score": 100},
            "bike": {"score": 85}
        })))
        .mount(&server)
        .await;
    server
}

fn providers(uri: &str) -> ProvidersSection {
    ProvidersSection {
        walkscore_api_key: Some("walk-key".into()),
        zippopotam_url: uri.to_string(),
        census_geocoder_url: format!("{uri}/geocoder"),
        census_acs_url: format!("{uri}/acs5"),
        walkscore_url: uri.to_string(),
        overpass_url: Some(format!("{uri}/interpreter")),
        overpass_retry_ms: 1,
        ..ProvidersSection::default()
    }
}

fn repl_with(uri: &str, llm: Arc<MockLlmClient>) -> Repl {
    let cfg = AppConfig::default();
    let sources = Arc::new(DataSources::new(providers(uri)));
    let components =
        create_agent_components(&cfg, llm, sources.clone(), Arc::new(ToolLedger::new()));
    Repl::new(components, sources, cfg.app.max_context_turns, false)
}

#[tokio::test]
async fn question_loads_zip_and_survives_a_failed_source() {
    let server = mock_providers().await;
    let llm = Arc::new(MockLlmClient::scripted([
        r#"{"tool": "get_census_demographics", "args": {"zip_code": "20001"}}"#,
        "Walk Score is 98; census data is unavailable.\n\nSources: Walk Score · Confidence: medium",
    ]));
    let mut repl = repl_with(&server.uri(), llm.clone());

    let answer = repl.ask("How walkable is 20001?").await.unwrap();
    assert!(answer.report_markdown.starts_with("Walk Score is 98"));
    assert_eq!(answer.tool_calls, 1);

    let state = repl.state();
    assert_eq!(state.current_zip(), Some("20001"));
    assert_eq!(state.locations()[0].label, "Washington, DC");
    assert_eq!(state.history.len(), 1);

    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    let system = &requests[0][0].content;
    assert!(system.contains("Active location: 20001"));
    assert!(system.contains("- 20001: Washington, DC | Walk Score 98"));

    let observation = requests[1]
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default();
    assert!(observation.starts_with("Error: "));
    assert!(observation.contains("missing_api_key"));
}

#[tokio::test]
async fn follow_up_question_carries_history() {
    let server = mock_providers().await;
    let llm = Arc::new(MockLlmClient::scripted([
        "First answer.\n\nSources: none · Confidence: low",
        "Second answer.\n\nSources: none · Confidence: low",
    ]));
    let mut repl = repl_with(&server.uri(), llm.clone());

    assert_eq!(repl.dispatch("/set 20001").await, Flow::Continue);
    assert_eq!(repl.state().current_zip(), Some("20001"));

    repl.ask("Is it noisy?").await.unwrap();
    repl.ask("And parks?").await.unwrap();

    let second = &llm.requests()[1];
    let prompt = &second.last().map(|m| m.content.clone()).unwrap_or_default();
    assert!(prompt.starts_with("Conversation so far:\nUser: Is it noisy?\nAssistant: First answer."));
    assert!(prompt.ends_with("User: And parks?\nAssistant:"));
}

#[tokio::test]
async fn commands_manage_session_state() {
    let server = mock_providers().await;
    let mut repl = repl_with(&server.uri(), Arc::new(MockLlmClient::default()));

    assert_eq!(repl.dispatch("/set 20001").await, Flow::Continue);
    // 99999 is not mocked, so only one location is loaded and no table is drawn
    assert_eq!(repl.dispatch("/compare 20001 99999").await, Flow::Continue);
    assert_eq!(repl.state().locations().len(), 1);

    assert_eq!(repl.dispatch("/clear").await, Flow::Continue);
    assert!(repl.state().locations().is_empty());
    assert!(repl.state().current_zip().is_none());

    assert_eq!(repl.dispatch("quit").await, Flow::Exit);
}
