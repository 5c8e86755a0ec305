//! Agent runtime: the analyst prompt, the analyst roster and one-question execution
//!
//! `create_agent_components` wires the planner, executor and recovery engine once per process;
//! `run_chat_query` answers a single question with the session context and recent turns.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine};
use crate::llm::LlmClient;
use crate::observability::ToolLedger;
use crate::react::{react_loop, Analyst, Planner, ReactEvent, ReactSession};
use crate::tools::{default_registry, DataSources, ToolExecutor};

pub const SYSTEM_PROMPT: &str = r#"You are a neighborhood analysis assistant. You help people understand neighborhoods by answering their specific questions with real data.

When a user provides a location:
1. Geocode it to get coordinates, city, state and ZIP.
2. Pull basic census demographics and walkability scores.
3. Present a brief one-line summary and invite questions.
If the user provides a non-ZIP location, ask for a 5-digit ZIP code.
If there is no active location in the session context, ask for a 5-digit ZIP code before calling location-specific tools.
If the user asks for a general neighborhood analysis without preferences, ask 2-3 short questions about priorities (budget, property type, school level, commute, noise).

When answering questions:
- Use the tools to gather data on demand. Don't gather everything upfront.
- Always cite your data source and confidence level.
- When data is unavailable or incomplete, say so explicitly. A tool observation starting with "Error:" means that source failed; continue with the rest and lower the confidence.
- When making comparisons, use concrete numbers, not vague qualitative assessments.
- If the user references another location, load it and keep both in context.
- Don't re-fetch data you already looked up in this conversation.
- For value, overpaying, affordability or "best place" questions, ask 1-3 clarifying questions if key details are missing (budget, property type, beds/baths, timeline, commute, school level, noise sensitivity).
- End every response with: "Sources: ... · Confidence: ...".
- You can delegate focused work to analysts (crime, schools, noise, housing, general, topic) to keep your own response concise.
- For amenities, use categories supported by search_nearby_amenities:
  restaurants, bars, nightlife, cafes, gyms, parks, grocery_stores, schools, hospitals,
  transit_stations, pharmacies, libraries, museums, shopping_malls, movie_theaters.
  Use Google Places for ratings and quality signals and search_osm_amenities for coverage counts.
  You can call both to cross-check density against quality. If Google Places fails or a key is missing,
  fall back to search_osm_amenities (counts only).
  search_nearby_amenities routes unsupported categories (universities, fire_stations, police) to OpenStreetMap.
  If you already have coordinates, call search_overpass_amenities directly.
  Normalize primary_school, elementary_school, middle_school, high_school, secondary_school and kindergarten to "schools".
  Use a smaller radius_meters (500-1000) for "nearby" or "walkable" and a larger one (1500-3000) for "in the area".
- There is no web browsing; only the listed tools are available.

Use these tools as needed:
- search_housing_prices for median prices and rent benchmarks (RentCast with HUD FMR fallback)
- search_crime_safety for crime statistics via a hosted browsing agent (city or state level when ZIP data is unavailable)
- search_new_developments for permit pipelines (needs a configured permits endpoint)
- search_noise_proxies for noise risk from airports, rail and major roads (OpenStreetMap, no key)

When using search_crime_safety results:
- Official city or county dashboards and annual reports come first.
- Secondary sources: AreaVibes, Macrotrends, reputable local news citing official stats.
- Cite violent crime rate, property crime rate, unit (per 1,000 or per 100,000), year, and the national comparison when present.

For comparative questions present the data side by side with actual numbers, and note where confidence differs between locations.

Keep responses concise and data-driven. If the data tells a clear story, state it plainly."#;

/// Focused analysts for delegation; the topic analyst exists only when a message is given
pub fn build_analysts(message: Option<&str>) -> Vec<Analyst> {
    let mut analysts = vec![
        Analyst::new(
            "general",
            "General-purpose neighborhood analyst for anything not covered by the others.",
            "You are a general-purpose neighborhood analysis assistant. Use the available \
            neighborhood tools to answer the question with sources and confidence.",
            &[],
        ),
        Analyst::new(
            "crime",
            "Crime and safety analyst: crime stats and safety context.",
            "You are a crime and safety analyst. Retrieve crime data, note its scope \
            (city, state or ZIP) and summarize with clear uncertainty.",
            &["search_crime_safety", "search_osm_amenities"],
        ),
        Analyst::new(
            "schools",
            "Schools and education analyst: school availability and education context.",
            "You analyze schools and education access. Use Google Places for quality and ratings \
            and OSM counts for coverage. Be explicit that Places is not a ratings agency.",
            &["search_nearby_amenities", "search_osm_amenities"],
        ),
        Analyst::new(
            "noise",
            "Noise and environment analyst: noise risk proxies.",
            "You assess noise risk using proximity to airports, rail and major roads. \
            Use the noise proxy tool and summarize the counts found.",
            &["search_noise_proxies"],
        ),
        Analyst::new(
            "housing",
            "Housing market analyst: prices, rents and value context.",
            "You analyze housing market data for a ZIP. Use the RentCast and HUD tools to estimate \
            median prices and rents and highlight data limits.",
            &[
                "search_housing_prices",
                "get_rentcast_market",
                "get_rentcast_sale_listings",
                "get_hud_fmr",
            ],
        ),
    ];
    if let Some(message) = message.map(str::trim).filter(|m| !m.is_empty()) {
        analysts.push(Analyst::new(
            "topic",
            "Flexible specialist for a user-specific topic not covered by the other analysts.",
            format!(
                "You are a flexible specialist. Focus on the user's request and use any relevant \
                tools to gather facts. Provide a short bullet summary with sources and confidence.\n\n\
                User request:\n{message}"
            ),
            &[],
        ));
    }
    analysts
}

/// The question as the model sees it: up to `max_turns` prior turns, then the message
pub fn build_chat_prompt(message: &str, history: &[(String, String)], max_turns: usize) -> String {
    let start = history.len().saturating_sub(max_turns);
    if start == history.len() {
        return format!("User: {message}\nAssistant:");
    }
    let mut lines = vec!["Conversation so far:".to_string()];
    for (question, answer) in &history[start..] {
        lines.push(format!("User: {question}"));
        lines.push(format!("Assistant: {answer}"));
    }
    lines.push(format!("User: {message}"));
    lines.push("Assistant:".to_string());
    lines.join("\n")
}

/// Shared between questions in one process
pub struct AgentComponents {
    pub planner: Planner,
    pub executor: ToolExecutor,
    pub recovery: RecoveryEngine,
    pub max_steps: usize,
    /// Prior turns replayed with each question (`app.max_context_turns`)
    pub history_turns: usize,
}

pub fn create_agent_components(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    sources: Arc<DataSources>,
    ledger: Arc<ToolLedger>,
) -> AgentComponents {
    let registry = default_registry(sources);
    tracing::info!(tools = registry.len(), "tool registry ready");
    AgentComponents {
        planner: Planner::new(llm, SYSTEM_PROMPT),
        executor: ToolExecutor::new(registry, ledger, cfg.tools.tool_timeout_secs),
        recovery: RecoveryEngine::new(),
        max_steps: cfg.llm.max_steps,
        history_turns: cfg.app.max_context_turns,
    }
}

#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub report_markdown: String,
    pub steps: usize,
    /// Tool calls made while answering, analysts included
    pub tool_calls: u64,
}

/// Answer one question. `context` is the session summary ("Active location: ...").
pub async fn run_chat_query(
    components: &AgentComponents,
    message: &str,
    history: &[(String, String)],
    context: Option<&str>,
    event_tx: Option<&UnboundedSender<ReactEvent>>,
    cancel_token: CancellationToken,
) -> Result<ChatAnswer, AgentError> {
    let ledger = components.executor.ledger();
    ledger.reset_counter();

    let analysts = build_analysts(Some(message));
    let context_block = context.map(|c| format!("Session context:\n{c}"));
    let prompt = build_chat_prompt(message, history, components.history_turns);

    let mut session = ReactSession::new(
        &components.planner,
        &components.executor,
        &components.recovery,
        cancel_token,
    )
    .with_max_steps(components.max_steps)
    .with_analysts(&analysts);
    if let Some(tx) = event_tx {
        session = session.with_event_tx(tx);
    }
    if let Some(block) = context_block.as_deref() {
        session = session.with_context(block);
    }

    let result = react_loop(&session, Vec::new(), &prompt).await?;
    let tool_calls = ledger.call_count();
    tracing::info!(steps = result.steps, tool_calls, "question answered");
    Ok(ChatAnswer {
        report_markdown: result.response.trim().to_string(),
        steps: result.steps,
        tool_calls,
    })
}
