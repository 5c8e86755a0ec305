//! Application config: loaded from config/default.toml and environment variables
//!
//! Load order: TOML file first, then `LIVEABLE__*` environment overrides (double underscore nests, e.g. `LIVEABLE__LLM__PROVIDER=openai`).
//! Provider keys not set in either place fall back to their conventional variables (`CENSUS_API_KEY`, ...).

use std::path::PathBuf;

use serde::Deserialize;

/// Config root (top level of config/default.toml)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub providers: ProvidersSection,
}

/// [app] section: session identity, history window, verbosity
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Prior (question, answer) turns sent with each question
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
    /// Render tool start/end/error lines while answering
    #[serde(default = "default_true")]
    pub verbose: bool,
    /// Refuse to start when required keys are missing
    #[serde(default = "default_true")]
    pub strict_env: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            session_id: None,
            user_id: None,
            max_context_turns: default_max_context_turns(),
            verbose: true,
            strict_env: true,
        }
    }
}

fn default_max_context_turns() -> usize {
    6
}

fn default_true() -> bool {
    true
}

/// [llm] section: backend choice, model, step cap
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// anthropic / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound on plan/act rounds per question
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            max_tokens: default_max_tokens(),
            max_steps: default_max_steps(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    std::env::var("CLAUDE_MODEL").unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string())
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_steps() -> usize {
    14
}

fn default_request_timeout() -> u64 {
    90
}

impl LlmSection {
    /// Key for the selected provider: config first, then ANTHROPIC_API_KEY / OPENAI_API_KEY
    pub fn resolved_api_key(&self) -> Option<String> {
        let env_name = match self.provider.to_lowercase().as_str() {
            "openai" => "OPENAI_API_KEY",
            "anthropic" => "ANTHROPIC_API_KEY",
            _ => return self.api_key.clone(),
        };
        non_empty(self.api_key.clone()).or_else(|| env_var(env_name))
    }
}

/// [tools] section: per-call timeout
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// Timeout for one tool call (seconds); covers all HTTP requests inside it
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    120
}

/// [providers] section: API keys and base URLs for every data source
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersSection {
    pub google_places_api_key: Option<String>,
    pub census_api_key: Option<String>,
    pub walkscore_api_key: Option<String>,
    pub rentcast_api_key: Option<String>,
    pub hud_api_key: Option<String>,
    pub browser_use_api_key: Option<String>,
    /// Socrata/ArcGIS permits endpoint
    pub permits_base_url: Option<String>,
    /// `$where` template; `{zip_code}` and `{city}` are substituted
    pub permits_query: Option<String>,

    #[serde(default = "default_zippopotam_url")]
    pub zippopotam_url: String,
    #[serde(default = "default_census_geocoder_url")]
    pub census_geocoder_url: String,
    #[serde(default = "default_census_acs_url")]
    pub census_acs_url: String,
    #[serde(default = "default_google_places_url")]
    pub google_places_url: String,
    #[serde(default = "default_walkscore_url")]
    pub walkscore_url: String,
    #[serde(default = "default_rentcast_url")]
    pub rentcast_url: String,
    #[serde(default = "default_hud_url")]
    pub hud_url: String,
    pub overpass_url: Option<String>,
    /// Base backoff between Overpass retries (milliseconds); attempt n waits n × this
    #[serde(default = "default_overpass_retry_ms")]
    pub overpass_retry_ms: u64,
    #[serde(default = "default_browser_use_url")]
    pub browser_use_url: String,
    /// Poll interval while a browsing task runs (milliseconds)
    #[serde(default = "default_browser_use_poll_ms")]
    pub browser_use_poll_ms: u64,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            google_places_api_key: None,
            census_api_key: None,
            walkscore_api_key: None,
            rentcast_api_key: None,
            hud_api_key: None,
            browser_use_api_key: None,
            permits_base_url: None,
            permits_query: None,
            zippopotam_url: default_zippopotam_url(),
            census_geocoder_url: default_census_geocoder_url(),
            census_acs_url: default_census_acs_url(),
            google_places_url: default_google_places_url(),
            walkscore_url: default_walkscore_url(),
            rentcast_url: default_rentcast_url(),
            hud_url: default_hud_url(),
            overpass_url: None,
            overpass_retry_ms: default_overpass_retry_ms(),
            browser_use_url: default_browser_use_url(),
            browser_use_poll_ms: default_browser_use_poll_ms(),
        }
    }
}

fn default_zippopotam_url() -> String {
    "https://api.zippopotam.us".to_string()
}

fn default_census_geocoder_url() -> String {
    "https://geocoding.geo.census.gov/geocoder".to_string()
}

fn default_census_acs_url() -> String {
    "https://api.census.gov/data/2022/acs/acs5".to_string()
}

fn default_google_places_url() -> String {
    "https://places.googleapis.com/v1".to_string()
}

fn default_walkscore_url() -> String {
    "https://api.walkscore.com".to_string()
}

fn default_rentcast_url() -> String {
    "https://api.rentcast.io/v1".to_string()
}

fn default_hud_url() -> String {
    "https://www.huduser.gov/hudapi/public/fmr".to_string()
}

fn default_overpass_retry_ms() -> u64 {
    2000
}

fn default_browser_use_url() -> String {
    "https://api.browser-use.com/api/v1".to_string()
}

fn default_browser_use_poll_ms() -> u64 {
    2000
}

pub const DEFAULT_OVERPASS_URL: &str = "https://overpass.private.coffee/api/interpreter";

fn env_var(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ProvidersSection {
    /// Fill unset keys and optional endpoints from the conventional environment variables
    pub fn with_env_fallbacks(mut self) -> Self {
        let fill = |slot: &mut Option<String>, name: &str| {
            if non_empty(slot.clone()).is_none() {
                *slot = env_var(name);
            }
        };
        fill(&mut self.google_places_api_key, "GOOGLE_PLACES_API_KEY");
        fill(&mut self.census_api_key, "CENSUS_API_KEY");
        fill(&mut self.walkscore_api_key, "WALKSCORE_API_KEY");
        fill(&mut self.rentcast_api_key, "RENTCAST_API_KEY");
        fill(&mut self.hud_api_key, "HUD_API_KEY");
        fill(&mut self.browser_use_api_key, "BROWSER_USE_API_KEY");
        fill(&mut self.permits_base_url, "DEV_PERMITS_BASE_URL");
        fill(&mut self.permits_query, "DEV_PERMITS_QUERY");
        fill(&mut self.overpass_url, "OVERPASS_URL");
        self
    }

    pub fn overpass_endpoint(&self) -> &str {
        self.overpass_url.as_deref().unwrap_or(DEFAULT_OVERPASS_URL)
    }
}

impl AppConfig {
    /// Names of required settings that are missing; the LLM key is skipped for the mock provider
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self.llm.provider.to_lowercase().as_str() {
            "mock" => {}
            "openai" if self.llm.resolved_api_key().is_none() => missing.push("OPENAI_API_KEY"),
            "anthropic" if self.llm.resolved_api_key().is_none() => {
                missing.push("ANTHROPIC_API_KEY")
            }
            _ => {}
        }
        if self.providers.google_places_api_key.is_none() {
            missing.push("GOOGLE_PLACES_API_KEY");
        }
        if self.providers.census_api_key.is_none() {
            missing.push("CENSUS_API_KEY");
        }
        if self.providers.walkscore_api_key.is_none() {
            missing.push("WALKSCORE_API_KEY");
        }
        missing
    }
}

/// Load config; `LIVEABLE__*` environment variables override file values
///
/// 1. Look for config/default.toml, ../config/default.toml, default.toml; the first hit is the base source
/// 2. If config_path is given and exists, layer it on top
/// 3. Finally layer `LIVEABLE__*` variables and apply provider env fallbacks
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LIVEABLE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let mut cfg: AppConfig = c.try_deserialize()?;
    cfg.providers = cfg.providers.with_env_fallbacks();
    Ok(cfg)
}
