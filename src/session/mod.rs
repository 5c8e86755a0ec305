//! Session state: loaded locations, the active ZIP and recent turns
//!
//! Locations keep insertion order. Loading a location goes through the tool ledger so the
//! display and the failure report treat it like any other tool call.

pub mod compare;

use std::future::Future;

use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::memory::ConversationMemory;
use crate::observability::{CallStatus, ToolLedger};
use crate::tools::{
    CensusDemographics, CrimeStats, DataSources, GeoProfile, HousingPrices, ToolFailure,
    WalkScores,
};

pub use compare::{compare_rows, ensure_compare_data, CompareRow};

#[derive(Debug, Clone, Serialize)]
pub struct LocationContext {
    pub zip_code: String,
    pub label: String,
    pub geo: GeoProfile,
    pub census: Option<CensusDemographics>,
    pub walkscore: Option<WalkScores>,
    pub housing: Option<HousingPrices>,
    pub crime: Option<CrimeStats>,
}

/// Run `fut` as a ledger-tracked call; a failure payload is recorded against that call
pub(crate) async fn tracked<T, F>(
    ledger: &ToolLedger,
    tool: &str,
    args: Value,
    fut: F,
) -> Result<T, ToolFailure>
where
    F: Future<Output = Result<T, ToolFailure>>,
{
    let call_id = ledger.start_call(tool, &args);
    match fut.await {
        Ok(value) => {
            ledger.finish_call(call_id, CallStatus::Ok);
            Ok(value)
        }
        Err(failure) => {
            ledger.finish_call(call_id, CallStatus::Error);
            ledger.record_error(failure.payload(), Some(call_id));
            Err(failure)
        }
    }
}

/// Resolve `fut` unless `cancel` fires first
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, AgentError>
where
    F: Future<Output = Result<T, AgentError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        out = fut => out,
    }
}

/// Geo profile is required; census and walk score failures are recorded and skipped.
/// Returns `AgentError::Cancelled` as soon as `cancel` fires.
pub async fn load_location(
    sources: &DataSources,
    ledger: &ToolLedger,
    zip_code: &str,
    cancel: &CancellationToken,
) -> Result<LocationContext, AgentError> {
    until_cancelled(cancel, fetch_location(sources, ledger, zip_code)).await
}

async fn fetch_location(
    sources: &DataSources,
    ledger: &ToolLedger,
    zip_code: &str,
) -> Result<LocationContext, AgentError> {
    let args = json!({ "zip_code": zip_code });
    let geo = tracked(
        ledger,
        "get_geo_profile",
        args.clone(),
        sources.resolve_geo_profile(zip_code),
    )
    .await
    .map_err(|_| AgentError::Location("Unable to geocode location.".to_string()))?;

    let census = tracked(
        ledger,
        "get_census_demographics",
        args,
        sources.fetch_census_demographics(zip_code),
    )
    .await
    .ok();

    let address = format!(
        "ZIP {zip_code} {} {}",
        geo.city.as_deref().unwrap_or_default(),
        geo.state.as_deref().unwrap_or_default()
    );
    let walkscore = tracked(
        ledger,
        "get_walkscore",
        json!({ "latitude": geo.latitude, "longitude": geo.longitude, "address": address }),
        sources.fetch_walkscore(Some(geo.latitude), Some(geo.longitude), &address),
    )
    .await
    .ok();

    tracing::info!(zip = %zip_code, census = census.is_some(), walkscore = walkscore.is_some(), "location loaded");
    Ok(LocationContext {
        zip_code: zip_code.to_string(),
        label: geo.label(),
        geo,
        census,
        walkscore,
        housing: None,
        crime: None,
    })
}

/// 1234567 -> "1,234,567"
pub fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

pub struct SessionState {
    contexts: Vec<LocationContext>,
    current_zip: Option<String>,
    pub history: ConversationMemory,
}

impl SessionState {
    pub fn new(max_turns: usize) -> Self {
        Self {
            contexts: Vec::new(),
            current_zip: None,
            history: ConversationMemory::new(max_turns),
        }
    }

    pub fn contains(&self, zip_code: &str) -> bool {
        self.get(zip_code).is_some()
    }

    pub fn get(&self, zip_code: &str) -> Option<&LocationContext> {
        self.contexts.iter().find(|c| c.zip_code == zip_code)
    }

    pub fn get_mut(&mut self, zip_code: &str) -> Option<&mut LocationContext> {
        self.contexts.iter_mut().find(|c| c.zip_code == zip_code)
    }

    /// Replaces an existing context for the same ZIP in place
    pub fn insert(&mut self, ctx: LocationContext) {
        match self.get_mut(&ctx.zip_code) {
            Some(slot) => *slot = ctx,
            None => self.contexts.push(ctx),
        }
    }

    pub fn set_active(&mut self, zip_code: &str) {
        self.current_zip = Some(zip_code.to_string());
    }

    pub fn current_zip(&self) -> Option<&str> {
        self.current_zip.as_deref()
    }

    pub fn active(&self) -> Option<&LocationContext> {
        self.current_zip.as_deref().and_then(|z| self.get(z))
    }

    pub fn locations(&self) -> &[LocationContext] {
        &self.contexts
    }

    pub fn clear(&mut self) {
        self.contexts.clear();
        self.current_zip = None;
        self.history.clear();
    }

    /// Location block handed to the model with every question
    pub fn summary(&self) -> String {
        let mut lines = vec![match &self.current_zip {
            Some(zip) => format!("Active location: {zip}"),
            None => "Active location: none (set a ZIP to load a location)".to_string(),
        }];
        for ctx in &self.contexts {
            let mut line = format!("- {}: {}", ctx.zip_code, ctx.label);
            if let Some(walk) = ctx.walkscore.as_ref().and_then(|w| w.walkscore) {
                line.push_str(&format!(" | Walk Score {walk}"));
            }
            if let Some(income) = ctx
                .census
                .as_ref()
                .and_then(|c| c.median_household_income)
                .filter(|i| *i != 0)
            {
                line.push_str(&format!(" | Income ${}", thousands(income)));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// One-line status shown above the prompt; None when nothing is loaded
    pub fn context_line(&self) -> Option<String> {
        if let Some(ctx) = self.active() {
            let mut parts = Vec::new();
            if let Some(pop) = ctx.census.as_ref().and_then(|c| c.population).filter(|p| *p != 0) {
                parts.push(format!("Pop: {}", thousands(pop)));
            }
            if let Some(walk) = ctx.walkscore.as_ref().and_then(|w| w.walkscore) {
                parts.push(format!("Walk Score: {walk}"));
            }
            let suffix = if parts.is_empty() {
                "Basics unavailable".to_string()
            } else {
                parts.join(" · ")
            };
            return Some(format!("📍 {} ({}) · {suffix}", ctx.label, ctx.zip_code));
        }
        if self.contexts.is_empty() {
            return None;
        }
        let items: Vec<String> = self
            .contexts
            .iter()
            .map(|c| format!("{} {}", c.geo.state.as_deref().unwrap_or("??"), c.zip_code))
            .collect();
        Some(format!("📍 {}", items.join(" · ")))
    }
}
