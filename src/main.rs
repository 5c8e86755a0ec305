//! Liveable entry point: load .env and config, validate keys, then run the REPL.

use std::sync::Arc;

use anyhow::Context;
use liveable::agent::create_agent_components;
use liveable::config::load_config;
use liveable::llm::create_llm_from_config;
use liveable::observability::{self, ToolLedger};
use liveable::repl::Repl;
use liveable::tools::DataSources;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    observability::init();

    let cfg = load_config(std::env::args().nth(1).map(Into::into))
        .context("Failed to load configuration")?;

    let missing = cfg.missing_required();
    if !missing.is_empty() {
        eprintln!("Missing required environment variables: {}", missing.join(", "));
        if cfg.app.strict_env {
            std::process::exit(1);
        }
    }

    let session_id = cfg
        .app
        .session_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..16].to_string());
    let user_id = cfg
        .app
        .user_id
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "cli-user".to_string());
    let span = tracing::info_span!("session", %session_id, %user_id);
    let _guard = span.enter();

    let llm = create_llm_from_config(&cfg).context("Failed to create LLM client")?;
    let sources = Arc::new(DataSources::new(cfg.providers.clone()));
    let ledger = Arc::new(ToolLedger::new());
    let components = create_agent_components(&cfg, llm, sources.clone(), ledger);

    let mut repl = Repl::new(
        components,
        sources,
        cfg.app.max_context_turns,
        cfg.app.verbose,
    );
    repl.run().await.context("REPL failed")?;
    Ok(())
}
