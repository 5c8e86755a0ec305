//! Liveable: a conversational neighborhood analyst for US ZIP codes
//!
//! Modules:
//! - **agent**: analyst prompt, analyst roster, one-question runtime
//! - **config**: layered configuration (TOML + `LIVEABLE__*` + provider env vars)
//! - **core**: agent errors and the recovery engine
//! - **llm**: LLM client abstraction (Anthropic / OpenAI-compatible / Mock)
//! - **memory**: bounded conversation history
//! - **observability**: tracing setup and the tool-call ledger
//! - **react**: planner, ReAct loop, analyst delegation
//! - **repl**: command parsing and the interactive loop
//! - **session**: loaded locations and `/compare`
//! - **tools**: data-source adapters, registry and executor
//! - **ui**: crossterm console rendering

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod repl;
pub mod session;
pub mod tools;
pub mod ui;
