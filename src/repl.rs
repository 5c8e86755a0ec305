//! Interactive loop: command parsing, location loading and question dispatch
//!
//! Ctrl-C while a question or a location load runs cancels it; at the prompt it exits.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::agent::{run_chat_query, AgentComponents, ChatAnswer};
use crate::core::AgentError;
use crate::observability::ToolLedger;
use crate::react::ReactEvent;
use crate::session::{compare_rows, ensure_compare_data, load_location, SessionState};
use crate::tools::shared::{find_zips, is_valid_zip};
use crate::tools::DataSources;
use crate::ui::{Console, Tone};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Empty,
    Exit,
    Help,
    Locations,
    Clear,
    /// None when the argument holds no 5-digit ZIP
    Set(Option<String>),
    /// None when fewer than two valid ZIPs follow
    Compare(Option<(String, String)>),
    Question(String),
}

pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    match line.to_lowercase().as_str() {
        "exit" | "quit" | "q" | "/exit" | "/quit" => return ReplCommand::Exit,
        "/help" => return ReplCommand::Help,
        "/locations" => return ReplCommand::Locations,
        "/clear" => return ReplCommand::Clear,
        _ => {}
    }
    if line.starts_with("/set") {
        return ReplCommand::Set(find_zips(line).into_iter().next());
    }
    if line.starts_with("/compare") {
        let parts: Vec<&str> = line.split_whitespace().collect();
        return match (parts.get(1), parts.get(2)) {
            (Some(a), Some(b)) if is_valid_zip(a) && is_valid_zip(b) => {
                ReplCommand::Compare(Some((a.to_string(), b.to_string())))
            }
            _ => ReplCommand::Compare(None),
        };
    }
    ReplCommand::Question(line.to_string())
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Await `fut` while rendering events; Ctrl-C cancels `cancel`, which `fut` must observe
async fn drive<F: Future>(
    fut: F,
    events: &mut UnboundedReceiver<ReactEvent>,
    console: &mut Console,
    cancel: &CancellationToken,
) -> F::Output {
    tokio::pin!(fut);
    let output = loop {
        tokio::select! {
            out = &mut fut => break out,
            Some(ev) = events.recv() => console.handle_event(&ev),
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => cancel.cancel(),
        }
    };
    while let Ok(ev) = events.try_recv() {
        console.handle_event(&ev);
    }
    output
}

pub struct Repl {
    components: AgentComponents,
    sources: Arc<DataSources>,
    ledger: Arc<ToolLedger>,
    state: SessionState,
    console: Console,
    event_tx: UnboundedSender<ReactEvent>,
    events: UnboundedReceiver<ReactEvent>,
}

impl Repl {
    pub fn new(
        components: AgentComponents,
        sources: Arc<DataSources>,
        max_turns: usize,
        verbose: bool,
    ) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let ledger = components.executor.ledger().clone();
        ledger.set_sink(Some(event_tx.clone()));
        Self {
            components,
            sources,
            ledger,
            state: SessionState::new(max_turns),
            console: Console::new(verbose),
            event_tx,
            events,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.console.header(env!("CARGO_PKG_VERSION"));
        self.console
            .paint(Tone::Dim, "Ask a question, or set a location with /set 20001");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            self.console.maybe_print_context(self.state.context_line());
            print!("\n> ");
            std::io::Write::flush(&mut std::io::stdout())?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };
            if self.dispatch(&line).await == Flow::Exit {
                break;
            }
        }
        self.console.paint(Tone::Plain, "\nBye!");
        Ok(())
    }

    pub async fn dispatch(&mut self, line: &str) -> Flow {
        match parse_command(line) {
            ReplCommand::Empty => {}
            ReplCommand::Exit => return Flow::Exit,
            ReplCommand::Help => self.console.help(),
            ReplCommand::Locations => self.console.locations(self.state.locations()),
            ReplCommand::Clear => {
                self.state.clear();
                self.console.paint(Tone::Plain, "Session cleared.");
            }
            ReplCommand::Set(None) => self.console.paint(Tone::Plain, "Usage: /set 5-digit-zip"),
            ReplCommand::Set(Some(zip)) => {
                self.ledger.pop_errors();
                match self.ensure_location(&zip, &CancellationToken::new()).await {
                    Ok(()) => {
                        self.state.set_active(&zip);
                        self.console.maybe_print_context(self.state.context_line());
                    }
                    Err(AgentError::Cancelled) => self.console.paint(Tone::Dim, "Cancelled."),
                    Err(e) => self
                        .console
                        .paint(Tone::Error, &format!("Failed to load location: {e}")),
                }
            }
            ReplCommand::Compare(None) => {
                self.console.paint(Tone::Plain, "Usage: /compare ZIP1 ZIP2")
            }
            ReplCommand::Compare(Some((a, b))) => self.compare(&a, &b).await,
            ReplCommand::Question(query) => {
                let _ = self.ask(&query).await;
            }
        }
        Flow::Continue
    }

    async fn ensure_location(
        &mut self,
        zip: &str,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        if self.state.contains(zip) {
            return Ok(());
        }
        let ctx = drive(
            load_location(&self.sources, &self.ledger, zip, cancel),
            &mut self.events,
            &mut self.console,
            cancel,
        )
        .await?;
        self.state.insert(ctx);
        Ok(())
    }

    async fn compare(&mut self, zip_a: &str, zip_b: &str) {
        let cancel = CancellationToken::new();
        for zip in [zip_a, zip_b] {
            match self.ensure_location(zip, &cancel).await {
                Ok(()) => {}
                Err(AgentError::Cancelled) => {
                    self.console.paint(Tone::Dim, "Cancelled.");
                    return;
                }
                Err(e) => self
                    .console
                    .paint(Tone::Error, &format!("Failed to load location {zip}: {e}")),
            }
        }
        if !self.state.contains(zip_a) || !self.state.contains(zip_b) {
            self.console
                .paint(Tone::Plain, "Missing one of the locations. Load it first.");
            return;
        }
        for zip in [zip_a, zip_b] {
            if let Some(ctx) = self.state.get_mut(zip) {
                let filled = drive(
                    ensure_compare_data(&self.sources, &self.ledger, ctx, &cancel),
                    &mut self.events,
                    &mut self.console,
                    &cancel,
                )
                .await;
                if filled.is_err() {
                    self.console.paint(Tone::Dim, "Cancelled.");
                    return;
                }
            }
        }
        if let (Some(a), Some(b)) = (self.state.get(zip_a), self.state.get(zip_b)) {
            let rows = compare_rows(a, b);
            self.console.compare_table(
                &format!("{} ({})", a.label, a.zip_code),
                &format!("{} ({})", b.label, b.zip_code),
                &rows,
            );
        }
    }

    /// Load referenced ZIPs, answer with the session context and record the turn
    pub async fn ask(&mut self, query: &str) -> Result<ChatAnswer, AgentError> {
        let cancel = CancellationToken::new();
        for zip in find_zips(query) {
            match self.ensure_location(&zip, &cancel).await {
                Ok(()) => self.state.set_active(&zip),
                Err(AgentError::Cancelled) => {
                    self.console.paint(Tone::Dim, "Cancelled.");
                    return Err(AgentError::Cancelled);
                }
                Err(e) => self
                    .console
                    .paint(Tone::Error, &format!("Failed to load location {zip}: {e}")),
            }
        }

        let context = self.state.summary();
        let history = self.state.history.turns().to_vec();
        self.ledger.pop_errors();

        self.console.begin_answer();
        let result = drive(
            run_chat_query(
                &self.components,
                query,
                &history,
                Some(&context),
                Some(&self.event_tx),
                cancel.clone(),
            ),
            &mut self.events,
            &mut self.console,
            &cancel,
        )
        .await;
        self.console.end_answer();

        self.console.tool_failures(&self.ledger.pop_errors());
        match &result {
            Ok(answer) => self
                .state
                .history
                .push_turn(query, answer.report_markdown.clone()),
            Err(AgentError::Cancelled) => self.console.paint(Tone::Dim, "Cancelled."),
            Err(e) => {
                tracing::error!(error = %e, "question failed");
                self.console.paint(Tone::Error, &format!("Agent error: {e}"));
            }
        }
        result
    }
}
