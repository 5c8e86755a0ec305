//! ReAct main loop
//!
//! Plan -> Act (tool or delegate) -> Observe -> next Plan, until the model answers in prose or
//! the step cap is hit. Recovery turns malformed JSON, unknown tools and failed data sources
//! into a prompt for the next round; cancellation stops the question at the next await.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine, MAX_JSON_RETRIES};
use crate::memory::Message;
use crate::react::delegation::{
    allowed_names, find_analyst, parse_delegate_args, Analyst, DELEGATE_TOOL,
};
use crate::react::planner::{parse_llm_output, Planner, PlannerOutput, ToolCall};
use crate::react::ReactEvent;
use crate::tools::{tool_call_schema_json, ToolExecutor};

pub const DEFAULT_MAX_STEPS: usize = 14;
/// Characters per MessageChunk when replaying the final answer
const CHUNK_CHARS: usize = 24;

#[derive(Debug)]
pub struct ReactResult {
    pub response: String,
    /// Model calls made for this question, nested analysts excluded
    pub steps: usize,
    pub messages: Vec<Message>,
}

/// Everything one question needs; nested analyst runs are built from a copy of this
pub struct ReactSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub recovery: &'a RecoveryEngine,
    pub cancel_token: CancellationToken,
    pub max_steps: usize,
    pub event_tx: Option<&'a UnboundedSender<ReactEvent>>,
    /// Replaces the planner's base prompt (analyst roles)
    pub system_prompt_override: Option<&'a str>,
    /// Restricts callable tools; None allows every registered tool
    pub allowed_tools: Option<&'a [String]>,
    /// Analysts reachable via `delegate`; empty disables delegation
    pub analysts: &'a [Analyst],
    /// Appended to the system prompt (active location summary)
    pub context_block: Option<&'a str>,
    depth: usize,
}

impl<'a> ReactSession<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        recovery: &'a RecoveryEngine,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            recovery,
            cancel_token,
            max_steps: DEFAULT_MAX_STEPS,
            event_tx: None,
            system_prompt_override: None,
            allowed_tools: None,
            analysts: &[],
            context_block: None,
            depth: 0,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_system_prompt(mut self, prompt: &'a str) -> Self {
        self.system_prompt_override = Some(prompt);
        self
    }

    pub fn with_allowed_tools(mut self, tools: &'a [String]) -> Self {
        self.allowed_tools = Some(tools);
        self
    }

    pub fn with_analysts(mut self, analysts: &'a [Analyst]) -> Self {
        self.analysts = analysts;
        self
    }

    pub fn with_context(mut self, context: &'a str) -> Self {
        self.context_block = Some(context);
        self
    }

    fn is_nested(&self) -> bool {
        self.depth > 0
    }

    fn tool_allowed(&self, name: &str) -> bool {
        match self.allowed_tools {
            Some(allowed) => allowed.iter().any(|t| t == name),
            None => self.executor.get_tool(name).is_some(),
        }
    }

    fn send(&self, ev: ReactEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn system_prompt(&self) -> String {
        let base = self
            .system_prompt_override
            .unwrap_or_else(|| self.planner.base_system_prompt());
        let mut system = format!(
            "{base}\n\n## Available tools\n{}\n\n## Tool call format\n\
            To call a tool reply with exactly one JSON object matching this schema and nothing else:\n{}\n\
            When you have enough information, reply with the final answer in Markdown and no JSON.",
            self.executor.registry().to_schema_json(self.allowed_tools),
            tool_call_schema_json(),
        );
        if !self.analysts.is_empty() {
            system.push_str(&format!(
                "\n\n## Delegation\nHand a focused sub-question to an analyst with \
                {{\"tool\": \"{DELEGATE_TOOL}\", \"args\": {{\"analyst\": \"<name>\", \"task\": \"<what to find out>\"}}}}.\n"
            ));
            for analyst in self.analysts {
                system.push_str(&format!("- {}: {}\n", analyst.name, analyst.description));
            }
        }
        if let Some(context) = self.context_block {
            system.push_str("\n\n");
            system.push_str(context);
        }
        system
    }
}

/// Boxed so the loop can await a nested copy of itself
fn run_nested<'b>(
    session: &'b ReactSession<'b>,
    task: &'b str,
) -> Pin<Box<dyn Future<Output = Result<ReactResult, AgentError>> + 'b>> {
    Box::pin(react_loop(session, Vec::new(), task))
}

/// Run one question. `history` holds prior turns; the new user message is appended to it.
pub async fn react_loop(
    session: &ReactSession<'_>,
    history: Vec<Message>,
    user_input: &str,
) -> Result<ReactResult, AgentError> {
    let planner = session.planner;
    let recovery = session.recovery;
    let cancel_token = session.cancel_token.clone();

    let mut messages = history;
    messages.push(Message::user(user_input.to_string()));
    let system = session.system_prompt();

    let (init_prompt, init_completion, _) = planner.token_usage();
    let mut step = 0;
    let mut json_retries = 0;
    let mut last_llm_output = String::new();

    loop {
        if cancel_token.is_cancelled() {
            session.send(ReactEvent::Error {
                text: "Cancelled by user".to_string(),
            });
            return Err(AgentError::Cancelled);
        }

        if step >= session.max_steps {
            tracing::warn!(max_steps = session.max_steps, "step limit reached");
            return Ok(ReactResult {
                response: format!(
                    "Reached the step limit ({}) before a final answer. Last model output:\n{}",
                    session.max_steps, last_llm_output
                ),
                steps: step,
                messages,
            });
        }

        step += 1;
        if !session.is_nested() {
            session.send(ReactEvent::StepUpdate {
                step,
                max_steps: session.max_steps,
            });
        }
        session.send(ReactEvent::Thinking);

        let planned = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => Err(AgentError::Cancelled),
            out = planner.plan_with_system(&messages, &system) => out,
        };
        let output = match planned {
            Ok(o) => o,
            Err(AgentError::Cancelled) => {
                session.send(ReactEvent::Error {
                    text: "Cancelled by user".to_string(),
                });
                return Err(AgentError::Cancelled);
            }
            Err(e) => match recovery.handle(&e) {
                RecoveryAction::RetryWithPrompt(prompt) => {
                    emit_recovery(session, "RetryWithPrompt", &prompt);
                    messages.push(Message::user(prompt));
                    continue;
                }
                RecoveryAction::AskUser(msg) => {
                    emit_recovery(session, "AskUser", &msg);
                    session.send(ReactEvent::Error { text: msg });
                    return Err(e);
                }
                RecoveryAction::Abort => {
                    emit_recovery(session, "Abort", &e.to_string());
                    session.send(ReactEvent::Error { text: e.to_string() });
                    return Err(e);
                }
            },
        };
        last_llm_output = output.clone();

        let call = match parse_llm_output(&output) {
            Ok(PlannerOutput::Response(resp)) => {
                if !session.is_nested() {
                    stream_answer(session, &resp);
                    let (cur_prompt, cur_completion, _) = planner.token_usage();
                    let prompt_tokens = cur_prompt.saturating_sub(init_prompt);
                    let completion_tokens = cur_completion.saturating_sub(init_completion);
                    session.send(ReactEvent::TokenUsage {
                        prompt_tokens,
                        completion_tokens,
                        total_tokens: prompt_tokens + completion_tokens,
                    });
                }
                messages.push(Message::assistant(resp.clone()));
                return Ok(ReactResult {
                    response: resp,
                    steps: step,
                    messages,
                });
            }
            Ok(PlannerOutput::ToolCall(call)) => call,
            Err(e) => {
                json_retries += 1;
                if json_retries > MAX_JSON_RETRIES {
                    session.send(ReactEvent::Error { text: e.to_string() });
                    return Err(e);
                }
                if let RecoveryAction::RetryWithPrompt(prompt) = recovery.handle(&e) {
                    emit_recovery(session, "RetryWithPrompt", &prompt);
                    messages.push(Message::assistant(output));
                    messages.push(Message::user(prompt));
                }
                continue;
            }
        };

        let (observation, nested_steps) =
            observe(session, &call, session.max_steps.saturating_sub(step)).await?;
        step += nested_steps;
        messages.push(Message::assistant(output));
        messages.push(Message::user(observation));
    }
}

/// Execute a tool call (or delegation) and render what the model sees next, with the
/// number of steps a delegated analyst spent out of `remaining`
async fn observe(
    session: &ReactSession<'_>,
    call: &ToolCall,
    remaining: usize,
) -> Result<(String, usize), AgentError> {
    if call.tool == DELEGATE_TOOL && !session.analysts.is_empty() {
        return delegate(session, &call.args, remaining).await;
    }

    if !session.tool_allowed(&call.tool) {
        let err = AgentError::HallucinatedTool(call.tool.clone());
        tracing::warn!(tool = %call.tool, "rejected tool call");
        return recover_observation(session, err).map(|obs| (obs, 0));
    }

    let args = if call.args.is_null() {
        Value::Object(Default::default())
    } else {
        call.args.clone()
    };
    let executed = tokio::select! {
        biased;
        _ = session.cancel_token.cancelled() => Err(AgentError::Cancelled),
        out = session.executor.execute(&call.tool, args) => out,
    };
    let observation = match executed {
        Ok(result) => format!("Observation from {}:\n{}", call.tool, result),
        Err(err) => recover_observation(session, err)?,
    };
    Ok((observation, 0))
}

fn recover_observation(session: &ReactSession<'_>, err: AgentError) -> Result<String, AgentError> {
    match session.recovery.handle(&err) {
        RecoveryAction::RetryWithPrompt(prompt) => {
            emit_recovery(session, "RetryWithPrompt", &prompt);
            Ok(prompt)
        }
        RecoveryAction::AskUser(msg) => {
            emit_recovery(session, "AskUser", &msg);
            Err(err)
        }
        RecoveryAction::Abort => Err(err),
    }
}

/// Nested analysts draw on the caller's remaining step budget
async fn delegate(
    session: &ReactSession<'_>,
    args: &Value,
    remaining: usize,
) -> Result<(String, usize), AgentError> {
    let allowed = allowed_names(session.analysts).join(", ");
    let Some(request) = parse_delegate_args(args) else {
        return Ok((
            format!(
                "Error: {DELEGATE_TOOL} needs {{\"analyst\": <name>, \"task\": <text>}}. \
                Only these analysts are allowed: {allowed}."
            ),
            0,
        ));
    };
    let Some(analyst) = find_analyst(session.analysts, &request.analyst) else {
        tracing::warn!(analyst = %request.analyst, "delegation denied");
        return Ok((
            format!(
                "Error: analyst '{}' is not available. Only these analysts are allowed: {allowed}.",
                request.analyst
            ),
            0,
        ));
    };
    if remaining == 0 {
        return Ok((
            format!(
                "Error: no steps left for the {} analyst. Answer with the data you have.",
                analyst.name
            ),
            0,
        ));
    }

    tracing::info!(analyst = %analyst.name, "delegating");
    session.send(ReactEvent::Delegation {
        analyst: analyst.name.clone(),
    });
    let nested = ReactSession {
        planner: session.planner,
        executor: session.executor,
        recovery: session.recovery,
        cancel_token: session.cancel_token.clone(),
        max_steps: remaining,
        event_tx: session.event_tx,
        system_prompt_override: Some(&analyst.prompt),
        allowed_tools: analyst.allowed_tools(),
        analysts: &[],
        context_block: session.context_block,
        depth: session.depth + 1,
    };
    match run_nested(&nested, &request.task).await {
        Ok(result) => Ok((
            format!("Report from the {} analyst:\n{}", analyst.name, result.response),
            result.steps,
        )),
        Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
        Err(e) => Ok((
            format!(
                "Error: the {} analyst failed ({e}). Continue without it and lower the confidence.",
                analyst.name
            ),
            1,
        )),
    }
}

fn emit_recovery(session: &ReactSession<'_>, action: &str, detail: &str) {
    tracing::debug!(action, "recovery");
    session.send(ReactEvent::Recovery {
        action: action.to_string(),
        detail: detail.to_string(),
    });
}

fn stream_answer(session: &ReactSession<'_>, resp: &str) {
    let chars: Vec<char> = resp.chars().collect();
    for chunk in chars.chunks(CHUNK_CHARS) {
        session.send(ReactEvent::MessageChunk {
            text: chunk.iter().collect(),
        });
    }
    session.send(ReactEvent::MessageDone);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::llm::MockLlmClient;
    use crate::memory::Role;
    use crate::observability::ToolLedger;
    use crate::tools::{Tool, ToolFailure, ToolRegistry};

    struct Population;

    #[async_trait]
    impl Tool for Population {
        fn name(&self) -> &str {
            "get_population"
        }

        fn description(&self) -> &str {
            "Population for a ZIP"
        }

        async fn execute(&self, args: Value) -> Result<Value, ToolFailure> {
            match args["zip_code"].as_str() {
                Some("20001") => Ok(json!({"zip_code": "20001", "population": 43000})),
                _ => Err(ToolFailure::new("invalid_zip", json!({"zip_code": args["zip_code"]}))),
            }
        }
    }

    struct Fixture {
        llm: Arc<MockLlmClient>,
        planner: Planner,
        executor: ToolExecutor,
        recovery: RecoveryEngine,
    }

    fn fixture(replies: Vec<&str>) -> Fixture {
        let llm = Arc::new(MockLlmClient::scripted(replies));
        let mut registry = ToolRegistry::new();
        registry.register(Population);
        Fixture {
            planner: Planner::new(llm.clone(), "You are a test analyst."),
            llm,
            executor: ToolExecutor::new(registry, Arc::new(ToolLedger::new()), 5),
            recovery: RecoveryEngine::new(),
        }
    }

    fn last_user(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn tool_result_is_fed_back_before_the_answer() {
        let f = fixture(vec![
            r#"{"tool": "get_population", "args": {"zip_code": "20001"}}"#,
            "About 43,000 people live here.\n\nSources: test · Confidence: high",
        ]);
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new());
        let result = react_loop(&session, Vec::new(), "How many people?").await.unwrap();

        assert_eq!(result.steps, 2);
        assert!(result.response.starts_with("About 43,000"));
        let requests = f.llm.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0][0].content.contains("get_population"));
        let observation = last_user(&requests[1]);
        assert!(observation.starts_with("Observation from get_population:"));
        assert!(observation.contains("43000"));
    }

    #[tokio::test]
    async fn failed_tool_becomes_an_error_observation() {
        let f = fixture(vec![
            r#"{"tool": "get_population", "args": {"zip_code": "99999"}}"#,
            "No data.\n\nSources: none · Confidence: low",
        ]);
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new());
        react_loop(&session, Vec::new(), "Population of 99999?").await.unwrap();

        let observation = last_user(&f.llm.requests()[1]);
        assert!(observation.starts_with("Error: "));
        assert!(observation.contains("invalid_zip"));
        assert_eq!(f.executor.ledger().pop_errors().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected_and_retried() {
        let f = fixture(vec![
            r#"{"tool": "get_weather", "args": {}}"#,
            "Done.\n\nSources: none · Confidence: low",
        ]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new())
            .with_event_tx(&tx);
        let result = react_loop(&session, Vec::new(), "Weather?").await.unwrap();

        assert_eq!(result.response, "Done.\n\nSources: none · Confidence: low");
        assert!(last_user(&f.llm.requests()[1]).contains("get_weather"));
        assert_eq!(f.executor.ledger().call_count(), 0);

        let mut saw_recovery = false;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, ReactEvent::Recovery { ref action, .. } if action == "RetryWithPrompt") {
                saw_recovery = true;
            }
        }
        assert!(saw_recovery);
    }

    #[tokio::test]
    async fn repeated_bad_json_gives_up() {
        let bad = r#"{"tool": "get_population", "args": {"zip_code": }"#;
        let f = fixture(vec![bad, bad, bad]);
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new());
        let err = react_loop(&session, Vec::new(), "Population?").await.unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
        assert_eq!(f.llm.requests().len(), MAX_JSON_RETRIES + 1);
    }

    #[tokio::test]
    async fn step_limit_returns_last_output() {
        let call = r#"{"tool": "get_population", "args": {"zip_code": "20001"}}"#;
        let f = fixture(vec![call, call, call]);
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new())
            .with_max_steps(2);
        let result = react_loop(&session, Vec::new(), "Loop forever").await.unwrap();
        assert_eq!(result.steps, 2);
        assert!(result.response.starts_with("Reached the step limit (2)"));
        assert!(result.response.contains("get_population"));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_planning() {
        let f = fixture(vec!["never used"]);
        let token = CancellationToken::new();
        token.cancel();
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, token);
        let err = react_loop(&session, Vec::new(), "Hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(f.llm.requests().is_empty());
    }

    #[tokio::test]
    async fn delegation_runs_a_restricted_analyst() {
        let f = fixture(vec![
            r#"{"tool": "delegate", "args": {"analyst": "people", "task": "Population of 20001"}}"#,
            r#"{"tool": "get_population", "args": {"zip_code": "20001"}}"#,
            "Analyst says 43,000.",
            "Final: 43,000 residents.\n\nSources: test · Confidence: high",
        ]);
        let roster = vec![Analyst::new(
            "people",
            "Population questions",
            "You are the people analyst.",
            &["get_population"],
        )];
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new())
            .with_analysts(&roster)
            .with_event_tx(&tx);
        let result = react_loop(&session, Vec::new(), "How many people?").await.unwrap();

        assert!(result.response.starts_with("Final: 43,000"));
        assert_eq!(result.steps, 4);
        let requests = f.llm.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[1][0].content.starts_with("You are the people analyst."));
        assert!(!requests[1][0].content.contains("## Delegation"));
        assert_eq!(last_user(&requests[1]), "Population of 20001");
        assert!(last_user(&requests[3]).starts_with("Report from the people analyst:\nAnalyst says 43,000."));

        let mut delegated = Vec::new();
        let mut done = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                ReactEvent::Delegation { analyst } => delegated.push(analyst),
                ReactEvent::MessageDone => done += 1,
                _ => {}
            }
        }
        assert_eq!(delegated, vec!["people"]);
        assert_eq!(done, 1);
    }

    #[tokio::test]
    async fn analyst_steps_count_against_the_caller() {
        let call = r#"{"tool": "get_population", "args": {"zip_code": "20001"}}"#;
        let f = fixture(vec![
            r#"{"tool": "delegate", "args": {"analyst": "people", "task": "Keep counting"}}"#,
            call,
            call,
            call,
            call,
        ]);
        let roster = vec![Analyst::new("people", "", "You are the people analyst.", &["get_population"])];
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new())
            .with_analysts(&roster)
            .with_max_steps(3);
        let result = react_loop(&session, Vec::new(), "How many people?").await.unwrap();

        assert_eq!(f.llm.requests().len(), 3);
        assert_eq!(result.steps, 3);
        assert!(result.response.starts_with("Reached the step limit (3)"));
    }

    #[tokio::test]
    async fn unknown_analyst_is_denied_with_allowed_list() {
        let f = fixture(vec![
            r#"{"tool": "delegate", "args": {"analyst": "weather", "task": "Forecast"}}"#,
            "Skipped.\n\nSources: none · Confidence: low",
        ]);
        let roster = vec![
            Analyst::new("noise", "", "", &[]),
            Analyst::new("crime", "", "", &[]),
        ];
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new())
            .with_analysts(&roster);
        react_loop(&session, Vec::new(), "Weather?").await.unwrap();

        let observation = last_user(&f.llm.requests()[1]);
        assert!(observation.contains("'weather' is not available"));
        assert!(observation.contains("crime, noise"));
    }

    #[tokio::test]
    async fn history_and_context_reach_the_model() {
        let f = fixture(vec!["Sure.\n\nSources: none · Confidence: low"]);
        let history = vec![Message::user("earlier"), Message::assistant("earlier answer")];
        let session = ReactSession::new(&f.planner, &f.executor, &f.recovery, CancellationToken::new())
            .with_context("Active location: Washington, DC (20001)");
        react_loop(&session, history, "now").await.unwrap();

        let request = &f.llm.requests()[0];
        assert_eq!(request.len(), 4);
        assert!(request[0].content.ends_with("Active location: Washington, DC (20001)"));
        assert_eq!(request[1].content, "earlier");
        assert_eq!(request[3].content, "now");
    }
}
