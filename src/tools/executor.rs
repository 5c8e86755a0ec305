//! Tool executor
//!
//! Owns the ToolRegistry, the per-call timeout and the session's ToolLedger. Each call is
//! timed, recorded in the ledger and written to the audit log as one JSON line; failures
//! become AgentError values whose text is the error payload shown to the model.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::time::timeout;

use crate::core::AgentError;
use crate::observability::{short_json, CallStatus, ToolLedger};
use crate::tools::{Tool, ToolRegistry};

pub struct ToolExecutor {
    registry: ToolRegistry,
    ledger: Arc<ToolLedger>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, ledger: Arc<ToolLedger>, timeout_secs: u64) -> Self {
        Self {
            registry,
            ledger,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Run one tool; Ok carries pretty JSON, Err carries the `{"status":"error",...}` payload
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<String, AgentError> {
        let start = Instant::now();
        let args_preview = short_json(&args, 200);
        let call_id = self.ledger.start_call(tool_name, &args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let outcome = match &result {
            Ok(Ok(_)) => "ok",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let audit = json!({
            "event": "tool_audit",
            "call_id": call_id,
            "tool": tool_name,
            "ok": outcome == "ok",
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(value)) => {
                self.ledger.finish_call(call_id, CallStatus::Ok);
                Ok(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
            }
            Ok(Err(failure)) => {
                self.ledger.finish_call(call_id, CallStatus::Error);
                let payload = failure.payload();
                self.ledger.record_error(payload.clone(), Some(call_id));
                Err(AgentError::ToolExecutionFailed(payload.to_string()))
            }
            Err(_) => {
                self.ledger.finish_call(call_id, CallStatus::Error);
                let payload = json!({
                    "status": "error",
                    "error": "tool_timeout",
                    "details": {"tool": tool_name, "timeout_secs": self.timeout.as_secs()},
                });
                self.ledger.record_error(payload, Some(call_id));
                Err(AgentError::ToolTimeout(tool_name.to_string()))
            }
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<ToolLedger> {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolFailure;
    use async_trait::async_trait;

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "get_walkscore"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<Value, ToolFailure> {
            Err(ToolFailure::new("walkscore_no_data", json!({"status": 2})))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "never finishes in time"
        }

        async fn execute(&self, _args: Value) -> Result<Value, ToolFailure> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn failures_are_recorded_in_the_ledger() {
        let mut registry = ToolRegistry::new();
        registry.register(Failing);
        let ledger = Arc::new(ToolLedger::new());
        let executor = ToolExecutor::new(registry, ledger.clone(), 5);

        let err = executor.execute("get_walkscore", json!({})).await.unwrap_err();
        match err {
            AgentError::ToolExecutionFailed(payload) => {
                assert!(payload.contains("walkscore_no_data"))
            }
            other => panic!("unexpected {other:?}"),
        }
        let errors = ledger.pop_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["error"], "walkscore_no_data");
        assert_eq!(ledger.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_become_tool_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        let ledger = Arc::new(ToolLedger::new());
        let executor = ToolExecutor::new(registry, ledger.clone(), 1);

        let err = executor.execute("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(ref t) if t == "slow"));
        assert_eq!(ledger.pop_errors()[0]["error"], "tool_timeout");
    }
}
