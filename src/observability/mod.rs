//! Observability: tracing subscriber and the per-session tool-call ledger
//!
//! The ledger hands out call ids, keeps the start time of every call still in flight, and
//! collects error payloads until the REPL drains them after each question.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::react::ReactEvent;

const PREVIEW_LIMIT: usize = 180;

/// Default filter `info`, overridable with RUST_LOG; output goes to stderr
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Ok,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ok => "ok",
            CallStatus::Error => "error",
        }
    }
}

#[derive(Debug)]
struct CallRecord {
    name: String,
    started: Instant,
}

#[derive(Default)]
struct LedgerState {
    next_id: u64,
    last_id: Option<u64>,
    query_calls: u64,
    calls: HashMap<u64, CallRecord>,
    errors: Vec<Value>,
}

#[derive(Default)]
pub struct ToolLedger {
    state: Mutex<LedgerState>,
    sink: Mutex<Option<UnboundedSender<ReactEvent>>>,
}

impl ToolLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route ToolStart / ToolEnd / ToolError events to a display channel
    pub fn set_sink(&self, tx: Option<UnboundedSender<ReactEvent>>) {
        if let Ok(mut sink) = self.sink.lock() {
            *sink = tx;
        }
    }

    fn emit(&self, event: ReactEvent) {
        if let Ok(sink) = self.sink.lock() {
            if let Some(tx) = sink.as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    pub fn start_call(&self, name: &str, args: &Value) -> u64 {
        let preview = preview_from_args(args);
        let id = {
            let Ok(mut state) = self.state.lock() else {
                return 0;
            };
            state.next_id += 1;
            state.query_calls += 1;
            let id = state.next_id;
            state.last_id = Some(id);
            state.calls.insert(
                id,
                CallRecord {
                    name: name.to_string(),
                    started: Instant::now(),
                },
            );
            id
        };
        tracing::debug!(call_id = id, tool = %name, preview = %preview, "tool start");
        self.emit(ReactEvent::ToolStart {
            call_id: id,
            tool: name.to_string(),
            preview,
        });
        id
    }

    pub fn finish_call(&self, call_id: u64, status: CallStatus) {
        let finished = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state
                .calls
                .remove(&call_id)
                .map(|record| (record.name, record.started.elapsed().as_millis() as u64))
        };
        if let Some((tool, elapsed_ms)) = finished {
            self.emit(ReactEvent::ToolEnd {
                call_id,
                tool,
                status: status.as_str().to_string(),
                elapsed_ms,
            });
        }
    }

    /// Record an error payload; `call_id` defaults to the most recent call
    pub fn record_error(&self, payload: Value, call_id: Option<u64>) {
        let call_id = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.errors.push(payload.clone());
            call_id.or(state.last_id)
        };
        let message = payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        tracing::warn!(error = %message, details = %payload, "tool error");
        self.emit(ReactEvent::ToolError {
            call_id,
            message,
            details: payload.get("details").cloned().unwrap_or_else(|| json!({})),
        });
    }

    /// Drain the error payloads recorded since the last call
    pub fn pop_errors(&self) -> Vec<Value> {
        self.state
            .lock()
            .map(|mut s| std::mem::take(&mut s.errors))
            .unwrap_or_default()
    }

    /// Start a new question: zero the counter and forget calls that never finished
    pub fn reset_counter(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.query_calls = 0;
            state.calls.clear();
        }
    }

    /// Tool calls since the last reset
    pub fn call_count(&self) -> u64 {
        self.state.lock().map(|s| s.query_calls).unwrap_or(0)
    }

    /// Started calls without a matching `finish_call`
    pub fn in_flight(&self) -> usize {
        self.state.lock().map(|s| s.calls.len()).unwrap_or(0)
    }
}

/// Short human preview: zip/city/address/category values, else compact JSON
pub fn preview_from_args(args: &Value) -> String {
    let parts: Vec<String> = ["zip_code", "city", "address", "category"]
        .iter()
        .filter_map(|key| args.get(*key))
        .filter_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect();
    if !parts.is_empty() {
        return parts.join(" ");
    }
    short_json(args, PREVIEW_LIMIT)
}

pub fn short_json(value: &Value, limit: usize) -> String {
    let text = value.to_string();
    if text.chars().count() > limit {
        let cut: String = text.chars().take(limit.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_prefers_location_fields() {
        let args = json!({"zip_code": "20001", "category": "cafes", "radius_meters": 800});
        assert_eq!(preview_from_args(&args), "20001 cafes");
    }

    #[test]
    fn preview_falls_back_to_truncated_json() {
        let long = "x".repeat(400);
        let preview = preview_from_args(&json!({ "lat": 1.5, "note": long }));
        assert_eq!(preview.chars().count(), PREVIEW_LIMIT);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn ledger_tracks_calls_and_drains_errors() {
        let ledger = ToolLedger::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        ledger.set_sink(Some(tx));

        let id = ledger.start_call("geocode_zip", &json!({"zip_code": "20001"}));
        assert_eq!(ledger.in_flight(), 1);
        ledger.finish_call(id, CallStatus::Error);
        ledger.record_error(json!({"status": "error", "error": "geocode_failed"}), None);

        assert_eq!(ledger.call_count(), 1);
        assert_eq!(ledger.in_flight(), 0);
        assert_eq!(ledger.pop_errors().len(), 1);
        assert!(ledger.pop_errors().is_empty());

        assert!(matches!(rx.try_recv(), Ok(ReactEvent::ToolStart { .. })));
        match rx.try_recv() {
            Ok(ReactEvent::ToolEnd { status, .. }) => assert_eq!(status, "error"),
            other => panic!("expected ToolEnd, got {other:?}"),
        }
        match rx.try_recv() {
            Ok(ReactEvent::ToolError { call_id, message, .. }) => {
                assert_eq!(call_id, Some(id));
                assert_eq!(message, "geocode_failed");
            }
            other => panic!("expected ToolError, got {other:?}"),
        }

        ledger.reset_counter();
        assert_eq!(ledger.call_count(), 0);
    }

    #[test]
    fn reset_forgets_calls_that_never_finished() {
        let ledger = ToolLedger::new();
        ledger.start_call("search_crime_safety", &json!({"zip_code": "20001"}));
        ledger.start_call("get_walkscore", &json!({"zip_code": "20001"}));
        assert_eq!(ledger.in_flight(), 2);

        ledger.reset_counter();
        assert_eq!(ledger.in_flight(), 0);
    }
}
