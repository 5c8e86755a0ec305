//! Reasoning layer: planner, ReAct loop, analyst delegation and process events

pub mod delegation;
pub mod events;
pub mod loop_;
pub mod planner;

pub use delegation::{Analyst, DELEGATE_TOOL};
pub use events::ReactEvent;
pub use loop_::{react_loop, ReactResult, ReactSession, DEFAULT_MAX_STEPS};
pub use planner::{parse_llm_output, Planner, PlannerOutput, ToolCall};
