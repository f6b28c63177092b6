//! Agent module - the tool-calling orchestration loop.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Initialize the model for the requested backend mode
//! 2. Send the conversation and tool declarations to the model
//! 3. If the model requests tool calls, run them in order and append the results
//! 4. Repeat until the model answers with text or the round cap is reached

mod agent_loop;

pub use agent_loop::{Agent, AgentError, AgentOutput, ToolCallRecord, STEP_LIMIT_TEXT};
pub(crate) use agent_loop::truncate_for_log;
