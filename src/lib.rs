//! # Gemini Agent
//!
//! A thin HTTP backend that forwards prompts to a Gemini model and lets the
//! model call a small set of tools before answering.
//!
//! This library provides:
//! - An HTTP API for prompt submission
//! - A bounded tool-calling agent loop
//! - Gemini access through either an API key or Vertex AI credentials
//! - Built-in tools: `web_search`, `fetch_url` and `calculator`
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Receive a prompt via the API
//! 2. Send the conversation and tool declarations to the model
//! 3. Execute any requested tool calls in order
//! 4. Feed results back to the model, repeat until it answers or the round cap is hit
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gemini_agent::{agent::Agent, config::{BackendMode, Config, MetadataProbe}};
//! use gemini_agent::{llm::GeminiBackend, tools::ToolRegistry};
//!
//! let config = Config::from_env()?;
//! let probe = MetadataProbe::new(&config.gemini.metadata_base);
//! let mode = BackendMode::resolve(&config.gemini, &probe).await;
//! let agent = Agent::new(
//!     Arc::new(GeminiBackend::new(mode, &config.gemini)),
//!     ToolRegistry::new(),
//!     config.max_iterations,
//! );
//! let output = agent.run("What is 2 ** 10?", &config.default_model).await?;
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod llm;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
