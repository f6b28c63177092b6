//! LLM module - Gemini access in two credential modes.
//!
//! `LlmBackend` turns a model name into a ready `LlmClient` (this is where
//! credentials are checked and model fallbacks happen); `LlmClient` runs one
//! `generateContent` round over the conversation history.

mod gemini;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::{GeminiBackend, GeminiClient, VERTEX_FALLBACK_MODELS};
pub use types::{
    normalize_args, Content, FunctionCall, FunctionDeclaration, FunctionResponse, ModelResponse,
    Part, Role,
};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{0}")]
    MissingCredentials(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Model {model} not available in Vertex AI. Error: {message}")]
    ModelUnavailable { model: String, message: String },

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// One model, ready to answer.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier this client talks to.
    fn model(&self) -> &str;

    /// Send the full history plus tool declarations and return the model's
    /// text and/or requested tool calls.
    async fn generate_content(
        &self,
        contents: &[Content],
        tools: &[FunctionDeclaration],
    ) -> Result<ModelResponse, LlmError>;
}

/// Credential strategy that initializes model clients.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Short name of the credential mode, for logs.
    fn mode_label(&self) -> &'static str;

    /// Initialize a client for `model`.
    async fn connect(&self, model: &str) -> Result<Arc<dyn LlmClient>, LlmError>;
}
