//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::agent::ToolCallRecord;

/// Request to answer a prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    /// The user prompt
    pub prompt: String,

    /// Optional model override (uses default if not specified)
    #[serde(default)]
    pub model: Option<String>,
}

/// Successful answer.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    /// Final model text
    pub text: String,

    /// Tool trace, only when trace exposure is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolCallRecord>>,
}

/// Failed answer.
#[derive(Debug, Clone, Serialize)]
pub struct ChatErrorResponse {
    /// Error message (never a stack trace)
    pub error: String,

    /// Human-readable text for the client to display
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolCallRecord>>,
}

/// Client error body, e.g. for an empty prompt.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub detail: String,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
}

/// Models that can currently be initialized.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}
