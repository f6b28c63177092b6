//! Gemini REST client, for both the public API and Vertex AI.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{Content, FunctionCall, FunctionDeclaration, ModelResponse};
use super::{LlmBackend, LlmClient, LlmError};
use crate::config::{BackendMode, GeminiConfig, DEFAULT_MODEL};

/// Tried in order when the default model is missing from Vertex AI.
pub const VERTEX_FALLBACK_MODELS: [&str; 3] =
    ["gemini-1.5-flash-exp", "gemini-1.5-flash", "gemini-1.5-pro"];

const MISSING_API_KEY: &str =
    "Missing GEMINI_API_KEY. Set it in environment or use Vertex AI in GCP.";
const MISSING_PROJECT: &str = "Vertex mode requires GOOGLE_CLOUD_PROJECT env var";

#[derive(Debug, Clone)]
enum Auth {
    ApiKey(String),
    Bearer(String),
}

/// Client bound to one model endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    auth: Auth,
}

impl GeminiClient {
    /// Client for the public API (`{api_base}/models/{model}:generateContent`).
    pub fn with_api_key(
        http: reqwest::Client,
        api_base: &str,
        model: &str,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: format!(
                "{}/models/{}:generateContent",
                api_base.trim_end_matches('/'),
                model
            ),
            model: model.to_string(),
            auth: Auth::ApiKey(api_key.into()),
        }
    }

    /// Client for a Vertex AI publisher model.
    pub fn with_access_token(
        http: reqwest::Client,
        vertex_base: &str,
        project: &str,
        location: &str,
        model: &str,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: format!(
                "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
                vertex_base.trim_end_matches('/'),
                project,
                location,
                model
            ),
            model: model.to_string(),
            auth: Auth::Bearer(access_token.into()),
        }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_content(
        &self,
        contents: &[Content],
        tools: &[FunctionDeclaration],
    ) -> Result<ModelResponse, LlmError> {
        let mut body = json!({ "contents": contents });
        if !tools.is_empty() {
            body["tools"] = json!([{ "functionDeclarations": tools }]);
        }

        let request = self.http.post(&self.endpoint).json(&body);
        let request = match &self.auth {
            Auth::ApiKey(key) => request.header("x-goog-api-key", key),
            Auth::Bearer(token) => request.bearer_auth(token),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: api_error_message(&text),
            });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(parsed.into_model_response())
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

impl GenerateContentResponse {
    /// Tool calls come from every candidate; text only from the first.
    fn into_model_response(self) -> ModelResponse {
        let mut text: Option<String> = None;
        let mut function_calls = Vec::new();

        for (index, candidate) in self.candidates.into_iter().enumerate() {
            let Some(content) = candidate.content else {
                continue;
            };
            for part in content.parts {
                if let Some(call) = part.function_call {
                    function_calls.push(call);
                }
                if index == 0 {
                    if let Some(chunk) = part.text {
                        text.get_or_insert_with(String::new).push_str(&chunk);
                    }
                }
            }
        }

        ModelResponse {
            text,
            function_calls,
        }
    }
}

/// Pull `error.message` out of a Google API error body, or fall back to the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Builds `GeminiClient`s for the resolved backend mode.
pub struct GeminiBackend {
    mode: BackendMode,
    api_base: String,
    vertex_api_base: String,
    metadata_base: String,
    http: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(mode: BackendMode, gemini: &GeminiConfig) -> Self {
        Self {
            mode,
            api_base: gemini.api_base.clone(),
            vertex_api_base: gemini.vertex_api_base.clone(),
            metadata_base: gemini.metadata_base.clone(),
            http: reqwest::Client::new(),
        }
    }

    /// Fetch an OAuth access token for the default service account.
    async fn access_token(&self) -> Result<String, LlmError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let url = format!(
            "{}/computeMetadata/v1/instance/service-accounts/default/token",
            self.metadata_base.trim_end_matches('/')
        );

        let response = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                LlmError::MissingCredentials(format!(
                    "Failed to obtain Vertex AI access token: {}",
                    e
                ))
            })?;

        if !response.status().is_success() {
            return Err(LlmError::MissingCredentials(format!(
                "Failed to obtain Vertex AI access token: HTTP {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(token.access_token)
    }

    /// Check that Vertex AI serves `model`.
    async fn check_vertex_model(&self, model: &str, token: &str) -> Result<(), LlmError> {
        let url = format!(
            "{}/v1beta1/publishers/google/models/{}",
            self.vertex_api_base.trim_end_matches('/'),
            model
        );

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = api_error_message(&response.text().await.unwrap_or_default());
        if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            Err(LlmError::ModelUnavailable {
                model: model.to_string(),
                message,
            })
        } else {
            Err(LlmError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Resolve the model to use on Vertex AI, walking the fallback chain
    /// when the default model is unavailable.
    async fn resolve_vertex_model(&self, model: &str, token: &str) -> Result<String, LlmError> {
        let err = match self.check_vertex_model(model, token).await {
            Ok(()) => return Ok(model.to_string()),
            Err(err @ LlmError::ModelUnavailable { .. }) => err,
            Err(err) => return Err(err),
        };

        if model == DEFAULT_MODEL {
            for fallback in VERTEX_FALLBACK_MODELS {
                tracing::warn!(
                    "Model {} not available in Vertex AI, trying {}",
                    model,
                    fallback
                );
                if self.check_vertex_model(fallback, token).await.is_ok() {
                    return Ok(fallback.to_string());
                }
            }
        }

        Err(err)
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn mode_label(&self) -> &'static str {
        self.mode.label()
    }

    async fn connect(&self, model: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
        match &self.mode {
            BackendMode::ApiKey { api_key } => {
                let api_key = api_key
                    .as_deref()
                    .ok_or_else(|| LlmError::MissingCredentials(MISSING_API_KEY.to_string()))?;
                Ok(Arc::new(GeminiClient::with_api_key(
                    self.http.clone(),
                    &self.api_base,
                    model,
                    api_key,
                )))
            }
            BackendMode::ManagedCredential { project, location } => {
                let project = project
                    .as_deref()
                    .ok_or_else(|| LlmError::MissingCredentials(MISSING_PROJECT.to_string()))?;
                let token = self.access_token().await?;
                let resolved = self.resolve_vertex_model(model, &token).await?;
                Ok(Arc::new(GeminiClient::with_access_token(
                    self.http.clone(),
                    &self.vertex_api_base,
                    project,
                    location,
                    &resolved,
                    token,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_collects_calls_from_all_candidates_and_text_from_first() {
        let raw = json!({
            "candidates": [
                {
                    "content": {
                        "role": "model",
                        "parts": [
                            { "text": "Let me " },
                            { "functionCall": { "name": "calculator", "args": { "expression": "2+2" } } },
                            { "text": "check." }
                        ]
                    }
                },
                {
                    "content": {
                        "parts": [
                            { "text": "ignored" },
                            { "functionCall": { "name": "web_search", "args": { "query": "x" } } }
                        ]
                    }
                }
            ]
        });

        let parsed: GenerateContentResponse = serde_json::from_value(raw).unwrap();
        let response = parsed.into_model_response();

        assert_eq!(response.text.as_deref(), Some("Let me check."));
        let names: Vec<_> = response.function_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["calculator", "web_search"]);
    }

    #[test]
    fn response_without_text_or_candidates_is_empty() {
        let parsed: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(parsed.into_model_response(), ModelResponse::default());

        let parsed: GenerateContentResponse =
            serde_json::from_value(json!({ "candidates": [{ "finishReason": "SAFETY" }] }))
                .unwrap();
        assert_eq!(parsed.into_model_response(), ModelResponse::default());
    }

    #[test]
    fn api_error_message_prefers_structured_message() {
        assert_eq!(
            api_error_message(r#"{"error":{"code":400,"message":"API key not valid"}}"#),
            "API key not valid"
        );
        assert_eq!(api_error_message(" upstream down \n"), "upstream down");
    }

    #[tokio::test]
    async fn api_key_mode_without_key_fails_to_connect() {
        let backend = GeminiBackend::new(
            BackendMode::ApiKey { api_key: None },
            &GeminiConfig::default(),
        );

        let err = backend.connect(DEFAULT_MODEL).await.err().unwrap();
        assert_eq!(err.to_string(), MISSING_API_KEY);
    }

    #[tokio::test]
    async fn managed_mode_without_project_fails_to_connect() {
        let backend = GeminiBackend::new(
            BackendMode::ManagedCredential {
                project: None,
                location: "us-central1".to_string(),
            },
            &GeminiConfig::default(),
        );

        let err = backend.connect(DEFAULT_MODEL).await.err().unwrap();
        assert_eq!(err.to_string(), MISSING_PROJECT);
    }
}
