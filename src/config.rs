//! Configuration management for the Gemini agent.
//!
//! Configuration can be set via environment variables:
//! - `GEMINI_MODEL` - Optional. Default model name. Defaults to `gemini-2.0-flash`.
//! - `GEMINI_API_KEY` - Optional. API key for the public Gemini API.
//! - `GEMINI_API_BASE` - Optional. Base URL of the public Gemini API.
//! - `USE_VERTEX` - Optional. Force Vertex AI (managed credential) mode.
//! - `GOOGLE_CLOUD_PROJECT` - Optional. Cloud project; selects Vertex AI mode when set.
//! - `VERTEX_LOCATION` - Optional. Vertex AI region. Defaults to `us-central1`.
//! - `VERTEX_API_BASE` - Optional. Vertex AI base URL. Derived from the region by default.
//! - `GCE_METADATA_HOST` - Optional. Metadata server host. Defaults to `metadata.google.internal`.
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8080`.
//! - `MAX_ITERATIONS` - Optional. Maximum model rounds per prompt. Defaults to `6`.
//! - `EXPOSE_TOOL_TRACE` - Optional. Return the tool trace from `/api/chat`. Defaults to `false`.
//! - `INIT_FAILURE_IS_ERROR` - Optional. Report model initialization failures as
//!   errors (HTTP 500) instead of answer text. Defaults to `false`.
//! - `STATIC_DIR` - Optional. Directory served under `/static`. Defaults to `static`.
//! - `TEMPLATES_DIR` - Optional. Directory holding `index.html`. Defaults to `templates`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Model used when neither the request nor `GEMINI_MODEL` names one.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default cap on model rounds for one prompt.
pub const DEFAULT_MAX_ITERATIONS: usize = 6;

const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_VERTEX_LOCATION: &str = "us-central1";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Credentials and endpoints for the model backends.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key for the public API (API-key mode)
    pub api_key: Option<String>,

    /// Base URL for the public API
    pub api_base: String,

    /// Force Vertex AI mode
    pub use_vertex: bool,

    /// Cloud project for Vertex AI mode
    pub project: Option<String>,

    /// Vertex AI region
    pub location: String,

    /// Vertex AI base URL
    pub vertex_api_base: String,

    /// Metadata server base URL (project probe and access tokens)
    pub metadata_base: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            use_vertex: false,
            project: None,
            location: DEFAULT_VERTEX_LOCATION.to_string(),
            vertex_api_base: vertex_base_for(DEFAULT_VERTEX_LOCATION),
            metadata_base: format!("http://{}", DEFAULT_METADATA_HOST),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Default model identifier
    pub default_model: String,

    /// Backend credentials and endpoints
    pub gemini: GeminiConfig,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum model rounds for the agent loop
    pub max_iterations: usize,

    /// Include the tool trace in chat responses
    pub expose_tool_trace: bool,

    /// Treat model initialization failures as errors rather than answer text
    pub init_failure_is_error: bool,

    /// Directory served under `/static`
    pub static_dir: PathBuf,

    /// Directory holding `index.html`
    pub templates_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Nothing is required: a missing API key only surfaces when a request
    /// tries to initialize the model.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric or boolean variable
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let default_model = non_empty_var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let location =
            non_empty_var("VERTEX_LOCATION").unwrap_or_else(|| DEFAULT_VERTEX_LOCATION.to_string());

        let metadata_host =
            non_empty_var("GCE_METADATA_HOST").unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());

        let gemini = GeminiConfig {
            api_key: non_empty_var("GEMINI_API_KEY"),
            api_base: non_empty_var("GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            use_vertex: bool_var("USE_VERTEX")?.unwrap_or(false),
            project: non_empty_var("GOOGLE_CLOUD_PROJECT"),
            vertex_api_base: non_empty_var("VERTEX_API_BASE")
                .unwrap_or_else(|| vertex_base_for(&location)),
            location,
            metadata_base: metadata_base_for(&metadata_host),
        };

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        let max_iterations = std::env::var("MAX_ITERATIONS")
            .unwrap_or_else(|_| DEFAULT_MAX_ITERATIONS.to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("MAX_ITERATIONS".to_string(), format!("{}", e))
            })?;

        let expose_tool_trace = bool_var("EXPOSE_TOOL_TRACE")?.unwrap_or(false);
        let init_failure_is_error = bool_var("INIT_FAILURE_IS_ERROR")?.unwrap_or(false);

        let static_dir = std::env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("static"));

        let templates_dir = std::env::var("TEMPLATES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("templates"));

        Ok(Self {
            default_model,
            gemini,
            host,
            port,
            max_iterations,
            expose_tool_trace,
            init_failure_is_error,
            static_dir,
            templates_dir,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(default_model: String, gemini: GeminiConfig) -> Self {
        Self {
            default_model,
            gemini,
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            expose_tool_trace: false,
            init_failure_is_error: false,
            static_dir: PathBuf::from("static"),
            templates_dir: PathBuf::from("templates"),
        }
    }
}

/// Which credential strategy the model backend uses.
///
/// Resolved once at startup, before any request is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMode {
    /// Public Gemini API authenticated with `GEMINI_API_KEY`.
    ApiKey { api_key: Option<String> },
    /// Vertex AI with ambient credentials from the metadata server.
    ManagedCredential {
        project: Option<String>,
        location: String,
    },
}

impl BackendMode {
    /// Pick the backend mode from explicit settings, falling back to a
    /// metadata-server probe when no project is configured.
    pub async fn resolve(gemini: &GeminiConfig, probe: &MetadataProbe) -> Self {
        if gemini.use_vertex || gemini.project.is_some() {
            let project = match &gemini.project {
                Some(project) => Some(project.clone()),
                None => probe.project_id().await,
            };
            return Self::ManagedCredential {
                project,
                location: gemini.location.clone(),
            };
        }

        if let Some(project) = probe.project_id().await {
            tracing::info!(project = %project, "Detected GCP metadata server, using Vertex AI");
            return Self::ManagedCredential {
                project: Some(project),
                location: gemini.location.clone(),
            };
        }

        Self::ApiKey {
            api_key: gemini.api_key.clone(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ApiKey { .. } => "api_key",
            Self::ManagedCredential { .. } => "vertex",
        }
    }
}

/// Probe for the GCP metadata server.
#[derive(Debug, Clone)]
pub struct MetadataProbe {
    base_url: String,
    timeout: Duration,
}

impl MetadataProbe {
    /// Default probe timeout. Off GCP the host does not resolve or hangs, so
    /// this bounds startup latency.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the metadata server for the project id. `None` on any failure.
    pub async fn project_id(&self) -> Option<String> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .ok()?;

        let url = format!(
            "{}/computeMetadata/v1/project/project-id",
            self.base_url.trim_end_matches('/')
        );

        let response = match client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Metadata probe failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            return None;
        }

        let project = response.text().await.ok()?;
        let project = project.trim();
        if project.is_empty() {
            None
        } else {
            Some(project.to_string())
        }
    }
}

fn vertex_base_for(location: &str) -> String {
    format!("https://{}-aiplatform.googleapis.com", location)
}

fn metadata_base_for(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bool_var(name: &str) -> Result<Option<bool>, ConfigError> {
    non_empty_var(name)
        .map(|v| parse_bool(&v).map_err(|e| ConfigError::InvalidValue(name.to_string(), e)))
        .transpose()
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
