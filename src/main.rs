//! Gemini Agent - HTTP Server Entry Point
//!
//! Resolves the model backend and starts the HTTP server.

use std::sync::Arc;

use gemini_agent::{
    agent::Agent,
    api,
    config::{BackendMode, Config, MetadataProbe},
    llm::GeminiBackend,
    tools::ToolRegistry,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gemini_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration: model={}", config.default_model);

    // Pick the credential strategy once, before serving
    let probe = MetadataProbe::new(config.gemini.metadata_base.clone());
    let mode = BackendMode::resolve(&config.gemini, &probe).await;
    match &mode {
        BackendMode::ApiKey { api_key } => {
            info!(mode = mode.label(), key_present = api_key.is_some(), "Using Gemini API");
        }
        BackendMode::ManagedCredential { project, location } => {
            info!(
                mode = mode.label(),
                project = project.as_deref().unwrap_or("unknown"),
                location = %location,
                "Using Vertex AI"
            );
        }
    }

    let backend = Arc::new(GeminiBackend::new(mode, &config.gemini));
    let agent = Agent::new(backend, ToolRegistry::new(), config.max_iterations)
        .with_init_failure_as_error(config.init_failure_is_error);

    info!("Starting server on {}:{}", config.host, config.port);
    api::serve(config, agent).await?;

    Ok(())
}
