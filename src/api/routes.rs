//! HTTP routes and server startup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::chat;
use super::types::{HealthResponse, ModelsResponse};
use crate::agent::Agent;
use crate::config::Config;

/// Models offered by `/api/models` and returned when probing finds none.
pub const KNOWN_MODELS: [&str; 3] = ["gemini-2.0-flash", "gemini-1.5-flash", "gemini-1.5-pro"];

const FALLBACK_INDEX: &str =
    "<h1>Gemini Agent API</h1><p>API is running. Use /api/chat endpoint.</p>";

/// Shared state for all handlers.
pub struct AppState {
    pub config: Config,
    pub agent: Agent,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/chat", post(chat::chat))
        .route("/models", get(list_models));

    let mut app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .nest("/api", api);

    let static_dir = &state.config.static_dir;
    if static_dir.is_dir() {
        app = app.nest_service("/static", ServeDir::new(static_dir));
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: Config, agent: Agent) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState { config, agent });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET / - packaged index page, or a short banner when none is installed.
async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    let path = state.config.templates_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page),
        Err(_) => Html(FALLBACK_INDEX.to_string()),
    }
}

/// GET /api/models - models the current backend can initialize. Never fails.
async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    let backend = state.agent.backend();
    let mut models: Vec<String> = Vec::new();

    for candidate in KNOWN_MODELS {
        match backend.connect(candidate).await {
            Ok(client) => {
                let model = client.model().to_string();
                if !models.contains(&model) {
                    models.push(model);
                }
            }
            Err(e) => tracing::debug!("Model {} unavailable: {}", candidate, e),
        }
    }

    if models.is_empty() {
        models = KNOWN_MODELS.iter().map(|m| m.to_string()).collect();
    }

    Json(ModelsResponse { models })
}
