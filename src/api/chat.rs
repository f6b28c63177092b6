//! `POST /api/chat` - run the agent for one prompt.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::routes::AppState;
use super::types::{ChatErrorResponse, ChatRequest, ChatResponse, ErrorDetail};
use crate::agent::truncate_for_log;

/// Request headers worth logging. `authorization` is masked.
fn loggable_headers(headers: &HeaderMap) -> String {
    let get = |name: &str, fallback: &'static str| -> String {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(fallback)
            .to_string()
    };

    let authorization = if headers.contains_key(header::AUTHORIZATION) {
        "***"
    } else {
        "none"
    };

    format!(
        "user-agent={} content-type={} accept={} authorization={} x-forwarded-for={} x-real-ip={}",
        get("user-agent", "unknown"),
        get("content-type", "unknown"),
        get("accept", "unknown"),
        authorization,
        get("x-forwarded-for", "none"),
        get("x-real-ip", "none"),
    )
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    let client_ip = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let header_summary = loggable_headers(&headers);

    if req.prompt.trim().is_empty() {
        tracing::warn!(
            "[API_ERROR] IP: {} | Status: 400 | Error: Empty prompt | Headers: {}",
            client_ip,
            header_summary
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorDetail {
                detail: "Prompt cannot be empty".to_string(),
            }),
        )
            .into_response();
    }

    let model = req
        .model
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(&state.config.default_model)
        .to_string();

    tracing::info!(
        "[API_REQUEST] IP: {} | POST /api/chat | Model: {} | Prompt: {} | Headers: {}",
        client_ip,
        model,
        truncate_for_log(&req.prompt, 100),
        header_summary
    );

    let expose = state.config.expose_tool_trace;

    match state.agent.run(&req.prompt, &model).await {
        Ok(output) => {
            if let Ok(trace) = serde_json::to_string(&output.tools) {
                tracing::info!("[API_TRACE] IP: {} | Tools: {}", client_ip, trace);
            }

            if let Some(error) = output.error {
                tracing::error!(
                    "[API_ERROR] IP: {} | Status: 500 | Error: {} | Headers: {}",
                    client_ip,
                    error,
                    header_summary
                );
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ChatErrorResponse {
                        error,
                        text: output.text,
                        tools: expose.then_some(output.tools),
                    }),
                )
                    .into_response();
            }

            tracing::info!(
                "[API_RESPONSE] IP: {} | Status: 200 OK | Tools: {} | Response: {}",
                client_ip,
                output.tools.len(),
                truncate_for_log(&output.text, 200)
            );

            (
                StatusCode::OK,
                Json(ChatResponse {
                    text: output.text,
                    tools: expose.then_some(output.tools),
                }),
            )
                .into_response()
        }
        Err(e) => {
            let message = e.to_string();
            tracing::error!(
                "[API_ERROR] IP: {} | Status: 500 | Error: {} | Headers: {}",
                client_ip,
                message,
                header_summary
            );
            tracing::error!("[API_ERROR] IP: {} | Details: {:?}", client_ip, e);

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ChatErrorResponse {
                    text: format!("Error: {}", message),
                    error: message,
                    tools: expose.then(Vec::new),
                }),
            )
                .into_response()
        }
    }
}
