//! HTTP API for the Gemini agent.
//!
//! ## Endpoints
//!
//! - `GET /` - Index page
//! - `GET /health` - Health check
//! - `POST /api/chat` - Answer a prompt, calling tools as needed
//! - `GET /api/models` - Models the backend can currently initialize
//! - `GET /static/*` - Static assets, when the directory exists

mod chat;
pub mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
