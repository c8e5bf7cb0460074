//! InkBridge WebSocket Relay Server
//!
//! Relays Loro updates and presence between clients in the same room. Every
//! update is also merged into a per-room document so late joiners start
//! from the full state.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "room-id", "token": "secret" }
//! { "type": "sync", "data": "<base64-encoded-loro-bytes>" }
//! { "type": "awareness", "peer_id": 123, "presence": { "point": { "x": 100, "y": 200 }, ... } }
//! ```

pub mod config;
pub mod relay;
pub mod state;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::{ConfigError, ServerConfig};
pub use state::{AppState, RelayError};

/// Build the relay router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(relay::ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "InkBridge Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}
