//! # Voice Relay Backend
//!
//! A duplex websocket relay between end-user clients and a realtime AI service.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, `config.toml`, `APP_*` environment)
//! - **state**: Shared services and metrics handed to every handler and session
//! - **auth**: Token gate in front of every websocket upgrade
//! - **relay**: Session state machine, frames, envelopes and the upstream connection
//! - **websocket**: The actix actor that drives one relay session per client
//! - **dispatch**: Chat queries answered by the completion service and partner store
//! - **store**: Partner records (Firestore or in-memory)
//! - **completion**: Chat-completion HTTP client
//! - **audio**: Codec, capture and playback scheduling for the relay client
//! - **health** / **middleware**: Monitoring endpoints, request logging and metrics
//! - **error**: HTTP-facing and per-collaborator error types

pub mod audio;
pub mod auth;
pub mod completion;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod middleware;
pub mod relay;
pub mod state;
pub mod store;
pub mod websocket;

use actix_web::web;

/// Register every route of the relay.
///
/// ## Routes:
/// - `GET /ws`: audio relay websocket
/// - `GET /ws/chat`: chat relay websocket
/// - `GET /health`, `GET /api/v1/health`: health summary
/// - `GET /api/v1/metrics`: detailed metrics
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(websocket::relay_websocket))
        .route("/ws/chat", web::get().to(websocket::chat_websocket))
        .route("/health", web::get().to(health::health_check))
        .service(
            web::scope("/api/v1")
                .route("/health", web::get().to(health::health_check))
                .route("/metrics", web::get().to(health::detailed_metrics)),
        );
}
