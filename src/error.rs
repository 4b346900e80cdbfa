//! # Error Handling
//!
//! This module defines the error types used across the relay and how the HTTP-facing
//! ones are converted to responses.
//!
//! ## Two layers of errors:
//! - **AppError**: Errors that end up as an HTTP response (refused websocket upgrades)
//! - **Domain errors**: One enum per collaborator (auth, relay, store, completion, codec,
//!   playback). These never reach an HTTP response directly; the relay decides whether a
//!   failure closes the session or is reported in-band as an `error` envelope.
//!
//! ## Key Rust Concepts:
//! - **thiserror**: Derives `Display` and `std::error::Error` from `#[error(...)]` attributes
//! - **From trait**: Lets `?` convert lower-level errors (reqwest, serde_json) automatically
//! - **ResponseError trait**: Converts errors to HTTP responses

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Errors that are turned into HTTP responses.
///
/// Only the websocket upgrade can fail over plain HTTP; everything after the upgrade
/// is reported with close codes or `error` envelopes.
#[derive(Debug)]
pub enum AppError {
    /// The server cannot accept another session right now (503)
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// Converts AppError into a JSON HTTP response.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "Too many active sessions",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Failures of the authentication gate.
///
/// Every variant is terminal for the connection attempt; the gate maps all of them
/// to the same policy-violation close.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("token rejected: {0}")]
    Rejected(String),

    #[error("verification service error: {0}")]
    Service(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Service(err.to_string())
    }
}

/// Failures inside a relay session.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream connection failed: {0}")]
    UpstreamConnect(String),

    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    #[error("destination connection is closed")]
    DestinationClosed,

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}

/// Failures of the keyed-query partner store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),

    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected store response: {0}")]
    Decode(String),

    #[error("store credentials error: {0}")]
    Credentials(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Request(err.to_string())
    }
}

/// Failures of the text completion service.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Request(String),

    #[error("completion service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion response had no content")]
    EmptyResponse,
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        CompletionError::Request(err.to_string())
    }
}

/// Failures of the audio framing codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid wav data: {0}")]
    Wav(#[from] std::io::Error),

    #[error("unsupported audio format: {0}")]
    Unsupported(String),
}

/// Failures while playing a queued audio segment.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("decode failed: {0}")]
    Decode(#[from] CodecError),

    #[error("output failed: {0}")]
    Output(String),
}
