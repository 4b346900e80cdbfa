//! Transport-neutral frames and close reasons.
//!
//! Both sides of a session speak websocket, but through different crates
//! (`actix-web-actors` towards the client, `tokio-tungstenite` towards the upstream).
//! The session logic only sees these types; each side converts at its edge.

use crate::error::RelayError;

/// One relayed message, kept exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Websocket close codes used by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000, graceful peer closure
    Normal,
    /// 1008, authentication failed
    Policy,
    /// 1011, the upstream service errored
    Error,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Policy => 1008,
            CloseCode::Error => 1011,
        }
    }
}

/// Close code plus the human-readable reason sent with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: CloseCode,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn authentication_failed() -> Self {
        Self::new(CloseCode::Policy, "Authentication failed")
    }

    pub fn client_disconnected() -> Self {
        Self::new(CloseCode::Normal, "Client disconnected.")
    }

    pub fn upstream_disconnected() -> Self {
        Self::new(CloseCode::Normal, "Upstream service disconnected.")
    }

    pub fn upstream_error() -> Self {
        Self::new(CloseCode::Error, "Upstream service error.")
    }
}

/// One side of a session as seen by the session logic.
///
/// Implementations are plain transports: they do not track whether the peer is still
/// open. The session checks its own state before every call.
pub trait FrameSink {
    /// Queue a frame for delivery, preserving call order.
    fn send(&mut self, frame: Frame) -> Result<(), RelayError>;

    /// Close the connection with the given code and reason.
    fn close(&mut self, frame: CloseFrame);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseFrame::authentication_failed().code.as_u16(), 1008);
        assert_eq!(CloseFrame::client_disconnected().code.as_u16(), 1000);
        assert_eq!(CloseFrame::upstream_disconnected().code.as_u16(), 1000);
        assert_eq!(CloseFrame::upstream_error().code.as_u16(), 1011);
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(Frame::Text("abc".to_string()).len(), 3);
        assert!(Frame::Binary(Vec::new()).is_empty());
    }
}
