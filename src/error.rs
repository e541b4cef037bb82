//! Error types
//!
//! Library code returns these typed errors; the CLI and config loading wrap
//! them in `anyhow` with context.

use thiserror::Error;

/// Errors raised by the transport, adapter and fallback layers
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid provider endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("invalid request header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("session is closed")]
    SessionClosed,

    #[error("fallback chain needs at least one provider")]
    NoProviders,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors raised while encoding or decoding provider frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid context id: {0:?}")]
    InvalidContext(String),

    #[error("unexpected {0} frame")]
    UnexpectedFrame(&'static str),
}

/// Failure reported by the producer of an input stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("input stream failed: {0}")]
pub struct InputError(String);

impl InputError {
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

impl From<std::io::Error> for InputError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err)
    }
}
