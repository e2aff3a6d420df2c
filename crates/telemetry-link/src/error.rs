//! Link error types.

use thiserror::Error;

/// Link error type.
#[derive(Error, Debug)]
pub enum LinkError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A connection attempt is already in flight (or the link is open)
    #[error("already connecting or connected")]
    AlreadyConnecting,

    /// Operation requires an open link
    #[error("not connected to controller")]
    NotConnected,

    /// Endpoint could not be parsed or is unsupported
    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    /// TLS configuration error
    #[error("TLS error: {0}")]
    Tls(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using LinkError.
pub type LinkResult<T> = Result<T, LinkError>;
