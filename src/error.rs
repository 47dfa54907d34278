//! Error types for messaging-client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Socket-level failure, including read/write timeouts.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected frame during the handshake.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server rejected the authentication token.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// No correlated reply arrived for the request id in time.
    #[error("Request timed out: {0}")]
    RequestTimeout(String),

    #[error("Connection is closed")]
    Closed,

    /// Error text from an ERR notification, surfaced verbatim.
    #[error("{0}")]
    Server(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
