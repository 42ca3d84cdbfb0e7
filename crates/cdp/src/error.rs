//! Transport error type
//!
//! Everything the wire can go wrong with. Domain crates wrap this
//! unchanged; retry policy belongs to the caller.

use thiserror::Error;

use crate::protocol::RequestId;

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("Request timeout")]
    Timeout,

    #[error("Connection closed")]
    Closed,

    #[error("Invalid response for request {0}")]
    InvalidResponse(RequestId),
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CDPError>;
