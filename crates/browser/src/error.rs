//! Error types for the IO, tracing and session layers

use thiserror::Error;

use crate::io::StreamHandle;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Stream handle closed: {0}")]
    HandleClosed(StreamHandle),

    #[error("Stream {handle} switched encoding mid-stream (base64 was {was_base64})")]
    EncodingMismatch { handle: StreamHandle, was_base64: bool },

    #[error("Invalid base64 chunk: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Invalid blob uuid: {0}")]
    BlobUuid(#[from] uuid::Error),

    #[error("Tracing is already recording")]
    AlreadyRecording,

    #[error("Tracing is not recording")]
    NotRecording,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid CDP url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Transport(#[from] cdp::CDPError),

    #[error(transparent)]
    Dom(#[from] dom::DomError),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}
