//! Error types for DOM operations
//!
//! Simple, flat error hierarchy. Transport failures pass through untouched.

use thiserror::Error;

use crate::search::SearchId;
use crate::types::{BackendNodeId, NodeId, RemoteObjectId};

pub type Result<T> = std::result::Result<T, DomError>;

#[derive(Debug, Error)]
pub enum DomError {
    #[error("Mirror changed while the document request was in flight")]
    StaleTree,

    #[error("Document snapshot has no root node")]
    MissingRoot,

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Backend node not found: {0}")]
    BackendNodeNotFound(BackendNodeId),

    #[error("No node for remote object: {0}")]
    ObjectNotFound(RemoteObjectId),

    #[error("Unknown search session: {0}")]
    SearchNotFound(SearchId),

    #[error("Search session closed: {0}")]
    SessionClosed(SearchId),

    #[error("Invalid search range {from}..{to} for {count} results")]
    InvalidRange { from: u32, to: u32, count: u32 },

    #[error(transparent)]
    Transport(#[from] cdp::CDPError),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}
