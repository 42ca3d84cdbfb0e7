//! Remote DOM mirror
//!
//! Keeps a client-side copy of a target's DOM in step with the protocol's
//! mutation events, and wraps the DOM domain's query commands.
//!
//! ## Core Design
//!
//! - **Two id spaces**: `NodeId` is transient, `BackendNodeId` survives
//!   document rebuilds; the arena indexes one by the other
//! - **One entry point**: every mutation is a `DomEvent` handed to `apply`
//! - **Not loaded is not empty**: `children: None` vs `Some([])`
//!
//! ```text
//! CDP event → DomEvent → DomArena::apply → TreeChange → subscribers
//!                            ↑
//! DOM.getDocument ──► load_document (refused if an event raced it)
//! ```

pub mod arena;
pub mod error;
pub mod events;
pub mod geometry;
pub mod mirror;
pub mod search;
pub mod types;

pub use arena::DomArena;
pub use error::{DomError, Result};
pub use events::{DomEvent, TreeChange};
pub use geometry::{BoxModel, Quad, Rect};
pub use mirror::{DomMirror, MirrorConfig};
pub use search::{SearchId, SearchSession, SearchSessions};
pub use types::*;
