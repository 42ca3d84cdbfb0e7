//! Inspector session - IO, tracing and event routing on top of the DOM mirror
//!
//! # Architecture
//!
//! ```text
//! CDPSession ──event_stream──► pump task ──► EventRouter ─┬─► DomMirror      ("DOM")
//!     ▲                                                   └─► TraceRecorder  ("Tracing")
//!     │ send_command
//!     └── DomMirror / SearchSessions / StreamReader / TraceRecorder
//! ```
//!
//! 1. **One feed, one task**: events are applied in delivery order
//! 2. **Per-entity locks**: a stream cursor, a trace session and the mirror
//!    each serialize their own mutations
//! 3. **Transport-agnostic**: everything is generic over `cdp::Transport`

pub mod error;
pub mod io;
pub mod router;
pub mod session;
pub mod trace;

pub use error::{BrowserError, Result};
pub use io::{ReadChunk, ReaderConfig, StreamHandle, StreamReader};
pub use router::{DomainSink, EventRouter};
pub use session::{InspectorConfig, InspectorSession, TraceData};
pub use trace::{
    BufferUsage, StartParams, TraceConfig, TraceEvent, TraceOutput, TraceRecorder, TraceState,
    TransferMode,
};
