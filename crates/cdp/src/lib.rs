//! CDP (Chrome DevTools Protocol) Transport
//!
//! Core principle: one WebSocket connection, multiplexed sessions, and a
//! single `Transport` trait the domain crates are written against.
//!
//! ```text
//! DomMirror / TraceRecorder / StreamReader
//!            │ send_command(method, params)
//!            ▼
//!        Transport ◄── CDPClient (browser-level)
//!                  ◄── CDPSession (target-bound)
//!                  ◄── MockTransport (tests)
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::CDPClient;
pub use error::{CDPError, Result};
pub use protocol::{CDPEvent, CDPRequest, CDPResponse};
pub use session::CDPSession;
pub use transport::Transport;

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockTransport;
