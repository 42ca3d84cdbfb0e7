//! Transport seam
//!
//! The domain crates only ever talk to this trait. The WebSocket client,
//! a target-bound session and the scripted test transport all implement it.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;

/// Send a command and await its correlated result.
///
/// Correlation (request ids, pending tables) is the implementor's business.
/// Errors are returned as-is; callers never reinterpret them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_command(&self, method: &str, params: Option<Value>) -> Result<Value>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send_command(&self, method: &str, params: Option<Value>) -> Result<Value> {
        (**self).send_command(method, params).await
    }
}
