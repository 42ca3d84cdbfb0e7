//! CDP Session - a target-bound view of the shared connection
//!
//! Lightweight wrapper around CDPClient with target-specific context.
//! All sessions share the same WebSocket - no per-session connection overhead.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::client::CDPClient;
use crate::error::{CDPError, Result};
use crate::protocol::{
    AttachToTargetResult, CDPEvent, GetTargetsResult, SessionId, TargetId, TargetInfo,
};
use crate::transport::Transport;

/// Domains enabled on attach unless the caller names its own.
/// Tracing and IO need no enable call.
pub const DEFAULT_DOMAINS: &[&str] = &["DOM"];

/// CDP Session bound to a specific target
#[derive(Clone)]
pub struct CDPSession {
    /// Shared CDP client
    client: Arc<CDPClient>,

    /// Target this session is attached to
    pub target_id: TargetId,

    /// Session ID assigned by Chrome
    pub session_id: SessionId,

    /// Cached target info
    pub title: String,
    pub url: String,
}

impl CDPSession {
    /// Attach to a target and create session
    pub async fn attach(
        client: Arc<CDPClient>,
        target_id: TargetId,
        domains: Option<Vec<&str>>,
    ) -> Result<Self> {
        let result = client
            .send_request(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;

        let attach_result: AttachToTargetResult = serde_json::from_value(result)?;
        let session_id = attach_result.session_id;

        let domains = domains.unwrap_or_else(|| DEFAULT_DOMAINS.to_vec());

        // Enable all domains in parallel
        let enable_futures: Vec<_> = domains
            .into_iter()
            .map(|domain| {
                let client = client.clone();
                let session_id = session_id.clone();
                async move {
                    client
                        .send_request(format!("{}.enable", domain), None, Some(session_id))
                        .await
                }
            })
            .collect();

        let results = futures_util::future::join_all(enable_futures).await;
        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            tracing::warn!("Some domain enables failed: {}/{}", failures, results.len());
        }

        let target_info = Self::target_info(&client, &target_id).await?;

        Ok(Self {
            client,
            target_id,
            session_id,
            title: target_info.title,
            url: target_info.url,
        })
    }

    /// Attach to the first page target the browser reports
    pub async fn attach_first_page(client: Arc<CDPClient>) -> Result<Self> {
        let result = client.send_request("Target.getTargets", None, None).await?;
        let targets: GetTargetsResult = serde_json::from_value(result)?;

        let page = targets
            .target_infos
            .into_iter()
            .find(|t| t.target_type == "page")
            .ok_or(CDPError::Protocol {
                code: -32000,
                message: "No page target available".to_string(),
            })?;

        Self::attach(client, page.target_id, None).await
    }

    async fn target_info(client: &CDPClient, target_id: &TargetId) -> Result<TargetInfo> {
        let result = client
            .send_request(
                "Target.getTargetInfo",
                Some(json!({ "targetId": target_id })),
                None,
            )
            .await?;

        Ok(serde_json::from_value(result["targetInfo"].clone())?)
    }

    /// Send command within this session's context
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.client
            .send_request(method, params, Some(self.session_id.clone()))
            .await
    }

    /// Ordered feed of the events that belong to this session
    pub fn event_stream(&self) -> mpsc::UnboundedReceiver<CDPEvent> {
        let mut all = self.client.event_stream();
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = self.session_id.clone();

        tokio::spawn(async move {
            while let Some(event) = all.recv().await {
                if event.session_id.as_deref() != Some(session_id.as_str()) {
                    continue;
                }
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        rx
    }

    /// Shared connection this session rides on
    pub fn client(&self) -> &Arc<CDPClient> {
        &self.client
    }
}

#[async_trait]
impl Transport for CDPSession {
    async fn send_command(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.send(method, params).await
    }
}
