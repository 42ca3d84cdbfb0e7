//! Inspector Session
//!
//! Owns one transport and everything that talks through it: the DOM
//! mirror, search sessions, the stream reader and the trace recorder.
//! Events reach the mirror and the recorder through one router fed by a
//! single pump task.

use cdp::protocol::{CDPEvent, TargetId};
use cdp::{CDPClient, CDPSession, Transport};
use dom::{DomMirror, MirrorConfig, SearchSessions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::error::{BrowserError, Result};
use crate::io::{ReaderConfig, StreamHandle, StreamReader};
use crate::router::EventRouter;
use crate::trace::{TraceChunk, TraceOutput, TraceRecorder};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InspectorConfig {
    pub id: String,
    pub cdp_url: String,
    /// Per-request response timeout
    pub request_timeout_ms: u64,
    /// Target to attach to; the first page when unset
    pub target_id: Option<TargetId>,
    pub mirror: MirrorConfig,
    pub reader: ReaderConfig,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            cdp_url: "ws://localhost:9222".to_string(),
            request_timeout_ms: 30_000,
            target_id: None,
            mirror: MirrorConfig::default(),
            reader: ReaderConfig::default(),
        }
    }
}

impl InspectorConfig {
    /// Parsed WebSocket endpoint
    pub fn endpoint(&self) -> Result<Url> {
        let url = Url::parse(&self.cdp_url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(BrowserError::InvalidConfig(format!(
                "cdp_url must be ws:// or wss://, got {}://",
                other
            ))),
        }
    }
}

/// A finished trace, drained
#[derive(Debug, Clone, PartialEq)]
pub enum TraceData {
    Events(Vec<TraceChunk>),
    Bytes(Vec<u8>),
}

pub struct InspectorSession<T: Transport> {
    pub config: InspectorConfig,
    transport: Arc<T>,
    mirror: Arc<DomMirror<T>>,
    search: SearchSessions<T>,
    reader: StreamReader<T>,
    recorder: Arc<TraceRecorder<T>>,
    router: Arc<EventRouter>,
    pump: Option<JoinHandle<()>>,
}

impl<T: Transport + 'static> InspectorSession<T> {
    pub fn new(transport: Arc<T>, config: InspectorConfig) -> Self {
        let mirror = Arc::new(DomMirror::with_config(
            transport.clone(),
            config.mirror.clone(),
        ));
        let recorder = Arc::new(TraceRecorder::new(transport.clone()));

        let mut router = EventRouter::new();
        router.register(mirror.clone());
        router.register(recorder.clone());

        Self {
            search: SearchSessions::new(transport.clone()),
            reader: StreamReader::with_config(transport.clone(), config.reader.clone()),
            config,
            transport,
            mirror,
            recorder,
            router: Arc::new(router),
            pump: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn mirror(&self) -> &Arc<DomMirror<T>> {
        &self.mirror
    }

    pub fn search(&self) -> &SearchSessions<T> {
        &self.search
    }

    pub fn reader(&self) -> &StreamReader<T> {
        &self.reader
    }

    pub fn recorder(&self) -> &Arc<TraceRecorder<T>> {
        &self.recorder
    }

    /// Route one event to the sinks of its domain
    pub async fn dispatch(&self, event: &CDPEvent) -> usize {
        self.router.dispatch(event).await
    }

    /// Drain an ordered event feed on one task until the feed closes.
    /// Replaces any previous pump.
    pub fn spawn_pump(&mut self, mut events: mpsc::UnboundedReceiver<CDPEvent>) {
        self.abort_pump();

        let router = self.router.clone();
        let id = self.config.id.clone();
        self.pump = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                router.dispatch(&event).await;
            }
            tracing::debug!(session = %id, "event feed closed");
        }));
    }

    /// Wait for the pump to finish draining a closed feed
    pub async fn join_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                tracing::warn!(error = %e, "event pump ended abnormally");
            }
        }
    }

    pub fn abort_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }

    /// Wait for the current trace to complete and hand back its data.
    ///
    /// Stream-mode traces are read from the start and their handle closed.
    /// If a read fails the output goes back to the recorder and the handle
    /// stays open, so calling again retries; `discard_trace` gives up.
    pub async fn collect_trace(&self) -> Result<TraceData> {
        self.recorder.wait_until_idle().await;

        match self.recorder.take_output().await {
            Some(TraceOutput::Inline(chunks)) => Ok(TraceData::Events(chunks)),
            Some(TraceOutput::Stream { handle, compression }) => {
                tracing::debug!(handle = %handle, ?compression, "draining trace stream");
                match self.reader.read_all(&handle).await {
                    Ok(bytes) => {
                        self.release_stream(&handle).await;
                        Ok(TraceData::Bytes(bytes))
                    }
                    Err(e) => {
                        tracing::warn!(handle = %handle, error = %e, "trace stream read failed");
                        let output = TraceOutput::Stream {
                            handle: handle.clone(),
                            compression,
                        };
                        if !self.recorder.restore_output(output).await {
                            self.release_stream(&handle).await;
                        }
                        Err(e)
                    }
                }
            }
            None => Err(BrowserError::NotRecording),
        }
    }

    /// Drop an uncollected trace, releasing its stream if it has one.
    /// Returns whether there was anything to drop.
    pub async fn discard_trace(&self) -> bool {
        match self.recorder.take_output().await {
            Some(TraceOutput::Stream { handle, .. }) => {
                self.release_stream(&handle).await;
                true
            }
            Some(TraceOutput::Inline(_)) => true,
            None => false,
        }
    }

    async fn release_stream(&self, handle: &StreamHandle) {
        if let Err(e) = self.reader.close(handle).await {
            tracing::warn!(handle = %handle, error = %e, "failed to close trace stream");
        }
    }
}

impl InspectorSession<CDPSession> {
    /// Connect over WebSocket, attach to the configured target and start
    /// pumping its events.
    pub async fn connect(config: InspectorConfig) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let client = CDPClient::connect_with_timeout(
            endpoint.as_str(),
            Duration::from_millis(config.request_timeout_ms),
        )
        .await?;

        let target = match &config.target_id {
            Some(target_id) => CDPSession::attach(client, target_id.clone(), None).await?,
            None => CDPSession::attach_first_page(client).await?,
        };
        tracing::info!(
            session = %config.id,
            target_id = %target.target_id,
            url = %target.url,
            "inspector attached"
        );

        let events = target.event_stream();
        let mut session = Self::new(Arc::new(target), config);
        session.spawn_pump(events);
        Ok(session)
    }

    /// Stop pumping, release any uncollected trace stream and close the
    /// shared connection
    pub async fn close(mut self) -> Result<()> {
        self.abort_pump();
        self.discard_trace().await;
        self.transport.client().close().await?;
        tracing::info!(session = %self.config.id, "inspector closed");
        Ok(())
    }
}
