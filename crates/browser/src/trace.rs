//! Tracing session recorder
//!
//! ```text
//! Idle ──start──► Recording ──end──► Stopping
//!   ▲                 │                  │
//!   └──────── tracingComplete ◄──────────┘
//! ```
//!
//! One session at a time. Inline chunks are kept in arrival order; a
//! stream-mode session ends with a handle for the stream reader instead.

use cdp::Transport;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::error::{BrowserError, Result};
use crate::io::StreamHandle;

/// One trace event as delivered inline
pub type TraceChunk = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceState {
    Idle,
    Recording,
    Stopping,
}

/// How the finished trace is handed over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    #[default]
    ReportEvents,
    ReturnAsStream,
}

/// Trace buffer policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordMode {
    RecordUntilFull,
    RecordContinuously,
    RecordAsMuchAsPossible,
    EchoToConsole,
}

/// Compression applied to stream-mode output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamCompression {
    None,
    Gzip,
}

/// Memory dump triggers, only honoured with the `memory-infra` category
pub type MemoryDumpConfig = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_mode: Option<RecordMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_sampling: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_systrace: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_argument_filter: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synthetic_delays: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_dump_config: Option<MemoryDumpConfig>,
}

/// `Tracing.start` parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    /// Milliseconds between `bufferUsage` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_usage_reporting_interval: Option<f64>,
    #[serde(default)]
    pub transfer_mode: TransferMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_compression: Option<StreamCompression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_config: Option<TraceConfig>,
}

/// Trace buffer fill gauge
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferUsage {
    /// Fraction of the buffer in use, `0.0..=1.0`
    #[serde(default)]
    pub percent_full: Option<f64>,
    #[serde(default)]
    pub event_count: Option<f64>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDumpResult {
    pub dump_guid: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCollected {
    pub value: Vec<TraceChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracingComplete {
    #[serde(default)]
    pub stream: Option<StreamHandle>,
    #[serde(default)]
    pub stream_compression: Option<StreamCompression>,
}

/// Tracing domain events
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    BufferUsage(BufferUsage),
    DataCollected(DataCollected),
    TracingComplete(TracingComplete),
}

impl TraceEvent {
    /// `Ok(None)` for methods outside the Tracing domain
    pub fn from_cdp(method: &str, params: Option<Value>) -> Result<Option<Self>> {
        let params = params.unwrap_or_else(|| Value::Object(Map::new()));
        let event = match method {
            "Tracing.bufferUsage" => Self::BufferUsage(serde_json::from_value(params)?),
            "Tracing.dataCollected" => Self::DataCollected(serde_json::from_value(params)?),
            "Tracing.tracingComplete" => Self::TracingComplete(serde_json::from_value(params)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// What a finished session produced
#[derive(Debug, Clone, PartialEq)]
pub enum TraceOutput {
    Inline(Vec<TraceChunk>),
    Stream {
        handle: StreamHandle,
        compression: Option<StreamCompression>,
    },
}

#[derive(Debug)]
struct Session {
    state: TraceState,
    transfer_mode: TransferMode,
    chunks: Vec<TraceChunk>,
    output: Option<TraceOutput>,
}

#[derive(Deserialize)]
struct CategoriesResult {
    categories: Vec<String>,
}

pub struct TraceRecorder<T: Transport> {
    transport: Arc<T>,
    session: Mutex<Session>,
    state_tx: watch::Sender<TraceState>,
    usage_tx: watch::Sender<BufferUsage>,
}

impl<T: Transport> TraceRecorder<T> {
    pub fn new(transport: Arc<T>) -> Self {
        let (state_tx, _) = watch::channel(TraceState::Idle);
        let (usage_tx, _) = watch::channel(BufferUsage::default());
        Self {
            transport,
            session: Mutex::new(Session {
                state: TraceState::Idle,
                transfer_mode: TransferMode::default(),
                chunks: Vec::new(),
                output: None,
            }),
            state_tx,
            usage_tx,
        }
    }

    pub fn state(&self) -> TraceState {
        *self.state_tx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<TraceState> {
        self.state_tx.subscribe()
    }

    pub fn buffer_usage(&self) -> watch::Receiver<BufferUsage> {
        self.usage_tx.subscribe()
    }

    /// Begin recording. A previous session's untaken output is dropped.
    pub async fn start(&self, params: StartParams) -> Result<()> {
        {
            let mut session = self.session.lock().await;
            if session.state != TraceState::Idle {
                return Err(BrowserError::AlreadyRecording);
            }
            session.state = TraceState::Recording;
            session.transfer_mode = params.transfer_mode;
            session.chunks.clear();
            session.output = None;
        }
        self.state_tx.send_replace(TraceState::Recording);

        let sent = self
            .transport
            .send_command("Tracing.start", Some(serde_json::to_value(&params)?))
            .await;
        if let Err(e) = sent {
            tracing::warn!(error = %e, "Tracing.start failed, back to idle");
            self.revert(TraceState::Recording, TraceState::Idle).await;
            return Err(e.into());
        }

        tracing::info!(mode = ?params.transfer_mode, "tracing started");
        Ok(())
    }

    /// Ask the agent to stop; the session ends when `tracingComplete` arrives
    pub async fn end(&self) -> Result<()> {
        {
            let mut session = self.session.lock().await;
            if session.state != TraceState::Recording {
                return Err(BrowserError::NotRecording);
            }
            session.state = TraceState::Stopping;
        }
        self.state_tx.send_replace(TraceState::Stopping);

        if let Err(e) = self.transport.send_command("Tracing.end", None).await {
            // Still recording unless tracingComplete won the race
            self.revert(TraceState::Stopping, TraceState::Recording).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn request_memory_dump(&self) -> Result<MemoryDumpResult> {
        self.ensure_recording().await?;
        let result = self
            .transport
            .send_command("Tracing.requestMemoryDump", None)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn record_clock_sync_marker(&self, sync_id: &str) -> Result<()> {
        self.ensure_recording().await?;
        self.transport
            .send_command(
                "Tracing.recordClockSyncMarker",
                Some(json!({ "syncId": sync_id })),
            )
            .await?;
        Ok(())
    }

    /// Supported categories; valid in any state
    pub async fn get_categories(&self) -> Result<Vec<String>> {
        let result = self
            .transport
            .send_command("Tracing.getCategories", None)
            .await?;
        let result: CategoriesResult = serde_json::from_value(result)?;
        Ok(result.categories)
    }

    pub async fn handle_event(&self, event: TraceEvent) {
        match event {
            TraceEvent::BufferUsage(usage) => {
                self.usage_tx.send_replace(usage);
            }
            TraceEvent::DataCollected(data) => {
                let mut session = self.session.lock().await;
                match (session.state, session.transfer_mode) {
                    (TraceState::Idle, _) => {
                        tracing::debug!(chunks = data.value.len(), "dataCollected while idle, dropped");
                    }
                    (_, TransferMode::ReturnAsStream) => {
                        tracing::warn!(chunks = data.value.len(), "dataCollected in stream mode, dropped");
                    }
                    (_, TransferMode::ReportEvents) => session.chunks.extend(data.value),
                }
            }
            TraceEvent::TracingComplete(complete) => {
                let mut session = self.session.lock().await;
                if session.state == TraceState::Idle {
                    tracing::debug!("tracingComplete while idle, ignoring");
                    return;
                }

                let output = match complete.stream {
                    Some(handle) => TraceOutput::Stream {
                        handle,
                        compression: complete.stream_compression,
                    },
                    None => TraceOutput::Inline(std::mem::take(&mut session.chunks)),
                };
                session.output = Some(output);
                session.state = TraceState::Idle;
                drop(session);

                self.state_tx.send_replace(TraceState::Idle);
                tracing::info!("tracing complete");
            }
        }
    }

    /// Decode and handle a raw event; false when it was not a Tracing event
    pub async fn handle_cdp_event(&self, method: &str, params: Option<Value>) -> Result<bool> {
        match TraceEvent::from_cdp(method, params)? {
            Some(event) => {
                self.handle_event(event).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Output of the last finished session, once
    pub async fn take_output(&self) -> Option<TraceOutput> {
        self.session.lock().await.output.take()
    }

    /// Put back output a consumer could not finish with. Refused (false)
    /// once a newer session has started or produced its own output.
    pub async fn restore_output(&self, output: TraceOutput) -> bool {
        let mut session = self.session.lock().await;
        if session.state != TraceState::Idle || session.output.is_some() {
            return false;
        }
        session.output = Some(output);
        true
    }

    /// Resolve once the recorder is back to idle
    pub async fn wait_until_idle(&self) {
        let mut rx = self.state_tx.subscribe();
        // The sender lives in self, so the channel cannot close under us
        let _ = rx.wait_for(|state| *state == TraceState::Idle).await;
    }

    async fn ensure_recording(&self) -> Result<()> {
        if self.session.lock().await.state != TraceState::Recording {
            return Err(BrowserError::NotRecording);
        }
        Ok(())
    }

    /// Roll back to `to` only if nothing moved the session off `from`
    async fn revert(&self, from: TraceState, to: TraceState) {
        let mut session = self.session.lock().await;
        if session.state != from {
            tracing::debug!(state = ?session.state, "state moved on, not reverting");
            return;
        }
        session.state = to;
        self.state_tx.send_replace(to);
    }
}
