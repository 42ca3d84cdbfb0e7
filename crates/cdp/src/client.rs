//! CDP Client - WebSocket implementation of the transport
//!
//! Design decisions:
//! 1. Single WebSocket per browser connection (no per-session WS overhead)
//! 2. Request/response matching via ID, bounded by a per-request timeout
//! 3. Ordered event streams for consumers that must apply events in
//!    delivery order (the DOM mirror, the trace recorder)
//! 4. Fail fast - no retries, no queuing. Let the caller decide.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{CDPError, Result};
use crate::protocol::*;
use crate::transport::Transport;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// How long a request waits for its response unless configured otherwise
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// CDP Client - manages single WebSocket connection to browser
pub struct CDPClient {
    /// Monotonic request ID counter
    next_id: AtomicU64,

    /// Pending requests waiting for responses
    pending: Arc<DashMap<RequestId, oneshot::Sender<CDPResponse>>>,

    /// Ordered event feeds, every event goes to every live stream
    streams: Mutex<Vec<mpsc::UnboundedSender<CDPEvent>>>,

    /// WebSocket write half (wrapped for concurrent sending)
    ws_sink: Arc<RwLock<WsSink>>,

    request_timeout: Duration,
}

impl CDPClient {
    /// Connect to Chrome DevTools Protocol endpoint
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        Self::connect_with_timeout(ws_url, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Connect with a custom per-request timeout
    pub async fn connect_with_timeout(ws_url: &str, request_timeout: Duration) -> Result<Arc<Self>> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = ws_stream.split();

        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            streams: Mutex::new(Vec::new()),
            ws_sink: Arc::new(RwLock::new(sink)),
            request_timeout,
        });

        // The reader task only holds a weak handle so dropping the client ends it
        let weak = Arc::downgrade(&client);
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let Some(client) = weak.upgrade() else {
                    break;
                };
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = client.handle_message(&text) {
                            tracing::error!("Failed to handle message: {}", e);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Dropping the senders wakes every waiter with `Closed`
            if let Some(client) = weak.upgrade() {
                client.pending.clear();
                if let Ok(mut streams) = client.streams.lock() {
                    streams.clear();
                }
            }
        });

        Ok(client)
    }

    /// Send CDP request and wait for response
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CDPRequest {
            id,
            method: method.into(),
            params,
            session_id,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let json = serde_json::to_string(&request)?;
        tracing::trace!(id, method = %request.method, "sending request");
        let mut sink = self.ws_sink.write().await;
        if let Err(e) = sink.send(Message::Text(json)).await {
            self.pending.remove(&id);
            return Err(CDPError::WebSocket(e));
        }
        drop(sink); // Release lock immediately

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(response) => response.map_err(|_| CDPError::Closed)?,
            Err(_) => {
                self.pending.remove(&id);
                tracing::warn!(id, method = %request.method, "request timed out");
                return Err(CDPError::Timeout);
            }
        };
        if response.id != id {
            return Err(CDPError::InvalidResponse(id));
        }

        if let Some(error) = response.error {
            return Err(CDPError::Protocol {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Open an ordered feed of every event received on this connection
    pub fn event_stream(&self) -> mpsc::UnboundedReceiver<CDPEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut streams) = self.streams.lock() {
            streams.push(tx);
        }
        rx
    }

    /// Handle incoming WebSocket message
    fn handle_message(&self, text: &str) -> Result<()> {
        let msg: CDPMessage = serde_json::from_str(text)?;

        match msg {
            CDPMessage::Response(response) => {
                if let Some((_, tx)) = self.pending.remove(&response.id) {
                    let _ = tx.send(response); // Receiver dropped, nothing to do
                } else {
                    tracing::warn!("Received response for unknown request: {}", response.id);
                }
            }
            CDPMessage::Event(event) => {
                if let Ok(mut streams) = self.streams.lock() {
                    streams.retain(|tx| tx.send(event.clone()).is_ok());
                }
            }
        }

        Ok(())
    }

    /// Close connection gracefully
    pub async fn close(&self) -> Result<()> {
        let mut sink = self.ws_sink.write().await;
        sink.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for CDPClient {
    async fn send_command(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.send_request(method, params, None).await
    }
}
