//! Event routing - one ordered feed, many domain sinks
//!
//! Every event goes to each sink registered for its domain, one sink after
//! the other and one event after the other. Nothing is spawned per event,
//! so a sink observes events in exactly the order the transport delivered
//! them.

use async_trait::async_trait;
use cdp::protocol::CDPEvent;
use cdp::Transport;
use dom::DomMirror;
use std::sync::Arc;

use crate::error::Result;
use crate::trace::TraceRecorder;

/// Consumer of one protocol domain's events
#[async_trait]
pub trait DomainSink: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Domain prefix this sink consumes, e.g. `"DOM"`
    fn domain(&self) -> &str;

    /// Handle one event of the sink's domain.
    ///
    /// Errors are payload problems; the router logs them and moves on.
    async fn on_event(&self, event: &CDPEvent) -> Result<()>;
}

#[async_trait]
impl<T: Transport + 'static> DomainSink for DomMirror<T> {
    fn name(&self) -> &str {
        "dom-mirror"
    }

    fn domain(&self) -> &str {
        "DOM"
    }

    async fn on_event(&self, event: &CDPEvent) -> Result<()> {
        self.handle_cdp_event(&event.method, event.params.clone())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + 'static> DomainSink for TraceRecorder<T> {
    fn name(&self) -> &str {
        "trace-recorder"
    }

    fn domain(&self) -> &str {
        "Tracing"
    }

    async fn on_event(&self, event: &CDPEvent) -> Result<()> {
        self.handle_cdp_event(&event.method, event.params.clone())
            .await?;
        Ok(())
    }
}

/// Dispatches events to the sinks of their domain
#[derive(Default)]
pub struct EventRouter {
    sinks: Vec<Arc<dyn DomainSink>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Arc<dyn DomainSink>) {
        tracing::debug!("Registered sink {} for {}", sink.name(), sink.domain());
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver one event sequentially; returns how many sinks took it
    pub async fn dispatch(&self, event: &CDPEvent) -> usize {
        let domain = event.domain();
        let mut delivered = 0;

        for sink in self.sinks.iter().filter(|s| s.domain() == domain) {
            if let Err(e) = sink.on_event(event).await {
                tracing::warn!(sink = sink.name(), method = %event.method, error = %e, "sink rejected event");
            }
            delivered += 1;
        }

        if delivered == 0 {
            tracing::trace!(method = %event.method, "no sink for event");
        }
        delivered
    }
}
