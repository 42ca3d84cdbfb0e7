//! Scripted transport for tests
//!
//! Replies are queued per method and consumed in order. A method with no
//! queued reply answers `{}`, which is what most fire-and-forget commands
//! return anyway. Every call is recorded so tests can assert on params.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::oneshot;

use crate::error::{CDPError, Result};
use crate::transport::Transport;

enum Reply {
    Ready(Result<Value>),
    Deferred(oneshot::Receiver<Result<Value>>),
}

#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, Option<Value>)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, method: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Queue a successful result for `method`
    pub fn respond(&self, method: &str, result: Value) {
        self.push(method, Reply::Ready(Ok(result)));
    }

    /// Queue a protocol error for `method`
    pub fn fail(&self, method: &str, code: i32, message: &str) {
        self.push(
            method,
            Reply::Ready(Err(CDPError::Protocol {
                code,
                message: message.to_string(),
            })),
        );
    }

    /// Queue a reply the test completes later, to hold a command in flight
    pub fn respond_later(&self, method: &str) -> oneshot::Sender<Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.push(method, Reply::Deferred(rx));
        tx
    }

    /// Every command sent so far, in order
    pub fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Params of every call to `method`, in order
    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone().unwrap_or(Value::Null))
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_command(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(|queue| queue.pop_front());

        match reply {
            Some(Reply::Ready(result)) => result,
            Some(Reply::Deferred(rx)) => rx.await.map_err(|_| CDPError::Closed)?,
            None => Ok(json!({})),
        }
    }
}
