//! Stream reader for the IO domain
//!
//! Each handle owns a cursor behind its own async mutex, so reads on one
//! handle are serialized while different handles proceed concurrently.
//! The offset is always sent explicitly; the cursor is ours, not the
//! remote end's.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cdp::Transport;
use dashmap::{DashMap, DashSet};
use dom::RemoteObjectId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{BrowserError, Result};

/// Opaque stream token, either issued by the remote end or `blob:<uuid>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamHandle(pub String);

impl StreamHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn blob(uuid: Uuid) -> Self {
        Self(format!("blob:{}", uuid))
    }

    /// The blob uuid, for `blob:` handles
    pub fn blob_uuid(&self) -> Option<Uuid> {
        self.0
            .strip_prefix("blob:")
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One `IO.read` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadChunk {
    #[serde(default)]
    pub base64_encoded: bool,
    pub data: String,
    pub eof: bool,
}

impl ReadChunk {
    fn end(base64_encoded: bool) -> Self {
        Self {
            base64_encoded,
            data: String::new(),
            eof: true,
        }
    }

    /// Payload bytes, decoded when the chunk is base64
    pub fn bytes(&self) -> Result<Vec<u8>> {
        if self.base64_encoded {
            Ok(STANDARD.decode(&self.data)?)
        } else {
            Ok(self.data.as_bytes().to_vec())
        }
    }
}

/// Reader configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReaderConfig {
    /// `size` sent with reads that pass none; `None` leaves it to the agent
    pub chunk_size: Option<u32>,
}

#[derive(Debug, Default)]
struct Cursor {
    position: u64,
    eof: bool,
    /// Encoding fixed by the first non-empty chunk
    base64: Option<bool>,
}

#[derive(Deserialize)]
struct ResolveBlobResult {
    uuid: String,
}

pub struct StreamReader<T: Transport> {
    transport: Arc<T>,
    config: ReaderConfig,
    cursors: DashMap<StreamHandle, Arc<Mutex<Cursor>>>,
    /// Tombstones for closed handles, kept for the reader's lifetime so a
    /// stale handle never reopens a fresh cursor. One short string per
    /// stream the session ever closed.
    closed: DashSet<StreamHandle>,
}

impl<T: Transport> StreamReader<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_config(transport, ReaderConfig::default())
    }

    pub fn with_config(transport: Arc<T>, config: ReaderConfig) -> Self {
        Self {
            transport,
            config,
            cursors: DashMap::new(),
            closed: DashSet::new(),
        }
    }

    /// Read the next chunk.
    ///
    /// Without `offset` the read continues where the previous one ended;
    /// with it, the read seeks there first. Once the stream reported EOF,
    /// reads without an offset answer locally with an empty EOF chunk.
    pub async fn read(
        &self,
        handle: &StreamHandle,
        offset: Option<u64>,
        size: Option<u32>,
    ) -> Result<ReadChunk> {
        let (chunk, _) = self.read_decoded(handle, offset, size).await?;
        Ok(chunk)
    }

    /// Read one chunk and its payload, decoded once
    async fn read_decoded(
        &self,
        handle: &StreamHandle,
        offset: Option<u64>,
        size: Option<u32>,
    ) -> Result<(ReadChunk, Vec<u8>)> {
        let cursor = self.cursor(handle)?;
        let mut cursor = cursor.lock().await;
        // Closed while we waited for the lock
        if self.closed.contains(handle) {
            return Err(BrowserError::HandleClosed(handle.clone()));
        }

        if offset.is_none() && cursor.eof {
            return Ok((ReadChunk::end(cursor.base64.unwrap_or(false)), Vec::new()));
        }

        let position = offset.unwrap_or(cursor.position);
        let mut params = json!({ "handle": handle, "offset": position });
        if let Some(size) = size.or(self.config.chunk_size) {
            params["size"] = Value::from(size);
        }

        let result = self.transport.send_command("IO.read", Some(params)).await?;
        let chunk: ReadChunk = serde_json::from_value(result)?;

        if !chunk.data.is_empty() {
            let known = cursor.base64;
            match known {
                Some(was_base64) if was_base64 != chunk.base64_encoded => {
                    return Err(BrowserError::EncodingMismatch {
                        handle: handle.clone(),
                        was_base64,
                    });
                }
                Some(_) => {}
                None => cursor.base64 = Some(chunk.base64_encoded),
            }
        }

        let bytes = chunk.bytes()?;
        cursor.position = position + bytes.len() as u64;
        cursor.eof = chunk.eof;

        tracing::trace!(handle = %handle, position = cursor.position, eof = chunk.eof, "stream read");
        Ok((chunk, bytes))
    }

    /// Drain the stream from the current cursor to EOF
    pub async fn read_to_end(&self, handle: &StreamHandle) -> Result<Vec<u8>> {
        self.drain(handle, None).await
    }

    /// Drain the whole stream from offset 0, wherever the cursor is
    pub async fn read_all(&self, handle: &StreamHandle) -> Result<Vec<u8>> {
        self.drain(handle, Some(0)).await
    }

    async fn drain(&self, handle: &StreamHandle, mut offset: Option<u64>) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        loop {
            let (chunk, bytes) = self.read_decoded(handle, offset.take(), None).await?;
            buffer.extend(bytes);
            if chunk.eof {
                break;
            }
        }
        tracing::debug!(handle = %handle, bytes = buffer.len(), "stream drained");
        Ok(buffer)
    }

    /// Release the handle. Local state is dropped even if the remote
    /// close fails; the transport error is still returned.
    pub async fn close(&self, handle: &StreamHandle) -> Result<()> {
        if !self.closed.insert(handle.clone()) {
            return Err(BrowserError::HandleClosed(handle.clone()));
        }
        self.cursors.remove(handle);

        self.transport
            .send_command("IO.close", Some(json!({ "handle": handle })))
            .await?;
        tracing::debug!(handle = %handle, "stream closed");
        Ok(())
    }

    /// Handle for reading the contents of a `Blob` wrapper object
    pub async fn resolve_blob(&self, object_id: &RemoteObjectId) -> Result<StreamHandle> {
        let result = self
            .transport
            .send_command("IO.resolveBlob", Some(json!({ "objectId": object_id })))
            .await?;
        let result: ResolveBlobResult = serde_json::from_value(result)?;
        Ok(StreamHandle::blob(Uuid::parse_str(&result.uuid)?))
    }

    /// Offset the next read without `offset` would start from
    pub async fn position(&self, handle: &StreamHandle) -> Result<u64> {
        let cursor = self.cursor(handle)?;
        let position = cursor.lock().await.position;
        Ok(position)
    }

    fn cursor(&self, handle: &StreamHandle) -> Result<Arc<Mutex<Cursor>>> {
        if self.closed.contains(handle) {
            return Err(BrowserError::HandleClosed(handle.clone()));
        }
        Ok(self.cursors.entry(handle.clone()).or_default().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp::{CDPError, MockTransport};

    fn reader() -> (Arc<MockTransport>, StreamReader<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let reader = StreamReader::new(transport.clone());
        (transport, reader)
    }

    fn handle() -> StreamHandle {
        StreamHandle::new("stream-7")
    }

    #[tokio::test]
    async fn test_read_continues_after_explicit_offset() {
        let (transport, reader) = reader();
        transport.respond(
            "IO.read",
            json!({ "data": "aGVsbG8=", "base64Encoded": true, "eof": false }),
        );
        transport.respond(
            "IO.read",
            json!({ "data": "IHdvcmxk", "base64Encoded": true, "eof": false }),
        );

        let first = tokio_test::assert_ok!(reader.read(&handle(), Some(10), Some(5)).await);
        assert_eq!(first.bytes().unwrap(), b"hello");
        assert_eq!(reader.position(&handle()).await.unwrap(), 15);

        let second = reader.read(&handle(), None, None).await.unwrap();
        assert_eq!(second.bytes().unwrap(), b" world");

        assert_eq!(
            transport.calls_to("IO.read"),
            vec![
                json!({ "handle": "stream-7", "offset": 10, "size": 5 }),
                json!({ "handle": "stream-7", "offset": 15 }),
            ]
        );
    }

    #[tokio::test]
    async fn test_eof_is_repeatable_without_round_trip() {
        let (transport, reader) = reader();
        transport.respond("IO.read", json!({ "data": "tail", "eof": true }));

        let last = reader.read(&handle(), None, None).await.unwrap();
        assert!(last.eof);
        assert_eq!(last.data, "tail");

        for _ in 0..2 {
            let again = reader.read(&handle(), None, None).await.unwrap();
            assert!(again.eof);
            assert!(again.data.is_empty());
        }
        assert_eq!(transport.calls_to("IO.read").len(), 1);

        // Seeking back goes to the wire again
        transport.respond("IO.read", json!({ "data": "ta", "eof": false }));
        let rewound = reader.read(&handle(), Some(0), Some(2)).await.unwrap();
        assert!(!rewound.eof);
        assert_eq!(reader.position(&handle()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_reads_and_second_close() {
        let (transport, reader) = reader();

        reader.close(&handle()).await.unwrap();
        assert_eq!(
            transport.calls_to("IO.close"),
            vec![json!({ "handle": "stream-7" })]
        );

        let read = reader.read(&handle(), None, None).await;
        assert!(matches!(read, Err(BrowserError::HandleClosed(_))));
        let close = reader.close(&handle()).await;
        assert!(matches!(close, Err(BrowserError::HandleClosed(_))));
        assert_eq!(transport.calls_to("IO.close").len(), 1);
        assert!(transport.calls_to("IO.read").is_empty());
    }

    #[tokio::test]
    async fn test_close_is_local_even_when_remote_fails() {
        let (transport, reader) = reader();
        transport.fail("IO.close", -32000, "Invalid stream handle");

        let result = reader.close(&handle()).await;
        assert!(matches!(
            result,
            Err(BrowserError::Transport(CDPError::Protocol { .. }))
        ));
        let read = reader.read(&handle(), None, None).await;
        assert!(matches!(read, Err(BrowserError::HandleClosed(_))));
    }

    #[tokio::test]
    async fn test_encoding_switch_is_rejected() {
        let (transport, reader) = reader();
        transport.respond(
            "IO.read",
            json!({ "data": "AAEC", "base64Encoded": true, "eof": false }),
        );
        transport.respond(
            "IO.read",
            json!({ "data": "plain", "base64Encoded": false, "eof": false }),
        );

        let first = reader.read(&handle(), None, None).await.unwrap();
        assert_eq!(first.bytes().unwrap(), vec![0u8, 1, 2]);
        assert_eq!(reader.position(&handle()).await.unwrap(), 3);

        let second = reader.read(&handle(), None, None).await;
        assert!(matches!(
            second,
            Err(BrowserError::EncodingMismatch {
                was_base64: true,
                ..
            })
        ));
        assert_eq!(reader.position(&handle()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_read_to_end_uses_configured_chunk_size() {
        let transport = Arc::new(MockTransport::new());
        let reader = StreamReader::with_config(
            transport.clone(),
            ReaderConfig {
                chunk_size: Some(4),
            },
        );
        transport.respond("IO.read", json!({ "data": "{\"tr", "eof": false }));
        transport.respond("IO.read", json!({ "data": "ace\"", "eof": false }));
        transport.respond("IO.read", json!({ "data": ":1}", "eof": true }));

        let bytes = reader.read_to_end(&handle()).await.unwrap();
        assert_eq!(bytes, br#"{"trace":1}"#.to_vec());

        let offsets: Vec<u64> = transport
            .calls_to("IO.read")
            .iter()
            .map(|p| p["offset"].as_u64().unwrap())
            .collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        assert!(transport
            .calls_to("IO.read")
            .iter()
            .all(|p| p["size"] == 4));
    }

    #[tokio::test]
    async fn test_read_all_starts_over() {
        let (transport, reader) = reader();
        transport.respond("IO.read", json!({ "data": "abc", "eof": false }));
        transport.fail("IO.read", -32000, "Read failed");
        transport.respond("IO.read", json!({ "data": "abcdef", "eof": true }));

        assert!(reader.read_to_end(&handle()).await.is_err());
        assert_eq!(reader.position(&handle()).await.unwrap(), 3);

        let bytes = reader.read_all(&handle()).await.unwrap();
        assert_eq!(bytes, b"abcdef".to_vec());
        let offsets: Vec<u64> = transport
            .calls_to("IO.read")
            .iter()
            .map(|p| p["offset"].as_u64().unwrap())
            .collect();
        assert_eq!(offsets, vec![0, 3, 0]);
    }

    #[tokio::test]
    async fn test_independent_cursors_per_handle() {
        let (transport, reader) = reader();
        transport.respond("IO.read", json!({ "data": "abc", "eof": false }));
        transport.respond("IO.read", json!({ "data": "x", "eof": false }));

        let a = StreamHandle::new("a");
        let b = StreamHandle::new("b");
        reader.read(&a, None, None).await.unwrap();
        reader.read(&b, None, None).await.unwrap();

        assert_eq!(reader.position(&a).await.unwrap(), 3);
        assert_eq!(reader.position(&b).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_resolve_blob() {
        let (transport, reader) = reader();
        let uuid = Uuid::new_v4();
        transport.respond("IO.resolveBlob", json!({ "uuid": uuid.to_string() }));

        let handle = reader
            .resolve_blob(&RemoteObjectId("blob-obj".into()))
            .await
            .unwrap();
        assert_eq!(handle.as_str(), format!("blob:{}", uuid));
        assert_eq!(handle.blob_uuid(), Some(uuid));
        assert_eq!(
            transport.calls_to("IO.resolveBlob"),
            vec![json!({ "objectId": "blob-obj" })]
        );
    }

    #[test]
    fn test_plain_handle_has_no_blob_uuid() {
        assert_eq!(StreamHandle::new("stream-7").blob_uuid(), None);
    }
}
