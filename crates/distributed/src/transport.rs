use async_trait::async_trait;
use bytes::Bytes;
use skyq_common::Result;
use skyq_proto::{ProtoResultHeader, ResourcePath};
use tokio::sync::{mpsc, oneshot};

/// One event of a streaming response.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The worker acknowledged the request.
    Response(ProtoResultHeader),
    /// One data frame.
    Data {
        /// Frame payload.
        bytes: Bytes,
        /// Final-frame marker.
        is_last: bool,
    },
    /// Stream terminated with a transport- or worker-level error.
    Error {
        /// Error code; negative values are transport-level.
        code: i32,
        /// Description.
        msg: String,
    },
}

/// An already-framed outgoing request.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// Target resource.
    pub resource: ResourcePath,
    /// Header frame followed by kind-specific payload frames.
    pub frames: Vec<Bytes>,
}

/// Live exchange with one worker.
///
/// Events arrive strictly in order through a bounded channel: the transport
/// does not produce the next event until the previous one was consumed,
/// which is what propagates merger back-pressure to the worker.
pub struct TransportSession {
    events: mpsc::Receiver<TransportEvent>,
    finish: Option<oneshot::Sender<bool>>,
}

impl TransportSession {
    /// Pair a session with its transport-side handles.
    pub fn new(
        events: mpsc::Receiver<TransportEvent>,
        finish: oneshot::Sender<bool>,
    ) -> Self {
        Self {
            events,
            finish: Some(finish),
        }
    }

    /// Await the next event; `None` once the stream closed.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Acknowledge completion, or abort with `cancel = true` so the worker
    /// stops producing data. Idempotent.
    pub fn finished(&mut self, cancel: bool) {
        if let Some(tx) = self.finish.take() {
            let _ = tx.send(cancel);
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        // An unacknowledged drop counts as an abort.
        self.finished(true);
    }
}

/// Pluggable streaming-RPC fabric.
///
/// Implementations own connection management and framing on the wire; the
/// dispatch layer only sees ordered [`TransportEvent`]s.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a streaming exchange with `worker`.
    async fn submit(&self, worker: &str, request: WireRequest) -> Result<TransportSession>;
}
