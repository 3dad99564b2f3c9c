use crate::merger::ResultMerger;
use crate::receiver::ResultReceiver;
use crate::transport::{Transport, TransportEvent, WireRequest};
use bytes::BytesMut;
use prost::Message;
use skyq_common::{ChunkId, ErrorReport, QueryId, RequestId, Result, SkyqError};
use skyq_planner::ChunkQuerySpec;
use skyq_proto::{
    write_frame, ProtoRequestHeader, ProtoTaskMsg, RequestKind, ResourcePath,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

/// Worker error code meaning "chunk not owned here"; the executive treats
/// the replica as absent and retries elsewhere.
pub const ERR_CHUNK_NOT_OWNED: i32 = 404;

/// Executive behavior knobs, a slice of the deployment tuning.
#[derive(Debug, Clone)]
pub struct ExecutiveConfig {
    /// Max chunk requests in flight at once.
    pub fan_out: usize,
    /// Attempts per chunk; each attempt targets a distinct replica worker.
    pub max_chunk_retries: u32,
    /// Receiver buffer capacity in bytes.
    pub receiver_buffer_bytes: usize,
}

impl Default for ExecutiveConfig {
    fn default() -> Self {
        Self {
            fan_out: 32,
            max_chunk_retries: 3,
            receiver_buffer_bytes: 256 * 1024,
        }
    }
}

/// Lifecycle of one chunk request as tracked by the executive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAttempt {
    /// Waiting for a dispatch slot.
    Queued,
    /// Streaming from the named worker.
    InProgress {
        /// Request id on the wire.
        request_id: RequestId,
        /// Worker serving the attempt.
        worker: String,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Completed successfully.
    Done,
    /// Failed terminally.
    Failed,
}

/// Terminal disposition of one executive run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Every chunk merged.
    Success,
    /// Failed with a user-visible report.
    Failed(ErrorReport),
    /// Cancelled cooperatively.
    Cancelled,
}

/// Per-user-query dispatcher.
///
/// Owns the set of outstanding per-chunk requests: issues them over the
/// transport under a bounded fan-out, retries failed chunks on distinct
/// replica workers, propagates cancellation and reports completion.
pub struct Executive {
    query: QueryId,
    config: ExecutiveConfig,
    transport: Arc<dyn Transport>,
    merger: Arc<ResultMerger>,
    /// Replica workers per chunk, czar-side view of the placement.
    replicas: HashMap<ChunkId, Vec<String>>,
    scan_query: bool,
    status: Mutex<HashMap<ChunkId, ChunkAttempt>>,
    cancelled: AtomicBool,
    cancel_notify: Notify,
}

impl Executive {
    /// Executive for one query.
    pub fn new(
        query: QueryId,
        config: ExecutiveConfig,
        transport: Arc<dyn Transport>,
        merger: Arc<ResultMerger>,
        replicas: HashMap<ChunkId, Vec<String>>,
        scan_query: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            query,
            config,
            transport,
            merger,
            replicas,
            scan_query,
            status: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        })
    }

    /// Dispatch every chunk spec, wait for completion and run the merge.
    pub async fn run(self: &Arc<Self>, specs: Vec<ChunkQuerySpec>) -> QueryOutcome {
        {
            let mut status = self.status.lock().expect("status lock");
            for spec in &specs {
                status.insert(spec.chunk, ChunkAttempt::Queued);
            }
        }
        let slots = Arc::new(Semaphore::new(self.config.fan_out.max(1)));
        let mut handles = Vec::with_capacity(specs.len());
        for spec in specs {
            let this = Arc::clone(self);
            let slots = Arc::clone(&slots);
            handles.push(tokio::spawn(async move {
                let _permit = slots.acquire_owned().await.expect("semaphore open");
                if this.is_cancelled() {
                    return Err(SkyqError::Cancelled);
                }
                this.run_chunk(spec).await
            }));
        }

        let mut first_error: Option<SkyqError> = None;
        for h in handles {
            match h.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() && !matches!(e, SkyqError::Cancelled) {
                        first_error = Some(e);
                    }
                }
                Err(join) => {
                    if first_error.is_none() {
                        first_error = Some(SkyqError::Internal(format!(
                            "chunk task panicked: {join}"
                        )));
                    }
                }
            }
        }

        if self.is_cancelled() {
            return QueryOutcome::Cancelled;
        }
        if let Some(e) = first_error {
            tracing::warn!(query_id = %self.query, error = %e, "query failed");
            return QueryOutcome::Failed(ErrorReport::from_error(&e));
        }
        match self.merger.finalize().await {
            Ok(()) => {
                tracing::info!(query_id = %self.query, "query merged");
                QueryOutcome::Success
            }
            Err(e) => QueryOutcome::Failed(ErrorReport::from_error(&e)),
        }
    }

    /// Cancel the query; outstanding requests are aborted. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::info!(query_id = %self.query, "query cancelled");
        }
        self.cancel_notify.notify_waiters();
    }

    /// Whether a cancel was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Snapshot of per-chunk attempt states.
    pub fn status(&self) -> HashMap<ChunkId, ChunkAttempt> {
        self.status.lock().expect("status lock").clone()
    }

    fn set_status(&self, chunk: ChunkId, s: ChunkAttempt) {
        self.status.lock().expect("status lock").insert(chunk, s);
    }

    async fn run_chunk(self: &Arc<Self>, spec: ChunkQuerySpec) -> Result<()> {
        let chunk = spec.chunk;
        let mut tried: Vec<String> = Vec::new();
        let max_attempts = self.config.max_chunk_retries.max(1);

        for attempt in 1..=max_attempts {
            if self.is_cancelled() {
                return Err(SkyqError::Cancelled);
            }
            let Some(worker) = self.pick_worker(chunk, &tried) else {
                self.set_status(chunk, ChunkAttempt::Failed);
                return Err(SkyqError::ChunkUnreachable(chunk.0));
            };
            tried.push(worker.clone());

            match self.attempt_chunk(&spec, &worker, attempt).await {
                Ok(()) => {
                    self.set_status(chunk, ChunkAttempt::Done);
                    return Ok(());
                }
                Err(SkyqError::Cancelled) => {
                    self.merger.chunk_failed(chunk, attempt).await.ok();
                    return Err(SkyqError::Cancelled);
                }
                Err(e) => {
                    self.merger.chunk_failed(chunk, attempt).await.ok();
                    tracing::warn!(
                        query_id = %self.query,
                        chunk = %chunk,
                        worker = %worker,
                        attempt,
                        error = %e,
                        "chunk attempt failed; retrying on another replica"
                    );
                }
            }
        }
        self.set_status(chunk, ChunkAttempt::Failed);
        Err(SkyqError::ChunkUnreachable(chunk.0))
    }

    fn pick_worker(&self, chunk: ChunkId, tried: &[String]) -> Option<String> {
        self.replicas.get(&chunk).and_then(|workers| {
            workers
                .iter()
                .find(|w| !tried.contains(w))
                .cloned()
        })
    }

    async fn attempt_chunk(
        self: &Arc<Self>,
        spec: &ChunkQuerySpec,
        worker: &str,
        attempt: u32,
    ) -> Result<()> {
        let request_id = RequestId::generate();
        self.set_status(
            spec.chunk,
            ChunkAttempt::InProgress {
                request_id,
                worker: worker.to_string(),
                attempt,
            },
        );

        let request = build_chunk_request(request_id, spec, self.scan_query);
        let mut session = self.transport.submit(worker, request).await?;
        let mut receiver = ResultReceiver::new(
            spec.chunk,
            attempt,
            self.config.receiver_buffer_bytes,
            Arc::clone(&self.merger),
        );

        // Register for cancel wakeups before re-checking the flag, so a
        // cancel can neither race past the registration nor the check.
        let mut cancelled = std::pin::pin!(self.cancel_notify.notified());
        cancelled.as_mut().enable();
        if self.is_cancelled() {
            session.finished(true);
            return Err(SkyqError::Cancelled);
        }

        loop {
            let event = tokio::select! {
                e = session.next_event() => e,
                _ = cancelled.as_mut() => {
                    session.finished(true);
                    return Err(SkyqError::Cancelled);
                }
            };
            match event {
                Some(TransportEvent::Response(header)) => {
                    if header.error_code == ERR_CHUNK_NOT_OWNED {
                        session.finished(true);
                        return Err(SkyqError::WorkerChunkNotOwned {
                            worker: worker.to_string(),
                            db: spec.db.clone(),
                            chunk: spec.chunk.0,
                        });
                    }
                    if header.error_code != 0 {
                        session.finished(true);
                        return Err(SkyqError::Transport(format!(
                            "worker error {}: {}",
                            header.error_code, header.error_msg
                        )));
                    }
                }
                Some(TransportEvent::Data { bytes, is_last }) => {
                    receiver.append(&bytes, is_last).await?;
                    if is_last {
                        session.finished(false);
                        self.merger.chunk_succeeded(spec.chunk, attempt).await?;
                        return Ok(());
                    }
                }
                Some(TransportEvent::Error { code, msg }) => {
                    receiver.error_flush(&msg, code).await;
                    session.finished(true);
                    return Err(SkyqError::Transport(format!("stream error {code}: {msg}")));
                }
                None => {
                    session.finished(true);
                    return Err(SkyqError::Transport(
                        "stream closed before final frame".to_string(),
                    ));
                }
            }
        }
    }
}

/// Frame a chunk sub-query for the wire.
fn build_chunk_request(request_id: RequestId, spec: &ChunkQuerySpec, scan: bool) -> WireRequest {
    let header = ProtoRequestHeader {
        request_id: request_id.to_string(),
        kind: RequestKind::Query as i32,
        service_type: "CHUNK_QUERY".to_string(),
    };
    let task = ProtoTaskMsg {
        db: spec.db.clone(),
        chunk_id: spec.chunk.0,
        sub_chunks: spec.sub_chunks.clone(),
        fragments: spec.fragments.clone(),
        scan_query: scan,
    };
    let mut buf = BytesMut::new();
    write_frame(&mut buf, &header.encode_to_vec(), false);
    let header_frame = buf.split().freeze();
    write_frame(&mut buf, &task.encode_to_vec(), true);
    let task_frame = buf.split().freeze();
    WireRequest {
        resource: ResourcePath::Chunk {
            db: spec.db.clone(),
            chunk: spec.chunk.0,
        },
        frames: vec![header_frame, task_frame],
    }
}
