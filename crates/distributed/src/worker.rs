use crate::inventory::ChunkInventory;
use crate::transport::TransportEvent;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use prost::Message;
use skyq_common::{Result, SkyqError};
use skyq_proto::{
    read_frame, ProtoRequestHeader, ProtoResultHeader, ProtoTaskMsg, ProtoWorkerCmdMsg,
    RequestKind, ResourcePath, WorkerCommand,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Worker error code for a chunk the local inventory does not list.
pub const ERR_CHUNK_NOT_OWNED: i32 = 404;
/// Worker error code for a malformed or inconsistent request.
pub const ERR_BAD_REQUEST: i32 = 400;
/// Worker error code for a failed task execution.
pub const ERR_EXECUTION: i32 = 500;

/// Seam to the embedded per-chunk SQL engine.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Execute one parallel-SQL fragment and return its result payload
    /// frames in streaming order.
    async fn run_fragment(&self, db: &str, fragment: &str) -> Result<Vec<Bytes>>;

    /// Re-read the chunk list from disk (RELOAD_CHUNK_LIST).
    async fn reload_chunk_list(&self) -> Result<Vec<(String, u32)>>;
}

/// One decoded unit of work on the processing queue.
#[derive(Debug)]
pub enum WorkerTask {
    /// A chunk sub-query.
    Query {
        /// Wire request id, echoed in response headers.
        request_id: String,
        /// Decoded task message.
        task: ProtoTaskMsg,
        /// Response channel bound to the streaming session.
        response: mpsc::Sender<TransportEvent>,
    },
    /// A worker management command.
    Command {
        /// Wire request id.
        request_id: String,
        /// Decoded command.
        command: WorkerCommand,
        /// Response channel bound to the streaming session.
        response: mpsc::Sender<TransportEvent>,
    },
}

/// Worker-side request intake.
///
/// Validates the resource against the local chunk inventory, decodes the
/// task payload, releases the request buffer and enqueues the task onto a
/// bounded processing pool. Response frames are serialized through a
/// per-request channel bound to the streaming session; the client dropping
/// its end is the cancel signal and stops production at the next send.
pub struct RequestRouter {
    worker_name: String,
    inventory: Arc<ChunkInventory>,
    queue_tx: mpsc::Sender<WorkerTask>,
}

impl RequestRouter {
    /// Start a router with `processing_slots` concurrent task executors.
    pub fn new(
        worker_name: impl Into<String>,
        inventory: Arc<ChunkInventory>,
        runner: Arc<dyn TaskRunner>,
        processing_slots: usize,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel::<WorkerTask>(processing_slots.max(1) * 4);
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        for slot in 0..processing_slots.max(1) {
            let rx = Arc::clone(&queue_rx);
            let runner = Arc::clone(&runner);
            let inventory = Arc::clone(&inventory);
            tokio::spawn(async move {
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else {
                        break;
                    };
                    process_task(slot, task, &*runner, &inventory).await;
                }
            });
        }
        Arc::new(Self {
            worker_name: worker_name.into(),
            inventory,
            queue_tx,
        })
    }

    /// Accept one framed request and bind a response stream to it.
    ///
    /// The request buffer is consumed and released before the task reaches
    /// the processing pool, so the transport can reuse the session for new
    /// requests immediately.
    pub async fn handle(
        &self,
        resource: ResourcePath,
        mut request: BytesMut,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        let header_frame = read_frame(&mut request)?
            .ok_or_else(|| SkyqError::Transport("missing request header frame".to_string()))?;
        let header = ProtoRequestHeader::decode(header_frame.payload.as_ref())
            .map_err(|e| SkyqError::Transport(format!("bad request header: {e}")))?;
        let kind = RequestKind::try_from(header.kind)
            .map_err(|_| SkyqError::Transport(format!("bad request kind: {}", header.kind)))?;

        match (&resource, kind) {
            (ResourcePath::Chunk { db, chunk }, RequestKind::Query) => {
                self.handle_chunk_query(db.clone(), *chunk, header.request_id, request)
                    .await
            }
            (ResourcePath::Worker { name }, RequestKind::WorkerCmd) => {
                self.handle_worker_cmd(name, header.request_id, request).await
            }
            _ => Err(SkyqError::Transport(format!(
                "resource {resource} does not accept {kind:?} requests"
            ))),
        }
    }

    async fn handle_chunk_query(
        &self,
        db: String,
        chunk: u32,
        request_id: String,
        mut request: BytesMut,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(1);

        if !self.inventory.contains(&db, chunk) {
            // Not ours: report and release the buffer without queueing.
            drop(request);
            tracing::warn!(
                worker = %self.worker_name,
                db = %db,
                chunk,
                operator = "RequestRouter",
                "rejecting query for chunk not in local inventory"
            );
            send_error_header(
                &tx,
                &request_id,
                ERR_CHUNK_NOT_OWNED,
                format!("chunk {chunk} of '{db}' is not served by this worker"),
            )
            .await;
            return Ok(rx);
        }

        let task_frame = read_frame(&mut request)?
            .ok_or_else(|| SkyqError::Transport("missing task payload frame".to_string()))?;
        let task = ProtoTaskMsg::decode(task_frame.payload.as_ref())
            .map_err(|e| SkyqError::Transport(format!("bad task message: {e}")))?;
        // Release the transport's request buffer before queueing.
        drop(request);

        if task.db != db || task.chunk_id != chunk {
            send_error_header(
                &tx,
                &request_id,
                ERR_BAD_REQUEST,
                format!(
                    "task targets {}:{} but resource names {db}:{chunk}",
                    task.db, task.chunk_id
                ),
            )
            .await;
            return Ok(rx);
        }

        tracing::debug!(
            worker = %self.worker_name,
            db = %db,
            chunk,
            fragments = task.fragments.len(),
            scan = task.scan_query,
            operator = "RequestRouter",
            "queueing chunk query"
        );
        self.queue_tx
            .send(WorkerTask::Query {
                request_id,
                task,
                response: tx,
            })
            .await
            .map_err(|_| SkyqError::Internal("processing queue closed".to_string()))?;
        Ok(rx)
    }

    async fn handle_worker_cmd(
        &self,
        name: &str,
        request_id: String,
        mut request: BytesMut,
    ) -> Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(1);
        if name != self.worker_name {
            send_error_header(
                &tx,
                &request_id,
                ERR_CHUNK_NOT_OWNED,
                format!("command addressed to '{name}', this worker is '{}'", self.worker_name),
            )
            .await;
            return Ok(rx);
        }
        let cmd_frame = read_frame(&mut request)?
            .ok_or_else(|| SkyqError::Transport("missing command payload frame".to_string()))?;
        let cmd = ProtoWorkerCmdMsg::decode(cmd_frame.payload.as_ref())
            .map_err(|e| SkyqError::Transport(format!("bad command message: {e}")))?;
        drop(request);
        let command = WorkerCommand::try_from(cmd.command)
            .map_err(|_| SkyqError::Transport(format!("bad command: {}", cmd.command)))?;
        self.queue_tx
            .send(WorkerTask::Command {
                request_id,
                command,
                response: tx,
            })
            .await
            .map_err(|_| SkyqError::Internal("processing queue closed".to_string()))?;
        Ok(rx)
    }
}

async fn send_error_header(
    tx: &mpsc::Sender<TransportEvent>,
    request_id: &str,
    code: i32,
    msg: String,
) {
    let _ = tx
        .send(TransportEvent::Response(ProtoResultHeader {
            request_id: request_id.to_string(),
            error_code: code,
            error_msg: msg,
            row_count: 0,
        }))
        .await;
}

async fn process_task(
    slot: usize,
    task: WorkerTask,
    runner: &dyn TaskRunner,
    inventory: &ChunkInventory,
) {
    match task {
        WorkerTask::Query {
            request_id,
            task,
            response,
        } => {
            let ok = ProtoResultHeader {
                request_id: request_id.clone(),
                error_code: 0,
                error_msg: String::new(),
                row_count: 0,
            };
            if response.send(TransportEvent::Response(ok)).await.is_err() {
                return; // client went away before processing started
            }
            for fragment in &task.fragments {
                match runner.run_fragment(&task.db, fragment).await {
                    Ok(payloads) => {
                        for payload in payloads {
                            if response
                                .send(TransportEvent::Data {
                                    bytes: payload,
                                    is_last: false,
                                })
                                .await
                                .is_err()
                            {
                                // Cancelled by the client; stop producing.
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            slot,
                            error = %e,
                            operator = "WorkerTask",
                            "fragment execution failed"
                        );
                        let _ = response
                            .send(TransportEvent::Error {
                                code: ERR_EXECUTION,
                                msg: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }
            let _ = response
                .send(TransportEvent::Data {
                    bytes: Bytes::new(),
                    is_last: true,
                })
                .await;
        }
        WorkerTask::Command {
            request_id,
            command,
            response,
        } => {
            let result = match command {
                WorkerCommand::ReloadChunkList => runner.reload_chunk_list().await.map(|chunks| {
                    inventory.replace(chunks);
                }),
            };
            let header = match result {
                Ok(()) => ProtoResultHeader {
                    request_id,
                    error_code: 0,
                    error_msg: String::new(),
                    row_count: 0,
                },
                Err(e) => ProtoResultHeader {
                    request_id,
                    error_code: ERR_EXECUTION,
                    error_msg: e.to_string(),
                    row_count: 0,
                },
            };
            if response.send(TransportEvent::Response(header)).await.is_err() {
                return;
            }
            let _ = response
                .send(TransportEvent::Data {
                    bytes: Bytes::new(),
                    is_last: true,
                })
                .await;
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod worker_tests;
