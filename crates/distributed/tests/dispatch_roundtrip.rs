//! End-to-end dispatch tests: executive fan-out, retry on alternate
//! replicas, cancellation and merge finalization over mock transport and
//! result store.

use async_trait::async_trait;
use bytes::Bytes;
use skyq_common::{ChunkId, QueryId, Result, SkyqError};
use skyq_distributed::{
    Executive, ExecutiveConfig, QueryOutcome, ResultMerger, ResultStore, Transport,
    TransportEvent, TransportSession, WireRequest,
};
use skyq_planner::ChunkQuerySpec;
use skyq_proto::ProtoResultHeader;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// What a mock worker does when a request arrives.
#[derive(Clone)]
enum WorkerScript {
    /// Stream the payloads then a clean final frame.
    Ok(Vec<&'static [u8]>),
    /// Emit a stream error after the header.
    StreamError,
    /// Respond with the chunk-not-owned error code.
    NotOwned,
    /// Never respond (stream closes immediately).
    Mute,
}

struct MockTransport {
    scripts: HashMap<String, WorkerScript>,
    submissions: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    fn new(scripts: Vec<(&str, WorkerScript)>) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts
                .into_iter()
                .map(|(w, s)| (w.to_string(), s))
                .collect(),
            submissions: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn submitted_workers(&self) -> Vec<String> {
        self.submissions.lock().expect("submissions").clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn submit(&self, worker: &str, _request: WireRequest) -> Result<TransportSession> {
        self.submissions
            .lock()
            .expect("submissions")
            .push(worker.to_string());
        let script = self
            .scripts
            .get(worker)
            .cloned()
            .ok_or_else(|| SkyqError::Transport(format!("no route to worker {worker}")))?;
        let (tx, rx) = mpsc::channel(1);
        let (finish_tx, _finish_rx) = oneshot::channel();
        tokio::spawn(async move {
            let header = ProtoResultHeader {
                request_id: "mock".to_string(),
                error_code: 0,
                error_msg: String::new(),
                row_count: 0,
            };
            match script {
                WorkerScript::Ok(payloads) => {
                    if tx.send(TransportEvent::Response(header)).await.is_err() {
                        return;
                    }
                    for p in payloads {
                        if tx
                            .send(TransportEvent::Data {
                                bytes: Bytes::from_static(p),
                                is_last: false,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    let _ = tx
                        .send(TransportEvent::Data {
                            bytes: Bytes::new(),
                            is_last: true,
                        })
                        .await;
                }
                WorkerScript::StreamError => {
                    if tx.send(TransportEvent::Response(header)).await.is_err() {
                        return;
                    }
                    let _ = tx
                        .send(TransportEvent::Error {
                            code: 500,
                            msg: "disk on fire".to_string(),
                        })
                        .await;
                }
                WorkerScript::NotOwned => {
                    let _ = tx
                        .send(TransportEvent::Response(ProtoResultHeader {
                            error_code: skyq_distributed::executive::ERR_CHUNK_NOT_OWNED,
                            error_msg: "not mine".to_string(),
                            ..header
                        }))
                        .await;
                }
                WorkerScript::Mute => {}
            }
        });
        Ok(TransportSession::new(rx, finish_tx))
    }
}

/// Counts stage/commit/discard calls; payload bytes stand in for rows.
#[derive(Default)]
struct MemoryStore {
    staged: Mutex<HashMap<(u32, u32), u64>>,
    committed: Mutex<Vec<u32>>,
    discarded: Mutex<Vec<(u32, u32)>>,
    merges: AtomicU32,
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn stage_rows(
        &self,
        _query: QueryId,
        chunk: ChunkId,
        attempt: u32,
        payload: Bytes,
    ) -> Result<u64> {
        *self
            .staged
            .lock()
            .expect("staged")
            .entry((chunk.0, attempt))
            .or_default() += payload.len() as u64;
        Ok(payload.len() as u64)
    }

    async fn commit_attempt(&self, _query: QueryId, chunk: ChunkId, _attempt: u32) -> Result<()> {
        self.committed.lock().expect("committed").push(chunk.0);
        Ok(())
    }

    async fn discard_attempt(&self, _query: QueryId, chunk: ChunkId, attempt: u32) -> Result<()> {
        self.discarded
            .lock()
            .expect("discarded")
            .push((chunk.0, attempt));
        Ok(())
    }

    async fn run_merge(
        &self,
        _query: QueryId,
        _merge_sql: Option<&str>,
        _proxy_order_by: Option<&str>,
    ) -> Result<()> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("skyq_distributed=debug")
        .with_test_writer()
        .try_init();
}

fn spec(chunk: u32) -> ChunkQuerySpec {
    ChunkQuerySpec {
        db: "LSST".to_string(),
        chunk: ChunkId(chunk),
        fragments: vec![format!("SELECT objectId FROM LSST.Object_{chunk} AS QST_1_")],
        sub_chunks: vec![],
    }
}

fn executive(
    transport: Arc<MockTransport>,
    store: Arc<MemoryStore>,
    replicas: Vec<(u32, Vec<&str>)>,
    chunk_count: usize,
) -> Arc<Executive> {
    let merger = Arc::new(ResultMerger::new(
        QueryId(9),
        chunk_count,
        None,
        None,
        store,
    ));
    Executive::new(
        QueryId(9),
        ExecutiveConfig {
            fan_out: 4,
            max_chunk_retries: 3,
            receiver_buffer_bytes: 1024,
        },
        transport,
        merger,
        replicas
            .into_iter()
            .map(|(c, ws)| (ChunkId(c), ws.into_iter().map(String::from).collect()))
            .collect(),
        false,
    )
}

#[tokio::test]
async fn two_chunks_stream_and_merge() {
    init_tracing();
    let transport = MockTransport::new(vec![
        ("w1", WorkerScript::Ok(vec![b"aaaa"])),
        ("w2", WorkerScript::Ok(vec![b"bbbb", b"cc"])),
    ]);
    let store = Arc::new(MemoryStore::default());
    let exec = executive(
        Arc::clone(&transport),
        Arc::clone(&store),
        vec![(100, vec!["w1"]), (101, vec!["w2"])],
        2,
    );
    let outcome = exec.run(vec![spec(100), spec(101)]).await;
    assert_eq!(outcome, QueryOutcome::Success);
    let mut committed = store.committed.lock().expect("committed").clone();
    committed.sort_unstable();
    assert_eq!(committed, vec![100, 101]);
    assert_eq!(store.merges.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_worker_retries_on_distinct_replica() {
    let transport = MockTransport::new(vec![
        ("bad", WorkerScript::StreamError),
        ("good", WorkerScript::Ok(vec![b"rows"])),
    ]);
    let store = Arc::new(MemoryStore::default());
    let exec = executive(
        Arc::clone(&transport),
        Arc::clone(&store),
        vec![(100, vec!["bad", "good"])],
        1,
    );
    let outcome = exec.run(vec![spec(100)]).await;
    assert_eq!(outcome, QueryOutcome::Success);
    assert_eq!(transport.submitted_workers(), vec!["bad", "good"]);
    // Attempt 1's staged rows were discarded, not merged.
    assert_eq!(
        store.discarded.lock().expect("discarded").as_slice(),
        &[(100, 1)]
    );
}

#[tokio::test]
async fn not_owned_reply_moves_to_next_replica() {
    let transport = MockTransport::new(vec![
        ("stale", WorkerScript::NotOwned),
        ("fresh", WorkerScript::Ok(vec![b"rows"])),
    ]);
    let store = Arc::new(MemoryStore::default());
    let exec = executive(
        Arc::clone(&transport),
        store,
        vec![(100, vec!["stale", "fresh"])],
        1,
    );
    assert_eq!(exec.run(vec![spec(100)]).await, QueryOutcome::Success);
    assert_eq!(transport.submitted_workers(), vec!["stale", "fresh"]);
}

#[tokio::test]
async fn exhausted_replica_set_reports_chunk_unreachable() {
    let transport = MockTransport::new(vec![
        ("bad1", WorkerScript::StreamError),
        ("bad2", WorkerScript::Mute),
    ]);
    let store = Arc::new(MemoryStore::default());
    let exec = executive(transport, store, vec![(100, vec!["bad1", "bad2"])], 1);
    match exec.run(vec![spec(100)]).await {
        QueryOutcome::Failed(report) => {
            assert_eq!(report.kind, "CHUNK_UNREACHABLE");
            assert_eq!(report.offending_id.as_deref(), Some("100"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn zero_reachable_workers_fails_immediately() {
    let transport = MockTransport::new(vec![]);
    let store = Arc::new(MemoryStore::default());
    let exec = executive(transport, store, vec![(100, vec![])], 1);
    match exec.run(vec![spec(100)]).await {
        QueryOutcome::Failed(report) => assert_eq!(report.kind, "CHUNK_UNREACHABLE"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_is_idempotent_and_wins_over_success() {
    let transport = MockTransport::new(vec![("w1", WorkerScript::Ok(vec![b"rows"]))]);
    let store = Arc::new(MemoryStore::default());
    let exec = executive(transport, store, vec![(100, vec!["w1"])], 1);
    exec.cancel();
    exec.cancel(); // second cancel is a no-op
    assert_eq!(exec.run(vec![spec(100)]).await, QueryOutcome::Cancelled);
    assert!(exec.is_cancelled());
}
