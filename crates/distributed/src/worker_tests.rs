use super::*;
use crate::transport::TransportEvent;
use skyq_common::SkyqError;

struct FixedRunner {
    payloads: Vec<&'static [u8]>,
    fail: bool,
}

#[async_trait]
impl TaskRunner for FixedRunner {
    async fn run_fragment(&self, _db: &str, _fragment: &str) -> Result<Vec<Bytes>> {
        if self.fail {
            return Err(SkyqError::Internal("engine exploded".to_string()));
        }
        Ok(self
            .payloads
            .iter()
            .map(|p| Bytes::from_static(p))
            .collect())
    }

    async fn reload_chunk_list(&self) -> Result<Vec<(String, u32)>> {
        Ok(vec![("LSST".to_string(), 7)])
    }
}

fn framed_chunk_request(db: &str, chunk: u32, fragments: Vec<&str>) -> BytesMut {
    use skyq_proto::write_frame;
    let header = ProtoRequestHeader {
        request_id: "req-1".to_string(),
        kind: RequestKind::Query as i32,
        service_type: "CHUNK_QUERY".to_string(),
    };
    let task = ProtoTaskMsg {
        db: db.to_string(),
        chunk_id: chunk,
        sub_chunks: vec![],
        fragments: fragments.into_iter().map(String::from).collect(),
        scan_query: false,
    };
    let mut buf = BytesMut::new();
    write_frame(&mut buf, &header.encode_to_vec(), false);
    write_frame(&mut buf, &task.encode_to_vec(), true);
    buf
}

fn framed_worker_cmd(name_matches: bool) -> (ResourcePath, BytesMut) {
    use skyq_proto::write_frame;
    let header = ProtoRequestHeader {
        request_id: "req-2".to_string(),
        kind: RequestKind::WorkerCmd as i32,
        service_type: "WORKER_CMD".to_string(),
    };
    let cmd = ProtoWorkerCmdMsg {
        command: WorkerCommand::ReloadChunkList as i32,
    };
    let mut buf = BytesMut::new();
    write_frame(&mut buf, &header.encode_to_vec(), false);
    write_frame(&mut buf, &cmd.encode_to_vec(), true);
    let name = if name_matches { "worker-1" } else { "worker-9" };
    (
        ResourcePath::Worker {
            name: name.to_string(),
        },
        buf,
    )
}

fn router(owned: &[(&str, u32)], runner: FixedRunner) -> Arc<RequestRouter> {
    let inventory = Arc::new(ChunkInventory::with_chunks(
        owned.iter().map(|(db, c)| (db.to_string(), *c)),
    ));
    RequestRouter::new("worker-1", inventory, Arc::new(runner), 2)
}

async fn drain(mut rx: mpsc::Receiver<TransportEvent>) -> Vec<TransportEvent> {
    let mut out = Vec::new();
    while let Some(e) = rx.recv().await {
        let last = matches!(
            &e,
            TransportEvent::Data { is_last: true, .. } | TransportEvent::Error { .. }
        );
        out.push(e);
        if last {
            break;
        }
    }
    out
}

#[tokio::test]
async fn owned_chunk_streams_payload_and_final_frame() {
    let r = router(
        &[("LSST", 100)],
        FixedRunner {
            payloads: vec![b"rows-a", b"rows-b"],
            fail: false,
        },
    );
    let rx = r
        .handle(
            ResourcePath::Chunk {
                db: "LSST".to_string(),
                chunk: 100,
            },
            framed_chunk_request("LSST", 100, vec!["SELECT 1"]),
        )
        .await
        .expect("routed");
    let events = drain(rx).await;
    assert!(matches!(
        &events[0],
        TransportEvent::Response(h) if h.error_code == 0
    ));
    let data: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TransportEvent::Data { bytes, is_last } => Some((bytes.clone(), *is_last)),
            _ => None,
        })
        .collect();
    assert_eq!(data.len(), 3);
    assert_eq!(&data[0].0[..], b"rows-a");
    assert!(data[2].1, "final frame must carry is_last");
    assert!(data[2].0.is_empty());
}

#[tokio::test]
async fn unowned_chunk_is_rejected_with_not_found() {
    let r = router(
        &[("LSST", 100)],
        FixedRunner {
            payloads: vec![],
            fail: false,
        },
    );
    let mut rx = r
        .handle(
            ResourcePath::Chunk {
                db: "LSST".to_string(),
                chunk: 999,
            },
            framed_chunk_request("LSST", 999, vec!["SELECT 1"]),
        )
        .await
        .expect("routed");
    match rx.recv().await.expect("header") {
        TransportEvent::Response(h) => assert_eq!(h.error_code, ERR_CHUNK_NOT_OWNED),
        other => panic!("expected response header, got {other:?}"),
    }
}

#[tokio::test]
async fn task_resource_mismatch_is_a_bad_request() {
    let r = router(
        &[("LSST", 100)],
        FixedRunner {
            payloads: vec![],
            fail: false,
        },
    );
    // Task payload names chunk 101 while the resource names chunk 100.
    let mut rx = r
        .handle(
            ResourcePath::Chunk {
                db: "LSST".to_string(),
                chunk: 100,
            },
            framed_chunk_request("LSST", 101, vec!["SELECT 1"]),
        )
        .await
        .expect("routed");
    match rx.recv().await.expect("header") {
        TransportEvent::Response(h) => assert_eq!(h.error_code, ERR_BAD_REQUEST),
        other => panic!("expected response header, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_fragment_terminates_stream_with_error() {
    let r = router(
        &[("LSST", 100)],
        FixedRunner {
            payloads: vec![],
            fail: true,
        },
    );
    let rx = r
        .handle(
            ResourcePath::Chunk {
                db: "LSST".to_string(),
                chunk: 100,
            },
            framed_chunk_request("LSST", 100, vec!["SELECT 1"]),
        )
        .await
        .expect("routed");
    let events = drain(rx).await;
    assert!(matches!(
        events.last(),
        Some(TransportEvent::Error { code, .. }) if *code == ERR_EXECUTION
    ));
}

#[tokio::test]
async fn reload_command_replaces_inventory() {
    let inventory = Arc::new(ChunkInventory::with_chunks([("LSST".to_string(), 100)]));
    let r = RequestRouter::new(
        "worker-1",
        Arc::clone(&inventory),
        Arc::new(FixedRunner {
            payloads: vec![],
            fail: false,
        }),
        1,
    );
    let (resource, buf) = framed_worker_cmd(true);
    let events = drain(r.handle(resource, buf).await.expect("routed")).await;
    assert!(matches!(
        &events[0],
        TransportEvent::Response(h) if h.error_code == 0
    ));
    assert!(inventory.contains("LSST", 7));
    assert!(!inventory.contains("LSST", 100));
}

#[tokio::test]
async fn command_for_other_worker_is_rejected() {
    let r = router(
        &[],
        FixedRunner {
            payloads: vec![],
            fail: false,
        },
    );
    let (resource, buf) = framed_worker_cmd(false);
    let mut rx = r.handle(resource, buf).await.expect("routed");
    match rx.recv().await.expect("header") {
        TransportEvent::Response(h) => assert_eq!(h.error_code, ERR_CHUNK_NOT_OWNED),
        other => panic!("expected response header, got {other:?}"),
    }
}
