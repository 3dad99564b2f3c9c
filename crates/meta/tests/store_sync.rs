//! Metadata store tests over an in-memory SQLite database.

use skyq_common::{
    ControllerId, FileInfo, JobId, ReplicaInfo, ReplicaStatus, RequestId, TuningConfig,
};
use skyq_meta::{JobRecord, MetaStore, RequestRecord};

async fn store() -> MetaStore {
    MetaStore::connect("sqlite::memory:", &TuningConfig::default())
        .await
        .expect("connect")
}

fn file(name: &str, size: u64, cs: &str) -> FileInfo {
    FileInfo {
        name: name.to_string(),
        size,
        mtime: 1_700_000_000,
        cs: cs.to_string(),
        begin_transfer_time: 0,
        end_transfer_time: 0,
    }
}

fn replica(worker: &str, chunk: u32, status: ReplicaStatus, files: Vec<FileInfo>) -> ReplicaInfo {
    ReplicaInfo {
        status,
        worker: worker.to_string(),
        database: "LSST".to_string(),
        chunk,
        verify_time: 12345,
        files,
    }
}

#[tokio::test]
async fn sync_makes_persisted_scope_equal_reported_collection() {
    let store = store().await;
    let first = vec![
        replica("w1", 1, ReplicaStatus::Complete, vec![file("a", 10, "x")]),
        replica("w1", 2, ReplicaStatus::Incomplete, vec![file("b", 20, "y")]),
    ];
    store
        .save_replica_info_collection("w1", "LSST", &first)
        .await
        .expect("first sync");
    assert_eq!(
        store.find_worker_replicas("w1", "LSST").await.expect("read"),
        first
    );

    // Second report: chunk 2 gone, chunk 3 new, chunk 1 files changed.
    let second = vec![
        replica("w1", 1, ReplicaStatus::Complete, vec![file("a", 11, "x2")]),
        replica("w1", 3, ReplicaStatus::Complete, vec![file("c", 30, "z")]),
    ];
    store
        .save_replica_info_collection("w1", "LSST", &second)
        .await
        .expect("second sync");
    assert_eq!(
        store.find_worker_replicas("w1", "LSST").await.expect("read"),
        second
    );
}

#[tokio::test]
async fn sync_scope_is_isolated_per_worker() {
    let store = store().await;
    let w1 = vec![replica("w1", 1, ReplicaStatus::Complete, vec![])];
    let w2 = vec![replica("w2", 1, ReplicaStatus::Complete, vec![])];
    store
        .save_replica_info_collection("w1", "LSST", &w1)
        .await
        .expect("w1");
    store
        .save_replica_info_collection("w2", "LSST", &w2)
        .await
        .expect("w2");
    // Emptying w1 must not touch w2.
    store
        .save_replica_info_collection("w1", "LSST", &[])
        .await
        .expect("empty w1");
    assert!(store
        .find_worker_replicas("w1", "LSST")
        .await
        .expect("w1")
        .is_empty());
    assert_eq!(
        store.find_worker_replicas("w2", "LSST").await.expect("w2"),
        w2
    );
    assert_eq!(
        store
            .find_database_replicas("LSST")
            .await
            .expect("db scope")
            .len(),
        1
    );
}

#[tokio::test]
async fn job_and_request_saves_are_upserts() {
    let store = store().await;
    let controller = ControllerId::generate();
    store
        .register_controller(controller, "czar-host", 4242, 1)
        .await
        .expect("controller");
    // Re-registration (same id, new pid) takes the update path.
    store
        .register_controller(controller, "czar-host", 4243, 2)
        .await
        .expect("controller again");

    let job_id = JobId::generate();
    let mut job = JobRecord {
        id: job_id,
        controller_id: controller,
        parent_job_id: None,
        job_type: "REPLICATE".to_string(),
        state: "IN_PROGRESS".to_string(),
        ext_state: "NONE".to_string(),
        begin_time: 10,
        end_time: 0,
        heartbeat: 10,
        priority: 0,
        exclusive: false,
        preemptable: true,
        ext: vec![("num_replicas".to_string(), "3".to_string())],
    };
    store.save_job(&job).await.expect("job insert");
    job.state = "FINISHED".to_string();
    job.ext_state = "SUCCESS".to_string();
    job.end_time = 99;
    store.save_job(&job).await.expect("job update");

    let mut req = RequestRecord {
        id: RequestId::generate(),
        job_id,
        request_type: "REPLICA_CREATE".to_string(),
        worker: "w1".to_string(),
        priority: 0,
        state: "IN_PROGRESS".to_string(),
        ext_state: "NONE".to_string(),
        server_status: "QUEUED".to_string(),
        c_create_time: 1,
        c_start_time: 2,
        w_receive_time: 0,
        w_start_time: 0,
        w_finish_time: 0,
        c_finish_time: 0,
        ext: vec![("chunk".to_string(), "42".to_string())],
    };
    store.save_request(&req).await.expect("request insert");
    req.state = "FINISHED".to_string();
    req.ext_state = "SUCCESS".to_string();
    req.c_finish_time = 50;
    store.save_request(&req).await.expect("request update");
}

#[tokio::test]
async fn master_lock_admits_one_holder_and_detects_loss() {
    let store = store().await;
    let a = ControllerId::generate();
    let b = ControllerId::generate();
    assert!(store.acquire_master_lock(a, 1).await.expect("acquire a"));
    // Re-acquisition by the holder is fine; a second instance is refused.
    assert!(store.acquire_master_lock(a, 2).await.expect("re-acquire a"));
    assert!(!store.acquire_master_lock(b, 3).await.expect("acquire b"));

    store.probe_master_lock(a).await.expect("probe holds");
    assert!(store.probe_master_lock(b).await.is_err());

    store.release_master_lock(a).await.expect("release");
    assert!(store.acquire_master_lock(b, 4).await.expect("b takes over"));
}
