//! Protobuf messages of the skyq wire protocol.
//!
//! The first frame of every request is a [`ProtoRequestHeader`]; subsequent
//! frames are kind-specific payloads. Messages are derived in source so the
//! schema lives next to the conversions that use it.

use prost::Message;
use skyq_common::{FileInfo, ReplicaInfo, ReplicaStatus};

/// Top-level request classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RequestKind {
    /// Worker control-service probe (suspend/resume/status/drain).
    Service = 0,
    /// Replication request (replicate/delete/find/find-all/echo/...).
    Replica = 1,
    /// Chunk sub-query.
    Query = 2,
    /// Worker management command.
    WorkerCmd = 3,
}

/// First frame of every request.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoRequestHeader {
    /// 128-bit request id in canonical hyphenated form.
    #[prost(string, tag = "1")]
    pub request_id: String,
    /// Request kind.
    #[prost(enumeration = "RequestKind", tag = "2")]
    pub kind: i32,
    /// Kind-specific service discriminator, e.g. `REPLICA_CREATE`.
    #[prost(string, tag = "3")]
    pub service_type: String,
}

/// Chunk sub-query payload decoded by the worker request router.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoTaskMsg {
    /// Database of the target chunk.
    #[prost(string, tag = "1")]
    pub db: String,
    /// Target chunk number.
    #[prost(uint32, tag = "2")]
    pub chunk_id: u32,
    /// Sub-chunk ids driving fragment expansion; empty when unused.
    #[prost(uint32, repeated, tag = "3")]
    pub sub_chunks: Vec<u32>,
    /// Parallel-SQL fragments executed and concatenated in order.
    #[prost(string, repeated, tag = "4")]
    pub fragments: Vec<String>,
    /// Scan-query marker consumed by the worker scheduler.
    #[prost(bool, tag = "5")]
    pub scan_query: bool,
}

/// Header of one response data frame.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoResultHeader {
    /// Request this frame answers.
    #[prost(string, tag = "1")]
    pub request_id: String,
    /// 0 on success; worker error code otherwise.
    #[prost(int32, tag = "2")]
    pub error_code: i32,
    /// Error description when `error_code` is non-zero.
    #[prost(string, tag = "3")]
    pub error_msg: String,
    /// Number of rows in the attached payload.
    #[prost(uint32, tag = "4")]
    pub row_count: u32,
}

/// Worker management command payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum WorkerCommand {
    /// Reload the chunk inventory from disk.
    ReloadChunkList = 0,
}

/// Worker management payload frame.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoWorkerCmdMsg {
    /// Command to run.
    #[prost(enumeration = "WorkerCommand", tag = "1")]
    pub command: i32,
}

// ---------------------------------------------------------------------------
// Replication protocol
// ---------------------------------------------------------------------------

/// `Replicate(db, chunk, srcWorker)`.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoReplicate {
    /// Database of the chunk.
    #[prost(string, tag = "1")]
    pub database: String,
    /// Chunk to copy.
    #[prost(uint32, tag = "2")]
    pub chunk: u32,
    /// Worker to pull the chunk files from.
    #[prost(string, tag = "3")]
    pub src_worker: String,
}

/// `Delete(db, chunk)`.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoDelete {
    /// Database of the chunk.
    #[prost(string, tag = "1")]
    pub database: String,
    /// Chunk to remove.
    #[prost(uint32, tag = "2")]
    pub chunk: u32,
}

/// `Find(db, chunk, computeChecksum)`.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoFind {
    /// Database of the chunk.
    #[prost(string, tag = "1")]
    pub database: String,
    /// Chunk to inspect.
    #[prost(uint32, tag = "2")]
    pub chunk: u32,
    /// Whether to verify file checksums while inspecting.
    #[prost(bool, tag = "3")]
    pub compute_checksum: bool,
}

/// `FindAll(db)`.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoFindAll {
    /// Database to enumerate.
    #[prost(string, tag = "1")]
    pub database: String,
}

/// `Echo(data, delayMs)` connectivity/latency probe.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoEcho {
    /// Payload to echo back verbatim.
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    /// Server-side artificial delay before responding.
    #[prost(uint64, tag = "2")]
    pub delay_ms: u64,
}

/// `Status*/Stop*` management payload targeting an earlier request.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoTargetRequest {
    /// Id of the request being inspected or stopped.
    #[prost(string, tag = "1")]
    pub target_request_id: String,
}

/// Millisecond timestamps of one request's lifecycle.
#[derive(Clone, Copy, PartialEq, Message)]
pub struct ProtoPerformance {
    /// Controller-side creation time.
    #[prost(uint64, tag = "1")]
    pub c_create_time: u64,
    /// Controller-side start time.
    #[prost(uint64, tag = "2")]
    pub c_start_time: u64,
    /// Worker-side receive time.
    #[prost(uint64, tag = "3")]
    pub w_receive_time: u64,
    /// Worker-side processing start time.
    #[prost(uint64, tag = "4")]
    pub w_start_time: u64,
    /// Worker-side processing finish time.
    #[prost(uint64, tag = "5")]
    pub w_finish_time: u64,
    /// Controller-side finish time.
    #[prost(uint64, tag = "6")]
    pub c_finish_time: u64,
}

/// Wire form of [`ReplicaStatus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum ProtoReplicaStatus {
    /// No trace of the chunk.
    NotFound = 0,
    /// Present but failing verification.
    Corrupt = 1,
    /// Missing files.
    Incomplete = 2,
    /// Fully present and verified.
    Complete = 3,
}

/// Wire form of [`FileInfo`].
#[derive(Clone, PartialEq, Message)]
pub struct ProtoFileInfo {
    /// File name.
    #[prost(string, tag = "1")]
    pub name: String,
    /// Size in bytes.
    #[prost(uint64, tag = "2")]
    pub size: u64,
    /// Modification time, unix seconds.
    #[prost(uint64, tag = "3")]
    pub mtime: u64,
    /// Control checksum.
    #[prost(string, tag = "4")]
    pub cs: String,
    /// Transfer start, unix milliseconds.
    #[prost(uint64, tag = "5")]
    pub begin_transfer_time: u64,
    /// Transfer end, unix milliseconds.
    #[prost(uint64, tag = "6")]
    pub end_transfer_time: u64,
}

/// Wire form of [`ReplicaInfo`].
#[derive(Clone, PartialEq, Message)]
pub struct ProtoReplicaInfo {
    /// Completeness status.
    #[prost(enumeration = "ProtoReplicaStatus", tag = "1")]
    pub status: i32,
    /// Worker holding the replica.
    #[prost(string, tag = "2")]
    pub worker: String,
    /// Database of the chunk.
    #[prost(string, tag = "3")]
    pub database: String,
    /// Chunk number.
    #[prost(uint32, tag = "4")]
    pub chunk: u32,
    /// Verification time, unix milliseconds.
    #[prost(uint64, tag = "5")]
    pub verify_time: u64,
    /// Ordered file list.
    #[prost(message, repeated, tag = "6")]
    pub files: Vec<ProtoFileInfo>,
}

/// Worker-side disposition of a replication request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum ProtoServerStatus {
    /// Completed successfully.
    Success = 0,
    /// Request was malformed.
    BadRequest = 1,
    /// Worker-side failure.
    Failed = 2,
    /// Accepted, waiting for a processing slot.
    Queued = 3,
    /// Currently processing.
    InProgress = 4,
    /// Processing suspended with the service.
    Suspended = 5,
    /// Cancelled on the worker.
    Cancelled = 6,
}

/// Response to a replication request.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoReplicaResponse {
    /// Worker-side disposition.
    #[prost(enumeration = "ProtoServerStatus", tag = "1")]
    pub status: i32,
    /// Failure description when not successful.
    #[prost(string, tag = "2")]
    pub error: String,
    /// Single replica answer (Replicate/Delete/Find).
    #[prost(message, optional, tag = "3")]
    pub replica: Option<ProtoReplicaInfo>,
    /// Multi-replica answer (FindAll).
    #[prost(message, repeated, tag = "4")]
    pub replicas: Vec<ProtoReplicaInfo>,
    /// Performance of this request on the worker.
    #[prost(message, optional, tag = "5")]
    pub performance: Option<ProtoPerformance>,
    /// Performance of the target request (Status/Stop answers).
    #[prost(message, optional, tag = "6")]
    pub target_performance: Option<ProtoPerformance>,
    /// Echoed payload (Echo answers).
    #[prost(bytes = "vec", tag = "7")]
    pub echo_data: Vec<u8>,
    /// Control-service state (service management answers).
    #[prost(message, optional, tag = "8")]
    pub service_state: Option<ProtoServiceState>,
}

// ---------------------------------------------------------------------------
// Service management protocol
// ---------------------------------------------------------------------------

/// Worker control-service verbs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum ServiceVerb {
    /// Report current state.
    Status = 0,
    /// Stop accepting new requests; keep queued ones.
    Suspend = 1,
    /// Resume processing.
    Resume = 2,
    /// Report queued/in-progress/finished request details.
    Requests = 3,
    /// Finish in-flight requests, reject new ones.
    Drain = 4,
}

/// Service management request payload.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoServiceRequest {
    /// Verb to apply.
    #[prost(enumeration = "ServiceVerb", tag = "1")]
    pub verb: i32,
}

/// Lifecycle state of the worker control service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum ServiceRunState {
    /// Accepting and processing requests.
    Running = 0,
    /// Suspension requested, in-flight work finishing.
    SuspendInProgress = 1,
    /// Fully suspended.
    Suspended = 2,
}

/// Summary of one worker-side request in a [`ProtoServiceState`] detail list.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoRequestSummary {
    /// Request id.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Kind-specific service discriminator.
    #[prost(string, tag = "2")]
    pub service_type: String,
    /// Priority the request was queued with.
    #[prost(int32, tag = "3")]
    pub priority: i32,
}

/// Structured answer to every service management verb.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoServiceState {
    /// Run state after the verb was applied.
    #[prost(enumeration = "ServiceRunState", tag = "1")]
    pub status: i32,
    /// Implementation technology tag.
    #[prost(string, tag = "2")]
    pub technology: String,
    /// Service start time, unix milliseconds.
    #[prost(uint64, tag = "3")]
    pub start_time: u64,
    /// Requests accepted but not yet started.
    #[prost(uint32, tag = "4")]
    pub num_new_requests: u32,
    /// Requests currently processing.
    #[prost(uint32, tag = "5")]
    pub num_in_progress_requests: u32,
    /// Requests finished since start.
    #[prost(uint32, tag = "6")]
    pub num_finished_requests: u32,
    /// Detail list of new requests.
    #[prost(message, repeated, tag = "7")]
    pub new_requests: Vec<ProtoRequestSummary>,
    /// Detail list of in-progress requests.
    #[prost(message, repeated, tag = "8")]
    pub in_progress_requests: Vec<ProtoRequestSummary>,
    /// Detail list of finished requests.
    #[prost(message, repeated, tag = "9")]
    pub finished_requests: Vec<ProtoRequestSummary>,
}

// ---------------------------------------------------------------------------
// Model conversions
// ---------------------------------------------------------------------------

impl From<ReplicaStatus> for ProtoReplicaStatus {
    fn from(s: ReplicaStatus) -> Self {
        match s {
            ReplicaStatus::NotFound => ProtoReplicaStatus::NotFound,
            ReplicaStatus::Corrupt => ProtoReplicaStatus::Corrupt,
            ReplicaStatus::Incomplete => ProtoReplicaStatus::Incomplete,
            ReplicaStatus::Complete => ProtoReplicaStatus::Complete,
        }
    }
}

impl From<ProtoReplicaStatus> for ReplicaStatus {
    fn from(s: ProtoReplicaStatus) -> Self {
        match s {
            ProtoReplicaStatus::NotFound => ReplicaStatus::NotFound,
            ProtoReplicaStatus::Corrupt => ReplicaStatus::Corrupt,
            ProtoReplicaStatus::Incomplete => ReplicaStatus::Incomplete,
            ProtoReplicaStatus::Complete => ReplicaStatus::Complete,
        }
    }
}

impl From<&FileInfo> for ProtoFileInfo {
    fn from(f: &FileInfo) -> Self {
        Self {
            name: f.name.clone(),
            size: f.size,
            mtime: f.mtime,
            cs: f.cs.clone(),
            begin_transfer_time: f.begin_transfer_time,
            end_transfer_time: f.end_transfer_time,
        }
    }
}

impl From<ProtoFileInfo> for FileInfo {
    fn from(f: ProtoFileInfo) -> Self {
        Self {
            name: f.name,
            size: f.size,
            mtime: f.mtime,
            cs: f.cs,
            begin_transfer_time: f.begin_transfer_time,
            end_transfer_time: f.end_transfer_time,
        }
    }
}

impl From<&ReplicaInfo> for ProtoReplicaInfo {
    fn from(r: &ReplicaInfo) -> Self {
        Self {
            status: ProtoReplicaStatus::from(r.status) as i32,
            worker: r.worker.clone(),
            database: r.database.clone(),
            chunk: r.chunk,
            verify_time: r.verify_time,
            files: r.files.iter().map(ProtoFileInfo::from).collect(),
        }
    }
}

impl TryFrom<ProtoReplicaInfo> for ReplicaInfo {
    type Error = prost::DecodeError;

    fn try_from(r: ProtoReplicaInfo) -> Result<Self, Self::Error> {
        let status = ProtoReplicaStatus::try_from(r.status)
            .map_err(|_| prost::DecodeError::new("invalid replica status"))?;
        Ok(Self {
            status: status.into(),
            worker: r.worker,
            database: r.database,
            chunk: r.chunk,
            verify_time: r.verify_time,
            files: r.files.into_iter().map(FileInfo::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica() -> ReplicaInfo {
        ReplicaInfo {
            status: ReplicaStatus::Complete,
            worker: "worker-3".to_string(),
            database: "LSST".to_string(),
            chunk: 42,
            verify_time: 1_700_000_000_123,
            files: vec![FileInfo {
                name: "Object_42.MYD".to_string(),
                size: 123_456,
                mtime: 1_699_000_000,
                cs: "4242".to_string(),
                begin_transfer_time: 1,
                end_transfer_time: 2,
            }],
        }
    }

    #[test]
    fn replica_info_proto_round_trip() {
        let original = replica();
        let proto = ProtoReplicaInfo::from(&original);
        let bytes = proto.encode_to_vec();
        let decoded = ProtoReplicaInfo::decode(bytes.as_slice()).expect("decode");
        let back = ReplicaInfo::try_from(decoded).expect("convert");
        assert_eq!(back, original);
    }

    #[test]
    fn task_msg_round_trip() {
        let msg = ProtoTaskMsg {
            db: "LSST".to_string(),
            chunk_id: 100,
            sub_chunks: vec![0, 1, 2],
            fragments: vec!["SELECT 1".to_string()],
            scan_query: true,
        };
        let bytes = msg.encode_to_vec();
        assert_eq!(ProtoTaskMsg::decode(bytes.as_slice()).expect("decode"), msg);
    }
}
