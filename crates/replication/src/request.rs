use bytes::{Bytes, BytesMut};
use prost::Message;
use skyq_common::{ReplicaInfo, RequestId, Result, SkyqError};
use skyq_distributed::{Transport, TransportEvent};
use skyq_proto::{
    write_frame, ProtoDelete, ProtoEcho, ProtoFind, ProtoFindAll, ProtoPerformance,
    ProtoReplicaResponse, ProtoReplicate, ProtoRequestHeader, ProtoServerStatus,
    ProtoServiceRequest, ProtoServiceState, ProtoTargetRequest, RequestKind, ResourcePath,
    ServiceVerb,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Coarse request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Constructed, not yet submitted.
    Created,
    /// Submitted, awaiting the worker.
    InProgress,
    /// Terminal.
    Finished,
}

/// Fine-grained disposition at FINISHED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestExtendedState {
    /// Not finished yet.
    None,
    /// Completed successfully.
    Success,
    /// Failed before reaching the worker.
    ClientError,
    /// Worker rejected the request as malformed.
    ServerBad,
    /// Worker-side failure.
    ServerError,
    /// Worker queued the request.
    ServerQueued,
    /// Worker is still processing it.
    ServerInProgress,
    /// Worker service is suspended.
    ServerSuspended,
    /// Worker cancelled the request.
    ServerCancelled,
    /// The expiration timer fired.
    Expired,
    /// Cancelled on the controller side.
    Cancelled,
}

impl RequestExtendedState {
    /// Stable tag used for persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestExtendedState::None => "NONE",
            RequestExtendedState::Success => "SUCCESS",
            RequestExtendedState::ClientError => "CLIENT_ERROR",
            RequestExtendedState::ServerBad => "SERVER_BAD",
            RequestExtendedState::ServerError => "SERVER_ERROR",
            RequestExtendedState::ServerQueued => "SERVER_QUEUED",
            RequestExtendedState::ServerInProgress => "SERVER_IN_PROGRESS",
            RequestExtendedState::ServerSuspended => "SERVER_SUSPENDED",
            RequestExtendedState::ServerCancelled => "SERVER_CANCELLED",
            RequestExtendedState::Expired => "EXPIRED",
            RequestExtendedState::Cancelled => "CANCELLED",
        }
    }
}

/// Millisecond timestamps of one request's lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Performance {
    /// Controller-side creation.
    pub c_create_time: u64,
    /// Controller-side submit.
    pub c_start_time: u64,
    /// Worker-side receive.
    pub w_receive_time: u64,
    /// Worker-side processing start.
    pub w_start_time: u64,
    /// Worker-side processing finish.
    pub w_finish_time: u64,
    /// Controller-side finish.
    pub c_finish_time: u64,
}

impl Performance {
    fn absorb_worker_times(&mut self, p: &ProtoPerformance) {
        self.w_receive_time = p.w_receive_time;
        self.w_start_time = p.w_start_time;
        self.w_finish_time = p.w_finish_time;
    }
}

/// Protocol parameterization of one request type.
///
/// A policy supplies the wire kind/type, the encoded payload and the
/// response-data extractor; `Request` supplies the state machine, the
/// expiration timer and the performance record.
pub trait RequestPolicy: Send + Sync {
    /// Extracted response value.
    type Output: Send;

    /// Wire kind carried in the request header.
    fn request_kind(&self) -> RequestKind {
        RequestKind::Replica
    }

    /// Service discriminator carried in the request header.
    fn service_type(&self) -> &'static str;

    /// Encoded payload frame.
    fn payload(&self) -> Bytes;

    /// Extract the typed output from a successful response.
    fn extract(&self, response: ProtoReplicaResponse) -> Result<Self::Output>;

    /// Target request id of Status/Stop variants.
    fn target_request_id(&self) -> Option<RequestId> {
        None
    }
}

/// One RPC interaction with one worker: CREATED -> IN_PROGRESS -> FINISHED.
pub struct Request<P: RequestPolicy> {
    id: RequestId,
    worker: String,
    priority: i32,
    policy: P,
    expiration: Duration,
    state: Mutex<(RequestState, RequestExtendedState)>,
    performance: Mutex<Performance>,
    cancelled: AtomicBool,
    cancel_notify: Notify,
}

impl<P: RequestPolicy> Request<P> {
    /// Request against one worker with the given expiration interval.
    pub fn new(worker: impl Into<String>, policy: P, expiration: Duration, priority: i32) -> Self {
        Self {
            id: RequestId::generate(),
            worker: worker.into(),
            priority,
            policy,
            expiration,
            state: Mutex::new((RequestState::Created, RequestExtendedState::None)),
            performance: Mutex::new(Performance {
                c_create_time: now_ms(),
                ..Performance::default()
            }),
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        }
    }

    /// Unique request id.
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Target worker.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    /// Scheduling priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Coarse state.
    pub fn state(&self) -> RequestState {
        self.state.lock().expect("state lock").0
    }

    /// Extended state.
    pub fn extended_state(&self) -> RequestExtendedState {
        self.state.lock().expect("state lock").1
    }

    /// Performance record snapshot.
    pub fn performance(&self) -> Performance {
        *self.performance.lock().expect("performance lock")
    }

    /// The policy this request was built with.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Cancel cooperatively; a finished request is left untouched.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
    }

    /// Transition to FINISHED exactly once; later transitions are no-ops.
    fn finish(&self, ext: RequestExtendedState) -> bool {
        let mut state = self.state.lock().expect("state lock");
        if state.0 == RequestState::Finished {
            return false;
        }
        *state = (RequestState::Finished, ext);
        self.performance.lock().expect("performance lock").c_finish_time = now_ms();
        true
    }

    /// Submit and await the response.
    ///
    /// The expiration timer runs for the whole exchange: on fire the
    /// request finishes EXPIRED. A cancel finishes CANCELLED at the next
    /// suspension point. Either way the terminal transition happens exactly
    /// once.
    pub async fn execute(&self, transport: &dyn Transport) -> Result<P::Output> {
        {
            let mut state = self.state.lock().expect("state lock");
            if state.0 != RequestState::Created {
                return Err(SkyqError::Internal(format!(
                    "request {} executed twice",
                    self.id
                )));
            }
            state.0 = RequestState::InProgress;
        }
        self.performance.lock().expect("performance lock").c_start_time = now_ms();

        let result = tokio::select! {
            r = self.exchange(transport) => r,
            _ = tokio::time::sleep(self.expiration) => Err(SkyqError::Expired),
            _ = self.cancel_notify.notified() => Err(SkyqError::Cancelled),
        };
        // A cancel observed after the exchange still wins: the request
        // transitions to CANCELLED at this safe point regardless of how the
        // exchange itself came out.
        let result = if self.cancelled.load(Ordering::SeqCst) {
            Err(SkyqError::Cancelled)
        } else {
            result
        };

        match &result {
            Ok(_) => {
                self.finish(RequestExtendedState::Success);
            }
            Err(SkyqError::Expired) => {
                self.finish(RequestExtendedState::Expired);
            }
            Err(SkyqError::Cancelled) => {
                self.finish(RequestExtendedState::Cancelled);
            }
            Err(e) => {
                self.finish(classify_failure(e));
            }
        }
        result
    }

    async fn exchange(&self, transport: &dyn Transport) -> Result<P::Output> {
        let header = ProtoRequestHeader {
            request_id: self.id.to_string(),
            kind: self.policy.request_kind() as i32,
            service_type: self.policy.service_type().to_string(),
        };
        let mut buf = BytesMut::new();
        write_frame(&mut buf, &header.encode_to_vec(), false);
        let header_frame = buf.split().freeze();
        write_frame(&mut buf, &self.policy.payload(), true);
        let payload_frame = buf.split().freeze();

        let mut session = transport
            .submit(
                &self.worker,
                skyq_distributed::WireRequest {
                    resource: ResourcePath::Worker {
                        name: self.worker.clone(),
                    },
                    frames: vec![header_frame, payload_frame],
                },
            )
            .await?;

        let mut body = BytesMut::new();
        loop {
            match session.next_event().await {
                Some(TransportEvent::Response(h)) => {
                    if h.error_code != 0 {
                        session.finished(true);
                        return Err(SkyqError::Transport(format!(
                            "worker error {}: {}",
                            h.error_code, h.error_msg
                        )));
                    }
                }
                Some(TransportEvent::Data { bytes, is_last }) => {
                    body.extend_from_slice(&bytes);
                    if is_last {
                        session.finished(false);
                        break;
                    }
                }
                Some(TransportEvent::Error { code, msg }) => {
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

        let response = ProtoReplicaResponse::decode(body.freeze())
            .map_err(|e| SkyqError::Transport(format!("bad response: {e}")))?;
        {
            let mut perf = self.performance.lock().expect("performance lock");
            if let Some(p) = &response.performance {
                perf.absorb_worker_times(p);
            }
            // Status/Stop answers report the target's server-side timings.
            if self.policy.target_request_id().is_some() {
                if let Some(p) = &response.target_performance {
                    perf.absorb_worker_times(p);
                }
            }
        }
        let status = ProtoServerStatus::try_from(response.status)
            .map_err(|_| SkyqError::Transport(format!("bad server status: {}", response.status)))?;
        match status {
            ProtoServerStatus::Success => self.policy.extract(response),
            other => Err(server_status_error(other, &response.error)),
        }
    }
}

fn server_status_error(status: ProtoServerStatus, error: &str) -> SkyqError {
    SkyqError::Transport(format!("server status {status:?}: {error}"))
}

fn classify_failure(e: &SkyqError) -> RequestExtendedState {
    match e {
        SkyqError::Transport(msg) if msg.starts_with("server status") => {
            RequestExtendedState::ServerError
        }
        SkyqError::Transport(_) => RequestExtendedState::ClientError,
        _ => RequestExtendedState::ServerError,
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

fn single_replica(response: ProtoReplicaResponse) -> Result<ReplicaInfo> {
    response
        .replica
        .ok_or_else(|| SkyqError::Transport("response carries no replica".to_string()))
        .and_then(|r| {
            ReplicaInfo::try_from(r).map_err(|e| SkyqError::Transport(e.to_string()))
        })
}

/// Create a replica by pulling chunk files from a source worker.
pub struct ReplicatePolicy {
    /// Database of the chunk.
    pub database: String,
    /// Chunk to copy.
    pub chunk: u32,
    /// Worker to pull from.
    pub src_worker: String,
}

impl RequestPolicy for ReplicatePolicy {
    type Output = ReplicaInfo;

    fn service_type(&self) -> &'static str {
        "REPLICA_CREATE"
    }

    fn payload(&self) -> Bytes {
        ProtoReplicate {
            database: self.database.clone(),
            chunk: self.chunk,
            src_worker: self.src_worker.clone(),
        }
        .encode_to_vec()
        .into()
    }

    fn extract(&self, response: ProtoReplicaResponse) -> Result<ReplicaInfo> {
        single_replica(response)
    }
}

/// Delete one replica.
pub struct DeletePolicy {
    /// Database of the chunk.
    pub database: String,
    /// Chunk to remove.
    pub chunk: u32,
}

impl RequestPolicy for DeletePolicy {
    type Output = ReplicaInfo;

    fn service_type(&self) -> &'static str {
        "REPLICA_DELETE"
    }

    fn payload(&self) -> Bytes {
        ProtoDelete {
            database: self.database.clone(),
            chunk: self.chunk,
        }
        .encode_to_vec()
        .into()
    }

    fn extract(&self, response: ProtoReplicaResponse) -> Result<ReplicaInfo> {
        single_replica(response)
    }
}

/// Inspect one replica.
pub struct FindPolicy {
    /// Database of the chunk.
    pub database: String,
    /// Chunk to inspect.
    pub chunk: u32,
    /// Whether to verify checksums.
    pub compute_checksum: bool,
}

impl RequestPolicy for FindPolicy {
    type Output = ReplicaInfo;

    fn service_type(&self) -> &'static str {
        "REPLICA_FIND"
    }

    fn payload(&self) -> Bytes {
        ProtoFind {
            database: self.database.clone(),
            chunk: self.chunk,
            compute_checksum: self.compute_checksum,
        }
        .encode_to_vec()
        .into()
    }

    fn extract(&self, response: ProtoReplicaResponse) -> Result<ReplicaInfo> {
        single_replica(response)
    }
}

/// Enumerate all replicas of a database on one worker.
pub struct FindAllPolicy {
    /// Database to enumerate.
    pub database: String,
}

impl RequestPolicy for FindAllPolicy {
    type Output = Vec<ReplicaInfo>;

    fn service_type(&self) -> &'static str {
        "REPLICA_FIND_ALL"
    }

    fn payload(&self) -> Bytes {
        ProtoFindAll {
            database: self.database.clone(),
        }
        .encode_to_vec()
        .into()
    }

    fn extract(&self, response: ProtoReplicaResponse) -> Result<Vec<ReplicaInfo>> {
        response
            .replicas
            .into_iter()
            .map(|r| ReplicaInfo::try_from(r).map_err(|e| SkyqError::Transport(e.to_string())))
            .collect()
    }
}

/// Connectivity/latency probe.
pub struct EchoPolicy {
    /// Payload echoed back verbatim.
    pub data: Vec<u8>,
    /// Artificial worker-side delay.
    pub delay_ms: u64,
}

impl RequestPolicy for EchoPolicy {
    type Output = Vec<u8>;

    fn service_type(&self) -> &'static str {
        "TEST_ECHO"
    }

    fn payload(&self) -> Bytes {
        ProtoEcho {
            data: self.data.clone(),
            delay_ms: self.delay_ms,
        }
        .encode_to_vec()
        .into()
    }

    fn extract(&self, response: ProtoReplicaResponse) -> Result<Vec<u8>> {
        Ok(response.echo_data)
    }
}

/// Probe the state of an earlier request.
pub struct StatusPolicy {
    /// Request being inspected.
    pub target: RequestId,
}

impl RequestPolicy for StatusPolicy {
    type Output = ProtoServerStatus;

    fn service_type(&self) -> &'static str {
        "REQUEST_STATUS"
    }

    fn payload(&self) -> Bytes {
        ProtoTargetRequest {
            target_request_id: self.target.to_string(),
        }
        .encode_to_vec()
        .into()
    }

    fn extract(&self, response: ProtoReplicaResponse) -> Result<ProtoServerStatus> {
        ProtoServerStatus::try_from(response.status)
            .map_err(|_| SkyqError::Transport("bad server status".to_string()))
    }

    fn target_request_id(&self) -> Option<RequestId> {
        Some(self.target)
    }
}

/// Stop an earlier request on the worker.
pub struct StopPolicy {
    /// Request being stopped.
    pub target: RequestId,
}

impl RequestPolicy for StopPolicy {
    type Output = ProtoServerStatus;

    fn service_type(&self) -> &'static str {
        "REQUEST_STOP"
    }

    fn payload(&self) -> Bytes {
        ProtoTargetRequest {
            target_request_id: self.target.to_string(),
        }
        .encode_to_vec()
        .into()
    }

    fn extract(&self, response: ProtoReplicaResponse) -> Result<ProtoServerStatus> {
        ProtoServerStatus::try_from(response.status)
            .map_err(|_| SkyqError::Transport("bad server status".to_string()))
    }

    fn target_request_id(&self) -> Option<RequestId> {
        Some(self.target)
    }
}

/// Stateless probe of the worker control service.
pub struct ServicePolicy {
    /// Verb to apply.
    pub verb: ServiceVerb,
}

impl RequestPolicy for ServicePolicy {
    type Output = ProtoServiceState;

    fn request_kind(&self) -> RequestKind {
        RequestKind::Service
    }

    fn service_type(&self) -> &'static str {
        match self.verb {
            ServiceVerb::Status => "SERVICE_STATUS",
            ServiceVerb::Suspend => "SERVICE_SUSPEND",
            ServiceVerb::Resume => "SERVICE_RESUME",
            ServiceVerb::Requests => "SERVICE_REQUESTS",
            ServiceVerb::Drain => "SERVICE_DRAIN",
        }
    }

    fn payload(&self) -> Bytes {
        ProtoServiceRequest {
            verb: self.verb as i32,
        }
        .encode_to_vec()
        .into()
    }

    fn extract(&self, response: ProtoReplicaResponse) -> Result<ProtoServiceState> {
        response
            .service_state
            .ok_or_else(|| SkyqError::Transport("response carries no service state".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skyq_distributed::TransportSession;
    use tokio::sync::{mpsc, oneshot};

    struct ScriptedTransport {
        response: ProtoReplicaResponse,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn submit(
            &self,
            _worker: &str,
            _request: skyq_distributed::WireRequest,
        ) -> Result<TransportSession> {
            let (tx, rx) = mpsc::channel(1);
            let (finish_tx, _finish_rx) = oneshot::channel();
            let body: Bytes = self.response.encode_to_vec().into();
            let delay = self.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx
                    .send(TransportEvent::Data {
                        bytes: body,
                        is_last: true,
                    })
                    .await;
            });
            Ok(TransportSession::new(rx, finish_tx))
        }
    }

    fn ok_response() -> ProtoReplicaResponse {
        ProtoReplicaResponse {
            status: ProtoServerStatus::Success as i32,
            error: String::new(),
            replica: None,
            replicas: vec![],
            performance: Some(ProtoPerformance {
                c_create_time: 0,
                c_start_time: 0,
                w_receive_time: 11,
                w_start_time: 12,
                w_finish_time: 13,
                c_finish_time: 0,
            }),
            target_performance: None,
            echo_data: b"ping".to_vec(),
            service_state: None,
        }
    }

    #[tokio::test]
    async fn echo_succeeds_and_absorbs_worker_times() {
        let transport = ScriptedTransport {
            response: ok_response(),
            delay: Duration::from_millis(1),
        };
        let req = Request::new(
            "w1",
            EchoPolicy {
                data: b"ping".to_vec(),
                delay_ms: 0,
            },
            Duration::from_secs(5),
            0,
        );
        assert_eq!(req.state(), RequestState::Created);
        let out = req.execute(&transport).await.expect("echo");
        assert_eq!(out, b"ping");
        assert_eq!(req.state(), RequestState::Finished);
        assert_eq!(req.extended_state(), RequestExtendedState::Success);
        let perf = req.performance();
        assert_eq!(perf.w_receive_time, 11);
        assert!(perf.c_finish_time >= perf.c_create_time);
    }

    #[tokio::test]
    async fn expiration_timer_finishes_expired() {
        let transport = ScriptedTransport {
            response: ok_response(),
            delay: Duration::from_secs(60),
        };
        let req = Request::new(
            "w1",
            EchoPolicy {
                data: vec![],
                delay_ms: 0,
            },
            Duration::from_millis(20),
            0,
        );
        let err = req.execute(&transport).await.expect_err("must expire");
        assert!(matches!(err, SkyqError::Expired));
        assert_eq!(req.extended_state(), RequestExtendedState::Expired);
    }

    #[tokio::test]
    async fn cancel_on_finished_request_is_a_no_op() {
        let transport = ScriptedTransport {
            response: ok_response(),
            delay: Duration::from_millis(1),
        };
        let req = Request::new(
            "w1",
            EchoPolicy {
                data: vec![],
                delay_ms: 0,
            },
            Duration::from_secs(5),
            0,
        );
        req.execute(&transport).await.expect("echo");
        assert_eq!(req.extended_state(), RequestExtendedState::Success);
        req.cancel();
        // Terminal state is not altered by a late cancel.
        assert_eq!(req.extended_state(), RequestExtendedState::Success);
    }
}
