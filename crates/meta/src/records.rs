use skyq_common::{ControllerId, JobId, RequestId};

/// Persisted form of one controller-level job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    /// Job id.
    pub id: JobId,
    /// Owning controller.
    pub controller_id: ControllerId,
    /// Parent job, for composed jobs.
    pub parent_job_id: Option<JobId>,
    /// Job type tag, e.g. `REPLICATE`.
    pub job_type: String,
    /// Coarse state: CREATED / IN_PROGRESS / FINISHED.
    pub state: String,
    /// Extended state at FINISHED.
    pub ext_state: String,
    /// Start time, unix milliseconds.
    pub begin_time: u64,
    /// Finish time, unix milliseconds; 0 while running.
    pub end_time: u64,
    /// Last heartbeat, unix milliseconds.
    pub heartbeat: u64,
    /// Scheduling priority.
    pub priority: i32,
    /// Whether the job demands exclusive access to its chunks.
    pub exclusive: bool,
    /// Whether a scheduler may preempt the job.
    pub preemptable: bool,
    /// Extended key/value attributes persisted to `job_ext`.
    pub ext: Vec<(String, String)>,
}

/// Persisted form of one worker request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    /// Request id.
    pub id: RequestId,
    /// Owning job.
    pub job_id: JobId,
    /// Request type tag, e.g. `REPLICA_CREATE`.
    pub request_type: String,
    /// Target worker.
    pub worker: String,
    /// Scheduling priority.
    pub priority: i32,
    /// Coarse state: CREATED / IN_PROGRESS / FINISHED.
    pub state: String,
    /// Extended state at FINISHED.
    pub ext_state: String,
    /// Worker-reported disposition.
    pub server_status: String,
    /// Controller-side creation time, unix milliseconds.
    pub c_create_time: u64,
    /// Controller-side start time.
    pub c_start_time: u64,
    /// Worker-side receive time.
    pub w_receive_time: u64,
    /// Worker-side processing start time.
    pub w_start_time: u64,
    /// Worker-side processing finish time.
    pub w_finish_time: u64,
    /// Controller-side finish time.
    pub c_finish_time: u64,
    /// Extended key/value attributes persisted to `request_ext`.
    pub ext: Vec<(String, String)>,
}
