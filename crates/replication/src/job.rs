use crate::request::now_ms;
use skyq_common::{ControllerId, JobId};
use skyq_meta::JobRecord;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Coarse job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Constructed, not yet started.
    Created,
    /// Child requests/jobs running.
    InProgress,
    /// Terminal.
    Finished,
}

impl JobState {
    /// Stable tag used for persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Created => "CREATED",
            JobState::InProgress => "IN_PROGRESS",
            JobState::Finished => "FINISHED",
        }
    }
}

/// Fine-grained disposition at FINISHED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobExtendedState {
    /// Not finished yet.
    None,
    /// Every child reached its success policy.
    Success,
    /// The job's success policy was not met.
    Failed,
    /// The query-serving side rejected a cooperation step.
    QservFailed,
    /// Cancelled cooperatively.
    Cancelled,
    /// Configuration prevented the job from planning.
    ConfigError,
}

impl JobExtendedState {
    /// Stable tag used for persistence.
    pub fn as_str(self) -> &'static str {
        match self {
            JobExtendedState::None => "NONE",
            JobExtendedState::Success => "SUCCESS",
            JobExtendedState::Failed => "FAILED",
            JobExtendedState::QservFailed => "QSERV_FAILED",
            JobExtendedState::Cancelled => "CANCELLED",
            JobExtendedState::ConfigError => "CONFIG_ERROR",
        }
    }
}

/// Child completion counters of one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    /// Children launched.
    pub num_launched: usize,
    /// Children finished, any disposition.
    pub num_finished: usize,
    /// Children finished successfully.
    pub num_success: usize,
}

/// Shared plumbing of every job: identity, state machine, counters and
/// cooperative cancellation.
pub struct JobCore {
    id: JobId,
    job_type: &'static str,
    state: Mutex<(JobState, JobExtendedState)>,
    counters: Mutex<JobCounters>,
    begin_time: u64,
    end_time: Mutex<u64>,
    cancelled: AtomicBool,
    cancel_notify: Notify,
}

impl JobCore {
    /// Fresh core with a random job id.
    pub fn new(job_type: &'static str) -> Self {
        Self {
            id: JobId::generate(),
            job_type,
            state: Mutex::new((JobState::Created, JobExtendedState::None)),
            counters: Mutex::new(JobCounters::default()),
            begin_time: now_ms(),
            end_time: Mutex::new(0),
            cancelled: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        }
    }

    /// Job id.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Job type tag, e.g. `REPLICATE`.
    pub fn job_type(&self) -> &'static str {
        self.job_type
    }

    /// Coarse state.
    pub fn state(&self) -> JobState {
        self.state.lock().expect("state lock").0
    }

    /// Extended state.
    pub fn extended_state(&self) -> JobExtendedState {
        self.state.lock().expect("state lock").1
    }

    /// Counter snapshot.
    pub fn counters(&self) -> JobCounters {
        *self.counters.lock().expect("counters lock")
    }

    /// CREATED -> IN_PROGRESS; returns false if already started.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock().expect("state lock");
        if state.0 != JobState::Created {
            return false;
        }
        state.0 = JobState::InProgress;
        true
    }

    /// Terminal transition, taken exactly once.
    pub fn finish(&self, ext: JobExtendedState) -> bool {
        let mut state = self.state.lock().expect("state lock");
        if state.0 == JobState::Finished {
            return false;
        }
        *state = (JobState::Finished, ext);
        *self.end_time.lock().expect("end time lock") = now_ms();
        tracing::debug!(
            job_id = %self.id,
            job_type = self.job_type,
            ext_state = ext.as_str(),
            "job finished"
        );
        true
    }

    /// Cooperative cancel; children observe it at their next suspension
    /// point. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
    }

    /// Whether a cancel was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Record one launched child.
    pub fn child_launched(&self) {
        self.counters.lock().expect("counters lock").num_launched += 1;
    }

    /// Record one finished child.
    pub fn child_finished(&self, success: bool) {
        let mut c = self.counters.lock().expect("counters lock");
        c.num_finished += 1;
        if success {
            c.num_success += 1;
        }
    }

    /// Persisted form of this job.
    pub fn record(
        &self,
        controller_id: ControllerId,
        parent_job_id: Option<JobId>,
        ext: Vec<(String, String)>,
    ) -> JobRecord {
        let (state, ext_state) = *self.state.lock().expect("state lock");
        JobRecord {
            id: self.id,
            controller_id,
            parent_job_id,
            job_type: self.job_type.to_string(),
            state: state.as_str().to_string(),
            ext_state: ext_state.as_str().to_string(),
            begin_time: self.begin_time,
            end_time: *self.end_time.lock().expect("end time lock"),
            heartbeat: now_ms(),
            priority: 0,
            exclusive: false,
            preemptable: true,
            ext,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_is_taken_once() {
        let core = JobCore::new("TEST");
        assert!(core.start());
        assert!(!core.start());
        assert!(core.finish(JobExtendedState::Success));
        assert!(!core.finish(JobExtendedState::Failed));
        assert_eq!(core.extended_state(), JobExtendedState::Success);
    }

    #[test]
    fn counters_accumulate() {
        let core = JobCore::new("TEST");
        core.child_launched();
        core.child_launched();
        core.child_finished(true);
        core.child_finished(false);
        let c = core.counters();
        assert_eq!((c.num_launched, c.num_finished, c.num_success), (2, 2, 1));
    }
}
