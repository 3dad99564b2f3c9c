use crate::controller::ReplicationContext;
use crate::job::{JobCore, JobExtendedState};
use crate::request::{DeletePolicy, ReplicatePolicy, Request};
use skyq_common::{Result, SkyqError};
use std::sync::Arc;
use std::time::Duration;

/// Move one chunk replica: replicate to the destination, then (optionally)
/// delete the source copy.
pub struct MoveReplicaJob {
    core: JobCore,
    family: String,
    chunk: u32,
    src_worker: String,
    dst_worker: String,
    purge: bool,
    ctx: Arc<ReplicationContext>,
}

impl MoveReplicaJob {
    /// Job moving `chunk` from `src_worker` to `dst_worker`.
    pub fn new(
        family: impl Into<String>,
        chunk: u32,
        src_worker: impl Into<String>,
        dst_worker: impl Into<String>,
        purge: bool,
        ctx: Arc<ReplicationContext>,
    ) -> Self {
        Self {
            core: JobCore::new("MOVE_REPLICA"),
            family: family.into(),
            chunk,
            src_worker: src_worker.into(),
            dst_worker: dst_worker.into(),
            purge,
            ctx,
        }
    }

    /// Shared job plumbing.
    pub fn core(&self) -> &JobCore {
        &self.core
    }

    /// Run the move under the chunk lock.
    pub async fn run(&self) -> Result<()> {
        self.core.start();
        if !self
            .ctx
            .locker
            .try_lock(&self.family, self.chunk, self.core.id())
        {
            self.core.finish(JobExtendedState::Failed);
            return Err(SkyqError::Transport(format!(
                "chunk {} is locked by another job",
                self.chunk
            )));
        }
        let outcome = self.run_locked().await;
        self.ctx.locker.release_all(self.core.id());
        match &outcome {
            Ok(()) => {
                self.core.finish(JobExtendedState::Success);
            }
            Err(SkyqError::Cancelled) => {
                self.core.finish(JobExtendedState::Cancelled);
            }
            Err(_) => {
                self.core.finish(JobExtendedState::Failed);
            }
        }
        outcome
    }

    async fn run_locked(&self) -> Result<()> {
        let databases = {
            let catalog = self.ctx.catalog.read().expect("catalog lock");
            catalog
                .family_databases(&self.family)
                .iter()
                .map(|d| d.name.clone())
                .collect::<Vec<_>>()
        };
        let expiration = Duration::from_secs(self.ctx.tuning.request_expiration_ival_sec);

        for database in &databases {
            if self.core.is_cancelled() {
                return Err(SkyqError::Cancelled);
            }
            let request = Request::new(
                self.dst_worker.clone(),
                ReplicatePolicy {
                    database: database.clone(),
                    chunk: self.chunk,
                    src_worker: self.src_worker.clone(),
                },
                expiration,
                0,
            );
            self.core.child_launched();
            let out = request.execute(&*self.ctx.transport).await;
            self.core.child_finished(out.is_ok());
            out?;
        }
        if !self.purge {
            return Ok(());
        }
        for database in &databases {
            if self.core.is_cancelled() {
                return Err(SkyqError::Cancelled);
            }
            let request = Request::new(
                self.src_worker.clone(),
                DeletePolicy {
                    database: database.clone(),
                    chunk: self.chunk,
                },
                expiration,
                0,
            );
            self.core.child_launched();
            let out = request.execute(&*self.ctx.transport).await;
            self.core.child_finished(out.is_ok());
            out?;
        }
        Ok(())
    }
}
