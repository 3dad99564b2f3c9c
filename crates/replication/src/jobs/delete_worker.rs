use crate::controller::ReplicationContext;
use crate::job::{JobCore, JobExtendedState};
use crate::jobs::replicate::ReplicateJob;
use skyq_common::{Result, SkyqError};
use std::sync::Arc;

/// Evict a worker from the fleet.
///
/// The worker is disabled first so no follow-on job selects it, then every
/// family it served is brought back to its replication level; chunks the
/// worker uniquely held are rebuilt from surviving good replicas. With
/// `permanent` the worker is removed from the configuration once the
/// rebuild succeeded.
pub struct DeleteWorkerJob {
    core: JobCore,
    worker: String,
    permanent: bool,
    ctx: Arc<ReplicationContext>,
}

impl DeleteWorkerJob {
    /// Job evicting `worker`.
    pub fn new(worker: impl Into<String>, permanent: bool, ctx: Arc<ReplicationContext>) -> Self {
        Self {
            core: JobCore::new("DELETE_WORKER"),
            worker: worker.into(),
            permanent,
            ctx,
        }
    }

    /// Shared job plumbing.
    pub fn core(&self) -> &JobCore {
        &self.core
    }

    /// Run the eviction.
    pub async fn run(&self) -> Result<()> {
        self.core.start();

        let families: Vec<(String, usize)> = {
            let mut catalog = self.ctx.catalog.write().expect("catalog lock");
            if !catalog.disable_worker(&self.worker) {
                self.core.finish(JobExtendedState::ConfigError);
                return Err(SkyqError::InvalidConfig(format!(
                    "unknown worker: {}",
                    self.worker
                )));
            }
            catalog
                .families()
                .iter()
                .map(|f| (f.name.clone(), f.replication_level))
                .collect()
        };
        tracing::info!(
            job_id = %self.core.id(),
            worker = %self.worker,
            permanent = self.permanent,
            "worker disabled; rebuilding replication levels"
        );

        let mut ok = true;
        for (family, level) in families {
            if self.core.is_cancelled() {
                self.core.finish(JobExtendedState::Cancelled);
                return Err(SkyqError::Cancelled);
            }
            let job = ReplicateJob::new(family.clone(), level, Arc::clone(&self.ctx));
            self.core.child_launched();
            let success = match job.run().await {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(
                        job_id = %self.core.id(),
                        family = %family,
                        error = %e,
                        "re-replication after eviction failed"
                    );
                    false
                }
            };
            self.core.child_finished(success);
            ok &= success;
        }

        if !ok {
            self.core.finish(JobExtendedState::Failed);
            return Err(SkyqError::Transport(format!(
                "eviction of '{}' left under-replicated families",
                self.worker
            )));
        }
        if self.permanent {
            let mut catalog = self.ctx.catalog.write().expect("catalog lock");
            catalog.delete_worker(&self.worker);
        }
        self.core.finish(JobExtendedState::Success);
        Ok(())
    }
}
