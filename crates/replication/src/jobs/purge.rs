use crate::controller::ReplicationContext;
use crate::job::{JobCore, JobExtendedState};
use crate::jobs::find_all::{FindAllJob, FindAllResult};
use crate::request::{DeletePolicy, Request};
use skyq_common::{Result, SkyqError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One planned replica deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDeletion {
    /// Over-replicated chunk.
    pub chunk: u32,
    /// Worker losing its copy.
    pub worker: String,
}

/// Inverse of the replication planner: for chunks above the target level,
/// delete copies from the most-occupied workers until the level is reached.
pub fn plan_purge(result: &FindAllResult, num_replicas: usize) -> Vec<PlannedDeletion> {
    let mut occupancy: HashMap<&str, usize> = HashMap::new();
    for by_worker in result.good.values() {
        for (worker, good) in by_worker {
            if *good {
                *occupancy.entry(worker.as_str()).or_insert(0) += 1;
            }
        }
    }

    let mut plan = Vec::new();
    for (&chunk, by_worker) in &result.good {
        let mut holders: Vec<&str> = by_worker
            .iter()
            .filter(|(_, good)| **good)
            .map(|(w, _)| w.as_str())
            .collect();
        while holders.len() > num_replicas {
            // Drop from the busiest worker; ties resolve to the first name.
            let (idx, _) = holders
                .iter()
                .enumerate()
                .max_by_key(|(i, w)| (occupancy.get(*w).copied().unwrap_or(0), usize::MAX - i))
                .expect("holders not empty");
            let worker = holders.remove(idx);
            *occupancy.entry(worker).or_insert(1) -= 1;
            plan.push(PlannedDeletion {
                chunk,
                worker: worker.to_string(),
            });
        }
    }
    plan
}

/// Delete surplus replicas of a family down to the target level.
pub struct PurgeJob {
    core: JobCore,
    family: String,
    num_replicas: usize,
    ctx: Arc<ReplicationContext>,
}

impl PurgeJob {
    /// Job keeping `num_replicas` good copies per chunk.
    pub fn new(
        family: impl Into<String>,
        num_replicas: usize,
        ctx: Arc<ReplicationContext>,
    ) -> Self {
        Self {
            core: JobCore::new("PURGE"),
            family: family.into(),
            num_replicas,
            ctx,
        }
    }

    /// Shared job plumbing.
    pub fn core(&self) -> &JobCore {
        &self.core
    }

    /// Run the precursor sweep, plan and delete surplus replicas.
    pub async fn run(&self) -> Result<usize> {
        self.core.start();
        let precursor = FindAllJob::new(self.family.clone(), Arc::clone(&self.ctx));
        let result = match precursor.run().await {
            Ok(r) => r,
            Err(e) => {
                self.core.finish(JobExtendedState::Failed);
                return Err(e);
            }
        };
        self.run_with_result(&result).await
    }

    /// Plan and delete against an already collected sweep result.
    pub async fn run_with_result(&self, result: &FindAllResult) -> Result<usize> {
        self.core.start();
        let plan = plan_purge(result, self.num_replicas);
        if plan.is_empty() {
            self.core.finish(JobExtendedState::Success);
            return Ok(0);
        }
        let databases = {
            let catalog = self.ctx.catalog.read().expect("catalog lock");
            catalog
                .family_databases(&self.family)
                .iter()
                .map(|d| d.name.clone())
                .collect::<Vec<_>>()
        };
        let expiration = Duration::from_secs(self.ctx.tuning.request_expiration_ival_sec);

        let mut deleted = 0_usize;
        let mut failed = 0_usize;
        for p in plan {
            if self.core.is_cancelled() {
                self.core.finish(JobExtendedState::Cancelled);
                return Err(SkyqError::Cancelled);
            }
            // Deletion takes the chunk lock so a concurrent move cannot race.
            if !self.ctx.locker.try_lock(&self.family, p.chunk, self.core.id()) {
                tracing::info!(
                    job_id = %self.core.id(),
                    chunk = p.chunk,
                    "skipping purge of locked chunk"
                );
                continue;
            }
            let mut ok = true;
            for database in &databases {
                let request = Request::new(
                    p.worker.clone(),
                    DeletePolicy {
                        database: database.clone(),
                        chunk: p.chunk,
                    },
                    expiration,
                    0,
                );
                self.core.child_launched();
                let success = request.execute(&*self.ctx.transport).await.is_ok();
                self.core.child_finished(success);
                ok &= success;
            }
            self.ctx.locker.release(&self.family, p.chunk, self.core.id());
            if ok {
                deleted += 1;
            } else {
                failed += 1;
            }
        }
        if failed == 0 {
            self.core.finish(JobExtendedState::Success);
            Ok(deleted)
        } else {
            self.core.finish(JobExtendedState::Failed);
            Err(SkyqError::Transport(format!(
                "purge failed for {failed} chunk deletions"
            )))
        }
    }
}
