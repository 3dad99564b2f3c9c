use crate::controller::ReplicationContext;
use crate::job::{JobCore, JobExtendedState};
use crate::jobs::find_all::{FindAllJob, FindAllResult};
use crate::request::{ReplicatePolicy, Request};
use futures::stream::{FuturesUnordered, StreamExt};
use skyq_common::{Result, SkyqError};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// One planned replica creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedReplication {
    /// Chunk to copy.
    pub chunk: u32,
    /// Worker holding a good replica to pull from.
    pub src: String,
    /// Worker receiving the new replica.
    pub dst: String,
}

/// Initial replication planner.
///
/// For every chunk below `num_replicas` good copies, pick the least-used
/// source among good holders and, per new replica, the destination with the
/// fewest good chunks among white-listed workers not already holding the
/// chunk. Source and destination occupancy are bumped as decisions are
/// made, spreading load across the fleet.
pub fn plan_replication(
    result: &FindAllResult,
    num_replicas: usize,
    white_list: &[String],
) -> Result<Vec<PlannedReplication>> {
    if white_list.is_empty() {
        return Err(SkyqError::Transport(
            "no workers are available for new replicas".to_string(),
        ));
    }

    // Good-chunk occupancy per worker, the destination load metric.
    let mut occupancy: HashMap<&str, usize> = white_list.iter().map(|w| (w.as_str(), 0)).collect();
    for by_worker in result.good.values() {
        for (worker, good) in by_worker {
            if *good {
                *occupancy.entry(worker.as_str()).or_insert(0) += 1;
            }
        }
    }

    // Chunk-specific exclusions: a worker holding any replica of the chunk
    // (for any database, in any state) is not a valid destination.
    let mut holding: HashMap<u32, BTreeSet<&str>> = HashMap::new();
    for (&chunk, by_db) in &result.chunks {
        let entry = holding.entry(chunk).or_default();
        for by_worker in by_db.values() {
            entry.extend(by_worker.keys().map(String::as_str));
        }
    }

    let mut source_allocations: HashMap<&str, usize> = HashMap::new();
    let mut plan = Vec::new();

    for (&chunk, by_worker) in &result.good {
        let good_count = by_worker.values().filter(|g| **g).count();
        if good_count >= num_replicas {
            continue;
        }
        let needed = num_replicas - good_count;

        // Least-used source among good holders.
        let src = by_worker
            .iter()
            .filter(|(_, good)| **good)
            .map(|(w, _)| w.as_str())
            .min_by_key(|w| source_allocations.get(w).copied().unwrap_or(0))
            .ok_or_else(|| {
                SkyqError::Transport(format!("no good source replica for chunk {chunk}"))
            })?;

        for _ in 0..needed {
            let dst = white_list
                .iter()
                .map(String::as_str)
                .filter(|w| !holding.get(&chunk).is_some_and(|h| h.contains(w)))
                .min_by_key(|w| occupancy.get(w).copied().unwrap_or(0))
                .ok_or_else(|| {
                    SkyqError::Transport(format!(
                        "no suitable destination worker for chunk {chunk}"
                    ))
                })?;
            // Account for the decision before planning the next replica.
            *occupancy.entry(dst).or_insert(0) += 1;
            *source_allocations.entry(src).or_insert(0) += 1;
            holding.entry(chunk).or_default().insert(dst);
            plan.push(PlannedReplication {
                chunk,
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }
    }
    Ok(plan)
}

/// Bring every chunk of a family up to the target replication level.
pub struct ReplicateJob {
    core: JobCore,
    family: String,
    num_replicas: usize,
    ctx: Arc<ReplicationContext>,
}

impl ReplicateJob {
    /// Job targeting `num_replicas` good copies per chunk.
    pub fn new(
        family: impl Into<String>,
        num_replicas: usize,
        ctx: Arc<ReplicationContext>,
    ) -> Self {
        Self {
            core: JobCore::new("REPLICATE"),
            family: family.into(),
            num_replicas,
            ctx,
        }
    }

    /// Shared job plumbing.
    pub fn core(&self) -> &JobCore {
        &self.core
    }

    /// Run the precursor sweep, plan and launch replications.
    ///
    /// Success is counted per chunk, not per request: the job succeeds when
    /// every under-replicated chunk received all of its planned replicas.
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

    /// Plan and launch against an already collected sweep result.
    pub async fn run_with_result(&self, result: &FindAllResult) -> Result<usize> {
        self.core.start();
        let white_list: Vec<String> = {
            let catalog = self.ctx.catalog.read().expect("catalog lock");
            catalog
                .workers()
                .iter()
                .filter(|w| w.is_enabled && !w.is_read_only)
                .filter(|w| result.workers.get(&w.name).copied().unwrap_or(false))
                .map(|w| w.name.clone())
                .collect()
        };
        let plan = match plan_replication(result, self.num_replicas, &white_list) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    job_id = %self.core.id(),
                    family = %self.family,
                    error = %e,
                    "replication planning failed"
                );
                self.core.finish(JobExtendedState::Failed);
                return Err(e);
            }
        };
        if plan.is_empty() {
            self.core.finish(JobExtendedState::Success);
            return Ok(0);
        }

        let mut locked = Vec::new();
        let mut skipped = 0_usize;
        let mut accepted = Vec::new();
        for p in plan {
            if locked.contains(&p.chunk)
                || self.ctx.locker.try_lock(&self.family, p.chunk, self.core.id())
            {
                if !locked.contains(&p.chunk) {
                    locked.push(p.chunk);
                }
                accepted.push(p);
            } else {
                skipped += 1;
            }
        }
        if skipped > 0 {
            tracing::info!(
                job_id = %self.core.id(),
                num_failed_locks = skipped,
                "skipping chunks with conflicting locks this iteration"
            );
        }

        let outcome = self.launch(accepted).await;
        self.ctx.locker.release_all(self.core.id());

        match outcome {
            Ok(created) => {
                self.core.finish(JobExtendedState::Success);
                Ok(created)
            }
            Err(e) => {
                self.core.finish(if matches!(e, SkyqError::Cancelled) {
                    JobExtendedState::Cancelled
                } else {
                    JobExtendedState::Failed
                });
                Err(e)
            }
        }
    }

    /// Greedy launcher preserving the load-balancing invariant: among the
    /// planned tuples, the one minimizing `load(src, dst) = numAtDst +
    /// numAtSrc` is dispatched next, bounded by `workers x
    /// workerNumProcessingThreads` concurrent requests.
    async fn launch(&self, mut pending: Vec<PlannedReplication>) -> Result<usize> {
        let cap = {
            let dst_workers: BTreeSet<&str> = pending.iter().map(|p| p.dst.as_str()).collect();
            (dst_workers.len() * self.ctx.tuning.worker_processing_threads).max(1)
        };
        let expiration = Duration::from_secs(self.ctx.tuning.request_expiration_ival_sec);

        let mut at_src: HashMap<String, usize> = HashMap::new();
        let mut at_dst: HashMap<String, usize> = HashMap::new();
        let mut running = FuturesUnordered::new();
        let mut failed_chunks: BTreeSet<u32> = BTreeSet::new();
        let mut created = 0_usize;

        loop {
            while running.len() < cap && !pending.is_empty() && !self.core.is_cancelled() {
                let next = pending
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, p)| {
                        at_dst.get(&p.dst).copied().unwrap_or(0)
                            + at_src.get(&p.src).copied().unwrap_or(0)
                    })
                    .map(|(i, _)| i)
                    .expect("pending not empty");
                let p = pending.swap_remove(next);
                *at_src.entry(p.src.clone()).or_insert(0) += 1;
                *at_dst.entry(p.dst.clone()).or_insert(0) += 1;
                self.core.child_launched();
                let transport = Arc::clone(&self.ctx.transport);
                let databases = self.family_databases();
                running.push(async move {
                    // A chunk replica spans every database of the family.
                    let mut ok = true;
                    for database in &databases {
                        let request = Request::new(
                            p.dst.clone(),
                            ReplicatePolicy {
                                database: database.clone(),
                                chunk: p.chunk,
                                src_worker: p.src.clone(),
                            },
                            expiration,
                            0,
                        );
                        if request.execute(&*transport).await.is_err() {
                            ok = false;
                            break;
                        }
                    }
                    (p, ok)
                });
            }
            let Some((p, ok)) = running.next().await else {
                break;
            };
            *at_src.get_mut(&p.src).expect("src accounted") -= 1;
            *at_dst.get_mut(&p.dst).expect("dst accounted") -= 1;
            self.core.child_finished(ok);
            if ok {
                created += 1;
            } else {
                failed_chunks.insert(p.chunk);
            }
        }

        if self.core.is_cancelled() {
            return Err(SkyqError::Cancelled);
        }
        if failed_chunks.is_empty() {
            Ok(created)
        } else {
            Err(SkyqError::Transport(format!(
                "replication failed for chunks {failed_chunks:?}"
            )))
        }
    }

    fn family_databases(&self) -> Vec<String> {
        self.ctx
            .catalog
            .read()
            .expect("catalog lock")
            .family_databases(&self.family)
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::find_all::FindAllResult;
    use skyq_common::{ReplicaInfo, ReplicaStatus};

    fn replica(worker: &str, chunk: u32, status: ReplicaStatus) -> ReplicaInfo {
        ReplicaInfo {
            status,
            worker: worker.to_string(),
            database: "LSST".to_string(),
            chunk,
            verify_time: 0,
            files: vec![],
        }
    }

    fn sweep(reports: Vec<(&str, Vec<ReplicaInfo>)>) -> FindAllResult {
        let reports: Vec<(String, bool, Vec<ReplicaInfo>)> = reports
            .into_iter()
            .map(|(w, rs)| (w.to_string(), true, rs))
            .collect();
        FindAllResult::collate(&["LSST".to_string()], &reports)
    }

    fn workers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn under_replicated_chunk_gets_new_replica_on_empty_worker() {
        // Chunk 42 good on {A, B}; D is empty; target level 3.
        let result = sweep(vec![
            ("A", vec![replica("A", 42, ReplicaStatus::Complete)]),
            ("B", vec![replica("B", 42, ReplicaStatus::Complete)]),
            ("C", vec![replica("C", 42, ReplicaStatus::Incomplete)]),
            ("D", vec![]),
        ]);
        let plan =
            plan_replication(&result, 3, &workers(&["A", "B", "C", "D"])).expect("plan");
        // C already holds a (bad) replica, so D is the only destination.
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].chunk, 42);
        assert_eq!(plan[0].dst, "D");
        assert!(plan[0].src == "A" || plan[0].src == "B");
    }

    #[test]
    fn no_destination_available_is_a_planning_failure() {
        // Chunk 42 present on every worker; target level 3 with only one
        // good copy cannot be met.
        let result = sweep(vec![
            ("A", vec![replica("A", 42, ReplicaStatus::Complete)]),
            ("B", vec![replica("B", 42, ReplicaStatus::Complete)]),
            ("C", vec![replica("C", 42, ReplicaStatus::Incomplete)]),
        ]);
        let err = plan_replication(&result, 3, &workers(&["A", "B", "C"]))
            .expect_err("no destination exists");
        assert!(err.to_string().contains("no suitable destination"));
    }

    #[test]
    fn chunk_without_any_good_replica_fails_the_plan() {
        let result = sweep(vec![
            ("A", vec![replica("A", 7, ReplicaStatus::Corrupt)]),
            ("B", vec![]),
        ]);
        let err =
            plan_replication(&result, 2, &workers(&["A", "B"])).expect_err("no good source");
        assert!(err.to_string().contains("no good source"));
    }

    #[test]
    fn destinations_spread_by_occupancy() {
        // B is busy with two good chunks, C has one, D none. New replicas
        // prefer the emptiest workers first.
        let result = sweep(vec![
            ("A", vec![replica("A", 1, ReplicaStatus::Complete)]),
            (
                "B",
                vec![
                    replica("B", 2, ReplicaStatus::Complete),
                    replica("B", 3, ReplicaStatus::Complete),
                ],
            ),
            ("C", vec![replica("C", 4, ReplicaStatus::Complete)]),
            ("D", vec![]),
        ]);
        let plan = plan_replication(&result, 2, &workers(&["A", "B", "C", "D"])).expect("plan");
        // Every chunk needs one more replica; the first one planned goes
        // to D (occupancy 0).
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].dst, "D");
        // All planned destinations exclude workers already holding the
        // chunk in question.
        for p in &plan {
            let holders = result
                .chunks
                .get(&p.chunk)
                .and_then(|by_db| by_db.get("LSST"))
                .map(|m| m.keys().cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            assert!(!holders.contains(&p.dst), "{p:?} targets a holder");
        }
    }

    #[test]
    fn satisfied_level_plans_nothing() {
        let result = sweep(vec![
            ("A", vec![replica("A", 1, ReplicaStatus::Complete)]),
            ("B", vec![replica("B", 1, ReplicaStatus::Complete)]),
        ]);
        let plan = plan_replication(&result, 2, &workers(&["A", "B"])).expect("plan");
        assert!(plan.is_empty());
    }
}
