use crate::controller::ReplicationContext;
use crate::job::{JobCore, JobExtendedState};
use crate::jobs::find_all::{FindAllJob, FindAllResult};
use crate::jobs::move_replica::MoveReplicaJob;
use skyq_common::{Result, SkyqError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One planned chunk move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    /// Chunk to relocate.
    pub chunk: u32,
    /// Overloaded worker losing the replica.
    pub src: String,
    /// Underloaded worker receiving it.
    pub dst: String,
}

/// Rebalancing plan and the load figures it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalancePlan {
    /// Average good chunks per worker, rounded down.
    pub avg_chunks: usize,
    /// Planned moves, in dispatch order.
    pub moves: Vec<PlannedMove>,
}

/// Even out good-chunk counts across workers.
///
/// Workers above `avg + 1` move chunks to workers below the average until
/// every count is within one of it. Moves never target a worker already
/// holding the chunk.
pub fn plan_rebalance(result: &FindAllResult, workers: &[String]) -> RebalancePlan {
    let good_chunks = result.good_chunks();
    let mut counts: BTreeMap<&str, usize> = workers.iter().map(|w| (w.as_str(), 0)).collect();
    let mut holders: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
    for &chunk in &good_chunks {
        for worker in result.good_workers(chunk) {
            if let Some(c) = counts.get_mut(worker) {
                *c += 1;
            }
            holders.entry(chunk).or_default().push(worker);
        }
    }
    if workers.is_empty() {
        return RebalancePlan {
            avg_chunks: 0,
            moves: Vec::new(),
        };
    }
    let total: usize = counts.values().sum();
    let avg = total / workers.len();

    let mut moves = Vec::new();
    loop {
        let Some((&hot, &hot_count)) = counts.iter().max_by_key(|(_, c)| **c) else {
            break;
        };
        let Some((&cold, &cold_count)) = counts.iter().min_by_key(|(_, c)| **c) else {
            break;
        };
        // Tolerance of one around the average: a worker may carry up to
        // avg + 1 chunks, and a destination may be filled up to avg.
        if hot_count <= avg + 1 || cold_count > avg || hot == cold {
            break;
        }
        // First good chunk on the hot worker whose holder set excludes the
        // cold worker.
        let candidate = holders.iter().find_map(|(&chunk, hs)| {
            (hs.contains(&hot)
                && !hs.contains(&cold)
                && !moves.iter().any(|m: &PlannedMove| m.chunk == chunk))
            .then_some(chunk)
        });
        let Some(chunk) = candidate else {
            break;
        };
        moves.push(PlannedMove {
            chunk,
            src: hot.to_string(),
            dst: cold.to_string(),
        });
        *counts.get_mut(hot).expect("hot counted") -= 1;
        *counts.get_mut(cold).expect("cold counted") += 1;
        if let Some(hs) = holders.get_mut(&chunk) {
            hs.retain(|w| *w != hot);
            hs.push(cold);
        }
    }
    RebalancePlan {
        avg_chunks: avg,
        moves,
    }
}

/// Move chunks from overloaded to underloaded workers of one family.
pub struct RebalanceJob {
    core: JobCore,
    family: String,
    estimate_only: bool,
    ctx: Arc<ReplicationContext>,
}

impl RebalanceJob {
    /// Job over one family; `estimate_only` reports the plan without
    /// issuing any move.
    pub fn new(family: impl Into<String>, estimate_only: bool, ctx: Arc<ReplicationContext>) -> Self {
        Self {
            core: JobCore::new("REBALANCE"),
            family: family.into(),
            estimate_only,
            ctx,
        }
    }

    /// Shared job plumbing.
    pub fn core(&self) -> &JobCore {
        &self.core
    }

    /// Run the sweep, derive the plan and (unless estimating) execute it.
    pub async fn run(&self) -> Result<RebalancePlan> {
        self.core.start();
        let precursor = FindAllJob::new(self.family.clone(), Arc::clone(&self.ctx));
        let result = match precursor.run().await {
            Ok(r) => r,
            Err(e) => {
                self.core.finish(JobExtendedState::Failed);
                return Err(e);
            }
        };
        let workers: Vec<String> = {
            let catalog = self.ctx.catalog.read().expect("catalog lock");
            catalog
                .workers()
                .iter()
                .filter(|w| w.is_enabled && !w.is_read_only)
                .filter(|w| result.workers.get(&w.name).copied().unwrap_or(false))
                .map(|w| w.name.clone())
                .collect()
        };
        let plan = plan_rebalance(&result, &workers);
        tracing::info!(
            job_id = %self.core.id(),
            family = %self.family,
            avg_chunks = plan.avg_chunks,
            moves = plan.moves.len(),
            estimate_only = self.estimate_only,
            "rebalance plan computed"
        );
        if self.estimate_only || plan.moves.is_empty() {
            self.core.finish(JobExtendedState::Success);
            return Ok(plan);
        }

        let mut ok = true;
        for m in &plan.moves {
            if self.core.is_cancelled() {
                self.core.finish(JobExtendedState::Cancelled);
                return Err(SkyqError::Cancelled);
            }
            let mover = MoveReplicaJob::new(
                self.family.clone(),
                m.chunk,
                m.src.clone(),
                m.dst.clone(),
                true,
                Arc::clone(&self.ctx),
            );
            self.core.child_launched();
            let success = mover.run().await.is_ok();
            self.core.child_finished(success);
            ok &= success;
        }
        if ok {
            self.core.finish(JobExtendedState::Success);
            Ok(plan)
        } else {
            self.core.finish(JobExtendedState::Failed);
            Err(SkyqError::Transport(
                "one or more rebalance moves failed".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyq_common::{ReplicaInfo, ReplicaStatus};

    fn replica(worker: &str, chunk: u32) -> ReplicaInfo {
        ReplicaInfo {
            status: ReplicaStatus::Complete,
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

    #[test]
    fn hot_worker_sheds_chunks_to_cold_worker() {
        let result = sweep(vec![
            (
                "A",
                vec![
                    replica("A", 1),
                    replica("A", 2),
                    replica("A", 3),
                    replica("A", 4),
                ],
            ),
            ("B", vec![replica("B", 5)]),
            ("C", vec![]),
        ]);
        let plan = plan_rebalance(
            &result,
            &["A".to_string(), "B".to_string(), "C".to_string()],
        );
        assert_eq!(plan.avg_chunks, 1);
        // A sheds down to two chunks: first to the empty C, then to B.
        assert_eq!(
            plan.moves,
            vec![
                PlannedMove {
                    chunk: 1,
                    src: "A".to_string(),
                    dst: "C".to_string()
                },
                PlannedMove {
                    chunk: 2,
                    src: "A".to_string(),
                    dst: "B".to_string()
                },
            ]
        );
    }

    #[test]
    fn balanced_fleet_plans_no_moves() {
        let result = sweep(vec![
            ("A", vec![replica("A", 1)]),
            ("B", vec![replica("B", 2)]),
            ("C", vec![replica("C", 3)]),
        ]);
        let plan = plan_rebalance(
            &result,
            &["A".to_string(), "B".to_string(), "C".to_string()],
        );
        assert!(plan.moves.is_empty());
        assert_eq!(plan.avg_chunks, 1);
    }
}
