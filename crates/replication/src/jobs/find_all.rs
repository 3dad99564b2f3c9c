use crate::controller::ReplicationContext;
use crate::job::{JobCore, JobExtendedState};
use crate::request::{FindAllPolicy, Request};
use skyq_common::{ReplicaInfo, Result, SkyqError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Collated outcome of one find-all sweep over a database family.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindAllResult {
    /// `chunks[chunk][database][worker]` -> replica.
    pub chunks: BTreeMap<u32, BTreeMap<String, BTreeMap<String, ReplicaInfo>>>,
    /// Whether every database of the family places the chunk on the same
    /// worker set.
    pub colocated: BTreeMap<u32, bool>,
    /// `good[chunk][worker]`: colocated and COMPLETE for every database.
    pub good: BTreeMap<u32, BTreeMap<String, bool>>,
    /// Per-worker sweep success; failed workers are excluded as
    /// destinations by follow-on jobs.
    pub workers: BTreeMap<String, bool>,
}

impl FindAllResult {
    /// Collate raw per-worker reports and classify chunks.
    pub fn collate(
        databases: &[String],
        reports: &[(String, bool, Vec<ReplicaInfo>)],
    ) -> Self {
        let mut result = FindAllResult::default();
        for (worker, ok, replicas) in reports {
            result.workers.insert(worker.clone(), *ok);
            for replica in replicas {
                result
                    .chunks
                    .entry(replica.chunk)
                    .or_default()
                    .entry(replica.database.clone())
                    .or_default()
                    .insert(worker.clone(), replica.clone());
            }
        }
        for (&chunk, by_db) in &result.chunks {
            let sets: Vec<BTreeSet<&String>> = databases
                .iter()
                .map(|db| {
                    by_db
                        .get(db)
                        .map(|by_worker| by_worker.keys().collect())
                        .unwrap_or_default()
                })
                .collect();
            let colocated = sets.windows(2).all(|w| w[0] == w[1]);
            result.colocated.insert(chunk, colocated);

            let holders: BTreeSet<String> = by_db
                .values()
                .flat_map(|by_worker| by_worker.keys().cloned())
                .collect();
            let mut good = BTreeMap::new();
            for worker in holders {
                let complete_everywhere = databases.iter().all(|db| {
                    by_db
                        .get(db)
                        .and_then(|by_worker| by_worker.get(&worker))
                        .is_some_and(ReplicaInfo::is_complete)
                });
                good.insert(worker, colocated && complete_everywhere);
            }
            result.good.insert(chunk, good);
        }
        result
    }

    /// Workers holding a good replica of the chunk, sorted.
    pub fn good_workers(&self, chunk: u32) -> Vec<&str> {
        self.good
            .get(&chunk)
            .map(|by_worker| {
                by_worker
                    .iter()
                    .filter(|(_, good)| **good)
                    .map(|(w, _)| w.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Chunks classified both colocated and fully good.
    pub fn good_chunks(&self) -> Vec<u32> {
        self.good
            .iter()
            .filter(|(_, by_worker)| !by_worker.is_empty() && by_worker.values().all(|g| *g))
            .map(|(c, _)| *c)
            .collect()
    }
}

/// Fan out replica enumeration across the workers of a family, persist the
/// reported inventory and classify chunk placement.
pub struct FindAllJob {
    core: JobCore,
    family: String,
    ctx: Arc<ReplicationContext>,
}

impl FindAllJob {
    /// Job over one database family.
    pub fn new(family: impl Into<String>, ctx: Arc<ReplicationContext>) -> Self {
        Self {
            core: JobCore::new("FIND_ALL"),
            family: family.into(),
            ctx,
        }
    }

    /// Shared job plumbing.
    pub fn core(&self) -> &JobCore {
        &self.core
    }

    /// Run the sweep to completion.
    pub async fn run(&self) -> Result<FindAllResult> {
        self.core.start();
        let (workers, databases) = {
            let catalog = self.ctx.catalog.read().expect("catalog lock");
            let workers: Vec<String> = catalog
                .workers()
                .iter()
                .filter(|w| w.is_enabled)
                .map(|w| w.name.clone())
                .collect();
            let databases: Vec<String> = catalog
                .family_databases(&self.family)
                .iter()
                .map(|d| d.name.clone())
                .collect();
            (workers, databases)
        };
        if databases.is_empty() {
            self.core.finish(JobExtendedState::ConfigError);
            return Err(SkyqError::InvalidConfig(format!(
                "family '{}' has no databases",
                self.family
            )));
        }

        let expiration = Duration::from_secs(self.ctx.tuning.request_expiration_ival_sec);
        let sweeps = workers.iter().map(|worker| {
            let databases = databases.clone();
            let ctx = Arc::clone(&self.ctx);
            let core = &self.core;
            async move {
                let mut ok = true;
                let mut replicas = Vec::new();
                for database in &databases {
                    if core.is_cancelled() {
                        ok = false;
                        break;
                    }
                    let request = Request::new(
                        worker.clone(),
                        FindAllPolicy {
                            database: database.clone(),
                        },
                        expiration,
                        0,
                    );
                    core.child_launched();
                    match request.execute(&*ctx.transport).await {
                        Ok(found) => {
                            core.child_finished(true);
                            if let Err(e) = ctx
                                .store
                                .save_replica_info_collection(worker, database, &found)
                                .await
                            {
                                tracing::warn!(
                                    worker = %worker,
                                    database = %database,
                                    error = %e,
                                    "failed to persist replica inventory"
                                );
                            }
                            replicas.extend(found);
                        }
                        Err(e) => {
                            core.child_finished(false);
                            tracing::warn!(
                                worker = %worker,
                                database = %database,
                                error = %e,
                                "find-all request failed"
                            );
                            ok = false;
                        }
                    }
                }
                (worker.clone(), ok, replicas)
            }
        });
        let reports: Vec<(String, bool, Vec<ReplicaInfo>)> =
            futures::future::join_all(sweeps).await;

        if self.core.is_cancelled() {
            self.core.finish(JobExtendedState::Cancelled);
            return Err(SkyqError::Cancelled);
        }
        let result = FindAllResult::collate(&databases, &reports);
        if result.workers.values().any(|ok| *ok) {
            self.core.finish(JobExtendedState::Success);
            Ok(result)
        } else {
            self.core.finish(JobExtendedState::Failed);
            Err(SkyqError::Transport(
                "find-all failed on every worker".to_string(),
            ))
        }
    }
}
