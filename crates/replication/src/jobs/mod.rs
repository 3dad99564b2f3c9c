//! Controller-level jobs composing worker requests.

mod delete_worker;
mod find_all;
mod move_replica;
mod purge;
mod rebalance;
mod replicate;

pub use delete_worker::DeleteWorkerJob;
pub use find_all::{FindAllJob, FindAllResult};
pub use move_replica::MoveReplicaJob;
pub use purge::{plan_purge, PlannedDeletion, PurgeJob};
pub use rebalance::{plan_rebalance, PlannedMove, RebalanceJob, RebalancePlan};
pub use replicate::{plan_replication, PlannedReplication, ReplicateJob};
