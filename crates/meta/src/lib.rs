//! Relational metadata store gateway.
//!
//! Architecture role:
//! - typed persistence of controller identity, jobs, requests and the
//!   replica inventory
//! - the exact-sync algorithm reconciling reported replica sets with the
//!   persisted state
//! - the `master_lock` leader-election primitive
//!
//! Two connection pools back every gateway: one for iterating result sets,
//! one for point writes, so set-based syncs never deadlock on their own
//! reads. Every mutation runs inside a transaction; duplicate-key errors
//! take the update path within a bounded retry budget.

mod records;
mod store;

pub use records::{JobRecord, RequestRecord};
pub use store::MetaStore;
