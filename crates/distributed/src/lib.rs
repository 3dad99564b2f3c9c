//! Dispatch runtime: per-query executive, streaming result intake and the
//! worker-side request router.
//!
//! Architecture role:
//! - the executive owns every outstanding per-chunk request of one user
//!   query: bounded fan-out, per-replica retries, cancellation;
//! - receivers buffer streamed response bytes and hand framed fragments to
//!   the merger under back-pressure;
//! - the merger stages per-attempt rows and runs the merge statement once
//!   every chunk finished;
//! - the worker router validates chunk ownership, decodes task messages and
//!   feeds a bounded processing pool.
//!
//! The streaming transport itself is pluggable: anything implementing
//! [`Transport`] (send request, receive framed response data, cancel,
//! finish) can carry the traffic.
//!
//! Key modules:
//! - [`transport`]
//! - [`receiver`] / [`merger`]
//! - [`executive`]
//! - [`worker`] / [`inventory`]

pub mod executive;
pub mod inventory;
pub mod merger;
pub mod receiver;
pub mod transport;
pub mod worker;

pub use executive::{ChunkAttempt, Executive, ExecutiveConfig, QueryOutcome};
pub use inventory::ChunkInventory;
pub use merger::{ResultMerger, ResultStore};
pub use receiver::ResultReceiver;
pub use transport::{Transport, TransportEvent, TransportSession, WireRequest};
pub use worker::{RequestRouter, TaskRunner, WorkerTask};
