//! Query analysis stack: context, plugin chain and per-chunk planning.
//!
//! Architecture role:
//! - per-query context shared by the rewrite plugins
//! - the fixed ordered plugin chain (qualification, restrictor
//!   extraction, match-table filtering, aggregate split, scan
//!   classification, ORDER BY/LIMIT hoisting)
//! - the query session producing per-chunk sub-queries, the merge
//!   statement and the proxy tail
//!
//! Key modules:
//! - [`context`]
//! - [`plugin`]
//! - [`plugins`]
//! - [`session`]

pub mod context;
pub mod plugin;
pub mod plugins;
pub mod session;

pub use context::{ChunkResolver, QueryContext};
pub use plugin::{PluginChain, QueryPlan, QueryPlugin};
pub use session::{ChunkQuerySpec, QuerySession, DUMMY_CHUNK};
