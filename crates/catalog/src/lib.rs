//! Fleet configuration and partitioned-schema metadata for skyq.
//!
//! Architecture role:
//! - describes workers, database families and databases of a deployment
//! - answers table-shape questions for the query analysis plugins
//!   (chunked? match table? director column?)
//! - loadable from `.json` or `.toml` deployment files
//!
//! Key types:
//! - [`Catalog`]
//! - [`WorkerInfo`], [`DatabaseFamily`], [`DatabaseInfo`]
//! - [`MatchTableParams`]

mod catalog;

pub use catalog::{
    Catalog, DatabaseFamily, DatabaseInfo, MatchTableParams, PartitionedTable, WorkerInfo,
};
