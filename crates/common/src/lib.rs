#![deny(missing_docs)]

//! Shared configuration, error types and IDs for skyq crates.
//!
//! Architecture role:
//! - defines runtime tuning knobs passed across layers
//! - provides common [`SkyqError`] / [`Result`] contracts
//! - hosts strongly-typed identifier wrappers
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`replica`]

/// Shared runtime tuning configuration.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;
/// Replica inventory model.
pub mod replica;

pub use config::TuningConfig;
pub use error::{ErrorReport, Result, SkyqError};
pub use ids::*;
pub use replica::{FileInfo, ReplicaInfo, ReplicaStatus};
