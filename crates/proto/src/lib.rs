//! Wire messages and framing for the skyq RPC fabric.
//!
//! Architecture role:
//! - protobuf message structs shared by czar, workers and the
//!   replication controller (derived in source; the transport itself is
//!   pluggable and out of scope here)
//! - 32-bit big-endian length-prefixed framing with an is-last flag
//! - `/chunk/<db>/<chunkId>` and `/worker/<name>` resource naming
//!
//! Key modules:
//! - [`messages`]
//! - [`framing`]
//! - [`resource`]

pub mod framing;
pub mod messages;
pub mod resource;

pub use framing::{read_frame, write_frame, Frame};
pub use messages::*;
pub use resource::ResourcePath;
