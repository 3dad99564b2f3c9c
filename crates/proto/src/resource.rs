use skyq_common::{Result, SkyqError};
use std::fmt;

/// Target of an incoming worker request.
///
/// Chunk queries address `/chunk/<db>/<chunkNumber>`; worker management
/// commands address `/worker/<workerName>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourcePath {
    /// A chunk of one database.
    Chunk {
        /// Database name.
        db: String,
        /// Chunk number.
        chunk: u32,
    },
    /// A worker's management endpoint.
    Worker {
        /// Worker name.
        name: String,
    },
}

impl ResourcePath {
    /// Parse a resource path string.
    pub fn parse(path: &str) -> Result<Self> {
        let parts: Vec<&str> = path.split('/').collect();
        match parts.as_slice() {
            ["", "chunk", db, chunk] if !db.is_empty() => {
                let chunk = chunk.parse::<u32>().map_err(|_| {
                    SkyqError::Transport(format!("bad chunk number in resource path: {path}"))
                })?;
                Ok(ResourcePath::Chunk {
                    db: db.to_string(),
                    chunk,
                })
            }
            ["", "worker", name] if !name.is_empty() => Ok(ResourcePath::Worker {
                name: name.to_string(),
            }),
            _ => Err(SkyqError::Transport(format!(
                "unrecognized resource path: {path}"
            ))),
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourcePath::Chunk { db, chunk } => write!(f, "/chunk/{db}/{chunk}"),
            ResourcePath::Worker { name } => write!(f, "/worker/{name}"),
        }
    }
}
