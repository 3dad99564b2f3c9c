use thiserror::Error;

/// Canonical skyq error taxonomy used across crates.
///
/// Classification guidance:
/// - [`SkyqError::Parse`] / [`SkyqError::Unsupported`]: the statement never
///   entered analysis; surfaced to the user verbatim
/// - [`SkyqError::Analysis`]: plugin-time semantic violations (ambiguous
///   column, ORDER BY column unavailable, unknown table/database)
/// - [`SkyqError::ChunkUnreachable`]: the executive exhausted every replica
///   of a chunk
/// - [`SkyqError::Transport`]: RPC failure below the request layer; recovered
///   by retry on an alternative replica, surfaced only once retries run out
/// - [`SkyqError::Store`]: metadata-store failures after upsert/reconnect
///   budgets are spent
/// - [`SkyqError::Internal`]: programming bug; a 500-class result
#[derive(Debug, Error)]
pub enum SkyqError {
    /// SQL text the grammar rejected, with a location hint.
    #[error("parse error: {message} at {location}")]
    Parse {
        /// Grammar failure description.
        message: String,
        /// Offending token or clause.
        location: String,
    },

    /// Syntactically valid SQL outside the supported SELECT subset.
    #[error("unsupported SQL: {0}")]
    Unsupported(String),

    /// Semantic violation detected by the analysis plugin chain.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Every replica of a chunk failed or was unreachable.
    #[error("chunk {0} unreachable: replica set exhausted")]
    ChunkUnreachable(u32),

    /// RPC-level failure below the request layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// A worker received a request for a chunk it does not serve.
    #[error("worker '{worker}' does not own chunk {chunk} of '{db}'")]
    WorkerChunkNotOwned {
        /// Worker that rejected the request.
        worker: String,
        /// Database of the rejected resource.
        db: String,
        /// Chunk number of the rejected resource.
        chunk: u32,
    },

    /// Metadata-store failure (connection, constraint, deadlock budget).
    #[error("store error: {0}")]
    Store(String),

    /// The controller leader lock was lost; the instance must demote.
    #[error("leader lock lost: {0}")]
    LockLost(String),

    /// Cooperative cancellation; not an error from the user's perspective.
    #[error("cancelled")]
    Cancelled,

    /// A request expiration timer fired before the worker responded.
    #[error("expired")]
    Expired,

    /// Invalid or inconsistent configuration/catalog state.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation; logged and surfaced as a 500-class result.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SkyqError {
    /// Short stable kind tag used in user-visible reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SkyqError::Parse { .. } => "PARSE",
            SkyqError::Unsupported(_) => "UNSUPPORTED",
            SkyqError::Analysis(_) => "ANALYSIS",
            SkyqError::ChunkUnreachable(_) => "CHUNK_UNREACHABLE",
            SkyqError::Transport(_) => "TRANSPORT",
            SkyqError::WorkerChunkNotOwned { .. } => "CHUNK_NOT_OWNED",
            SkyqError::Store(_) => "STORE",
            SkyqError::LockLost(_) => "LOCK_LOST",
            SkyqError::Cancelled => "CANCELLED",
            SkyqError::Expired => "EXPIRED",
            SkyqError::InvalidConfig(_) => "INVALID_CONFIG",
            SkyqError::Io(_) => "IO",
            SkyqError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this error is a cooperative shutdown rather than a failure.
    pub fn is_cooperative(&self) -> bool {
        matches!(self, SkyqError::Cancelled | SkyqError::Expired)
    }
}

/// Structured `(kind, message, offending id)` triple surfaced to users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Stable kind tag, see [`SkyqError::kind`].
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Offending chunk/request/job id when one is known.
    pub offending_id: Option<String>,
}

impl ErrorReport {
    /// Build a report from an error, attaching the offending id when known.
    pub fn from_error(err: &SkyqError) -> Self {
        let offending_id = match err {
            SkyqError::ChunkUnreachable(chunk) => Some(chunk.to_string()),
            SkyqError::WorkerChunkNotOwned { chunk, .. } => Some(chunk.to_string()),
            _ => None,
        };
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            offending_id,
        }
    }
}

/// Standard skyq result alias.
pub type Result<T> = std::result::Result<T, SkyqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_carries_offending_chunk() {
        let report = ErrorReport::from_error(&SkyqError::ChunkUnreachable(42));
        assert_eq!(report.kind, "CHUNK_UNREACHABLE");
        assert_eq!(report.offending_id.as_deref(), Some("42"));
    }

    #[test]
    fn cooperative_kinds_are_not_failures() {
        assert!(SkyqError::Cancelled.is_cooperative());
        assert!(SkyqError::Expired.is_cooperative());
        assert!(!SkyqError::Transport("boom".into()).is_cooperative());
    }
}
