//! Replica inventory model shared by the dispatch, replication and
//! metadata-store layers.

use serde::{Deserialize, Serialize};

/// Completeness of one replica as last observed on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicaStatus {
    /// No trace of the chunk on the worker.
    NotFound,
    /// Files are present but fail verification.
    Corrupt,
    /// Some chunk files are missing.
    Incomplete,
    /// All files present and verified; eligible to serve queries.
    Complete,
}

impl ReplicaStatus {
    /// Stable tag used in the metadata store and wire messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ReplicaStatus::NotFound => "NOT_FOUND",
            ReplicaStatus::Corrupt => "CORRUPT",
            ReplicaStatus::Incomplete => "INCOMPLETE",
            ReplicaStatus::Complete => "COMPLETE",
        }
    }

    /// Parse the stable tag.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NOT_FOUND" => Some(ReplicaStatus::NotFound),
            "CORRUPT" => Some(ReplicaStatus::Corrupt),
            "INCOMPLETE" => Some(ReplicaStatus::Incomplete),
            "COMPLETE" => Some(ReplicaStatus::Complete),
            _ => None,
        }
    }
}

/// One file of a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// File name relative to the chunk directory.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time, unix seconds.
    pub mtime: u64,
    /// Control checksum of the file content.
    pub cs: String,
    /// Transfer start time, unix milliseconds; 0 when not transferred.
    pub begin_transfer_time: u64,
    /// Transfer end time, unix milliseconds; 0 when not transferred.
    pub end_transfer_time: u64,
}

/// One `(worker, database, chunk)` replica and its file set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    /// Observed completeness.
    pub status: ReplicaStatus,
    /// Worker holding the replica.
    pub worker: String,
    /// Database the chunk belongs to.
    pub database: String,
    /// Chunk number.
    pub chunk: u32,
    /// Verification time, unix milliseconds.
    pub verify_time: u64,
    /// Ordered file list.
    pub files: Vec<FileInfo>,
}

impl ReplicaInfo {
    /// Whether this replica can serve queries.
    pub fn is_complete(&self) -> bool {
        self.status == ReplicaStatus::Complete
    }

    /// Deep file-set comparison used by the store sync algorithm.
    ///
    /// Transfer times are bookkeeping, not content; only name, size, mtime
    /// and checksum decide equality.
    pub fn same_files(&self, other: &ReplicaInfo) -> bool {
        self.files.len() == other.files.len()
            && self.files.iter().zip(&other.files).all(|(a, b)| {
                a.name == b.name && a.size == b.size && a.mtime == b.mtime && a.cs == b.cs
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64) -> FileInfo {
        FileInfo {
            name: name.to_string(),
            size,
            mtime: 1000,
            cs: format!("cs-{name}"),
            begin_transfer_time: 0,
            end_transfer_time: 0,
        }
    }

    #[test]
    fn same_files_ignores_transfer_times() {
        let a = ReplicaInfo {
            status: ReplicaStatus::Complete,
            worker: "w1".to_string(),
            database: "LSST".to_string(),
            chunk: 42,
            verify_time: 1,
            files: vec![file("chunk_42.MYD", 10)],
        };
        let mut b = a.clone();
        b.files[0].begin_transfer_time = 77;
        assert!(a.same_files(&b));
        b.files[0].size = 11;
        assert!(!a.same_files(&b));
    }

    #[test]
    fn status_tags_round_trip() {
        for s in [
            ReplicaStatus::NotFound,
            ReplicaStatus::Corrupt,
            ReplicaStatus::Incomplete,
            ReplicaStatus::Complete,
        ] {
            assert_eq!(ReplicaStatus::parse(s.as_str()), Some(s));
        }
    }
}
