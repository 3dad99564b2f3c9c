use skyq_common::JobId;
use std::collections::HashMap;
use std::sync::Mutex;

/// Exclusive `(family, chunk)` locks preventing a chunk from being queried
/// and relocated at the same time.
///
/// Conflicting acquisitions are not queued: the caller skips the chunk on
/// this iteration and retries after its current batch.
#[derive(Debug, Default)]
pub struct ChunkLocker {
    locks: Mutex<HashMap<(String, u32), JobId>>,
}

impl ChunkLocker {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire; `false` when another job holds the chunk.
    pub fn try_lock(&self, family: &str, chunk: u32, owner: JobId) -> bool {
        let mut locks = self.locks.lock().expect("lock table");
        match locks.get(&(family.to_string(), chunk)) {
            Some(holder) => *holder == owner,
            None => {
                locks.insert((family.to_string(), chunk), owner);
                true
            }
        }
    }

    /// Release one chunk if held by `owner`.
    pub fn release(&self, family: &str, chunk: u32, owner: JobId) {
        let mut locks = self.locks.lock().expect("lock table");
        if locks.get(&(family.to_string(), chunk)) == Some(&owner) {
            locks.remove(&(family.to_string(), chunk));
        }
    }

    /// Release every chunk held by `owner`; returns how many were released.
    pub fn release_all(&self, owner: JobId) -> usize {
        let mut locks = self.locks.lock().expect("lock table");
        let before = locks.len();
        locks.retain(|_, holder| *holder != owner);
        before - locks.len()
    }

    /// Current holder of a chunk, if any.
    pub fn holder(&self, family: &str, chunk: u32) -> Option<JobId> {
        self.locks
            .lock()
            .expect("lock table")
            .get(&(family.to_string(), chunk))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicting_lock_is_refused_not_queued() {
        let locker = ChunkLocker::new();
        let a = JobId::generate();
        let b = JobId::generate();
        assert!(locker.try_lock("production", 42, a));
        assert!(!locker.try_lock("production", 42, b));
        // Re-entrant for the same owner.
        assert!(locker.try_lock("production", 42, a));
        locker.release("production", 42, a);
        assert!(locker.try_lock("production", 42, b));
    }

    #[test]
    fn release_all_frees_every_chunk_of_one_owner() {
        let locker = ChunkLocker::new();
        let a = JobId::generate();
        let b = JobId::generate();
        assert!(locker.try_lock("production", 1, a));
        assert!(locker.try_lock("production", 2, a));
        assert!(locker.try_lock("production", 3, b));
        assert_eq!(locker.release_all(a), 2);
        assert_eq!(locker.holder("production", 3), Some(b));
        assert_eq!(locker.holder("production", 1), None);
    }
}
