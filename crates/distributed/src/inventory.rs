use std::collections::HashSet;
use std::sync::Mutex;

/// Set of `(database, chunk)` pairs served by the local worker.
///
/// Read-mostly; a single mutex is enough.
#[derive(Debug, Default)]
pub struct ChunkInventory {
    chunks: Mutex<HashSet<(String, u32)>>,
}

impl ChunkInventory {
    /// Empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inventory pre-loaded with chunk pairs.
    pub fn with_chunks(chunks: impl IntoIterator<Item = (String, u32)>) -> Self {
        Self {
            chunks: Mutex::new(chunks.into_iter().collect()),
        }
    }

    /// Whether a chunk is served locally.
    pub fn contains(&self, db: &str, chunk: u32) -> bool {
        self.chunks
            .lock()
            .expect("inventory lock")
            .contains(&(db.to_string(), chunk))
    }

    /// Register a chunk.
    pub fn add(&self, db: impl Into<String>, chunk: u32) {
        self.chunks
            .lock()
            .expect("inventory lock")
            .insert((db.into(), chunk));
    }

    /// Deregister a chunk; returns whether it was present.
    pub fn remove(&self, db: &str, chunk: u32) -> bool {
        self.chunks
            .lock()
            .expect("inventory lock")
            .remove(&(db.to_string(), chunk))
    }

    /// Replace the whole inventory (RELOAD_CHUNK_LIST).
    pub fn replace(&self, chunks: impl IntoIterator<Item = (String, u32)>) {
        *self.chunks.lock().expect("inventory lock") = chunks.into_iter().collect();
    }

    /// Sorted snapshot for diagnostics.
    pub fn snapshot(&self) -> Vec<(String, u32)> {
        let mut v: Vec<_> = self
            .chunks
            .lock()
            .expect("inventory lock")
            .iter()
            .cloned()
            .collect();
        v.sort();
        v
    }
}
