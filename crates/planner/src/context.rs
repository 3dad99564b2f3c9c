use skyq_catalog::Catalog;
use skyq_common::ChunkId;
use skyq_sql::{ColumnRef, QsRestrictor};
use std::collections::HashMap;
use std::sync::Arc;

/// Seam to the spatial partitioning library: maps restrictors to chunk sets.
///
/// The geometry math itself is an external collaborator; the planner only
/// consumes the resulting chunk numbers.
pub trait ChunkResolver: Send + Sync {
    /// Chunks selected by one restrictor, or `None` when the restrictor
    /// does not narrow the chunk set.
    fn resolve(&self, restrictor: &QsRestrictor) -> Option<Vec<ChunkId>>;

    /// Every chunk of a database family.
    fn all_chunks(&self, family: &str) -> Vec<ChunkId>;

    /// Sub-chunks of one chunk, used by match-table self-join expansion.
    fn sub_chunks(&self, family: &str, chunk: ChunkId) -> Vec<u32>;
}

/// Per-query mutable bag passed to every analysis plugin.
#[derive(Clone)]
pub struct QueryContext {
    /// Database assumed for unqualified table names.
    pub default_db: String,
    /// Catalog metadata accessor.
    pub catalog: Arc<Catalog>,
    /// Number of chunks the query will touch; filled during plan build.
    pub chunk_count: usize,
    /// `(db, table)` pairs classified as scan tables.
    pub scan_tables: Vec<(String, String)>,
    /// Restrictors extracted out of the WHERE clause.
    pub restrictors: Vec<QsRestrictor>,
    /// Resolution cache: rendered original ref -> fully qualified ref.
    pub resolved_columns: HashMap<String, ColumnRef>,
    /// Chunk-count threshold below which the scan annotation is dropped.
    pub scan_threshold: usize,
}

impl QueryContext {
    /// Fresh context for one user query.
    pub fn new(default_db: impl Into<String>, catalog: Arc<Catalog>) -> Self {
        Self {
            default_db: default_db.into(),
            catalog,
            chunk_count: 0,
            scan_tables: Vec::new(),
            restrictors: Vec::new(),
            resolved_columns: HashMap::new(),
            scan_threshold: 2,
        }
    }

    /// Whether any extracted restrictor keys on the secondary index.
    pub fn has_secondary_key_restrictor(&self) -> bool {
        self.restrictors
            .iter()
            .any(|r| r.name == "qserv_objectId" || r.name == "sIndex")
    }
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("default_db", &self.default_db)
            .field("chunk_count", &self.chunk_count)
            .field("scan_tables", &self.scan_tables)
            .field("restrictors", &self.restrictors)
            .field("resolved_columns", &self.resolved_columns.len())
            .finish()
    }
}
