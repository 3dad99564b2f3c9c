use async_trait::async_trait;
use bytes::Bytes;
use skyq_common::{ChunkId, QueryId, Result, SkyqError};
use std::collections::HashSet;
use tokio::sync::Mutex;

/// Seam to the local result database.
///
/// The embedded SQL engine that actually holds the per-query temporary
/// tables is an external collaborator; the merger only drives this
/// interface.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Bulk-insert one fragment of rows into the staging region of
    /// `(query, chunk, attempt)`. Returns the number of rows ingested.
    async fn stage_rows(
        &self,
        query: QueryId,
        chunk: ChunkId,
        attempt: u32,
        payload: Bytes,
    ) -> Result<u64>;

    /// Promote a finished attempt's staged rows into the query result table.
    async fn commit_attempt(&self, query: QueryId, chunk: ChunkId, attempt: u32) -> Result<()>;

    /// Drop a failed attempt's staged rows.
    async fn discard_attempt(&self, query: QueryId, chunk: ChunkId, attempt: u32) -> Result<()>;

    /// Run the merge statement (when present) and the proxy ORDER BY/LIMIT
    /// tail over the result table, producing the final answer table.
    async fn run_merge(
        &self,
        query: QueryId,
        merge_sql: Option<&str>,
        proxy_order_by: Option<&str>,
    ) -> Result<()>;
}

#[derive(Default)]
struct MergerState {
    committed: HashSet<ChunkId>,
    rows: u64,
    failed: bool,
}

/// Per-query aggregator of streamed chunk results.
///
/// Rows of each attempt stay in a staging region until the attempt finishes
/// successfully, so a retried chunk contributes rows at most once.
pub struct ResultMerger {
    query: QueryId,
    expected_chunks: usize,
    merge_sql: Option<String>,
    proxy_order_by: Option<String>,
    store: std::sync::Arc<dyn ResultStore>,
    state: Mutex<MergerState>,
}

impl ResultMerger {
    /// Merger for one query over `expected_chunks` chunks.
    pub fn new(
        query: QueryId,
        expected_chunks: usize,
        merge_sql: Option<String>,
        proxy_order_by: Option<String>,
        store: std::sync::Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            query,
            expected_chunks,
            merge_sql,
            proxy_order_by,
            store,
            state: Mutex::new(MergerState::default()),
        }
    }

    /// Ingest one fragment of an attempt's stream.
    ///
    /// May block the caller while the store ingests; that is the
    /// back-pressure path slowing worker reads.
    pub async fn ingest(
        &self,
        chunk: ChunkId,
        attempt: u32,
        payload: Bytes,
    ) -> Result<u64> {
        let rows = self
            .store
            .stage_rows(self.query, chunk, attempt, payload)
            .await?;
        let mut state = self.state.lock().await;
        state.rows += rows;
        Ok(rows)
    }

    /// A chunk attempt completed cleanly; promote its rows.
    pub async fn chunk_succeeded(&self, chunk: ChunkId, attempt: u32) -> Result<()> {
        self.store.commit_attempt(self.query, chunk, attempt).await?;
        let mut state = self.state.lock().await;
        state.committed.insert(chunk);
        tracing::debug!(
            query_id = %self.query,
            chunk = %chunk,
            attempt,
            committed = state.committed.len(),
            expected = self.expected_chunks,
            "chunk result committed"
        );
        Ok(())
    }

    /// A chunk attempt failed; its staged rows are discarded and never
    /// reach the result table.
    pub async fn chunk_failed(&self, chunk: ChunkId, attempt: u32) -> Result<()> {
        self.store.discard_attempt(self.query, chunk, attempt).await
    }

    /// Record a terminal stream error.
    pub async fn error_flush(&self, chunk: ChunkId, code: i32, msg: &str) {
        let mut state = self.state.lock().await;
        state.failed = true;
        tracing::warn!(
            query_id = %self.query,
            chunk = %chunk,
            code,
            msg,
            "result stream terminated with error"
        );
    }

    /// Whether every expected chunk committed.
    pub async fn is_complete(&self) -> bool {
        self.state.lock().await.committed.len() == self.expected_chunks
    }

    /// Total rows staged so far.
    pub async fn row_count(&self) -> u64 {
        self.state.lock().await.rows
    }

    /// Run the merge pass once every chunk committed.
    pub async fn finalize(&self) -> Result<()> {
        let state = self.state.lock().await;
        if state.committed.len() != self.expected_chunks {
            return Err(SkyqError::Internal(format!(
                "finalize with {}/{} chunks committed",
                state.committed.len(),
                self.expected_chunks
            )));
        }
        drop(state);
        self.store
            .run_merge(
                self.query,
                self.merge_sql.as_deref(),
                self.proxy_order_by.as_deref(),
            )
            .await
    }
}
