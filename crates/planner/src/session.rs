use crate::context::{ChunkResolver, QueryContext};
use crate::plugin::{PluginChain, QueryPlan};
use skyq_catalog::Catalog;
use skyq_common::{ChunkId, Result, TuningConfig};
use skyq_sql::{parse_select, SelectStmt};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Chunk id used for queries that touch no partitioned table; such queries
/// dispatch exactly one sub-query.
pub const DUMMY_CHUNK: u32 = 1_234_567_890;

/// One per-chunk unit of dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkQuerySpec {
    /// Database the chunk belongs to.
    pub db: String,
    /// Target chunk.
    pub chunk: ChunkId,
    /// SQL fragments the worker executes and concatenates, in order.
    pub fragments: Vec<String>,
    /// Sub-chunk ids driving the fragment expansion; empty when unused.
    pub sub_chunks: Vec<u32>,
}

/// Owns one user query for its lifetime: the analyzed statement, the
/// plugin-produced plan, and the target chunk set.
#[derive(Debug)]
pub struct QuerySession {
    stmt: SelectStmt,
    ctx: QueryContext,
    plan: QueryPlan,
    chunks: Vec<ChunkId>,
    dominant_db: Option<String>,
}

impl QuerySession {
    /// Parse and analyze one statement, producing the execution plan and
    /// the chunk set.
    pub fn analyze(
        sql: &str,
        default_db: &str,
        catalog: Arc<Catalog>,
        resolver: &dyn ChunkResolver,
        tuning: &TuningConfig,
    ) -> Result<Self> {
        let mut stmt = parse_select(sql)?;
        let mut ctx = QueryContext::new(default_db, Arc::clone(&catalog));
        ctx.scan_threshold = tuning.scan_threshold;

        let chain = PluginChain::standard();
        chain.apply_logical(&mut stmt, &mut ctx)?;

        let dominant_db = stmt
            .from
            .all_refs()
            .iter()
            .find(|t| catalog.is_chunked(&t.db, &t.table))
            .map(|t| t.db.clone());
        let chunks = match &dominant_db {
            None => vec![ChunkId(DUMMY_CHUNK)],
            Some(db) => {
                let family = catalog.family_of(db)?.name.clone();
                target_chunks(&ctx, resolver, &family)
            }
        };
        ctx.chunk_count = chunks.len();

        let mut plan = QueryPlan::new(stmt.clone());
        chain.apply_physical(&mut plan, &mut ctx)?;
        chain.apply_final(&mut ctx)?;

        tracing::debug!(
            chunks = chunks.len(),
            scan = !ctx.scan_tables.is_empty(),
            merge = plan.merge.is_some(),
            "query analyzed"
        );
        Ok(Self {
            stmt,
            ctx,
            plan,
            chunks,
            dominant_db,
        })
    }

    /// The analyzed logical statement.
    pub fn stmt(&self) -> &SelectStmt {
        &self.stmt
    }

    /// The query context after the full plugin chain.
    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    /// The plugin-produced plan.
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Target chunks, ascending.
    pub fn chunks(&self) -> &[ChunkId] {
        &self.chunks
    }

    /// Database owning the substituted chunk tables, when any.
    pub fn dominant_db(&self) -> Option<&str> {
        self.dominant_db.as_deref()
    }

    /// Merge statement SQL, when a merge pass is required.
    pub fn merge_sql(&self) -> Option<String> {
        self.plan.merge.as_ref().map(SelectStmt::to_sql)
    }

    /// Proxy-side ORDER BY tail.
    pub fn proxy_order_by(&self) -> Option<&str> {
        self.plan.proxy_order_by.as_deref()
    }

    /// Render the per-chunk specs for dispatch.
    ///
    /// Match-table self-joins expand over the chunk's sub-chunks: one
    /// fragment per sub-chunk, concatenated by the worker.
    pub fn chunk_specs(&self, resolver: &dyn ChunkResolver) -> Vec<ChunkQuerySpec> {
        let db = self
            .dominant_db
            .clone()
            .unwrap_or_else(|| self.ctx.default_db.clone());
        let needs_sub_chunks = self.needs_sub_chunks();
        self.chunks
            .iter()
            .map(|&chunk| {
                let sub_chunks = if needs_sub_chunks {
                    match &self.dominant_db {
                        Some(d) => match self.ctx.catalog.family_of(d) {
                            Ok(f) => resolver.sub_chunks(&f.name, chunk),
                            Err(_) => Vec::new(),
                        },
                        None => Vec::new(),
                    }
                } else {
                    Vec::new()
                };
                let fragments = if sub_chunks.is_empty() {
                    vec![self.render_for_chunk(chunk, None)]
                } else {
                    sub_chunks
                        .iter()
                        .map(|&s| self.render_for_chunk(chunk, Some(s)))
                        .collect()
                };
                ChunkQuerySpec {
                    db: db.clone(),
                    chunk,
                    fragments,
                    sub_chunks,
                }
            })
            .collect()
    }

    fn needs_sub_chunks(&self) -> bool {
        let refs = self.stmt.from.all_refs();
        refs.iter().enumerate().any(|(i, a)| {
            refs.iter().skip(i + 1).any(|b| {
                a.db == b.db
                    && a.table == b.table
                    && self.ctx.catalog.is_sub_chunked(&a.db, &a.table)
            })
        })
    }

    fn render_for_chunk(&self, chunk: ChunkId, sub_chunk: Option<u32>) -> String {
        let mut stmt = self.plan.parallel.clone();
        let catalog = Arc::clone(&self.ctx.catalog);
        stmt.from.for_each_ref_mut(&mut |t| {
            if !catalog.is_chunked(&t.db, &t.table) {
                return;
            }
            t.table = match sub_chunk {
                Some(s) if catalog.is_sub_chunked(&t.db, &t.table) => {
                    format!("{}_{}_{}", t.table, chunk, s)
                }
                _ => format!("{}_{}", t.table, chunk),
            };
        });
        stmt.to_sql()
    }
}

fn target_chunks(ctx: &QueryContext, resolver: &dyn ChunkResolver, family: &str) -> Vec<ChunkId> {
    let mut narrowed: Option<BTreeSet<ChunkId>> = None;
    for r in &ctx.restrictors {
        if let Some(set) = resolver.resolve(r) {
            let set: BTreeSet<ChunkId> = set.into_iter().collect();
            narrowed = Some(match narrowed {
                None => set,
                Some(prev) => prev.intersection(&set).copied().collect(),
            });
        }
    }
    match narrowed {
        Some(set) => set.into_iter().collect(),
        None => {
            let mut all = resolver.all_chunks(family);
            all.sort_unstable();
            all.dedup();
            all
        }
    }
}
