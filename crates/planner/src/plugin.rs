use crate::context::QueryContext;
use skyq_common::Result;
use skyq_sql::SelectStmt;

/// The plugin-produced execution plan of one user query.
///
/// `parallel` is the per-chunk template (table names substituted per chunk
/// at render time); `merge` runs once over the collected worker outputs;
/// `proxy_order_by` is applied last, after merge or after streaming
/// concatenation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Per-chunk sub-query template.
    pub parallel: SelectStmt,
    /// Cross-chunk merge statement; absent when no aggregate needs merging.
    pub merge: Option<SelectStmt>,
    /// Final `ORDER BY ...` tail applied proxy-side.
    pub proxy_order_by: Option<String>,
}

impl QueryPlan {
    /// Plan whose parallel form is the analyzed statement itself.
    pub fn new(parallel: SelectStmt) -> Self {
        Self {
            parallel,
            merge: None,
            proxy_order_by: None,
        }
    }
}

/// One query-rewrite plugin of the analysis chain.
///
/// Plugins are registered once at startup and must be stateless: any
/// per-query scratch lives in [`QueryContext`] or on the local stack.
pub trait QueryPlugin: Send + Sync {
    /// Plugin name for diagnostics.
    fn name(&self) -> &'static str;

    /// Mutate the single statement before plan construction.
    fn apply_logical(&self, _stmt: &mut SelectStmt, _ctx: &mut QueryContext) -> Result<()> {
        Ok(())
    }

    /// Mutate the parallel + merge statements after the plan split.
    fn apply_physical(&self, _plan: &mut QueryPlan, _ctx: &mut QueryContext) -> Result<()> {
        Ok(())
    }

    /// Post-pass over the context once the chunk set is known.
    fn apply_final(&self, _ctx: &mut QueryContext) -> Result<()> {
        Ok(())
    }
}

/// Fixed ordered plugin chain.
///
/// Qualification runs first so catalog metadata is resolved before the
/// match-table and scan plugins consult it.
pub struct PluginChain {
    plugins: Vec<Box<dyn QueryPlugin>>,
}

impl PluginChain {
    /// The standard chain, in dependency order.
    pub fn standard() -> Self {
        Self {
            plugins: vec![
                Box::new(crate::plugins::QualifyPlugin),
                Box::new(crate::plugins::RestrictorPlugin),
                Box::new(crate::plugins::MatchTablePlugin),
                Box::new(crate::plugins::AggregatePlugin),
                Box::new(crate::plugins::ScanTablePlugin),
                Box::new(crate::plugins::PostPlugin),
            ],
        }
    }

    /// Run every `apply_logical` hook in order; the first error aborts.
    pub fn apply_logical(&self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        for p in &self.plugins {
            p.apply_logical(stmt, ctx).map_err(|e| {
                tracing::debug!(plugin = p.name(), error = %e, "applyLogical failed");
                e
            })?;
        }
        Ok(())
    }

    /// Run every `apply_physical` hook in order.
    pub fn apply_physical(&self, plan: &mut QueryPlan, ctx: &mut QueryContext) -> Result<()> {
        for p in &self.plugins {
            p.apply_physical(plan, ctx)?;
        }
        Ok(())
    }

    /// Run every `apply_final` hook in order.
    pub fn apply_final(&self, ctx: &mut QueryContext) -> Result<()> {
        for p in &self.plugins {
            p.apply_final(ctx)?;
        }
        Ok(())
    }
}
