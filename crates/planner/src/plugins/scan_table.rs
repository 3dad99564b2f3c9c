use crate::context::QueryContext;
use crate::plugin::QueryPlugin;
use skyq_common::Result;
use skyq_sql::{FactorOp, SelectStmt, ValueExpr, ValueFactor, ValueOp};
use std::collections::HashSet;

/// Classifies a query as a scan (touches all chunks) or point-like.
///
/// A query is a scan iff it reads columns and its WHERE carries no
/// secondary-key restrictor. Small queries never go to the scheduler's scan
/// lane: once the chunk count is known, an annotation below the configured
/// threshold is dropped again.
pub struct ScanTablePlugin;

impl QueryPlugin for ScanTablePlugin {
    fn name(&self) -> &'static str {
        "ScanTable"
    }

    fn apply_logical(&self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        ctx.scan_tables = find_scan_tables(stmt, ctx);
        Ok(())
    }

    fn apply_final(&self, ctx: &mut QueryContext) -> Result<()> {
        if ctx.chunk_count < ctx.scan_threshold && !ctx.scan_tables.is_empty() {
            tracing::info!(
                chunks = ctx.chunk_count,
                threshold = ctx.scan_threshold,
                "squashing scan tables: chunk count below threshold"
            );
            ctx.scan_tables.clear();
        }
        Ok(())
    }
}

fn find_scan_tables(stmt: &SelectStmt, ctx: &QueryContext) -> Vec<(String, String)> {
    if !reads_columns(stmt) || ctx.has_secondary_key_restrictor() {
        return Vec::new();
    }
    // Partitioned FROM tables, deduplicated, FROM order preserved.
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for t in stmt.from.all_refs() {
        if !ctx.catalog.is_chunked(&t.db, &t.table) {
            continue;
        }
        let entry = (t.db.clone(), t.table.clone());
        if seen.insert(entry.clone()) {
            out.push(entry);
        }
    }
    out
}

/// A pure `COUNT(*)` projection does not read column data.
fn reads_columns(stmt: &SelectStmt) -> bool {
    !(stmt.select.exprs.len() == 1 && is_count_star(&stmt.select.exprs[0]))
}

fn is_count_star(expr: &ValueExpr) -> bool {
    if let [FactorOp {
        factor:
            ValueFactor::Agg {
                op: skyq_sql::AggOp::Count,
                expr: inner,
                ..
            },
        op: ValueOp::None,
    }] = expr.factor_ops.as_slice()
    {
        return inner.is_star();
    }
    false
}
