use crate::context::QueryContext;
use crate::plugin::{QueryPlan, QueryPlugin};
use skyq_common::{Result, SkyqError};
use skyq_sql::{ColumnRef, SelectStmt};

/// Hoists ORDER BY to the proxy tail and pushes LIMIT into the parallel and
/// merge forms.
///
/// Workers stream rows in arbitrary order, so a plain ORDER BY is stripped
/// from the parallel statement and applied proxy-side after merge or
/// concatenation. With a LIMIT the parallel statement keeps ORDER BY and
/// LIMIT so each chunk returns a correct top-k; the merge statement, when
/// one exists, receives both as well.
pub struct PostPlugin;

impl QueryPlugin for PostPlugin {
    fn name(&self) -> &'static str {
        "Post"
    }

    fn apply_logical(&self, stmt: &mut SelectStmt, _ctx: &mut QueryContext) -> Result<()> {
        // The proxy tail of an aggregate query runs against the merge
        // output, so every ORDER BY column must survive the merge
        // projection. Non-aggregate queries stream raw projections and are
        // exempt.
        if stmt.order_by.is_empty() || !stmt.has_aggregate() {
            return Ok(());
        }
        let mut available: Vec<ColumnRef> = Vec::new();
        for expr in &stmt.select.exprs {
            if expr.is_star() {
                return Ok(());
            }
            if let Some(alias) = &expr.alias {
                available.push(ColumnRef::column(alias.clone()));
            }
            if let Some(c) = expr.as_column_ref() {
                available.push(c.clone());
            }
        }
        for term in &stmt.order_by {
            for required in term.expr.column_refs() {
                if !available.iter().any(|a| required.is_satisfied_by(a)) {
                    return Err(SkyqError::Analysis(format!(
                        "ORDER BY column not in SELECT: {required}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply_physical(&self, plan: &mut QueryPlan, _ctx: &mut QueryContext) -> Result<()> {
        if !plan.parallel.order_by.is_empty() {
            plan.proxy_order_by = Some(plan.parallel.render_order_by());
        }
        match plan.parallel.limit {
            None => plan.parallel.order_by.clear(),
            Some(k) => {
                if let Some(merge) = &mut plan.merge {
                    merge.order_by = plan.parallel.order_by.clone();
                    merge.limit = Some(k);
                }
            }
        }
        Ok(())
    }
}
