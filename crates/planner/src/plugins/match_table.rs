use crate::context::QueryContext;
use crate::plugin::QueryPlugin;
use skyq_common::Result;
use skyq_sql::{
    AndTerm, BoolFactor, BoolTerm, ColumnRef, CompOp, OrTerm, Predicate, SelectStmt, ValueExpr,
    ValueFactor, WhereClause,
};

/// Removes duplicate rows introduced by the match-table partitioner.
///
/// The partitioner assigns a match row to the sub-chunks of both matched
/// entities and records which copy is canonical in a 2-bit flags field, so a
/// single-table match query must filter `(dirCol1 IS NULL OR flagCol <> 2)`.
/// Joins are excluded here; the general table analysis covers them.
pub struct MatchTablePlugin;

impl QueryPlugin for MatchTablePlugin {
    fn name(&self) -> &'static str {
        "MatchTable"
    }

    fn apply_logical(&self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        if stmt.from.is_join() {
            return Ok(());
        }
        let Some(t) = stmt.from.refs.first() else {
            return Ok(());
        };
        if !ctx.catalog.is_match_table(&t.db, &t.table) {
            return Ok(());
        }
        let params = ctx.catalog.match_table_params(&t.db, &t.table)?.clone();

        let null_pred = BoolTerm::Factor(BoolFactor::predicate(Predicate::Null {
            value: ValueExpr::column(ColumnRef::column(params.dir_col1)),
            has_not: false,
        }));
        let flag_pred = BoolTerm::Factor(BoolFactor::predicate(Predicate::Comp {
            left: ValueExpr::column(ColumnRef::column(params.flag_col)),
            op: CompOp::NotEq,
            right: ValueExpr::simple(ValueFactor::constant(2)),
        }));
        // Parenthesized so the OR binds tighter than the surrounding AND.
        let filter = AndTerm::new(vec![BoolTerm::Factor(BoolFactor::wrap(BoolTerm::Or(
            OrTerm::new(vec![null_pred, flag_pred]),
        )))]);

        match &mut stmt.where_clause {
            Some(wc) => wc.prepend_and_term(filter),
            None => {
                let mut wc = WhereClause::default();
                wc.prepend_and_term(filter);
                stmt.where_clause = Some(wc);
            }
        }
        Ok(())
    }
}
