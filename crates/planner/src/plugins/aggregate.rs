use crate::context::QueryContext;
use crate::plugin::{QueryPlan, QueryPlugin};
use skyq_common::{Result, SkyqError};
use skyq_sql::{
    AggOp, ColumnRef, FactorOp, FromList, SelectList, SelectStmt, ValueExpr, ValueFactor, ValueOp,
};

/// Splits aggregates into a per-chunk parallel form and a cross-chunk merge
/// form.
///
/// | user            | parallel                            | merge                          |
/// |-----------------|-------------------------------------|--------------------------------|
/// | `COUNT(x)`      | `COUNT(x) AS QSn_COUNT`             | `SUM(QSn_COUNT)`               |
/// | `SUM(x)`        | `SUM(x) AS QSn_SUM`                 | `SUM(QSn_SUM)`                 |
/// | `MIN(x)`        | `MIN(x) AS QSn_MIN`                 | `MIN(QSn_MIN)`                 |
/// | `MAX(x)`        | `MAX(x) AS QSn_MAX`                 | `MAX(QSn_MAX)`                 |
/// | `AVG(x)`        | `COUNT(x) AS QSn_COUNT, SUM(x) AS QSm_SUM` | `SUM(QSm_SUM)/SUM(QSn_COUNT)` |
///
/// Without aggregates no merge statement is produced and the merge pass is
/// skipped entirely.
pub struct AggregatePlugin;

impl QueryPlugin for AggregatePlugin {
    fn name(&self) -> &'static str {
        "Aggregate"
    }

    fn apply_physical(&self, plan: &mut QueryPlan, _ctx: &mut QueryContext) -> Result<()> {
        if !plan.parallel.has_aggregate() {
            return Ok(());
        }

        let mut counter = AliasCounter::default();
        let mut par_exprs = Vec::new();
        let mut merge_exprs = Vec::new();
        for expr in &plan.parallel.select.exprs {
            if !expr.has_aggregate() {
                par_exprs.push(expr.clone());
                merge_exprs.push(expr.clone());
                continue;
            }
            let (op, distinct, inner) = plain_aggregate(expr)?;
            match op {
                AggOp::Count => {
                    let alias = counter.next("COUNT");
                    par_exprs.push(agg(AggOp::Count, distinct, inner.clone()).with_alias(&alias));
                    merge_exprs.push(carry_alias(sum_of(&alias), expr));
                }
                AggOp::Sum => {
                    let alias = counter.next("SUM");
                    par_exprs.push(agg(AggOp::Sum, distinct, inner.clone()).with_alias(&alias));
                    merge_exprs.push(carry_alias(sum_of(&alias), expr));
                }
                AggOp::Min => {
                    let alias = counter.next("MIN");
                    par_exprs.push(agg(AggOp::Min, distinct, inner.clone()).with_alias(&alias));
                    merge_exprs.push(carry_alias(
                        agg(AggOp::Min, false, ValueExpr::column(ColumnRef::column(&alias))),
                        expr,
                    ));
                }
                AggOp::Max => {
                    let alias = counter.next("MAX");
                    par_exprs.push(agg(AggOp::Max, distinct, inner.clone()).with_alias(&alias));
                    merge_exprs.push(carry_alias(
                        agg(AggOp::Max, false, ValueExpr::column(ColumnRef::column(&alias))),
                        expr,
                    ));
                }
                AggOp::Avg => {
                    let count_alias = counter.next("COUNT");
                    let sum_alias = counter.next("SUM");
                    par_exprs
                        .push(agg(AggOp::Count, distinct, inner.clone()).with_alias(&count_alias));
                    par_exprs.push(agg(AggOp::Sum, distinct, inner.clone()).with_alias(&sum_alias));
                    let ratio = ValueExpr {
                        alias: None,
                        factor_ops: vec![
                            FactorOp {
                                factor: single_factor(sum_of(&sum_alias)),
                                op: ValueOp::Divide,
                            },
                            FactorOp {
                                factor: single_factor(sum_of(&count_alias)),
                                op: ValueOp::None,
                            },
                        ],
                    };
                    merge_exprs.push(carry_alias(
                        ValueExpr::simple(ValueFactor::Expr(Box::new(ratio))),
                        expr,
                    ));
                }
            }
        }

        let mut merge = SelectStmt::new(SelectList { exprs: merge_exprs }, FromList::default());
        merge.group_by = plan.parallel.group_by.clone();
        merge.having = plan.parallel.having.take();

        plan.parallel.select.exprs = par_exprs;
        plan.merge = Some(merge);
        Ok(())
    }
}

#[derive(Default)]
struct AliasCounter {
    next_id: u32,
}

impl AliasCounter {
    fn next(&mut self, suffix: &str) -> String {
        self.next_id += 1;
        format!("QS{}_{suffix}", self.next_id)
    }
}

fn plain_aggregate(expr: &ValueExpr) -> Result<(AggOp, bool, ValueExpr)> {
    if let [FactorOp {
        factor: ValueFactor::Agg { op, distinct, expr },
        op: ValueOp::None,
    }] = expr.factor_ops.as_slice()
    {
        return Ok((*op, *distinct, expr.as_ref().clone()));
    }
    Err(SkyqError::Unsupported(format!(
        "aggregate embedded in a larger expression: {}",
        expr.to_sql()
    )))
}

fn agg(op: AggOp, distinct: bool, inner: ValueExpr) -> ValueExpr {
    ValueExpr::simple(ValueFactor::Agg {
        op,
        distinct,
        expr: Box::new(inner),
    })
}

fn sum_of(alias: &str) -> ValueExpr {
    agg(AggOp::Sum, false, ValueExpr::column(ColumnRef::column(alias)))
}

fn single_factor(expr: ValueExpr) -> ValueFactor {
    match expr.factor_ops.into_iter().next() {
        Some(fo) => fo.factor,
        None => ValueFactor::Const(String::new()),
    }
}

fn carry_alias(mut merge_expr: ValueExpr, user_expr: &ValueExpr) -> ValueExpr {
    merge_expr.alias = user_expr.alias.clone();
    merge_expr
}
