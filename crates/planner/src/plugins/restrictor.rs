use crate::context::QueryContext;
use crate::plugin::QueryPlugin;
use skyq_common::Result;
use skyq_sql::{
    BoolFactorTerm, BoolTerm, QsRestrictor, SelectStmt, ValueExpr, ValueFactor, ValueOp,
};

/// Names whose case is preserved; every other restrictor name is lowercased.
const CASE_PRESERVED: [&str; 2] = ["sIndex", "qserv_objectId"];

/// Moves restrictor function calls out of the WHERE tree into
/// `WhereClause.restrictors`, leaving the residual condition behind.
pub struct RestrictorPlugin;

impl QueryPlugin for RestrictorPlugin {
    fn name(&self) -> &'static str {
        "Restrictor"
    }

    fn apply_logical(&self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        let Some(wc) = &mut stmt.where_clause else {
            return Ok(());
        };
        let Some(root) = wc.root.take() else {
            return Ok(());
        };

        let mut extracted = Vec::new();
        let residual = extract(root, &mut extracted);
        wc.root = residual;
        if !extracted.is_empty() {
            tracing::debug!(count = extracted.len(), "extracted restrictors");
        }
        wc.restrictors.extend(extracted.iter().cloned());
        ctx.restrictors.extend(extracted);
        Ok(())
    }
}

fn extract(root: BoolTerm, out: &mut Vec<QsRestrictor>) -> Option<BoolTerm> {
    match root {
        BoolTerm::And(mut and) => {
            let mut kept = Vec::with_capacity(and.terms.len());
            for term in and.terms.drain(..) {
                match as_restrictor(&term) {
                    Some(r) => out.push(r),
                    None => kept.push(term),
                }
            }
            match kept.len() {
                0 => None,
                1 => Some(kept.pop().expect("single residual term")),
                _ => Some(BoolTerm::And(skyq_sql::AndTerm::new(kept))),
            }
        }
        other => match as_restrictor(&other) {
            Some(r) => {
                out.push(r);
                None
            }
            None => Some(other),
        },
    }
}

fn as_restrictor(term: &BoolTerm) -> Option<QsRestrictor> {
    let BoolTerm::Factor(f) = term else {
        return None;
    };
    if f.has_not {
        return None;
    }
    let [BoolFactorTerm::Value(v)] = f.terms.as_slice() else {
        return None;
    };
    let (name, args) = as_function(v)?;
    let normalized = normalize(name)?;
    Some(QsRestrictor {
        name: normalized,
        args: args.iter().map(ValueExpr::to_sql).collect(),
    })
}

fn as_function(v: &ValueExpr) -> Option<(&str, &[ValueExpr])> {
    match v.factor_ops.as_slice() {
        [fo] if fo.op == ValueOp::None => match &fo.factor {
            ValueFactor::Function { name, args } => Some((name.as_str(), args.as_slice())),
            _ => None,
        },
        _ => None,
    }
}

fn normalize(name: &str) -> Option<String> {
    for preserved in CASE_PRESERVED {
        if name.eq_ignore_ascii_case(preserved) {
            return Some(preserved.to_string());
        }
    }
    let lower = name.to_ascii_lowercase();
    lower.starts_with("qserv_").then_some(lower)
}
