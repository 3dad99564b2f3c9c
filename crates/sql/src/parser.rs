//! Front-end translating the external SQL grammar into the skyq AST.
//!
//! Contract:
//! - exactly one statement, and it must be a plain `SELECT`;
//! - constructs outside the supported subset fail with a typed
//!   `Unsupported` error naming the offending production;
//! - grammar failures carry the tokenizer/parser location text.

use skyq_common::{Result, SkyqError};
use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, DuplicateTreatment, Expr as SqlExpr, FunctionArg,
    FunctionArgExpr, FunctionArguments, GroupByExpr, Join, JoinConstraint, JoinOperator,
    ObjectName, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins,
    UnaryOperator, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::bool_term::{AndTerm, BoolFactor, BoolFactorTerm, BoolTerm, OrTerm, XorTerm};
use crate::column_ref::ColumnRef;
use crate::predicate::{CompOp, Predicate};
use crate::select_stmt::{
    FromList, JoinRef, JoinType, OrderByTerm, OrderDir, SelectList, SelectStmt, TableRef,
    WhereClause,
};
use crate::value_expr::{AggOp, FactorOp, ValueExpr, ValueFactor, ValueOp};

/// Parse a single SELECT statement into a [`SelectStmt`].
pub fn parse_select(sql: &str) -> Result<SelectStmt> {
    let dialect = GenericDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| parse_error(&e.to_string()))?;
    if stmts.len() != 1 {
        return Err(SkyqError::Unsupported(
            "multi-statement input".to_string(),
        ));
    }
    let stmt = stmts.into_iter().next().expect("one statement");
    let q = match &stmt {
        Statement::Query(q) => q,
        other => {
            return Err(SkyqError::Unsupported(format!(
                "non-SELECT statement: {}",
                statement_kind(&format!("{other:?}"))
            )))
        }
    };
    if q.with.is_some() {
        return Err(SkyqError::Unsupported("WITH/common table expression".to_string()));
    }
    if q.offset.is_some() || q.fetch.is_some() || !q.limit_by.is_empty() {
        return Err(SkyqError::Unsupported("OFFSET/FETCH/LIMIT BY".to_string()));
    }
    let select = match q.body.as_ref() {
        SetExpr::Select(s) => s.as_ref(),
        _ => {
            return Err(SkyqError::Unsupported(
                "set operation or VALUES body".to_string(),
            ))
        }
    };
    let mut out = select_to_stmt(select)?;

    if let Some(order_by) = &q.order_by {
        out.order_by = order_by
            .exprs
            .iter()
            .map(|ob| {
                Ok(OrderByTerm {
                    expr: value_expr(&ob.expr)?,
                    dir: ob.asc.map(|a| if a { OrderDir::Asc } else { OrderDir::Desc }),
                })
            })
            .collect::<Result<Vec<_>>>()?;
    }
    if let Some(limit) = &q.limit {
        out.limit = Some(limit_value(limit)?);
    }
    Ok(out)
}

fn parse_error(full: &str) -> SkyqError {
    // The grammar reports positions as "... at Line: N, Column: M"; keep the
    // position as the location field and the rest as the message.
    match full.split_once(" at Line:") {
        Some((msg, loc)) => SkyqError::Parse {
            message: msg.trim().to_string(),
            location: format!("Line:{}", loc.trim_end()),
        },
        None => SkyqError::Parse {
            message: full.to_string(),
            location: "statement".to_string(),
        },
    }
}

fn statement_kind(debug: &str) -> &str {
    debug.split(&['(', ' ', '{'][..]).next().unwrap_or(debug)
}

fn select_to_stmt(select: &Select) -> Result<SelectStmt> {
    if select.distinct.is_some() {
        return Err(SkyqError::Unsupported("SELECT DISTINCT".to_string()));
    }
    if select.from.is_empty() {
        return Err(SkyqError::Parse {
            message: "FROM clause is required".to_string(),
            location: "FROM".to_string(),
        });
    }

    let mut exprs = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        exprs.push(select_item(item)?);
    }

    let mut refs = Vec::with_capacity(select.from.len());
    for twj in &select.from {
        refs.push(table_with_joins(twj)?);
    }

    let mut stmt = SelectStmt::new(SelectList { exprs }, FromList { refs });

    if let Some(selection) = &select.selection {
        stmt.where_clause = Some(WhereClause {
            root: Some(bool_term(selection)?),
            restrictors: Vec::new(),
        });
    }
    stmt.group_by = group_by_exprs(&select.group_by)?;
    if let Some(having) = &select.having {
        stmt.having = Some(bool_term(having)?);
    }
    Ok(stmt)
}

fn select_item(item: &SelectItem) -> Result<ValueExpr> {
    match item {
        SelectItem::UnnamedExpr(e) => value_expr(e),
        SelectItem::ExprWithAlias { expr, alias } => {
            Ok(value_expr(expr)?.with_alias(alias.value.clone()))
        }
        SelectItem::Wildcard(_) => Ok(ValueExpr::simple(ValueFactor::Star { table: None })),
        SelectItem::QualifiedWildcard(name, _) => Ok(ValueExpr::simple(ValueFactor::Star {
            table: Some(object_name_string(name)),
        })),
    }
}

fn table_with_joins(twj: &TableWithJoins) -> Result<TableRef> {
    let mut root = table_factor(&twj.relation)?;
    for join in &twj.joins {
        root.joins.push(join_ref(join)?);
    }
    Ok(root)
}

fn table_factor(tf: &TableFactor) -> Result<TableRef> {
    match tf {
        TableFactor::Table { name, alias, .. } => {
            let parts: Vec<String> = name.0.iter().map(|i| i.value.clone()).collect();
            let (db, table) = match parts.as_slice() {
                [t] => (String::new(), t.clone()),
                [d, t] => (d.clone(), t.clone()),
                _ => {
                    return Err(SkyqError::Unsupported(format!(
                        "table name with {} qualifiers",
                        parts.len()
                    )))
                }
            };
            let mut t = TableRef::new(db, table);
            if let Some(a) = alias {
                if !a.columns.is_empty() {
                    return Err(SkyqError::Unsupported("table alias column list".to_string()));
                }
                t.alias = Some(a.name.value.clone());
            }
            Ok(t)
        }
        TableFactor::Derived { .. } => Err(SkyqError::Unsupported("subquery in FROM".to_string())),
        other => Err(SkyqError::Unsupported(format!(
            "FROM construct: {}",
            statement_kind(&format!("{other:?}"))
        ))),
    }
}

fn join_ref(join: &Join) -> Result<JoinRef> {
    let (join_type, constraint) = match &join.join_operator {
        JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
        JoinOperator::LeftOuter(c) => (JoinType::Left, Some(c)),
        JoinOperator::RightOuter(c) => (JoinType::Right, Some(c)),
        JoinOperator::FullOuter(c) => (JoinType::Full, Some(c)),
        JoinOperator::CrossJoin => (JoinType::Cross, None),
        other => {
            return Err(SkyqError::Unsupported(format!(
                "join operator: {}",
                statement_kind(&format!("{other:?}"))
            )))
        }
    };
    let mut out = JoinRef {
        join_type,
        natural: false,
        right: Box::new(table_factor(&join.relation)?),
        on: None,
        using_cols: Vec::new(),
    };
    if let Some(c) = constraint {
        match c {
            JoinConstraint::On(e) => out.on = Some(bool_term(e)?),
            JoinConstraint::Using(cols) => {
                out.using_cols = cols.iter().map(|c| c.to_string()).collect()
            }
            JoinConstraint::Natural => out.natural = true,
            JoinConstraint::None => {}
        }
    }
    Ok(out)
}

fn group_by_exprs(g: &GroupByExpr) -> Result<Vec<ValueExpr>> {
    match g {
        GroupByExpr::Expressions(es, _mods) => es.iter().map(value_expr).collect(),
        GroupByExpr::All(_) => Err(SkyqError::Unsupported("GROUP BY ALL".to_string())),
    }
}

fn limit_value(e: &SqlExpr) -> Result<u64> {
    match e {
        SqlExpr::Value(Value::Number(s, _)) => s.parse::<u64>().map_err(|_| {
            SkyqError::Parse {
                message: format!("LIMIT must be a non-negative integer, got {s}"),
                location: "LIMIT".to_string(),
            }
        }),
        _ => Err(SkyqError::Unsupported("non-literal LIMIT".to_string())),
    }
}

// ---------------------------------------------------------------------------
// Boolean translation
// ---------------------------------------------------------------------------

fn bool_term(e: &SqlExpr) -> Result<BoolTerm> {
    match e {
        SqlExpr::BinaryOp { left, op, right } => match op {
            SqlBinaryOp::And => {
                let mut terms = Vec::new();
                flatten_bool(left, &SqlBinaryOp::And, &mut terms)?;
                flatten_bool(right, &SqlBinaryOp::And, &mut terms)?;
                Ok(BoolTerm::And(AndTerm::new(terms)))
            }
            SqlBinaryOp::Or => {
                let mut terms = Vec::new();
                flatten_bool(left, &SqlBinaryOp::Or, &mut terms)?;
                flatten_bool(right, &SqlBinaryOp::Or, &mut terms)?;
                Ok(BoolTerm::Or(OrTerm::new(terms)))
            }
            SqlBinaryOp::Xor => {
                let mut terms = Vec::new();
                flatten_bool(left, &SqlBinaryOp::Xor, &mut terms)?;
                flatten_bool(right, &SqlBinaryOp::Xor, &mut terms)?;
                Ok(BoolTerm::Xor(XorTerm { terms }))
            }
            _ => comp_or_value(e),
        },
        SqlExpr::Nested(inner) => Ok(BoolTerm::Factor(BoolFactor::wrap(bool_term(inner)?))),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => {
            let inner = bool_term(expr)?;
            Ok(BoolTerm::Factor(BoolFactor {
                has_not: true,
                terms: vec![BoolFactorTerm::Nested(Box::new(inner))],
            }))
        }
        SqlExpr::IsNull(inner) => Ok(predicate_factor(Predicate::Null {
            value: value_expr(inner)?,
            has_not: false,
        })),
        SqlExpr::IsNotNull(inner) => Ok(predicate_factor(Predicate::Null {
            value: value_expr(inner)?,
            has_not: true,
        })),
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => Ok(predicate_factor(Predicate::In {
            value: value_expr(expr)?,
            cands: list.iter().map(value_expr).collect::<Result<Vec<_>>>()?,
            not: *negated,
        })),
        SqlExpr::InSubquery { .. } => {
            Err(SkyqError::Unsupported("IN (subquery)".to_string()))
        }
        SqlExpr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(predicate_factor(Predicate::Between {
            value: value_expr(expr)?,
            min: value_expr(low)?,
            max: value_expr(high)?,
            not: *negated,
        })),
        SqlExpr::Like {
            negated,
            expr,
            pattern,
            ..
        } => Ok(predicate_factor(Predicate::Like {
            value: value_expr(expr)?,
            pattern: value_expr(pattern)?,
            not: *negated,
        })),
        _ => comp_or_value(e),
    }
}

fn flatten_bool(e: &SqlExpr, parent: &SqlBinaryOp, out: &mut Vec<BoolTerm>) -> Result<()> {
    // Same-operator chains become one n-ary term so plugin merges stay flat.
    if let SqlExpr::BinaryOp { left, op, right } = e {
        if op == parent {
            flatten_bool(left, parent, out)?;
            flatten_bool(right, parent, out)?;
            return Ok(());
        }
    }
    out.push(bool_term(e)?);
    Ok(())
}

fn predicate_factor(p: Predicate) -> BoolTerm {
    BoolTerm::Factor(BoolFactor::predicate(p))
}

fn comp_or_value(e: &SqlExpr) -> Result<BoolTerm> {
    if let SqlExpr::BinaryOp { left, op, right } = e {
        if let Some(cop) = comp_op(op) {
            return Ok(predicate_factor(Predicate::Comp {
                left: value_expr(left)?,
                op: cop,
                right: value_expr(right)?,
            }));
        }
    }
    // A bare value expression in boolean position, e.g. a restrictor call
    // like qserv_areaspec_box(...); the restrictor plugin extracts these.
    Ok(BoolTerm::Factor(BoolFactor {
        has_not: false,
        terms: vec![BoolFactorTerm::Value(value_expr(e)?)],
    }))
}

fn comp_op(op: &SqlBinaryOp) -> Option<CompOp> {
    match op {
        SqlBinaryOp::Eq => Some(CompOp::Eq),
        SqlBinaryOp::NotEq => Some(CompOp::NotEq),
        SqlBinaryOp::Lt => Some(CompOp::Lt),
        SqlBinaryOp::LtEq => Some(CompOp::LtEq),
        SqlBinaryOp::Gt => Some(CompOp::Gt),
        SqlBinaryOp::GtEq => Some(CompOp::GtEq),
        SqlBinaryOp::Spaceship => Some(CompOp::NullSafeEq),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Value translation
// ---------------------------------------------------------------------------

fn value_expr(e: &SqlExpr) -> Result<ValueExpr> {
    match e {
        SqlExpr::BinaryOp { left, op, right } => {
            let Some(vop) = value_op(op) else {
                return Err(SkyqError::Unsupported(format!(
                    "operator in value expression: {op:?}"
                )));
            };
            let mut l = value_expr(left)?;
            let r = value_expr(right)?;
            let last = l
                .factor_ops
                .last_mut()
                .ok_or_else(|| SkyqError::Internal("empty factor sequence".to_string()))?;
            last.op = vop;
            l.factor_ops.extend(r.factor_ops);
            Ok(l)
        }
        SqlExpr::Nested(inner) => Ok(ValueExpr::simple(ValueFactor::Expr(Box::new(
            value_expr(inner)?,
        )))),
        SqlExpr::UnaryOp { op, expr } => match op {
            UnaryOperator::Plus => value_expr(expr),
            UnaryOperator::Minus => match expr.as_ref() {
                SqlExpr::Value(Value::Number(s, _)) => {
                    Ok(ValueExpr::simple(ValueFactor::Const(format!("-{s}"))))
                }
                _ => Err(SkyqError::Unsupported(
                    "unary minus over a non-literal".to_string(),
                )),
            },
            other => Err(SkyqError::Unsupported(format!(
                "unary operator: {other:?}"
            ))),
        },
        SqlExpr::Identifier(ident) => {
            Ok(ValueExpr::column(ColumnRef::column(ident.value.clone())))
        }
        SqlExpr::CompoundIdentifier(parts) => {
            let vals: Vec<&str> = parts.iter().map(|i| i.value.as_str()).collect();
            match vals.as_slice() {
                [t, c] => Ok(ValueExpr::column(ColumnRef::new("", *t, *c))),
                [d, t, c] => Ok(ValueExpr::column(ColumnRef::new(*d, *t, *c))),
                _ => Err(SkyqError::Unsupported(format!(
                    "column reference with {} parts",
                    vals.len()
                ))),
            }
        }
        SqlExpr::Value(v) => literal_factor(v).map(ValueExpr::simple),
        SqlExpr::Function(f) => function_expr(f),
        SqlExpr::Subquery(_) => Err(SkyqError::Unsupported("scalar subquery".to_string())),
        other => Err(SkyqError::Unsupported(format!(
            "expression: {}",
            statement_kind(&format!("{other:?}"))
        ))),
    }
}

fn value_op(op: &SqlBinaryOp) -> Option<ValueOp> {
    match op {
        SqlBinaryOp::Plus => Some(ValueOp::Plus),
        SqlBinaryOp::Minus => Some(ValueOp::Minus),
        SqlBinaryOp::Multiply => Some(ValueOp::Multiply),
        SqlBinaryOp::Divide => Some(ValueOp::Divide),
        SqlBinaryOp::Modulo => Some(ValueOp::Mod),
        SqlBinaryOp::MyIntegerDivide => Some(ValueOp::Div),
        SqlBinaryOp::BitwiseAnd => Some(ValueOp::BitAnd),
        SqlBinaryOp::BitwiseOr => Some(ValueOp::BitOr),
        SqlBinaryOp::BitwiseXor => Some(ValueOp::BitXor),
        SqlBinaryOp::PGBitwiseShiftLeft => Some(ValueOp::BitShiftLeft),
        SqlBinaryOp::PGBitwiseShiftRight => Some(ValueOp::BitShiftRight),
        _ => None,
    }
}

fn literal_factor(v: &Value) -> Result<ValueFactor> {
    match v {
        Value::Number(s, _) => Ok(ValueFactor::Const(s.clone())),
        Value::SingleQuotedString(s) => Ok(ValueFactor::Const(format!("'{s}'"))),
        Value::DoubleQuotedString(s) => Ok(ValueFactor::Const(format!("\"{s}\""))),
        Value::Boolean(b) => Ok(ValueFactor::Const(
            if *b { "TRUE" } else { "FALSE" }.to_string(),
        )),
        Value::Null => Ok(ValueFactor::Const("NULL".to_string())),
        other => Err(SkyqError::Unsupported(format!("literal: {other:?}"))),
    }
}

fn function_expr(f: &sqlparser::ast::Function) -> Result<ValueExpr> {
    let name = object_name_string(&f.name);
    let distinct = match &f.args {
        FunctionArguments::List(list) => {
            matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct))
        }
        _ => false,
    };
    if let Some(op) = agg_op(&name) {
        let arg = single_function_arg(f)?;
        let inner = match arg {
            Some(FunctionArgExpr::Expr(e)) => value_expr(e)?,
            Some(FunctionArgExpr::Wildcard) => {
                ValueExpr::simple(ValueFactor::Star { table: None })
            }
            Some(FunctionArgExpr::QualifiedWildcard(name)) => {
                ValueExpr::simple(ValueFactor::Star {
                    table: Some(object_name_string(name)),
                })
            }
            None => {
                return Err(SkyqError::Parse {
                    message: format!("{name} requires exactly one argument"),
                    location: name.clone(),
                })
            }
        };
        return Ok(ValueExpr::simple(ValueFactor::Agg {
            op,
            distinct,
            expr: Box::new(inner),
        }));
    }
    if distinct {
        return Err(SkyqError::Unsupported(format!(
            "DISTINCT in non-aggregate function {name}"
        )));
    }
    let args = match &f.args {
        FunctionArguments::None => Vec::new(),
        FunctionArguments::List(list) => {
            let mut out = Vec::with_capacity(list.args.len());
            for a in &list.args {
                match a {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => out.push(value_expr(e)?),
                    other => {
                        return Err(SkyqError::Unsupported(format!(
                            "function argument form in {name}: {}",
                            statement_kind(&format!("{other:?}"))
                        )))
                    }
                }
            }
            out
        }
        FunctionArguments::Subquery(_) => {
            return Err(SkyqError::Unsupported(format!(
                "subquery argument in {name}"
            )))
        }
    };
    Ok(ValueExpr::simple(ValueFactor::Function { name, args }))
}

fn single_function_arg(f: &sqlparser::ast::Function) -> Result<Option<&FunctionArgExpr>> {
    match &f.args {
        FunctionArguments::List(list) => {
            if list.args.len() != 1 {
                return Ok(None);
            }
            match &list.args[0] {
                FunctionArg::Unnamed(fae) => Ok(Some(fae)),
                _ => Ok(None),
            }
        }
        _ => Ok(None),
    }
}

fn agg_op(name: &str) -> Option<AggOp> {
    match name.to_ascii_uppercase().as_str() {
        "COUNT" => Some(AggOp::Count),
        "SUM" => Some(AggOp::Sum),
        "AVG" => Some(AggOp::Avg),
        "MIN" => Some(AggOp::Min),
        "MAX" => Some(AggOp::Max),
        _ => None,
    }
}

fn object_name_string(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_projection() {
        let stmt = parse_select("SELECT objectId, taiMidPoint FROM Source").expect("parse");
        assert_eq!(stmt.select.exprs.len(), 2);
        assert_eq!(stmt.from.refs[0].table, "Source");
        assert!(!stmt.from.is_join());
        assert_eq!(stmt.to_sql(), "SELECT objectId,taiMidPoint FROM Source");
    }

    #[test]
    fn parses_where_order_limit() {
        let stmt =
            parse_select("SELECT ra FROM Object WHERE x > 0 ORDER BY ra ASC LIMIT 10").expect("parse");
        assert_eq!(stmt.limit, Some(10));
        assert_eq!(stmt.order_by.len(), 1);
        assert_eq!(stmt.order_by[0].dir, Some(OrderDir::Asc));
        let wc = stmt.where_clause.as_ref().expect("where");
        assert_eq!(wc.root.as_ref().expect("root").to_sql(), "x>0");
    }

    #[test]
    fn order_by_without_direction_keeps_none() {
        let stmt = parse_select("SELECT run FROM Exposure ORDER BY field").expect("parse");
        assert_eq!(stmt.order_by[0].dir, None);
        assert_eq!(stmt.render_order_by(), "ORDER BY field");
    }

    #[test]
    fn parses_aggregates_and_group_by() {
        let stmt = parse_select(
            "SELECT objectId, AVG(taiMidPoint) FROM Source GROUP BY objectId",
        )
        .expect("parse");
        assert!(stmt.has_aggregate());
        assert_eq!(stmt.group_by.len(), 1);
        assert_eq!(
            stmt.to_sql(),
            "SELECT objectId,AVG(taiMidPoint) FROM Source GROUP BY objectId"
        );
    }

    #[test]
    fn parses_count_star() {
        let stmt = parse_select("SELECT COUNT(*) FROM Object").expect("parse");
        assert_eq!(stmt.to_sql(), "SELECT COUNT(*) FROM Object");
    }

    #[test]
    fn parses_join_with_on() {
        let stmt = parse_select(
            "SELECT o.ra FROM Object AS o JOIN Source AS s ON o.objectId = s.objectId",
        )
        .expect("parse");
        assert!(stmt.from.is_join());
        assert_eq!(stmt.from.all_refs().len(), 2);
    }

    #[test]
    fn parses_restrictor_call_as_bare_value() {
        let stmt = parse_select(
            "SELECT ra FROM Object WHERE qserv_areaspec_box(0,0,1,1) AND x > 3",
        )
        .expect("parse");
        let root = stmt
            .where_clause
            .as_ref()
            .and_then(|w| w.root.as_ref())
            .expect("root");
        assert_eq!(root.to_sql(), "qserv_areaspec_box(0,0,1,1) AND x>3");
    }

    #[test]
    fn and_chains_flatten() {
        let stmt = parse_select("SELECT x FROM T WHERE a=1 AND b=2 AND c=3").expect("parse");
        let root = stmt
            .where_clause
            .as_ref()
            .and_then(|w| w.root.as_ref())
            .expect("root");
        match root {
            BoolTerm::And(and) => assert_eq!(and.terms.len(), 3),
            other => panic!("expected flat AND, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unsupported_constructs() {
        assert!(matches!(
            parse_select("SELECT 1"),
            Err(SkyqError::Parse { .. })
        ));
        assert!(matches!(
            parse_select("SELECT a FROM t UNION SELECT b FROM u"),
            Err(SkyqError::Unsupported(_))
        ));
        assert!(matches!(
            parse_select("WITH c AS (SELECT 1 AS x FROM t) SELECT x FROM c"),
            Err(SkyqError::Unsupported(_))
        ));
        assert!(matches!(
            parse_select("SELECT a FROM (SELECT b FROM t) AS sub"),
            Err(SkyqError::Unsupported(_))
        ));
        assert!(matches!(
            parse_select("INSERT INTO t VALUES (1)"),
            Err(SkyqError::Unsupported(_))
        ));
    }

    #[test]
    fn grammar_failure_reports_parse_error() {
        assert!(matches!(
            parse_select("SELEC x FROM t"),
            Err(SkyqError::Parse { .. })
        ));
    }

    #[test]
    fn round_trips_plugin_shaped_statements() {
        // parse(render(stmt)) == stmt for rendered trees.
        let sqls = [
            "SELECT objectId,taiMidPoint FROM LSST.Source_100 AS QST_1_",
            "SELECT filterId,SUM(photClam) AS QS1_SUM FROM LSST.Filter AS QST_1_ GROUP BY filterId ORDER BY filterId LIMIT 3",
            "SELECT run FROM LSST.Science_Ccd_Exposure AS QST_1_ ORDER BY field LIMIT 2",
        ];
        for sql in sqls {
            let stmt = parse_select(sql).expect("parse");
            assert_eq!(stmt.to_sql(), sql);
            let reparsed = parse_select(&stmt.to_sql()).expect("reparse");
            assert_eq!(reparsed, stmt);
        }
    }
}
