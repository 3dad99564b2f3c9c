use crate::bool_term::{AndTerm, BoolTerm, MergePos};
use crate::column_ref::ColumnRef;
use crate::value_expr::ValueExpr;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Join kind of a [`JoinRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    /// `JOIN` / `INNER JOIN`
    Inner,
    /// `LEFT OUTER JOIN`
    Left,
    /// `RIGHT OUTER JOIN`
    Right,
    /// `FULL OUTER JOIN`
    Full,
    /// `CROSS JOIN`
    Cross,
}

impl JoinType {
    fn keyword(self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT OUTER JOIN",
            JoinType::Right => "RIGHT OUTER JOIN",
            JoinType::Full => "FULL OUTER JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }
}

/// One join hanging off a [`TableRef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRef {
    /// Join kind.
    pub join_type: JoinType,
    /// NATURAL join flag.
    pub natural: bool,
    /// Right-hand table.
    pub right: Box<TableRef>,
    /// `ON` condition, when present.
    pub on: Option<BoolTerm>,
    /// `USING (...)` column list, when present.
    pub using_cols: Vec<String>,
}

/// A `(db, table, alias)` FROM-list entry with trailing joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    /// Database qualifier; empty when unqualified.
    pub db: String,
    /// Table name.
    pub table: String,
    /// `AS alias`, when present.
    pub alias: Option<String>,
    /// Joins chained onto this table.
    pub joins: Vec<JoinRef>,
}

impl TableRef {
    /// Unjoined table ref.
    pub fn new(db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            alias: None,
            joins: Vec::new(),
        }
    }

    /// Attach an alias, builder style.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn render(&self, out: &mut String) {
        if !self.db.is_empty() {
            let _ = write!(out, "{}.", self.db);
        }
        out.push_str(&self.table);
        if let Some(a) = &self.alias {
            let _ = write!(out, " AS {a}");
        }
        for j in &self.joins {
            out.push(' ');
            if j.natural {
                out.push_str("NATURAL ");
            }
            out.push_str(j.join_type.keyword());
            out.push(' ');
            j.right.render(out);
            if let Some(on) = &j.on {
                out.push_str(" ON ");
                on.render(out);
            }
            if !j.using_cols.is_empty() {
                let _ = write!(out, " USING ({})", j.using_cols.join(","));
            }
        }
    }

    /// This ref plus every joined ref, left to right.
    pub fn flattened(&self) -> Vec<&TableRef> {
        let mut v = vec![self];
        for j in &self.joins {
            v.extend(j.right.flattened());
        }
        v
    }

    /// Visit this ref and every joined ref mutably, left to right.
    pub fn for_each_ref_mut(&mut self, f: &mut impl FnMut(&mut TableRef)) {
        f(self);
        for j in &mut self.joins {
            j.right.for_each_ref_mut(f);
        }
    }
}

/// Ordered FROM list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FromList {
    /// Top-level table refs (comma-separated in SQL).
    pub refs: Vec<TableRef>,
}

impl FromList {
    /// Whether the list names more than one table, counting joins.
    pub fn is_join(&self) -> bool {
        self.refs.len() > 1 || self.refs.iter().any(|t| !t.joins.is_empty())
    }

    /// All table refs including joined ones, left to right.
    pub fn all_refs(&self) -> Vec<&TableRef> {
        self.refs.iter().flat_map(|t| t.flattened()).collect()
    }

    /// Visit every table ref mutably, including joined ones, left to right.
    pub fn for_each_ref_mut(&mut self, f: &mut impl FnMut(&mut TableRef)) {
        for t in &mut self.refs {
            t.for_each_ref_mut(f);
        }
    }

    fn render(&self, out: &mut String) {
        for (i, t) in self.refs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            t.render(out);
        }
    }
}

/// Ordered SELECT projection list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectList {
    /// Projected expressions.
    pub exprs: Vec<ValueExpr>,
}

impl SelectList {
    fn render(&self, out: &mut String) {
        for (i, e) in self.exprs.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            e.render_with_alias(out);
        }
    }
}

/// A restrictor parsed out of WHERE, e.g. `qserv_areaspec_box(0,0,1,1)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QsRestrictor {
    /// Normalized restrictor name.
    pub name: String,
    /// Stringified arguments, in call order.
    pub args: Vec<String>,
}

/// WHERE clause: residual boolean tree plus extracted restrictors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WhereClause {
    /// Residual boolean tree after restrictor extraction; `None` when the
    /// whole clause was consumed by restrictors.
    pub root: Option<BoolTerm>,
    /// Extracted restrictors consumed by chunk targeting.
    pub restrictors: Vec<QsRestrictor>,
}

impl WhereClause {
    /// AND-prepend a conjunction in front of the existing root.
    ///
    /// The existing root stays reachable intact underneath the new AND.
    pub fn prepend_and_term(&mut self, filter: AndTerm) {
        match self.root.take() {
            None => self.root = Some(BoolTerm::And(filter)),
            Some(BoolTerm::And(mut existing)) => {
                existing.merge(filter, MergePos::Prepend);
                self.root = Some(BoolTerm::And(existing));
            }
            Some(other) => {
                let mut and = filter;
                and.terms.push(other);
                self.root = Some(BoolTerm::And(and));
            }
        }
    }
}

/// Sort direction of one ORDER BY term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDir {
    /// `ASC`
    Asc,
    /// `DESC`
    Desc,
}

/// One ORDER BY term; the direction is kept only when spelled explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByTerm {
    /// Sort expression.
    pub expr: ValueExpr,
    /// Explicit direction, when written.
    pub dir: Option<OrderDir>,
}

impl OrderByTerm {
    fn render(&self, out: &mut String) {
        self.expr.render(out);
        match self.dir {
            Some(OrderDir::Asc) => out.push_str(" ASC"),
            Some(OrderDir::Desc) => out.push_str(" DESC"),
            None => {}
        }
    }
}

/// A parsed (and plugin-rewritten) SELECT statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStmt {
    /// Projection list.
    pub select: SelectList,
    /// FROM list; may be empty on generated merge statements.
    pub from: FromList,
    /// WHERE clause.
    pub where_clause: Option<WhereClause>,
    /// GROUP BY expressions.
    pub group_by: Vec<ValueExpr>,
    /// HAVING condition.
    pub having: Option<BoolTerm>,
    /// ORDER BY terms.
    pub order_by: Vec<OrderByTerm>,
    /// LIMIT row count.
    pub limit: Option<u64>,
}

impl SelectStmt {
    /// Statement with the given projection and FROM list, nothing else.
    pub fn new(select: SelectList, from: FromList) -> Self {
        Self {
            select,
            from,
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Whether any projection carries an aggregate.
    pub fn has_aggregate(&self) -> bool {
        self.select.exprs.iter().any(ValueExpr::has_aggregate)
    }

    /// Whether the projection is a bare `*` (no column reads to classify).
    pub fn is_star_only(&self) -> bool {
        self.select.exprs.len() == 1 && self.select.exprs[0].is_star()
    }

    /// Render the full statement.
    pub fn to_sql(&self) -> String {
        let mut out = String::from("SELECT ");
        self.select.render(&mut out);
        if !self.from.refs.is_empty() {
            out.push_str(" FROM ");
            self.from.render(&mut out);
        }
        if let Some(wc) = &self.where_clause {
            if let Some(root) = &wc.root {
                out.push_str(" WHERE ");
                root.render(&mut out);
            }
        }
        if !self.group_by.is_empty() {
            out.push_str(" GROUP BY ");
            for (i, g) in self.group_by.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                g.render(&mut out);
            }
        }
        if let Some(h) = &self.having {
            out.push_str(" HAVING ");
            h.render(&mut out);
        }
        if !self.order_by.is_empty() {
            out.push(' ');
            out.push_str(&self.render_order_by());
        }
        if let Some(n) = self.limit {
            let _ = write!(out, " LIMIT {n}");
        }
        out
    }

    /// Render just the `ORDER BY ...` clause (the proxy tail form).
    pub fn render_order_by(&self) -> String {
        let mut out = String::from("ORDER BY ");
        for (i, t) in self.order_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            t.render(&mut out);
        }
        out
    }

    /// Mutably visit every value expression of the statement, in clause
    /// order: select, where, group by, having, order by, join conditions.
    pub fn for_each_value_expr_mut(&mut self, f: &mut impl FnMut(&mut ValueExpr)) {
        for e in &mut self.select.exprs {
            f(e);
        }
        if let Some(wc) = &mut self.where_clause {
            if let Some(root) = &mut wc.root {
                root.for_each_value_expr_mut(f);
            }
        }
        for g in &mut self.group_by {
            f(g);
        }
        if let Some(h) = &mut self.having {
            h.for_each_value_expr_mut(f);
        }
        for t in &mut self.order_by {
            f(&mut t.expr);
        }
        for root in &mut self.from.refs {
            for_each_join_expr_mut(root, f);
        }
    }

    /// Mutably visit every column ref of the statement.
    pub fn for_each_column_ref_mut(&mut self, f: &mut impl FnMut(&mut ColumnRef)) {
        self.for_each_value_expr_mut(&mut |v| v.for_each_column_ref_mut(f));
    }
}

fn for_each_join_expr_mut(t: &mut TableRef, f: &mut impl FnMut(&mut ValueExpr)) {
    for j in &mut t.joins {
        if let Some(on) = &mut j.on {
            on.for_each_value_expr_mut(f);
        }
        for_each_join_expr_mut(&mut j.right, f);
    }
}
