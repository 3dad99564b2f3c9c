use crate::column_ref::ColumnRef;
use crate::predicate::Predicate;
use crate::value_expr::ValueExpr;
use serde::{Deserialize, Serialize};

/// Where a merged term lands relative to the existing children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePos {
    /// New children go before the existing ones.
    Prepend,
    /// New children go after the existing ones.
    Append,
}

/// N-ary `AND` node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AndTerm {
    /// Conjoined children, in render order.
    pub terms: Vec<BoolTerm>,
}

impl AndTerm {
    /// Conjunction of the given children.
    pub fn new(terms: Vec<BoolTerm>) -> Self {
        Self { terms }
    }

    /// Concatenate another conjunction's children into this one.
    ///
    /// Merging keeps the tree flat so plugins can inject predicates without
    /// introducing extra nesting.
    pub fn merge(&mut self, other: AndTerm, pos: MergePos) {
        match pos {
            MergePos::Append => self.terms.extend(other.terms),
            MergePos::Prepend => {
                let mut terms = other.terms;
                terms.append(&mut self.terms);
                self.terms = terms;
            }
        }
    }
}

/// N-ary `OR` node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OrTerm {
    /// Disjoined children, in render order.
    pub terms: Vec<BoolTerm>,
}

impl OrTerm {
    /// Disjunction of the given children.
    pub fn new(terms: Vec<BoolTerm>) -> Self {
        Self { terms }
    }

    /// Concatenate another disjunction's children onto this one.
    pub fn merge(&mut self, other: OrTerm) {
        self.terms.extend(other.terms);
    }
}

/// N-ary `XOR` node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct XorTerm {
    /// Children, in render order.
    pub terms: Vec<BoolTerm>,
}

/// A boolean factor: optional `NOT` over an ordered factor-term sequence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoolFactor {
    /// Leading `NOT`.
    pub has_not: bool,
    /// Factor terms; usually a single predicate or nested term.
    pub terms: Vec<BoolFactorTerm>,
}

impl BoolFactor {
    /// Factor holding a single predicate.
    pub fn predicate(p: Predicate) -> Self {
        Self {
            has_not: false,
            terms: vec![BoolFactorTerm::Predicate(p)],
        }
    }

    /// Factor wrapping a nested term; renders with parentheses.
    pub fn wrap(t: BoolTerm) -> Self {
        Self {
            has_not: false,
            terms: vec![BoolFactorTerm::Nested(Box::new(t))],
        }
    }
}

/// Member of a [`BoolFactor`] sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoolFactorTerm {
    /// A leaf condition.
    Predicate(Predicate),
    /// A parenthesized nested boolean term.
    Nested(Box<BoolTerm>),
    /// A bare value expression in boolean position, e.g. a restrictor
    /// function call before extraction.
    Value(ValueExpr),
    /// Opaque pass-through token.
    Pass(String),
}

/// Boolean expression tree of a WHERE/HAVING/ON clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoolTerm {
    /// `a AND b AND ...`
    And(AndTerm),
    /// `a OR b OR ...`
    Or(OrTerm),
    /// `a XOR b XOR ...`
    Xor(XorTerm),
    /// Factor, possibly negated and possibly parenthesizing a subtree.
    Factor(BoolFactor),
    /// Opaque pass-through text.
    Pass(String),
    /// Opaque comma-joined list, rendered inside parentheses.
    PassList(Vec<String>),
    /// Unrecognized construct kept for render fidelity.
    Unknown,
}

impl BoolTerm {
    /// Operator precedence used to decide parenthesization when rendering.
    ///
    /// OTHER > AND > XOR > OR > UNKNOWN.
    pub fn precedence(&self) -> u8 {
        match self {
            BoolTerm::Unknown => 0,
            BoolTerm::Or(_) => 1,
            BoolTerm::Xor(_) => 2,
            BoolTerm::And(_) => 3,
            _ => 4,
        }
    }

    /// Render into `out`, parenthesizing lower-precedence children.
    pub fn render(&self, out: &mut String) {
        match self {
            BoolTerm::And(t) => render_nary(&t.terms, " AND ", self.precedence(), out),
            BoolTerm::Or(t) => render_nary(&t.terms, " OR ", self.precedence(), out),
            BoolTerm::Xor(t) => render_nary(&t.terms, " XOR ", self.precedence(), out),
            BoolTerm::Factor(f) => {
                if f.has_not {
                    out.push_str("NOT ");
                }
                for (i, term) in f.terms.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    match term {
                        BoolFactorTerm::Predicate(p) => p.render(out),
                        BoolFactorTerm::Nested(inner) => {
                            out.push('(');
                            inner.render(out);
                            out.push(')');
                        }
                        BoolFactorTerm::Value(v) => v.render(out),
                        BoolFactorTerm::Pass(text) => out.push_str(text),
                    }
                }
            }
            BoolTerm::Pass(text) => out.push_str(text),
            BoolTerm::PassList(items) => {
                out.push('(');
                out.push_str(&items.join(","));
                out.push(')');
            }
            BoolTerm::Unknown => {}
        }
    }

    /// Rendered form as an owned string.
    pub fn to_sql(&self) -> String {
        let mut s = String::new();
        self.render(&mut s);
        s
    }

    /// Structure-preserving copy with fresh leaves.
    ///
    /// The result shares no mutable state with the original and renders
    /// identically.
    pub fn copy_syntax(&self) -> BoolTerm {
        match self {
            BoolTerm::And(t) => BoolTerm::And(AndTerm::new(
                t.terms.iter().map(BoolTerm::copy_syntax).collect(),
            )),
            BoolTerm::Or(t) => BoolTerm::Or(OrTerm::new(
                t.terms.iter().map(BoolTerm::copy_syntax).collect(),
            )),
            BoolTerm::Xor(t) => BoolTerm::Xor(XorTerm {
                terms: t.terms.iter().map(BoolTerm::copy_syntax).collect(),
            }),
            BoolTerm::Factor(f) => BoolTerm::Factor(BoolFactor {
                has_not: f.has_not,
                terms: f
                    .terms
                    .iter()
                    .map(|t| match t {
                        BoolFactorTerm::Predicate(p) => BoolFactorTerm::Predicate(p.clone()),
                        BoolFactorTerm::Nested(inner) => {
                            BoolFactorTerm::Nested(Box::new(inner.copy_syntax()))
                        }
                        BoolFactorTerm::Value(v) => BoolFactorTerm::Value(v.clone()),
                        BoolFactorTerm::Pass(text) => BoolFactorTerm::Pass(text.clone()),
                    })
                    .collect(),
            }),
            BoolTerm::Pass(text) => BoolTerm::Pass(text.clone()),
            BoolTerm::PassList(items) => BoolTerm::PassList(items.clone()),
            BoolTerm::Unknown => BoolTerm::Unknown,
        }
    }

    /// Structural simplification: collapse single-child And/Or nodes and
    /// unwrap non-negated single-nested factors.
    ///
    /// Never changes meaning; it only drops redundant nesting so the
    /// renderer does not emit redundant parentheses.
    pub fn reduced(self) -> BoolTerm {
        match self {
            BoolTerm::And(mut t) => {
                if t.terms.len() == 1 {
                    return t.terms.pop().expect("single child").reduced();
                }
                BoolTerm::And(AndTerm::new(
                    t.terms.into_iter().map(BoolTerm::reduced).collect(),
                ))
            }
            BoolTerm::Or(mut t) => {
                if t.terms.len() == 1 {
                    return t.terms.pop().expect("single child").reduced();
                }
                BoolTerm::Or(OrTerm::new(
                    t.terms.into_iter().map(BoolTerm::reduced).collect(),
                ))
            }
            BoolTerm::Factor(f) => {
                if !f.has_not && f.terms.len() == 1 {
                    if let [BoolFactorTerm::Nested(_)] = f.terms.as_slice() {
                        let mut terms = f.terms;
                        if let Some(BoolFactorTerm::Nested(inner)) = terms.pop() {
                            return inner.reduced();
                        }
                        unreachable!("matched nested factor");
                    }
                }
                BoolTerm::Factor(f)
            }
            other => other,
        }
    }

    /// Disjunctive normal form: an OR of ANDs over the original leaves.
    ///
    /// Opaque terms (Pass, Unknown, Xor) are treated as leaves.
    pub fn to_dnf(&self) -> BoolTerm {
        let clauses = dnf_clauses(self);
        let ors = clauses
            .into_iter()
            .map(|clause| {
                if clause.len() == 1 {
                    clause.into_iter().next().expect("single leaf")
                } else {
                    BoolTerm::And(AndTerm::new(clause))
                }
            })
            .collect::<Vec<_>>();
        if ors.len() == 1 {
            ors.into_iter().next().expect("single clause")
        } else {
            BoolTerm::Or(OrTerm::new(ors))
        }
    }

    /// Visit every contained value expression, depth first.
    pub fn for_each_value_expr<'a>(&'a self, f: &mut impl FnMut(&'a ValueExpr)) {
        match self {
            BoolTerm::And(t) => t.terms.iter().for_each(|c| c.for_each_value_expr(f)),
            BoolTerm::Or(t) => t.terms.iter().for_each(|c| c.for_each_value_expr(f)),
            BoolTerm::Xor(t) => t.terms.iter().for_each(|c| c.for_each_value_expr(f)),
            BoolTerm::Factor(fac) => {
                for term in &fac.terms {
                    match term {
                        BoolFactorTerm::Predicate(p) => p.for_each_value_expr(f),
                        BoolFactorTerm::Nested(inner) => inner.for_each_value_expr(f),
                        BoolFactorTerm::Value(v) => f(v),
                        BoolFactorTerm::Pass(_) => {}
                    }
                }
            }
            BoolTerm::Pass(_) | BoolTerm::PassList(_) | BoolTerm::Unknown => {}
        }
    }

    /// Mutably visit every contained value expression, depth first.
    pub fn for_each_value_expr_mut(&mut self, f: &mut impl FnMut(&mut ValueExpr)) {
        match self {
            BoolTerm::And(t) => t.terms.iter_mut().for_each(|c| c.for_each_value_expr_mut(f)),
            BoolTerm::Or(t) => t.terms.iter_mut().for_each(|c| c.for_each_value_expr_mut(f)),
            BoolTerm::Xor(t) => t.terms.iter_mut().for_each(|c| c.for_each_value_expr_mut(f)),
            BoolTerm::Factor(fac) => {
                for term in &mut fac.terms {
                    match term {
                        BoolFactorTerm::Predicate(p) => p.for_each_value_expr_mut(f),
                        BoolFactorTerm::Nested(inner) => inner.for_each_value_expr_mut(f),
                        BoolFactorTerm::Value(v) => f(v),
                        BoolFactorTerm::Pass(_) => {}
                    }
                }
            }
            BoolTerm::Pass(_) | BoolTerm::PassList(_) | BoolTerm::Unknown => {}
        }
    }

    /// Visit every column ref, depth first.
    pub fn for_each_column_ref<'a>(&'a self, f: &mut impl FnMut(&'a ColumnRef)) {
        self.for_each_value_expr(&mut |v| v.for_each_column_ref(f));
    }

    /// Mutably visit every column ref, depth first.
    pub fn for_each_column_ref_mut(&mut self, f: &mut impl FnMut(&mut ColumnRef)) {
        self.for_each_value_expr_mut(&mut |v| v.for_each_column_ref_mut(f));
    }
}

fn render_nary(terms: &[BoolTerm], sep: &str, parent_prec: u8, out: &mut String) {
    for (i, t) in terms.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        if t.precedence() < parent_prec {
            out.push('(');
            t.render(out);
            out.push(')');
        } else {
            t.render(out);
        }
    }
}

fn dnf_clauses(term: &BoolTerm) -> Vec<Vec<BoolTerm>> {
    match term {
        BoolTerm::Or(t) => t.terms.iter().flat_map(dnf_clauses).collect(),
        BoolTerm::And(t) => {
            let mut acc: Vec<Vec<BoolTerm>> = vec![Vec::new()];
            for child in &t.terms {
                let child_clauses = dnf_clauses(child);
                let mut next = Vec::with_capacity(acc.len() * child_clauses.len());
                for prefix in &acc {
                    for clause in &child_clauses {
                        let mut merged = prefix.clone();
                        merged.extend(clause.iter().cloned());
                        next.push(merged);
                    }
                }
                acc = next;
            }
            acc
        }
        BoolTerm::Factor(f) if !f.has_not && f.terms.len() == 1 => {
            if let [BoolFactorTerm::Nested(inner)] = f.terms.as_slice() {
                dnf_clauses(inner)
            } else {
                vec![vec![term.clone()]]
            }
        }
        other => vec![vec![other.clone()]],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::CompOp;
    use crate::value_expr::ValueFactor;

    fn pred(col: &str, op: CompOp, val: i64) -> BoolTerm {
        BoolTerm::Factor(BoolFactor::predicate(Predicate::Comp {
            left: ValueExpr::column(ColumnRef::column(col)),
            op,
            right: ValueExpr::simple(ValueFactor::constant(val)),
        }))
    }

    #[test]
    fn or_inside_and_gets_parenthesized() {
        let or = BoolTerm::Or(OrTerm::new(vec![
            pred("a", CompOp::Gt, 1),
            pred("b", CompOp::Lt, 2),
        ]));
        let and = BoolTerm::And(AndTerm::new(vec![or, pred("c", CompOp::Eq, 3)]));
        assert_eq!(and.to_sql(), "(a>1 OR b<2) AND c=3");
    }

    #[test]
    fn and_inside_or_needs_no_parens() {
        let and = BoolTerm::And(AndTerm::new(vec![
            pred("a", CompOp::Gt, 1),
            pred("b", CompOp::Lt, 2),
        ]));
        let or = BoolTerm::Or(OrTerm::new(vec![and, pred("c", CompOp::Eq, 3)]));
        assert_eq!(or.to_sql(), "a>1 AND b<2 OR c=3");
    }

    #[test]
    fn merge_append_renders_like_concatenation() {
        let mut a = AndTerm::new(vec![pred("a", CompOp::Gt, 1)]);
        let b = AndTerm::new(vec![pred("b", CompOp::Lt, 2), pred("c", CompOp::Eq, 3)]);
        let a_sql = BoolTerm::And(a.clone()).to_sql();
        let b_sql = BoolTerm::And(b.clone()).to_sql();
        a.merge(b, MergePos::Append);
        assert_eq!(BoolTerm::And(a).to_sql(), format!("{a_sql} AND {b_sql}"));
    }

    #[test]
    fn merge_prepend_puts_new_terms_first() {
        let mut a = AndTerm::new(vec![pred("old", CompOp::Gt, 0)]);
        a.merge(AndTerm::new(vec![pred("new", CompOp::Eq, 1)]), MergePos::Prepend);
        assert_eq!(BoolTerm::And(a).to_sql(), "new=1 AND old>0");
    }

    #[test]
    fn reduced_collapses_single_child_chains() {
        let t = BoolTerm::And(AndTerm::new(vec![BoolTerm::Or(OrTerm::new(vec![
            BoolTerm::Factor(BoolFactor::wrap(pred("x", CompOp::Gt, 0))),
        ]))]));
        assert_eq!(t.reduced().to_sql(), "x>0");
    }

    #[test]
    fn clone_equals_and_copy_syntax_renders_identically() {
        let t = BoolTerm::And(AndTerm::new(vec![
            BoolTerm::Factor(BoolFactor::wrap(BoolTerm::Or(OrTerm::new(vec![
                pred("a", CompOp::Gt, 1),
                pred("b", CompOp::NotEq, 2),
            ])))),
            pred("c", CompOp::Eq, 3),
        ]));
        assert_eq!(t.clone(), t);
        assert_eq!(t.copy_syntax().to_sql(), t.to_sql());
    }

    #[test]
    fn dnf_distributes_and_over_or() {
        let or = BoolTerm::Or(OrTerm::new(vec![
            pred("a", CompOp::Eq, 1),
            pred("b", CompOp::Eq, 2),
        ]));
        let and = BoolTerm::And(AndTerm::new(vec![or, pred("c", CompOp::Eq, 3)]));
        assert_eq!(and.to_dnf().to_sql(), "a=1 AND c=3 OR b=2 AND c=3");
    }
}
