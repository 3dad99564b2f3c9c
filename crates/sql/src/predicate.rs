use crate::column_ref::ColumnRef;
use crate::value_expr::ValueExpr;
use serde::{Deserialize, Serialize};

/// Comparison operator of a [`Predicate::Comp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `<=>` null-safe equality.
    NullSafeEq,
}

impl CompOp {
    /// SQL token, rendered without surrounding spaces.
    pub fn token(self) -> &'static str {
        match self {
            CompOp::Eq => "=",
            CompOp::NotEq => "<>",
            CompOp::Lt => "<",
            CompOp::LtEq => "<=",
            CompOp::Gt => ">",
            CompOp::GtEq => ">=",
            CompOp::NullSafeEq => "<=>",
        }
    }
}

/// Leaf condition of the boolean tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// `left op right`
    Comp {
        /// Left operand.
        left: ValueExpr,
        /// Comparison operator.
        op: CompOp,
        /// Right operand.
        right: ValueExpr,
    },
    /// `value [NOT] IN (cands...)`
    In {
        /// Probed value.
        value: ValueExpr,
        /// Candidate list.
        cands: Vec<ValueExpr>,
        /// NOT flag.
        not: bool,
    },
    /// `value [NOT] BETWEEN min AND max`
    Between {
        /// Probed value.
        value: ValueExpr,
        /// Lower bound.
        min: ValueExpr,
        /// Upper bound.
        max: ValueExpr,
        /// NOT flag.
        not: bool,
    },
    /// `value [NOT] LIKE pattern`
    Like {
        /// Probed value.
        value: ValueExpr,
        /// Match pattern.
        pattern: ValueExpr,
        /// NOT flag.
        not: bool,
    },
    /// `value IS [NOT] NULL`
    Null {
        /// Probed value.
        value: ValueExpr,
        /// True renders `IS NOT NULL`.
        has_not: bool,
    },
}

impl Predicate {
    /// Render into `out`.
    pub fn render(&self, out: &mut String) {
        match self {
            Predicate::Comp { left, op, right } => {
                left.render(out);
                out.push_str(op.token());
                right.render(out);
            }
            Predicate::In { value, cands, not } => {
                value.render(out);
                if *not {
                    out.push_str(" NOT");
                }
                out.push_str(" IN (");
                for (i, c) in cands.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    c.render(out);
                }
                out.push(')');
            }
            Predicate::Between {
                value,
                min,
                max,
                not,
            } => {
                value.render(out);
                if *not {
                    out.push_str(" NOT");
                }
                out.push_str(" BETWEEN ");
                min.render(out);
                out.push_str(" AND ");
                max.render(out);
            }
            Predicate::Like {
                value,
                pattern,
                not,
            } => {
                value.render(out);
                if *not {
                    out.push_str(" NOT");
                }
                out.push_str(" LIKE ");
                pattern.render(out);
            }
            Predicate::Null { value, has_not } => {
                value.render(out);
                out.push_str(if *has_not { " IS NOT NULL" } else { " IS NULL" });
            }
        }
    }

    /// Visit contained value expressions.
    pub fn for_each_value_expr<'a>(&'a self, f: &mut impl FnMut(&'a ValueExpr)) {
        match self {
            Predicate::Comp { left, right, .. } => {
                f(left);
                f(right);
            }
            Predicate::In { value, cands, .. } => {
                f(value);
                for c in cands {
                    f(c);
                }
            }
            Predicate::Between {
                value, min, max, ..
            } => {
                f(value);
                f(min);
                f(max);
            }
            Predicate::Like { value, pattern, .. } => {
                f(value);
                f(pattern);
            }
            Predicate::Null { value, .. } => f(value),
        }
    }

    /// Mutably visit contained value expressions.
    pub fn for_each_value_expr_mut(&mut self, f: &mut impl FnMut(&mut ValueExpr)) {
        match self {
            Predicate::Comp { left, right, .. } => {
                f(left);
                f(right);
            }
            Predicate::In { value, cands, .. } => {
                f(value);
                for c in cands {
                    f(c);
                }
            }
            Predicate::Between {
                value, min, max, ..
            } => {
                f(value);
                f(min);
                f(max);
            }
            Predicate::Like { value, pattern, .. } => {
                f(value);
                f(pattern);
            }
            Predicate::Null { value, .. } => f(value),
        }
    }

    /// Visit every column ref of every contained value expression.
    pub fn for_each_column_ref<'a>(&'a self, f: &mut impl FnMut(&'a ColumnRef)) {
        self.for_each_value_expr(&mut |v| v.for_each_column_ref(f));
    }
}
