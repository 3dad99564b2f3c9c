//! Restricted-SELECT AST and parser front-end for skyq.
//!
//! Architecture role:
//! - typed SELECT tree mutated in place by the analysis plugin chain
//! - render-to-SQL used to emit per-chunk parallel statements and the
//!   merge statement
//! - translation from the external SQL grammar into the tree
//!
//! Key modules:
//! - [`column_ref`]
//! - [`value_expr`]
//! - [`bool_term`] / [`predicate`]
//! - [`select_stmt`]
//! - [`parser`]

pub mod bool_term;
pub mod column_ref;
pub mod parser;
pub mod predicate;
pub mod select_stmt;
pub mod value_expr;

pub use bool_term::{AndTerm, BoolFactor, BoolFactorTerm, BoolTerm, MergePos, OrTerm, XorTerm};
pub use column_ref::ColumnRef;
pub use parser::parse_select;
pub use predicate::{CompOp, Predicate};
pub use select_stmt::{
    FromList, JoinRef, JoinType, OrderByTerm, OrderDir, QsRestrictor, SelectList, SelectStmt,
    TableRef, WhereClause,
};
pub use value_expr::{AggOp, FactorOp, ValueExpr, ValueFactor, ValueOp};
