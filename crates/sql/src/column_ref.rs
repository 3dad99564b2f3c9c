use serde::{Deserialize, Serialize};
use std::fmt;

/// A possibly-qualified column reference `(db, table, column)`.
///
/// Empty `db`/`table` mean "unqualified". A ref used in a predicate must have
/// a non-empty `column`; qualification plugins fill in the rest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Database qualifier, empty when unqualified.
    pub db: String,
    /// Table qualifier, empty when unqualified.
    pub table: String,
    /// Column name.
    pub column: String,
}

impl ColumnRef {
    /// Fully spelled ref.
    pub fn new(
        db: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            db: db.into(),
            table: table.into(),
            column: column.into(),
        }
    }

    /// Unqualified column name.
    pub fn column(column: impl Into<String>) -> Self {
        Self::new("", "", column)
    }

    /// A ref is well-formed only if a db qualifier implies a table qualifier.
    pub fn is_well_formed(&self) -> bool {
        !self.column.is_empty() && (self.db.is_empty() || !self.table.is_empty())
    }

    /// Wildcard match: empty qualifier fields on either side match anything.
    ///
    /// Malformed refs (db set without table) match nothing. The relation is
    /// symmetric.
    pub fn matches(&self, other: &ColumnRef) -> bool {
        if !self.is_well_formed() || !other.is_well_formed() {
            return false;
        }
        if self.column != other.column {
            return false;
        }
        let table_ok = self.table.is_empty() || other.table.is_empty() || self.table == other.table;
        let db_ok = self.db.is_empty() || other.db.is_empty() || self.db == other.db;
        table_ok && db_ok
    }

    /// Directional check: does an `available` (SELECT-side) ref satisfy this
    /// required (ORDER-BY-side) ref?
    ///
    /// A qualified SELECT column satisfies an unqualified ORDER BY column;
    /// the reverse is rejected.
    pub fn is_satisfied_by(&self, available: &ColumnRef) -> bool {
        if self.column != available.column {
            return false;
        }
        (self.table.is_empty() || self.table == available.table)
            && (self.db.is_empty() || self.db == available.db)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.db.is_empty() {
            write!(f, "{}.", self.db)?;
        }
        if !self.table.is_empty() {
            write!(f, "{}.", self.table)?;
        }
        write!(f, "{}", self.column)
    }
}
