use crate::context::QueryContext;
use crate::plugin::QueryPlugin;
use skyq_common::{Result, SkyqError};
use skyq_sql::{ColumnRef, SelectStmt};

/// Resolves table names against the catalog and column references against
/// the FROM list.
///
/// Unqualified table refs get the context's default database; every FROM
/// entry without an alias receives a generated `QST_<n>_` alias used by the
/// per-chunk templates. Column refs keep their user spelling; the fully
/// qualified form is recorded in the context's resolution cache.
pub struct QualifyPlugin;

impl QueryPlugin for QualifyPlugin {
    fn name(&self) -> &'static str {
        "Qualify"
    }

    fn apply_logical(&self, stmt: &mut SelectStmt, ctx: &mut QueryContext) -> Result<()> {
        let mut n = 0;
        let mut check: Vec<(String, String)> = Vec::new();
        stmt.from.for_each_ref_mut(&mut |t| {
            n += 1;
            if t.db.is_empty() {
                t.db = ctx.default_db.clone();
            }
            if t.alias.is_none() {
                t.alias = Some(format!("QST_{n}_"));
            }
            check.push((t.db.clone(), t.table.clone()));
        });
        for (db, table) in &check {
            ctx.catalog.database(db)?;
            if !ctx.catalog.has_table(db, table) {
                return Err(SkyqError::Analysis(format!("unknown table: {db}.{table}")));
            }
        }

        // (alias-or-table-name, db, table) lookup rows, FROM order.
        let tables: Vec<(Option<String>, String, String)> = stmt
            .from
            .all_refs()
            .iter()
            .map(|t| (t.alias.clone(), t.db.clone(), t.table.clone()))
            .collect();

        let mut failure: Option<SkyqError> = None;
        stmt.for_each_column_ref_mut(&mut |c| {
            if failure.is_some() {
                return;
            }
            match resolve(c, &tables) {
                Ok(resolved) => {
                    ctx.resolved_columns.insert(c.to_string(), resolved);
                }
                Err(e) => failure = Some(e),
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn resolve(
    c: &ColumnRef,
    tables: &[(Option<String>, String, String)],
) -> std::result::Result<ColumnRef, SkyqError> {
    if c.table.is_empty() {
        return match tables {
            [] => Err(SkyqError::Analysis(format!("column {c} outside any FROM"))),
            [(_, db, table)] => Ok(ColumnRef::new(db.clone(), table.clone(), c.column.clone())),
            _ => Err(SkyqError::Analysis(format!("ambiguous column: {}", c.column))),
        };
    }
    let hit = tables.iter().find(|(alias, db, table)| {
        let name_match =
            alias.as_deref() == Some(c.table.as_str()) || table.as_str() == c.table.as_str();
        name_match && (c.db.is_empty() || c.db == *db)
    });
    match hit {
        Some((_, db, table)) => Ok(ColumnRef::new(db.clone(), table.clone(), c.column.clone())),
        None => Err(SkyqError::Analysis(format!("unknown table: {}", c.table))),
    }
}
