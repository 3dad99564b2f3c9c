//! The fixed query-rewrite plugin set, in registration order.

mod aggregate;
mod match_table;
mod post;
mod qualify;
mod restrictor;
mod scan_table;

pub use aggregate::AggregatePlugin;
pub use match_table::MatchTablePlugin;
pub use post::PostPlugin;
pub use qualify::QualifyPlugin;
pub use restrictor::RestrictorPlugin;
pub use scan_table::ScanTablePlugin;
