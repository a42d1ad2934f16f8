//! Columnar table engine behind the `polars` data namespace.
//!
//! Tables are immutable once built; every operation returns a new table.
//! Column expressions (`pl.col("a") * 2`) are plain data until a table
//! evaluates them, which keeps them cheap to pass around.

mod csv;
mod expr;
mod group;
mod join;
mod table;

pub use csv::parse_csv;
pub(crate) use csv::read_csv;
pub use expr::{AggFunc, ColumnExpr, Series};
pub use group::GroupBy;
pub use join::JoinKind;
pub use table::Table;

use std::cmp::Ordering;

use crate::Value;

/// Total order over cells: nulls first, then by value, then by type name
/// for values that are not mutually comparable.
pub(crate) fn cell_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.is_none(), b.is_none()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a
            .py_cmp(b)
            .unwrap_or_else(|_| a.type_name().cmp(b.type_name())),
    }
}
