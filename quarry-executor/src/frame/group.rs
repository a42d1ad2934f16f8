use std::sync::Arc;

use indexmap::IndexMap;

use super::expr::{ColumnExpr, Series};
use super::Table;
use crate::budget::Budget;
use crate::value::Key;
use crate::{ExecutorError, Value};

/// `df.group_by(keys)`: a table waiting for `.agg(...)`.
///
/// Groups come out in order of first appearance.
#[derive(Debug, Clone)]
pub struct GroupBy {
    table: Arc<Table>,
    keys: Vec<String>,
}

impl GroupBy {
    /// # Errors
    /// `ColumnNotFoundError` when a key column is missing.
    pub fn new(table: Arc<Table>, keys: Vec<String>) -> Result<Self, ExecutorError> {
        if keys.is_empty() {
            return Err(ExecutorError::value_error("group_by needs at least one key column"));
        }
        for key in &keys {
            table.column(key)?;
        }
        Ok(Self { table, keys })
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Columns that are not grouping keys.
    pub fn value_columns(&self) -> impl Iterator<Item = &str> {
        self.table.column_names().filter(|name| !self.keys.iter().any(|k| k == name))
    }

    /// One row per group: the key columns, then one column per expression.
    /// Expressions that do not reduce to a single value become list cells.
    pub(crate) fn agg(&self, exprs: &[ColumnExpr], budget: &mut Budget) -> Result<Table, ExecutorError> {
        let key_columns: Vec<&[Value]> = self
            .keys
            .iter()
            .map(|k| self.table.column(k))
            .collect::<Result<_, _>>()?;

        let mut groups: IndexMap<Vec<Key>, Vec<usize>> = IndexMap::new();
        for row in 0..self.table.height() {
            let key = key_columns
                .iter()
                .map(|column| Key::from_value(&column[row]))
                .collect::<Result<Vec<_>, _>>()?;
            groups.entry(key).or_default().push(row);
        }
        budget.checkpoint()?;

        let mut columns: IndexMap<String, Vec<Value>> = IndexMap::new();
        for (i, key) in self.keys.iter().enumerate() {
            let cells = groups
                .values()
                .map(|rows| key_columns[i][rows[0]].clone())
                .collect();
            columns.insert(key.clone(), cells);
        }
        let names: Vec<String> = exprs.iter().map(ColumnExpr::output_name).collect();
        for name in &names {
            if columns.contains_key(name) {
                return Err(ExecutorError::value_error(format!(
                    "DuplicateError: column with name '{name}' has more than one occurrence"
                )));
            }
            columns.insert(name.clone(), Vec::with_capacity(groups.len()));
        }

        for rows in groups.values() {
            budget.checkpoint()?;
            let group = self.table.take(rows, budget)?;
            for (expr, name) in exprs.iter().zip(&names) {
                let cell = match expr.evaluate(&group, budget)? {
                    Series::Scalar(value) => value,
                    Series::Column(cells) => Value::list(cells),
                };
                cell.ensure_nestable()?;
                if let Some(column) = columns.get_mut(name) {
                    column.push(cell);
                }
            }
        }
        budget.charge(groups.len().saturating_mul(columns.len()))?;
        Table::new(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::AggFunc;
    use crate::{CancelToken, ExecutionLimits};

    fn sales() -> Arc<Table> {
        let mut columns = IndexMap::new();
        columns.insert(
            "region".to_owned(),
            vec![Value::str("north"), Value::str("south"), Value::str("north")],
        );
        columns.insert("units".to_owned(), vec![Value::Int(5), Value::Int(2), Value::Int(7)]);
        match Table::new(columns) {
            Ok(t) => Arc::new(t),
            Err(e) => panic!("table must build: {e}"),
        }
    }

    #[test]
    fn agg_keeps_first_appearance_order() {
        let grouped = match GroupBy::new(sales(), vec!["region".to_owned()]) {
            Ok(g) => g,
            Err(e) => panic!("group_by failed: {e}"),
        };
        let mut budget = Budget::new(&ExecutionLimits::default(), CancelToken::new());
        let expr = ColumnExpr::Column("units".to_owned()).agg(AggFunc::Sum).alias("total");
        let table = match grouped.agg(&[expr], &mut budget) {
            Ok(t) => t,
            Err(e) => panic!("agg failed: {e}"),
        };
        assert_eq!(table.shape(), (2, 2));
        let regions: Vec<String> = table
            .column("region")
            .map(|c| c.iter().map(ToString::to_string).collect())
            .unwrap_or_default();
        assert_eq!(regions, vec!["north", "south"]);
        assert!(table.column("total").is_ok_and(|c| c[0].py_eq(&Value::Int(12))));
    }

    #[test]
    fn non_reducing_expression_becomes_list_cell() {
        let grouped = match GroupBy::new(sales(), vec!["region".to_owned()]) {
            Ok(g) => g,
            Err(e) => panic!("group_by failed: {e}"),
        };
        let mut budget = Budget::new(&ExecutionLimits::default(), CancelToken::new());
        let table = match grouped.agg(&[ColumnExpr::Column("units".to_owned())], &mut budget) {
            Ok(t) => t,
            Err(e) => panic!("agg failed: {e}"),
        };
        assert!(table.column("units").is_ok_and(|c| c[0].to_string() == "[5, 7]"));
    }

    #[test]
    fn missing_key_column_is_rejected() {
        assert!(GroupBy::new(sales(), vec!["nope".to_owned()]).is_err());
    }
}
