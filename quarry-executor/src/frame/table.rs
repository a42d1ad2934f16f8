use std::fmt;

use indexmap::IndexMap;

use super::expr::{ColumnExpr, Series};
use super::{cell_cmp, AggFunc};
use crate::budget::Budget;
use crate::value::Key;
use crate::{ExecutorError, Value};

/// Rows shown by the text rendering before eliding.
const DISPLAY_ROWS: usize = 10;

/// An ordered set of equally long named columns.
#[derive(Debug, Clone)]
pub struct Table {
    columns: IndexMap<String, Vec<Value>>,
    height: usize,
    lazy: bool,
}

impl Table {
    /// Build a table, checking that every column has the same length and
    /// that every cell is a plain data value.
    ///
    /// # Errors
    /// `ValueError` on ragged columns, `TypeError` on non-data cells.
    pub fn new(columns: IndexMap<String, Vec<Value>>) -> Result<Self, ExecutorError> {
        let height = columns.values().next().map_or(0, Vec::len);
        for (name, cells) in &columns {
            if cells.len() != height {
                return Err(ExecutorError::value_error(format!(
                    "ShapeError: column '{name}' has length {} but expected {height}",
                    cells.len()
                )));
            }
            if let Some(bad) = cells.iter().find(|v| !is_cell(v)) {
                return Err(ExecutorError::type_error(format!(
                    "a {} cannot be stored in a DataFrame column",
                    bad.type_name()
                )));
            }
        }
        Ok(Self {
            columns,
            height,
            lazy: false,
        })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            columns: IndexMap::new(),
            height: 0,
            lazy: false,
        }
    }

    /// Build a table from a `{name: [cells]}` dictionary.
    pub(crate) fn from_dict(
        entries: &IndexMap<Key, Value>,
        budget: &mut Budget,
    ) -> Result<Self, ExecutorError> {
        let mut columns = IndexMap::with_capacity(entries.len());
        for (key, value) in entries {
            let Key::Str(name) = key else {
                return Err(ExecutorError::type_error("DataFrame column names must be strings"));
            };
            let cells = match value {
                Value::List(items) | Value::Tuple(items) => items.to_vec(),
                Value::Range(r) => {
                    budget.charge(r.len())?;
                    (0..r.len()).map(|i| Value::Int(r.nth(i))).collect()
                }
                scalar => vec![scalar.clone()],
            };
            budget.charge(cells.len())?;
            columns.insert(name.to_string(), cells);
        }
        Self::new(columns)
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// `(rows, columns)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.columns.len())
    }

    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    #[must_use]
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    #[must_use]
    pub fn columns(&self) -> &IndexMap<String, Vec<Value>> {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// # Errors
    /// `ColumnNotFoundError` when no column has that name.
    pub fn column(&self, name: &str) -> Result<&[Value], ExecutorError> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ExecutorError::ColumnNotFound(format!("\"{name}\" not found")))
    }

    /// Rows at `indices`, in that order.
    pub(crate) fn take(&self, indices: &[usize], budget: &mut Budget) -> Result<Self, ExecutorError> {
        budget.charge(indices.len().saturating_mul(self.width()))?;
        let columns = self
            .columns
            .iter()
            .map(|(name, cells)| {
                let picked = indices.iter().map(|&i| cells[i].clone()).collect();
                (name.clone(), picked)
            })
            .collect();
        Ok(Self {
            columns,
            height: indices.len(),
            lazy: self.lazy,
        })
    }

    /// Evaluate expressions into a new table. Aggregations broadcast when
    /// mixed with full columns.
    pub(crate) fn select(&self, exprs: &[ColumnExpr], budget: &mut Budget) -> Result<Self, ExecutorError> {
        let mut evaluated = Vec::with_capacity(exprs.len());
        for expr in exprs {
            budget.checkpoint()?;
            evaluated.push((expr.output_name(), expr.evaluate(self, budget)?));
        }
        let all_scalar = evaluated.iter().all(|(_, s)| matches!(s, Series::Scalar(_)));
        let height = if all_scalar { 1 } else { self.height };
        let mut columns = IndexMap::with_capacity(evaluated.len());
        for (name, series) in evaluated {
            if columns.contains_key(&name) {
                return Err(duplicate(&name));
            }
            columns.insert(name, series.into_column(height, budget)?);
        }
        Ok(Self::new(columns)?.with_lazy(self.lazy))
    }

    /// Add or replace columns, keeping the table height.
    pub(crate) fn with_columns(
        &self,
        exprs: &[ColumnExpr],
        budget: &mut Budget,
    ) -> Result<Self, ExecutorError> {
        let mut columns = self.columns.clone();
        let height = if self.columns.is_empty() { 1 } else { self.height };
        for expr in exprs {
            budget.checkpoint()?;
            let cells = expr.evaluate(self, budget)?.into_column(height, budget)?;
            columns.insert(expr.output_name(), cells);
        }
        Ok(Self::new(columns)?.with_lazy(self.lazy))
    }

    /// Keep rows where `predicate` is true; nulls count as false.
    pub(crate) fn filter(&self, predicate: &ColumnExpr, budget: &mut Budget) -> Result<Self, ExecutorError> {
        let mask = predicate.evaluate(self, budget)?.into_column(self.height, budget)?;
        let mut keep = Vec::new();
        for (i, cell) in mask.iter().enumerate() {
            match cell {
                Value::Bool(true) => keep.push(i),
                Value::Bool(false) | Value::None => {}
                other => {
                    return Err(ExecutorError::type_error(format!(
                        "filter predicate must be boolean, found {}",
                        other.type_name()
                    )))
                }
            }
        }
        self.take(&keep, budget)
    }

    /// Stable sort by one or more keys. Nulls sort first.
    pub(crate) fn sort(
        &self,
        by: &[ColumnExpr],
        descending: &[bool],
        budget: &mut Budget,
    ) -> Result<Self, ExecutorError> {
        let mut keys = Vec::with_capacity(by.len());
        for expr in by {
            keys.push(expr.evaluate(self, budget)?.into_column(self.height, budget)?);
        }
        budget.checkpoint()?;
        let mut order: Vec<usize> = (0..self.height).collect();
        order.sort_by(|&a, &b| {
            for (i, key) in keys.iter().enumerate() {
                let (x, y) = (&key[a], &key[b]);
                let ordering = match (x.is_none(), y.is_none()) {
                    (false, false) if descending.get(i).copied().unwrap_or(false) => cell_cmp(y, x),
                    _ => cell_cmp(x, y),
                };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
        self.take(&order, budget)
    }

    pub(crate) fn head(&self, n: usize, budget: &mut Budget) -> Result<Self, ExecutorError> {
        let rows: Vec<usize> = (0..n.min(self.height)).collect();
        self.take(&rows, budget)
    }

    pub(crate) fn tail(&self, n: usize, budget: &mut Budget) -> Result<Self, ExecutorError> {
        let rows: Vec<usize> = (self.height.saturating_sub(n)..self.height).collect();
        self.take(&rows, budget)
    }

    pub(crate) fn drop_columns(&self, names: &[String]) -> Result<Self, ExecutorError> {
        let mut columns = self.columns.clone();
        for name in names {
            if columns.shift_remove(name).is_none() {
                return Err(ExecutorError::ColumnNotFound(format!("\"{name}\" not found")));
            }
        }
        Ok(Self::new(columns)?.with_lazy(self.lazy))
    }

    pub(crate) fn rename(&self, mapping: &[(String, String)]) -> Result<Self, ExecutorError> {
        for (old, _) in mapping {
            self.column(old)?;
        }
        let mut columns = IndexMap::with_capacity(self.columns.len());
        for (name, cells) in &self.columns {
            let renamed = mapping
                .iter()
                .find(|(old, _)| old == name)
                .map_or_else(|| name.clone(), |(_, new)| new.clone());
            if columns.contains_key(&renamed) {
                return Err(duplicate(&renamed));
            }
            columns.insert(renamed, cells.clone());
        }
        Ok(Self::new(columns)?.with_lazy(self.lazy))
    }

    /// One-row table applying `func` to every column.
    pub(crate) fn reduce(&self, func: AggFunc, budget: &mut Budget) -> Result<Self, ExecutorError> {
        budget.charge(self.width())?;
        let mut columns = IndexMap::with_capacity(self.width());
        for (name, cells) in &self.columns {
            budget.checkpoint()?;
            columns.insert(name.clone(), vec![func.apply(cells)?]);
        }
        Ok(Self::new(columns)?.with_lazy(self.lazy))
    }
}

fn is_cell(value: &Value) -> bool {
    matches!(
        value,
        Value::None
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::List(_)
            | Value::Tuple(_)
            | Value::Dict(_)
    )
}

fn duplicate(name: &str) -> ExecutorError {
    ExecutorError::value_error(format!(
        "DuplicateError: column with name '{name}' has more than one occurrence"
    ))
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lazy {
            return write!(f, "naive plan: (run LazyFrame.collect() to see the result)");
        }
        writeln!(f, "shape: ({}, {})", self.height, self.width())?;
        let shown: Vec<usize> = if self.height > DISPLAY_ROWS {
            (0..DISPLAY_ROWS / 2)
                .chain(self.height - DISPLAY_ROWS / 2..self.height)
                .collect()
        } else {
            (0..self.height).collect()
        };
        let rendered: Vec<(String, Vec<String>)> = self
            .columns
            .iter()
            .map(|(name, cells)| {
                let body = shown.iter().map(|&i| render_cell(&cells[i])).collect();
                (name.clone(), body)
            })
            .collect();
        let widths: Vec<usize> = rendered
            .iter()
            .map(|(name, body)| {
                body.iter()
                    .map(|c| c.chars().count())
                    .chain(std::iter::once(name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let header: Vec<String> = rendered
            .iter()
            .zip(&widths)
            .map(|((name, _), w)| format!("{name:<w$}"))
            .collect();
        writeln!(f, "{}", header.join(" | "))?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write!(f, "{}", rule.join("-+-"))?;
        for row in 0..shown.len() {
            if self.height > DISPLAY_ROWS && row == DISPLAY_ROWS / 2 {
                write!(f, "\n…")?;
            }
            let line: Vec<String> = rendered
                .iter()
                .zip(&widths)
                .map(|((_, body), w)| format!("{:<w$}", body[row]))
                .collect();
            write!(f, "\n{}", line.join(" | "))?;
        }
        Ok(())
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::None => "null".to_owned(),
        Value::Str(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CancelToken, ExecutionLimits};

    fn budget() -> Budget {
        Budget::new(&ExecutionLimits::default(), CancelToken::new())
    }

    fn sample() -> Table {
        let mut columns = IndexMap::new();
        columns.insert(
            "city".to_owned(),
            vec![Value::str("oslo"), Value::str("lima"), Value::str("oslo"), Value::None],
        );
        columns.insert(
            "temp".to_owned(),
            vec![Value::Int(3), Value::Int(19), Value::Int(-2), Value::Int(7)],
        );
        match Table::new(columns) {
            Ok(t) => t,
            Err(e) => panic!("sample table must build: {e}"),
        }
    }

    fn col(name: &str) -> ColumnExpr {
        ColumnExpr::Column(name.to_owned())
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let mut columns = IndexMap::new();
        columns.insert("a".to_owned(), vec![Value::Int(1)]);
        columns.insert("b".to_owned(), vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(Table::new(columns), Err(ExecutorError::Value(_))));
    }

    #[test]
    fn missing_column_is_reported() {
        assert!(matches!(sample().column("nope"), Err(ExecutorError::ColumnNotFound(_))));
    }

    #[test]
    fn sort_descending_keeps_nulls_first() {
        let mut b = budget();
        let sorted = match sample().sort(&[col("city")], &[true], &mut b) {
            Ok(t) => t,
            Err(e) => panic!("sort failed: {e}"),
        };
        let cities: Vec<String> = sorted
            .column("city")
            .map(|c| c.iter().map(ToString::to_string).collect())
            .unwrap_or_default();
        assert_eq!(cities, vec!["None", "oslo", "oslo", "lima"]);
    }

    #[test]
    fn head_and_tail_clamp_to_height() {
        let mut b = budget();
        let table = sample();
        assert_eq!(table.head(2, &mut b).map(|t| t.height()).ok(), Some(2));
        assert_eq!(table.tail(10, &mut b).map(|t| t.height()).ok(), Some(4));
    }

    #[test]
    fn rename_and_drop_adjust_columns() {
        let table = sample();
        let renamed = match table.rename(&[("temp".to_owned(), "celsius".to_owned())]) {
            Ok(t) => t,
            Err(e) => panic!("rename failed: {e}"),
        };
        assert!(renamed.has_column("celsius"));
        let dropped = match renamed.drop_columns(&["city".to_owned()]) {
            Ok(t) => t,
            Err(e) => panic!("drop failed: {e}"),
        };
        assert_eq!(dropped.shape(), (4, 1));
        assert!(table.drop_columns(&["nope".to_owned()]).is_err());
    }

    #[test]
    fn reduce_produces_one_row() {
        let mut b = budget();
        let reduced = match sample().reduce(AggFunc::Max, &mut b) {
            Ok(t) => t,
            Err(e) => panic!("reduce failed: {e}"),
        };
        assert_eq!(reduced.shape(), (1, 2));
        assert!(reduced.column("temp").is_ok_and(|c| c[0].py_eq(&Value::Int(19))));
        assert!(reduced.column("city").is_ok_and(|c| c[0].py_eq(&Value::str("oslo"))));
    }

    #[test]
    fn display_shows_shape_header() {
        let text = sample().to_string();
        assert!(text.starts_with("shape: (4, 2)"), "got {text}");
        assert!(text.contains("city"));
    }
}
