use std::collections::HashMap;

use indexmap::IndexMap;

use super::Table;
use crate::budget::Budget;
use crate::value::Key;
use crate::{ExecutorError, Value};

/// Join strategy for `DataFrame.join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    /// # Errors
    /// `ValueError` for strategies other than `inner` and `left`.
    pub fn parse(how: &str) -> Result<Self, ExecutorError> {
        match how {
            "inner" => Ok(Self::Inner),
            "left" => Ok(Self::Left),
            other => Err(ExecutorError::value_error(format!(
                "join strategy '{other}' is not supported; use 'inner' or 'left'"
            ))),
        }
    }
}

/// Left rows between cancellation checks.
const JOIN_CHECK_INTERVAL: usize = 1024;

impl Table {
    /// Hash join on equal key columns. Null keys never match. Right-hand
    /// columns whose names clash with the left get a `_right` suffix.
    pub(crate) fn join(
        &self,
        right: &Table,
        on: &[String],
        how: JoinKind,
        budget: &mut Budget,
    ) -> Result<Table, ExecutorError> {
        if on.is_empty() {
            return Err(ExecutorError::value_error("join needs at least one key column"));
        }
        let left_keys: Vec<&[Value]> = on.iter().map(|k| self.column(k)).collect::<Result<_, _>>()?;
        let right_keys: Vec<&[Value]> = on.iter().map(|k| right.column(k)).collect::<Result<_, _>>()?;

        let mut index: HashMap<Vec<Key>, Vec<usize>> = HashMap::new();
        for row in 0..right.height() {
            if let Some(key) = row_key(&right_keys, row)? {
                index.entry(key).or_default().push(row);
            }
        }
        budget.checkpoint()?;

        let right_columns: Vec<(&String, &Vec<Value>)> = right
            .columns()
            .iter()
            .filter(|(name, _)| !on.iter().any(|k| k == *name))
            .collect();
        let row_cells = (self.width() + right_columns.len()).max(1);

        let mut pairs: Vec<(usize, Option<usize>)> = Vec::new();
        for row in 0..self.height() {
            if row % JOIN_CHECK_INTERVAL == 0 {
                budget.checkpoint()?;
            }
            let matches: &[usize] = match row_key(&left_keys, row)? {
                Some(key) => index.get(&key).map(Vec::as_slice).unwrap_or_default(),
                None => &[],
            };
            if matches.is_empty() {
                if how == JoinKind::Left {
                    budget.charge(row_cells)?;
                    pairs.push((row, None));
                }
            } else {
                budget.charge(matches.len().saturating_mul(row_cells))?;
                pairs.extend(matches.iter().map(|&r| (row, Some(r))));
            }
        }

        let mut columns: IndexMap<String, Vec<Value>> = IndexMap::new();
        for (name, cells) in self.columns() {
            columns.insert(name.clone(), pairs.iter().map(|(l, _)| cells[*l].clone()).collect());
        }
        for (name, cells) in right_columns {
            let output = if columns.contains_key(name) {
                format!("{name}_right")
            } else {
                name.clone()
            };
            let joined = pairs
                .iter()
                .map(|(_, r)| r.map_or(Value::None, |r| cells[r].clone()))
                .collect();
            columns.insert(output, joined);
        }
        Ok(Table::new(columns)?.with_lazy(self.is_lazy()))
    }
}

fn row_key(columns: &[&[Value]], row: usize) -> Result<Option<Vec<Key>>, ExecutorError> {
    let mut key = Vec::with_capacity(columns.len());
    for column in columns {
        let cell = &column[row];
        if cell.is_none() {
            return Ok(None);
        }
        key.push(Key::from_value(cell)?);
    }
    Ok(Some(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CancelToken, ExecutionLimits};

    fn table(columns: Vec<(&str, Vec<Value>)>) -> Table {
        let columns = columns.into_iter().map(|(n, c)| (n.to_owned(), c)).collect();
        match Table::new(columns) {
            Ok(t) => t,
            Err(e) => panic!("table must build: {e}"),
        }
    }

    fn fixtures() -> (Table, Table) {
        let left = table(vec![
            ("id", vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            ("name", vec![Value::str("ada"), Value::str("bob"), Value::str("cy")]),
        ]);
        let right = table(vec![
            ("id", vec![Value::Int(1), Value::Int(3), Value::Int(3)]),
            ("name", vec![Value::str("x"), Value::str("y"), Value::str("z")]),
            ("score", vec![Value::Int(10), Value::Int(30), Value::Int(31)]),
        ]);
        (left, right)
    }

    #[test]
    fn inner_join_repeats_multi_matches() {
        let (left, right) = fixtures();
        let mut budget = Budget::new(&ExecutionLimits::default(), CancelToken::new());
        let joined = match left.join(&right, &["id".to_owned()], JoinKind::Inner, &mut budget) {
            Ok(t) => t,
            Err(e) => panic!("join failed: {e}"),
        };
        assert_eq!(joined.shape(), (3, 4));
        assert!(joined.has_column("name_right"));
    }

    #[test]
    fn left_join_fills_nulls() {
        let (left, right) = fixtures();
        let mut budget = Budget::new(&ExecutionLimits::default(), CancelToken::new());
        let joined = match left.join(&right, &["id".to_owned()], JoinKind::Left, &mut budget) {
            Ok(t) => t,
            Err(e) => panic!("join failed: {e}"),
        };
        assert_eq!(joined.height(), 4);
        assert!(joined.column("score").is_ok_and(|c| c[1].is_none()));
    }

    #[test]
    fn many_to_many_joins_are_charged_before_pairing() {
        let keys = table(vec![("k", vec![Value::Int(1); 300])]);
        let mut budget = Budget::new(
            &ExecutionLimits {
                max_cells: 10_000,
                ..ExecutionLimits::default()
            },
            CancelToken::new(),
        );
        let result = keys.join(&keys, &["k".to_owned()], JoinKind::Inner, &mut budget);
        assert!(matches!(result, Err(ExecutorError::AllocationLimit { limit: 10_000 })));
        assert!(budget.cells() <= 10_000 + 300);
    }

    #[test]
    fn cancelled_joins_stop() {
        let (left, right) = fixtures();
        let token = CancelToken::new();
        token.cancel();
        let mut budget = Budget::new(&ExecutionLimits::default(), token);
        let result = left.join(&right, &["id".to_owned()], JoinKind::Inner, &mut budget);
        assert!(matches!(result, Err(ExecutorError::Cancelled)));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(JoinKind::parse("cross").is_err());
        assert_eq!(JoinKind::parse("left").ok(), Some(JoinKind::Left));
    }
}
