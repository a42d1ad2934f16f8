//! Subscript reads and writes: `x[i]`, `x[a:b:c]`, `x[k] = v`.

use std::sync::Arc;

use crate::budget::Budget;
use crate::frame::ColumnExpr;
use crate::value::Key;
use crate::{ExecutorError, Value};

/// An evaluated subscript.
#[derive(Debug, Clone)]
pub(crate) enum Subscript {
    Item(Value),
    Slice {
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    },
}

/// Map a possibly negative index onto `0..len`.
pub(crate) fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { index + len } else { index };
    if (0..len).contains(&resolved) {
        usize::try_from(resolved).ok()
    } else {
        None
    }
}

/// Positions selected by a slice over a sequence of `len` items.
pub(crate) fn slice_indices(
    len: usize,
    lower: Option<i64>,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>, ExecutorError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ExecutorError::value_error("slice step cannot be zero"));
    }
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |bound: i64, low: i64, high: i64| {
        let bound = if bound < 0 { bound.saturating_add(len) } else { bound };
        bound.clamp(low, high)
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = lower.map_or(0, |b| clamp(b, 0, len));
        let stop = upper.map_or(len, |b| clamp(b, 0, len));
        let mut i = start;
        while i < stop {
            out.push(usize::try_from(i).unwrap_or(0));
            i = i.saturating_add(step);
        }
    } else {
        let start = lower.map_or(len - 1, |b| clamp(b, -1, len - 1));
        let stop = upper.map_or(-1, |b| clamp(b, -1, len - 1));
        let mut i = start;
        while i > stop {
            out.push(usize::try_from(i).unwrap_or(0));
            i = i.saturating_add(step);
        }
    }
    Ok(out)
}

fn out_of_range(kind: &str) -> ExecutorError {
    ExecutorError::Index(format!("{kind} index out of range"))
}

fn int_index(index: &Value, kind: &str) -> Result<i64, ExecutorError> {
    index.as_int().ok_or_else(|| {
        ExecutorError::type_error(format!(
            "{kind} indices must be integers or slices, not {}",
            index.type_name()
        ))
    })
}

/// `container[subscript]`.
///
/// # Errors
/// `IndexError`, `KeyError`, `TypeError`, or a column error for tables.
pub(crate) fn get_item(container: &Value, subscript: &Subscript, budget: &mut Budget) -> Result<Value, ExecutorError> {
    match (container, subscript) {
        (Value::List(items) | Value::Tuple(items), Subscript::Item(index)) => {
            let kind = container.type_name();
            let i = normalize_index(int_index(index, kind)?, items.len()).ok_or_else(|| out_of_range(kind))?;
            Ok(items[i].clone())
        }
        (Value::List(items), Subscript::Slice { lower, upper, step }) => {
            let picked = slice_indices(items.len(), *lower, *upper, *step)?;
            budget.charge(picked.len())?;
            Ok(Value::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Value::Tuple(items), Subscript::Slice { lower, upper, step }) => {
            let picked = slice_indices(items.len(), *lower, *upper, *step)?;
            budget.charge(picked.len())?;
            Ok(Value::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Value::Str(s), Subscript::Item(index)) => {
            let chars: Vec<char> = s.chars().collect();
            let i = normalize_index(int_index(index, "string")?, chars.len())
                .ok_or_else(|| out_of_range("string"))?;
            Ok(Value::str(chars[i].to_string()))
        }
        (Value::Str(s), Subscript::Slice { lower, upper, step }) => {
            let chars: Vec<char> = s.chars().collect();
            let picked = slice_indices(chars.len(), *lower, *upper, *step)?;
            budget.charge(picked.len())?;
            Ok(Value::str(picked.into_iter().map(|i| chars[i]).collect::<String>()))
        }
        (Value::Range(r), Subscript::Item(index)) => {
            let i = normalize_index(int_index(index, "range")?, r.len()).ok_or_else(|| out_of_range("range"))?;
            Ok(Value::Int(r.nth(i)))
        }
        (Value::Range(r), Subscript::Slice { lower, upper, step }) => {
            let picked = slice_indices(r.len(), *lower, *upper, *step)?;
            budget.charge(picked.len())?;
            Ok(Value::list(picked.into_iter().map(|i| Value::Int(r.nth(i))).collect()))
        }
        (Value::Dict(entries), Subscript::Item(key)) => {
            let k = Key::from_value(key)?;
            entries
                .get(&k)
                .cloned()
                .ok_or_else(|| ExecutorError::Key(key.repr()))
        }
        (Value::Table(table), Subscript::Item(Value::Str(name))) => {
            let cells = table.column(name)?;
            budget.charge(cells.len())?;
            Ok(Value::list(cells.to_vec()))
        }
        (Value::Table(table), Subscript::Item(Value::List(names))) => {
            let exprs = names
                .iter()
                .map(|n| match n {
                    Value::Str(s) => Ok(ColumnExpr::Column(s.to_string())),
                    other => Err(ExecutorError::type_error(format!(
                        "column selection expects str names, got '{}'",
                        other.type_name()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::table(table.select(&exprs, budget)?))
        }
        (Value::Table(table), Subscript::Slice { lower, upper, step }) => {
            let rows = slice_indices(table.height(), *lower, *upper, *step)?;
            Ok(Value::table(table.take(&rows, budget)?))
        }
        (other, _) => Err(ExecutorError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `container[index] = value`.
///
/// # Errors
/// `IndexError` for lists, `TypeError` for immutable or unsupported
/// containers and for slice assignment.
pub(crate) fn set_item(container: &mut Value, subscript: Subscript, value: Value, budget: &mut Budget) -> Result<(), ExecutorError> {
    let Subscript::Item(index) = subscript else {
        return Err(ExecutorError::type_error("slice assignment is not supported"));
    };
    match container {
        Value::List(items) => {
            let i = normalize_index(int_index(&index, "list")?, items.len())
                .ok_or_else(|| ExecutorError::Index("list assignment index out of range".to_owned()))?;
            Arc::make_mut(items)[i] = value;
            Ok(())
        }
        Value::Dict(entries) => {
            let key = Key::from_value(&index)?;
            budget.charge(1)?;
            Arc::make_mut(entries).insert(key, value);
            Ok(())
        }
        other => Err(ExecutorError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// Mutable access to `container[index]`, cloning shared storage first.
///
/// # Errors
/// As for [`get_item`], plus `TypeError` for containers without mutable items.
pub(crate) fn item_mut<'v>(container: &'v mut Value, index: &Value) -> Result<&'v mut Value, ExecutorError> {
    match container {
        Value::List(items) => {
            let i = normalize_index(int_index(index, "list")?, items.len()).ok_or_else(|| out_of_range("list"))?;
            Ok(&mut Arc::make_mut(items)[i])
        }
        Value::Dict(entries) => {
            let key = Key::from_value(index)?;
            Arc::make_mut(entries)
                .get_mut(&key)
                .ok_or_else(|| ExecutorError::Key(index.repr()))
        }
        other => Err(ExecutorError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}
