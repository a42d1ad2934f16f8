use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use super::Table;
use crate::budget::Budget;
use crate::{ExecutorError, Value};

/// Read a CSV file below `root`. `None` means file access is not granted.
pub(crate) fn read_csv(
    requested: &str,
    root: Option<&Path>,
    budget: &mut Budget,
) -> Result<Table, ExecutorError> {
    let path = resolve(requested, root)?;
    let io_error = |source| ExecutorError::Io {
        path: PathBuf::from(requested),
        source,
    };
    let size = std::fs::metadata(&path).map_err(io_error)?.len();
    budget.charge(usize::try_from(size).unwrap_or(usize::MAX))?;
    let text = std::fs::read_to_string(&path).map_err(io_error)?;
    tracing::debug!(path = %path.display(), bytes = size, "reading data file");
    let table = parse_csv(&text)?;
    budget.charge(table.height().saturating_mul(table.width()))?;
    Ok(table)
}

/// Confine `requested` to `root`, following symlinks before comparing.
fn resolve(requested: &str, root: Option<&Path>) -> Result<PathBuf, ExecutorError> {
    let Some(root) = root else {
        return Err(ExecutorError::FileAccess {
            reason: "file access is not granted to this run".to_owned(),
        });
    };
    let root = root.canonicalize().map_err(|source| ExecutorError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    let candidate = root.join(requested);
    let resolved = candidate.canonicalize().map_err(|source| ExecutorError::Io {
        path: PathBuf::from(requested),
        source,
    })?;
    if !resolved.starts_with(&root) {
        return Err(ExecutorError::FileAccess {
            reason: format!("'{requested}' is outside the data root"),
        });
    }
    Ok(resolved)
}

/// Parse CSV text with a header row. Column types are inferred: int, then
/// float, then bool, then string. Empty fields are null.
///
/// # Errors
/// [`ExecutorError::Csv`] on malformed records or ragged rows, `ValueError`
/// on duplicate headers.
pub fn parse_csv(text: &str) -> Result<Table, ExecutorError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());
    let header: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();
    if header.is_empty() {
        return Ok(Table::empty());
    }
    let mut raw: Vec<Vec<String>> = vec![Vec::new(); header.len()];
    for record in reader.records() {
        let record = record?;
        for (column, field) in raw.iter_mut().zip(record.iter()) {
            column.push(field.to_owned());
        }
    }

    let mut columns = IndexMap::with_capacity(header.len());
    for (name, fields) in header.into_iter().zip(raw) {
        if columns.contains_key(&name) {
            return Err(ExecutorError::value_error(format!(
                "CSV header contains duplicate column '{name}'"
            )));
        }
        columns.insert(name, infer_column(&fields));
    }
    Table::new(columns)
}

/// Decimal and exponent notation only; `nan` and `inf` stay text.
fn is_float_literal(field: &str) -> bool {
    field.bytes().any(|b| b.is_ascii_digit())
        && field
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
        && field.parse::<f64>().is_ok()
}

fn infer_column(fields: &[String]) -> Vec<Value> {
    let present = || fields.iter().map(|f| f.trim()).filter(|f| !f.is_empty());
    let cell = |f: &String, parse: &dyn Fn(&str) -> Value| {
        let f = f.trim();
        if f.is_empty() {
            Value::None
        } else {
            parse(f)
        }
    };
    if present().all(|f| f.parse::<i64>().is_ok()) {
        fields
            .iter()
            .map(|f| cell(f, &|s| s.parse().map_or(Value::None, Value::Int)))
            .collect()
    } else if present().all(is_float_literal) {
        fields
            .iter()
            .map(|f| cell(f, &|s| s.parse().map_or(Value::None, Value::Float)))
            .collect()
    } else if present().all(|f| f.eq_ignore_ascii_case("true") || f.eq_ignore_ascii_case("false")) {
        fields
            .iter()
            .map(|f| cell(f, &|s| Value::Bool(s.eq_ignore_ascii_case("true"))))
            .collect()
    } else {
        fields
            .iter()
            .map(|f| if f.is_empty() { Value::None } else { Value::str(f.as_str()) })
            .collect()
    }
}
