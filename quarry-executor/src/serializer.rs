//! Turn the state a run leaves behind into a transport-safe [`Outcome`].
//!
//! Only a trailing bare name is reported, the way a notebook cell displays
//! its last expression. Assignments, calls and everything else produce a
//! success without a value.

use indexmap::IndexMap;
use quarry_core::{FailureKind, Outcome, RenderedValue};
use serde_json::Number;

use crate::frame::Table;
use crate::{Namespace, Value};

/// Type tag reported for tables.
pub const TABLE_TYPE: &str = "polars.DataFrame";

/// Extract the displayed value of `source` from its final `namespace`.
///
/// Never fails on the value itself: cells that JSON cannot carry degrade to
/// their string form. A `SerializationError` is reported only when `source`
/// no longer parses.
#[must_use]
pub fn extract(source: &str, namespace: &Namespace) -> Outcome {
    let program = match quarry_core::parse(source) {
        Ok(program) => program,
        Err(e) => return Outcome::failure(FailureKind::SerializationError, e.to_string()),
    };
    let value = program
        .trailing_bare_name()
        .and_then(|name| namespace.get(name))
        .map(render);
    Outcome::success(value)
}

/// Render one value.
#[must_use]
pub fn render(value: &Value) -> RenderedValue {
    match value {
        Value::Table(table) if !table.is_lazy() => render_table(table),
        other => RenderedValue::Scalar {
            type_name: other.type_name().to_owned(),
            value: other.to_string(),
        },
    }
}

fn render_table(table: &Table) -> RenderedValue {
    let data: IndexMap<String, Vec<serde_json::Value>> = table
        .columns()
        .iter()
        .map(|(name, cells)| (name.clone(), cells.iter().map(cell_to_json).collect()))
        .collect();
    RenderedValue::Table {
        type_name: TABLE_TYPE.to_owned(),
        data,
        shape: [table.height(), table.width()],
    }
}

fn cell_to_json(cell: &Value) -> serde_json::Value {
    match cell {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::Float(x) => Number::from_f64(*x)
            .map_or_else(|| serde_json::Value::String(cell.to_string()), serde_json::Value::Number),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        nested => serde_json::Value::String(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn namespace(bindings: Vec<(&str, Value)>) -> Namespace {
        let mut ns = Namespace::new();
        for (name, value) in bindings {
            ns.insert(name, value);
        }
        ns
    }

    fn table(columns: Vec<(&str, Vec<Value>)>) -> Value {
        let columns = columns.into_iter().map(|(n, c)| (n.to_owned(), c)).collect();
        match Table::new(columns) {
            Ok(t) => Value::table(t),
            Err(e) => panic!("table must build: {e}"),
        }
    }

    #[test]
    fn trailing_bare_name_is_rendered() {
        let ns = namespace(vec![("x", Value::Int(42))]);
        let outcome = extract("x = 42\nx", &ns);
        assert_eq!(
            outcome.value(),
            Some(&RenderedValue::Scalar {
                type_name: "int".to_owned(),
                value: "42".to_owned()
            })
        );
    }

    #[test]
    fn assignments_and_calls_render_nothing() {
        let ns = namespace(vec![("x", Value::Int(1))]);
        assert_eq!(extract("x = 1", &ns), Outcome::success(None));
        assert_eq!(extract("x = 1\nprint(x)", &ns), Outcome::success(None));
        assert_eq!(extract("x = 1\nx + 1", &ns), Outcome::success(None));
    }

    #[test]
    fn unbound_trailing_name_renders_nothing() {
        assert_eq!(extract("missing", &Namespace::new()), Outcome::success(None));
    }

    #[test]
    fn tables_render_columns_and_shape() {
        let t = table(vec![
            ("a", vec![Value::Int(1), Value::Int(2)]),
            ("b", vec![Value::Float(f64::NAN), Value::None]),
        ]);
        let outcome = extract("t", &namespace(vec![("t", t)]));
        let json = match serde_json::to_value(&outcome) {
            Ok(v) => v,
            Err(e) => panic!("serialize: {e}"),
        };
        assert_eq!(json["result"]["type"], TABLE_TYPE);
        assert_eq!(json["result"]["shape"], json!([2, 2]));
        assert_eq!(json["result"]["data"]["a"], json!([1, 2]));
        assert_eq!(json["result"]["data"]["b"], json!(["nan", null]));
    }

    #[test]
    fn nested_cells_degrade_to_strings() {
        let t = table(vec![("xs", vec![Value::list(vec![Value::Int(1)])])]);
        let rendered = render(&t);
        assert!(matches!(
            rendered,
            RenderedValue::Table { data, .. } if data["xs"] == vec![json!("[1]")]
        ));
    }

    #[test]
    fn lazy_frames_render_as_plans() {
        let lazy = match Table::new(IndexMap::new()) {
            Ok(t) => Value::table(t.with_lazy(true)),
            Err(e) => panic!("table must build: {e}"),
        };
        assert_eq!(render(&lazy).type_name(), "LazyFrame");
    }

    #[test]
    fn unparsable_source_is_a_serialization_error() {
        let outcome = extract("x = (", &Namespace::new());
        assert_eq!(outcome.failure_kind(), Some(FailureKind::SerializationError));
    }
}
