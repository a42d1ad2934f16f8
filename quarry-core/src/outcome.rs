//! The single object that crosses the pipeline boundary, and its wire form.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};

/// Category of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FailureKind {
    /// The source could not be parsed.
    SyntaxError,
    /// Static analysis rejected the source.
    UnsafeCode,
    /// A runtime fault inside the sandbox, including limit violations.
    ExecutionError,
    /// Evaluation exceeded its wall-clock bound.
    Timeout,
    /// The result step could not re-parse the source.
    SerializationError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SyntaxError => "SyntaxError",
            Self::UnsafeCode => "UnsafeCode",
            Self::ExecutionError => "ExecutionError",
            Self::Timeout => "Timeout",
            Self::SerializationError => "SerializationError",
        };
        f.write_str(name)
    }
}

/// Transport-safe form of the value a snippet produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RenderedValue {
    /// Frame-like values: columnar data plus `[rows, cols]`.
    Table {
        #[serde(rename = "type")]
        type_name: String,
        data: IndexMap<String, Vec<serde_json::Value>>,
        shape: [usize; 2],
    },
    /// Everything else: the value's string form.
    Scalar {
        #[serde(rename = "type")]
        type_name: String,
        value: String,
    },
}

impl RenderedValue {
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Table { type_name, .. } | Self::Scalar { type_name, .. } => type_name,
        }
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Outcome {
    /// The run completed; `value` is `None` unless the last line was a bound bare name.
    Success { value: Option<RenderedValue> },
    /// The run was rejected or failed.
    Failure { kind: FailureKind, message: String },
}

impl Outcome {
    #[must_use]
    pub fn success(value: Option<RenderedValue>) -> Self {
        Self::Success { value }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            Self::Success { .. } => None,
        }
    }

    /// The rendered value of a successful run.
    #[must_use]
    pub fn value(&self) -> Option<&RenderedValue> {
        match self {
            Self::Success { value } => value.as_ref(),
            Self::Failure { .. } => None,
        }
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Failure { message, .. } => Some(message),
            Self::Success { .. } => None,
        }
    }

    /// Convert into the `{"status": ...}` shape returned to tool callers.
    #[must_use]
    pub fn to_wire(&self) -> WireOutcome {
        match self {
            Self::Success { value } => WireOutcome::Success {
                result: value.clone(),
            },
            Self::Failure { kind, message } => WireOutcome::Error {
                message: format!("{kind}: {message}"),
            },
        }
    }
}

impl Serialize for Outcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

/// Outbound JSON shape:
/// `{"status": "success", "result": ...}` or `{"status": "error", "message": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WireOutcome {
    Success { result: Option<RenderedValue> },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn to_json(outcome: &Outcome) -> serde_json::Value {
        match serde_json::to_value(outcome) {
            Ok(v) => v,
            Err(e) => panic!("serialization failed: {e}"),
        }
    }

    #[test]
    fn success_without_value_serializes_null_result() {
        let json = to_json(&Outcome::success(None));
        assert_eq!(json, json!({"status": "success", "result": null}));
    }

    #[test]
    fn table_value_serializes_type_data_and_shape() {
        let mut data = IndexMap::new();
        data.insert("a".to_owned(), vec![json!(1), json!(2), json!(3)]);
        let outcome = Outcome::success(Some(RenderedValue::Table {
            type_name: "polars.DataFrame".to_owned(),
            data,
            shape: [3, 1],
        }));
        let json = to_json(&outcome);
        assert_eq!(json["result"]["type"], "polars.DataFrame");
        assert_eq!(json["result"]["shape"], json!([3, 1]));
        assert_eq!(json["result"]["data"]["a"], json!([1, 2, 3]));
    }

    #[test]
    fn scalar_value_serializes_string_form() {
        let outcome = Outcome::success(Some(RenderedValue::Scalar {
            type_name: "int".to_owned(),
            value: "42".to_owned(),
        }));
        assert_eq!(
            to_json(&outcome),
            json!({"status": "success", "result": {"type": "int", "value": "42"}})
        );
    }

    #[test]
    fn failure_serializes_kind_prefixed_message() {
        let outcome = Outcome::failure(FailureKind::Timeout, "exceeded 5000ms");
        assert_eq!(
            to_json(&outcome),
            json!({"status": "error", "message": "Timeout: exceeded 5000ms"})
        );
    }

    #[test]
    fn wire_outcome_round_trips_through_json() {
        let wire = Outcome::failure(FailureKind::UnsafeCode, "bad").to_wire();
        let text = match serde_json::to_string(&wire) {
            Ok(t) => t,
            Err(e) => panic!("serialize: {e}"),
        };
        let back: WireOutcome = match serde_json::from_str(&text) {
            Ok(w) => w,
            Err(e) => panic!("deserialize: {e}"),
        };
        assert_eq!(back, wire);
    }
}
