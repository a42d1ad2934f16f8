//! Runtime values of the snippet language.
//!
//! Containers are reference counted and copy on write: reading a name is
//! cheap, and mutating a container that is shared clones it first, so every
//! binding behaves as an independent value.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use quarry_core::syntax::ast::Expr;

use crate::frame::{ColumnExpr, GroupBy, Table};
use crate::ExecutorError;

/// Deepest container nesting a run may build. Keeps rendering and dropping
/// values within a small, fixed stack.
pub const MAX_VALUE_DEPTH: usize = 100;

/// A runtime value.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Tuple(Arc<Vec<Value>>),
    Dict(Arc<IndexMap<Key, Value>>),
    Range(Range),
    Lambda(Arc<Lambda>),
    Builtin(Builtin),
    Module(Module),
    DataFn(DataFn),
    BoundMethod(Arc<BoundMethod>),
    Table(Arc<Table>),
    Expr(Arc<ColumnExpr>),
    GroupBy(Arc<GroupBy>),
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Arc::new(items))
    }

    #[must_use]
    pub fn tuple(items: Vec<Value>) -> Self {
        Self::Tuple(Arc::new(items))
    }

    #[must_use]
    pub fn dict(entries: IndexMap<Key, Value>) -> Self {
        Self::Dict(Arc::new(entries))
    }

    #[must_use]
    pub fn table(table: Table) -> Self {
        Self::Table(Arc::new(table))
    }

    #[must_use]
    pub fn expr(expr: ColumnExpr) -> Self {
        Self::Expr(Arc::new(expr))
    }

    /// The conventional type name, as `type(x).__name__` would report it.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Range(_) => "range",
            Self::Lambda(_) => "function",
            Self::Builtin(_) | Self::DataFn(_) => "builtin_function_or_method",
            Self::Module(_) => "module",
            Self::BoundMethod(_) => "method",
            Self::Table(t) if t.is_lazy() => "LazyFrame",
            Self::Table(_) => "DataFrame",
            Self::Expr(_) => "Expr",
            Self::GroupBy(_) => "GroupBy",
        }
    }

    /// Truth value, or a `TypeError` for values whose truth is ambiguous.
    ///
    /// # Errors
    /// Tables, expressions and group-by handles have no truth value.
    pub fn truthy(&self) -> Result<bool, ExecutorError> {
        Ok(match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) | Self::Tuple(items) => !items.is_empty(),
            Self::Dict(entries) => !entries.is_empty(),
            Self::Range(r) => r.len() > 0,
            Self::Table(_) | Self::Expr(_) | Self::GroupBy(_) => {
                return Err(ExecutorError::type_error(format!(
                    "the truth value of a {} is ambiguous",
                    self.type_name()
                )))
            }
            Self::Lambda(_)
            | Self::Builtin(_)
            | Self::Module(_)
            | Self::DataFn(_)
            | Self::BoundMethod(_) => true,
        })
    }

    /// Integer view of ints and bools.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of any number.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_) | Self::Bool(_))
    }

    /// Equality with numeric coercion: `1 == 1.0 == True`.
    #[must_use]
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            },
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.py_eq(y))
            }
            (Self::Dict(a), Self::Dict(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.py_eq(other)))
            }
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::DataFn(a), Self::DataFn(b)) => a == b,
            (Self::Module(a), Self::Module(b)) => a == b,
            (Self::Table(a), Self::Table(b)) => Arc::ptr_eq(a, b),
            (Self::Lambda(a), Self::Lambda(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Ordering for `<`, `sorted` and friends.
    ///
    /// # Errors
    /// Returns a `TypeError` when the two values are not orderable.
    pub fn py_cmp(&self, other: &Value) -> Result<Ordering, ExecutorError> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Ok(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => Ok(x.cmp(&y)),
                _ => {
                    let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                    Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
                }
            },
            (Self::Str(a), Self::Str(b)) => Ok(a.cmp(b)),
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.py_cmp(y)? {
                        Ordering::Equal => {}
                        unequal => return Ok(unequal),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(ExecutorError::type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// `true` if container nesting below this value stays within `limit`.
    #[must_use]
    pub fn fits_depth(&self, limit: usize) -> bool {
        match self {
            Self::List(items) | Self::Tuple(items) => {
                limit > 0 && items.iter().all(|v| v.fits_depth(limit - 1))
            }
            Self::Dict(entries) => limit > 0 && entries.values().all(|v| v.fits_depth(limit - 1)),
            Self::Lambda(lambda) => {
                limit > 0 && lambda.captured.iter().all(|(_, v)| v.fits_depth(limit - 1))
            }
            Self::BoundMethod(method) => limit > 0 && method.receiver.fits_depth(limit - 1),
            _ => true,
        }
    }

    /// Reject values that would be placed inside a container while already
    /// at the nesting ceiling.
    ///
    /// # Errors
    /// [`ExecutorError::NestingDepth`] when `self` is too deep to be wrapped.
    pub fn ensure_nestable(&self) -> Result<(), ExecutorError> {
        if self.fits_depth(MAX_VALUE_DEPTH - 1) {
            Ok(())
        } else {
            Err(ExecutorError::NestingDepth {
                limit: MAX_VALUE_DEPTH,
            })
        }
    }

    /// `repr()`-style rendering: strings are quoted.
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => quote(s),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => f.write_str(&format_float(*x)),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => write_seq(f, "[", "]", items, false),
            Self::Tuple(items) => write_seq(f, "(", ")", items, items.len() == 1),
            Self::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k.to_value().repr(), v.repr())?;
                }
                f.write_str("}")
            }
            Self::Range(r) => {
                if r.step == 1 {
                    write!(f, "range({}, {})", r.start, r.stop)
                } else {
                    write!(f, "range({}, {}, {})", r.start, r.stop, r.step)
                }
            }
            Self::Lambda(_) => f.write_str("<function <lambda>>"),
            Self::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Self::DataFn(d) => write!(f, "<function polars.{}>", d.name()),
            Self::Module(m) => write!(f, "<module '{}'>", m.name()),
            Self::BoundMethod(m) => write!(f, "<bound method {}.{}>", m.receiver.type_name(), m.name),
            Self::Table(t) => write!(f, "{t}"),
            Self::Expr(e) => write!(f, "{e}"),
            Self::GroupBy(g) => write!(f, "<GroupBy by={:?}>", g.keys()),
        }
    }
}

fn write_seq(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    close: &str,
    items: &[Value],
    trailing_comma: bool,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&item.repr())?;
    }
    if trailing_comma {
        f.write_str(",")?;
    }
    f.write_str(close)
}

/// Quote a string the way `repr()` does.
#[must_use]
pub fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

/// Shortest round-trip float rendering: `1.0`, `0.1`, `1e+20`, `nan`, `inf`.
#[must_use]
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_owned();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let magnitude = x.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let raw = format!("{x:e}");
        let (mantissa, exponent) = raw.split_once('e').unwrap_or((&raw, "0"));
        let (sign, digits) = match exponent.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exponent),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if x.fract() == 0.0 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

/// Hashable dictionary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Bool(bool),
    Int(i64),
    /// Non-integral floats, by bit pattern.
    Float(u64),
    Str(Arc<str>),
    Tuple(Vec<Key>),
}

impl Key {
    /// Key form of a value. Integral floats collapse onto ints.
    ///
    /// # Errors
    /// Returns a `TypeError` for unhashable values.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn from_value(value: &Value) -> Result<Self, ExecutorError> {
        Ok(match value {
            Value::None => Self::None,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Self::Int(*f as i64)
                } else {
                    Self::Float(f.to_bits())
                }
            }
            Value::Str(s) => Self::Str(Arc::clone(s)),
            Value::Tuple(items) => {
                Self::Tuple(items.iter().map(Key::from_value).collect::<Result<_, _>>()?)
            }
            other => {
                return Err(ExecutorError::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Self::Str(s) => Value::Str(Arc::clone(s)),
            Self::Tuple(items) => Value::tuple(items.iter().map(Key::to_value).collect()),
        }
    }
}

/// `range(start, stop, step)`; never materialised unless asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    #[must_use]
    pub fn len(&self) -> usize {
        let (start, stop, step) = (
            i128::from(self.start),
            i128::from(self.stop),
            i128::from(self.step),
        );
        let n = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        usize::try_from(n).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`, assuming `index < len()`.
    #[must_use]
    pub fn nth(&self, index: usize) -> i64 {
        let offset = i128::try_from(index).unwrap_or(i128::MAX) * i128::from(self.step);
        i64::try_from(i128::from(self.start) + offset).unwrap_or(self.stop)
    }

    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }
}

/// A `lambda` value: parameters, body and the enclosing locals it captured.
#[derive(Debug)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Expr,
    pub captured: Vec<(String, Value)>,
}

/// `receiver.name` looked up without being called.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

macro_rules! named_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            #[must_use]
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

named_enum! {
    /// Free functions the interpreter implements.
    pub enum Builtin {
        Print => "print",
        Len => "len",
        Sum => "sum",
        Min => "min",
        Max => "max",
        Abs => "abs",
        Round => "round",
        Range => "range",
        Sorted => "sorted",
        Str => "str",
        Int => "int",
        Float => "float",
        Bool => "bool",
        List => "list",
        Dict => "dict",
        Tuple => "tuple",
        Zip => "zip",
        Enumerate => "enumerate",
        Isinstance => "isinstance",
    }
}

named_enum! {
    /// Modules the interpreter can provide.
    pub enum Module {
        Polars => "polars",
    }
}

named_enum! {
    /// Members of the data namespace.
    pub enum DataFn {
        DataFrame => "DataFrame",
        ReadCsv => "read_csv",
        ScanCsv => "scan_csv",
        Col => "col",
        Lit => "lit",
    }
}

impl Module {
    /// Conventional alias bound next to the module name.
    #[must_use]
    pub fn alias(self) -> &'static str {
        match self {
            Self::Polars => "pl",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_render_like_python() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(-3.0), "-3.0");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(f64::NAN), "nan");
        assert_eq!(format_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn containers_render_with_reprs() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::None]);
        assert_eq!(list.to_string(), "[1, 'a', None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).to_string(), "(1,)");
        let mut entries = IndexMap::new();
        entries.insert(Key::Str("k".into()), Value::Float(1.5));
        assert_eq!(Value::dict(entries).to_string(), "{'k': 1.5}");
    }

    #[test]
    fn quote_prefers_single_quotes() {
        assert_eq!(quote("it's"), "\"it's\"");
        assert_eq!(quote("a\nb"), "'a\\nb'");
    }

    #[test]
    fn numeric_equality_coerces() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::Int(1).py_eq(&Value::str("1")));
    }

    #[test]
    fn ordering_of_mixed_types_is_a_type_error() {
        assert!(Value::Int(1).py_cmp(&Value::str("a")).is_err());
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::Int(2)]).py_cmp(&Value::list(vec![Value::Int(1)])).ok(),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn integral_float_keys_collapse_to_int() {
        assert_eq!(Key::from_value(&Value::Float(2.0)).ok(), Some(Key::Int(2)));
        assert!(Key::from_value(&Value::list(Vec::new())).is_err());
    }

    #[test]
    fn range_len_and_membership() {
        let r = Range { start: 0, stop: 10, step: 3 };
        assert_eq!(r.len(), 4);
        assert_eq!(r.nth(3), 9);
        assert!(r.contains(6));
        assert!(!r.contains(7));
        let down = Range { start: 5, stop: 0, step: -2 };
        assert_eq!(down.len(), 3);
        assert!(down.contains(1));
    }

    #[test]
    fn nesting_ceiling_is_detected() {
        let mut value = Value::Int(0);
        for _ in 0..MAX_VALUE_DEPTH - 1 {
            value = Value::list(vec![value]);
        }
        assert!(value.ensure_nestable().is_ok());
        let deeper = Value::list(vec![value]);
        assert!(matches!(
            deeper.ensure_nestable(),
            Err(ExecutorError::NestingDepth { .. })
        ));
    }

    #[test]
    fn ambiguous_truth_values_error() {
        let expr = Value::expr(ColumnExpr::Column("a".to_owned()));
        assert!(expr.truthy().is_err());
        assert_eq!(Value::list(Vec::new()).truthy().ok(), Some(false));
    }
}
