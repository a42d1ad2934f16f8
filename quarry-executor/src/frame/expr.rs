use std::collections::HashSet;
use std::fmt;

use quarry_core::syntax::ast::{BinOp, CmpOp};

use super::{cell_cmp, Table};
use crate::budget::Budget;
use crate::ops;
use crate::value::Key;
use crate::{ExecutorError, Value};

/// A deferred column computation such as `pl.col("a").sum().alias("total")`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ColumnExpr {
    Column(String),
    Literal(Value),
    Binary {
        op: BinOp,
        left: Box<ColumnExpr>,
        right: Box<ColumnExpr>,
    },
    Compare {
        op: CmpOp,
        left: Box<ColumnExpr>,
        right: Box<ColumnExpr>,
    },
    /// `~expr`: logical not on booleans, bitwise not on ints.
    Not(Box<ColumnExpr>),
    Neg(Box<ColumnExpr>),
    Agg {
        func: AggFunc,
        input: Box<ColumnExpr>,
    },
    Alias {
        input: Box<ColumnExpr>,
        name: String,
    },
}

/// Result of evaluating an expression against a table.
#[derive(Debug, Clone)]
pub enum Series {
    /// A single value that broadcasts to any height.
    Scalar(Value),
    Column(Vec<Value>),
}

impl Series {
    /// Materialise to exactly `height` cells.
    ///
    /// # Errors
    /// `ValueError` when a full column has a different height.
    pub(crate) fn into_column(self, height: usize, budget: &mut Budget) -> Result<Vec<Value>, ExecutorError> {
        match self {
            Self::Scalar(value) => {
                budget.charge(height)?;
                Ok(vec![value; height])
            }
            Self::Column(cells) if cells.len() == height => Ok(cells),
            Self::Column(cells) => Err(ExecutorError::value_error(format!(
                "ShapeError: series of length {} does not match height {height}",
                cells.len()
            ))),
        }
    }

    fn cells(&self) -> &[Value] {
        match self {
            Self::Scalar(value) => std::slice::from_ref(value),
            Self::Column(cells) => cells,
        }
    }
}

impl ColumnExpr {
    /// Wrap a value as an expression; expressions pass through.
    #[must_use]
    pub fn lift(value: &Value) -> Self {
        match value {
            Value::Expr(expr) => (**expr).clone(),
            other => Self::Literal(other.clone()),
        }
    }

    #[must_use]
    pub fn binary(op: BinOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn compare(op: CmpOp, left: Self, right: Self) -> Self {
        Self::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn agg(self, func: AggFunc) -> Self {
        Self::Agg {
            func,
            input: Box::new(self),
        }
    }

    #[must_use]
    pub fn alias(self, name: impl Into<String>) -> Self {
        Self::Alias {
            input: Box::new(self),
            name: name.into(),
        }
    }

    /// Height of the expression tree.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::Column(_) | Self::Literal(_) => 1,
            Self::Binary { left, right, .. } | Self::Compare { left, right, .. } => {
                1 + left.depth().max(right.depth())
            }
            Self::Not(input) | Self::Neg(input) | Self::Agg { input, .. } | Self::Alias { input, .. } => {
                1 + input.depth()
            }
        }
    }

    /// Name of the column this expression produces: the alias if any,
    /// otherwise the leftmost column it reads.
    #[must_use]
    pub fn output_name(&self) -> String {
        match self {
            Self::Column(name) | Self::Alias { name, .. } => name.clone(),
            Self::Literal(_) => "literal".to_owned(),
            Self::Binary { left, .. } | Self::Compare { left, .. } => left.output_name(),
            Self::Not(input) | Self::Neg(input) | Self::Agg { input, .. } => input.output_name(),
        }
    }

    /// Evaluate against `table`.
    pub(crate) fn evaluate(&self, table: &Table, budget: &mut Budget) -> Result<Series, ExecutorError> {
        budget.tick()?;
        match self {
            Self::Column(name) => {
                let cells = table.column(name)?;
                budget.charge(cells.len())?;
                Ok(Series::Column(cells.to_vec()))
            }
            Self::Literal(value) => Ok(Series::Scalar(value.clone())),
            Self::Binary { op, left, right } => {
                let (l, r) = (left.evaluate(table, budget)?, right.evaluate(table, budget)?);
                zip_cells(l, r, budget, |a, b, budget| ops::binary(*op, a, b, budget))
            }
            Self::Compare { op, left, right } => {
                let (l, r) = (left.evaluate(table, budget)?, right.evaluate(table, budget)?);
                zip_cells(l, r, budget, |a, b, budget| ops::compare(*op, a, b, budget))
            }
            Self::Not(input) => map_cells(input.evaluate(table, budget)?, |v| match v {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                Value::Int(i) => Ok(Value::Int(!i)),
                other => Err(ExecutorError::type_error(format!(
                    "'~' is not supported for {} columns",
                    other.type_name()
                ))),
            }),
            Self::Neg(input) => {
                let series = input.evaluate(table, budget)?;
                let mut out = Vec::with_capacity(series.cells().len());
                for cell in series.cells() {
                    out.push(if cell.is_none() {
                        Value::None
                    } else {
                        ops::negate(cell)?
                    });
                }
                Ok(reshape(series, out))
            }
            Self::Agg { func, input } => {
                let series = input.evaluate(table, budget)?;
                budget.checkpoint()?;
                Ok(Series::Scalar(func.apply(series.cells())?))
            }
            Self::Alias { input, .. } => input.evaluate(table, budget),
        }
    }
}

fn reshape(like: Series, cells: Vec<Value>) -> Series {
    match like {
        Series::Scalar(_) => Series::Scalar(cells.into_iter().next().unwrap_or(Value::None)),
        Series::Column(_) => Series::Column(cells),
    }
}

fn map_cells(
    series: Series,
    f: impl Fn(&Value) -> Result<Value, ExecutorError>,
) -> Result<Series, ExecutorError> {
    let mut out = Vec::with_capacity(series.cells().len());
    for cell in series.cells() {
        out.push(if cell.is_none() { Value::None } else { f(cell)? });
    }
    Ok(reshape(series, out))
}

/// Apply `f` element-wise with scalar broadcasting. Nulls propagate.
fn zip_cells(
    left: Series,
    right: Series,
    budget: &mut Budget,
    f: impl Fn(&Value, &Value, &mut Budget) -> Result<Value, ExecutorError>,
) -> Result<Series, ExecutorError> {
    let apply = |a: &Value, b: &Value, budget: &mut Budget| {
        if a.is_none() || b.is_none() {
            Ok(Value::None)
        } else {
            f(a, b, budget)
        }
    };
    match (left, right) {
        (Series::Scalar(a), Series::Scalar(b)) => Ok(Series::Scalar(apply(&a, &b, budget)?)),
        (Series::Column(cells), Series::Scalar(b)) => {
            budget.charge(cells.len())?;
            let out = cells
                .iter()
                .map(|a| apply(a, &b, budget))
                .collect::<Result<_, _>>()?;
            Ok(Series::Column(out))
        }
        (Series::Scalar(a), Series::Column(cells)) => {
            budget.charge(cells.len())?;
            let out = cells
                .iter()
                .map(|b| apply(&a, b, budget))
                .collect::<Result<_, _>>()?;
            Ok(Series::Column(out))
        }
        (Series::Column(l), Series::Column(r)) => {
            if l.len() != r.len() {
                return Err(ExecutorError::value_error(format!(
                    "ShapeError: cannot combine series of length {} and {}",
                    l.len(),
                    r.len()
                )));
            }
            budget.charge(l.len())?;
            let out = l
                .iter()
                .zip(&r)
                .map(|(a, b)| apply(a, b, budget))
                .collect::<Result<_, _>>()?;
            Ok(Series::Column(out))
        }
    }
}

impl fmt::Display for ColumnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(name) => write!(f, "col(\"{name}\")"),
            Self::Literal(value) => write!(f, "lit({})", value.repr()),
            Self::Binary { op, left, right } => write!(f, "[({left}) {} ({right})]", op.symbol()),
            Self::Compare { op, left, right } => write!(f, "[({left}) {} ({right})]", op.symbol()),
            Self::Not(input) => write!(f, "~({input})"),
            Self::Neg(input) => write!(f, "-({input})"),
            Self::Agg { func, input } => write!(f, "{input}.{}()", func.name()),
            Self::Alias { input, name } => write!(f, "{input}.alias(\"{name}\")"),
        }
    }
}

/// Column reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AggFunc {
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    Std,
    Var,
    NUnique,
    First,
    Last,
}

impl AggFunc {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => Self::Sum,
            "mean" => Self::Mean,
            "median" => Self::Median,
            "min" => Self::Min,
            "max" => Self::Max,
            "count" => Self::Count,
            "std" => Self::Std,
            "var" => Self::Var,
            "n_unique" => Self::NUnique,
            "first" => Self::First,
            "last" => Self::Last,
            _ => return None,
        })
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Std => "std",
            Self::Var => "var",
            Self::NUnique => "n_unique",
            Self::First => "first",
            Self::Last => "last",
        }
    }

    /// Reduce `cells` to one value. Numeric reductions over non-numeric
    /// data yield null, as do reductions over no data.
    ///
    /// # Errors
    /// `OverflowError` when an integer sum leaves the `i64` range, or
    /// `TypeError` when `n_unique` meets unhashable cells.
    #[allow(clippy::cast_precision_loss)]
    pub fn apply(self, cells: &[Value]) -> Result<Value, ExecutorError> {
        let present: Vec<&Value> = cells.iter().filter(|v| !v.is_none()).collect();
        let numeric = !present.is_empty() && present.iter().all(|v| v.is_number());
        let floats = || present.iter().filter_map(|v| v.as_f64()).collect::<Vec<f64>>();
        Ok(match self {
            Self::Sum => {
                if present.is_empty() {
                    Value::Int(0)
                } else if !numeric {
                    Value::None
                } else if present.iter().all(|v| v.as_int().is_some()) {
                    let mut total: i64 = 0;
                    for v in &present {
                        total = total
                            .checked_add(v.as_int().unwrap_or(0))
                            .ok_or_else(|| ExecutorError::Overflow("integer sum overflow".to_owned()))?;
                    }
                    Value::Int(total)
                } else {
                    Value::Float(floats().iter().sum())
                }
            }
            Self::Mean if numeric => {
                let xs = floats();
                Value::Float(xs.iter().sum::<f64>() / xs.len() as f64)
            }
            Self::Median if numeric => {
                let mut xs = floats();
                xs.sort_by(f64::total_cmp);
                let mid = xs.len() / 2;
                if xs.len() % 2 == 1 {
                    Value::Float(xs[mid])
                } else {
                    Value::Float((xs[mid - 1] + xs[mid]) / 2.0)
                }
            }
            Self::Var | Self::Std if numeric && present.len() > 1 => {
                let xs = floats();
                let n = xs.len() as f64;
                let mean = xs.iter().sum::<f64>() / n;
                let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
                Value::Float(if self == Self::Std { var.sqrt() } else { var })
            }
            Self::Mean | Self::Median | Self::Var | Self::Std => Value::None,
            Self::Min => present
                .iter()
                .min_by(|a, b| cell_cmp(a, b))
                .map_or(Value::None, |v| (*v).clone()),
            Self::Max => present
                .iter()
                .max_by(|a, b| cell_cmp(a, b))
                .map_or(Value::None, |v| (*v).clone()),
            Self::Count => Value::Int(i64::try_from(present.len()).unwrap_or(i64::MAX)),
            Self::NUnique => {
                let mut seen = HashSet::new();
                for cell in cells {
                    seen.insert(Key::from_value(cell)?);
                }
                Value::Int(i64::try_from(seen.len()).unwrap_or(i64::MAX))
            }
            Self::First => cells.first().cloned().unwrap_or(Value::None),
            Self::Last => cells.last().cloned().unwrap_or(Value::None),
        })
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::{CancelToken, ExecutionLimits};

    fn budget() -> Budget {
        Budget::new(&ExecutionLimits::default(), CancelToken::new())
    }

    fn table() -> Table {
        let mut columns = IndexMap::new();
        columns.insert("a".to_owned(), vec![Value::Int(1), Value::Int(2), Value::None]);
        columns.insert("b".to_owned(), vec![Value::Float(0.5), Value::Float(1.5), Value::Float(2.5)]);
        match Table::new(columns) {
            Ok(t) => t,
            Err(e) => panic!("table must build: {e}"),
        }
    }

    fn col(name: &str) -> ColumnExpr {
        ColumnExpr::Column(name.to_owned())
    }

    fn cells(series: Series) -> Vec<String> {
        series.cells().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn arithmetic_broadcasts_literals_and_propagates_nulls() {
        let expr = ColumnExpr::binary(BinOp::Mul, col("a"), ColumnExpr::Literal(Value::Int(10)));
        let series = match expr.evaluate(&table(), &mut budget()) {
            Ok(s) => s,
            Err(e) => panic!("evaluate failed: {e}"),
        };
        assert_eq!(cells(series), vec!["10", "20", "None"]);
    }

    #[test]
    fn comparison_yields_boolean_column() {
        let expr = ColumnExpr::compare(CmpOp::Gt, col("b"), ColumnExpr::Literal(Value::Float(1.0)));
        let series = match expr.evaluate(&table(), &mut budget()) {
            Ok(s) => s,
            Err(e) => panic!("evaluate failed: {e}"),
        };
        assert_eq!(cells(series), vec!["False", "True", "True"]);
    }

    #[test]
    fn aggregations_skip_nulls() {
        assert!(AggFunc::Sum.apply(&[Value::Int(1), Value::None, Value::Int(2)]).is_ok_and(|v| v.py_eq(&Value::Int(3))));
        assert!(AggFunc::Count.apply(&[Value::Int(1), Value::None]).is_ok_and(|v| v.py_eq(&Value::Int(1))));
        assert!(AggFunc::Mean.apply(&[Value::Int(1), Value::Int(2)]).is_ok_and(|v| v.py_eq(&Value::Float(1.5))));
        assert!(AggFunc::Median.apply(&[Value::Int(5), Value::Int(1), Value::Int(3)]).is_ok_and(|v| v.py_eq(&Value::Float(3.0))));
        assert!(AggFunc::Mean.apply(&[]).is_ok_and(|v| v.is_none()));
    }

    #[test]
    fn std_uses_sample_variance() {
        let std = AggFunc::Std.apply(&[Value::Int(2), Value::Int(4), Value::Int(4), Value::Int(4), Value::Int(5), Value::Int(5), Value::Int(7), Value::Int(9)]);
        let value = std.ok().and_then(|v| v.as_f64()).unwrap_or(f64::NAN);
        assert!((value - 2.138_089_935).abs() < 1e-6, "got {value}");
    }

    #[test]
    fn output_name_follows_alias_then_leftmost_column() {
        let expr = ColumnExpr::binary(BinOp::Add, col("x"), col("y")).agg(AggFunc::Sum);
        assert_eq!(expr.output_name(), "x");
        assert_eq!(expr.alias("total").output_name(), "total");
    }

    #[test]
    fn display_reads_like_the_builder_calls() {
        let expr = col("a").agg(AggFunc::Sum).alias("s");
        assert_eq!(expr.to_string(), "col(\"a\").sum().alias(\"s\")");
    }
}
