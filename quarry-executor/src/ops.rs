//! Operators on runtime values.
//!
//! When either operand is a column expression the operator builds a larger
//! expression instead of computing a value.

use std::sync::Arc;

use quarry_core::syntax::ast::{BinOp, CmpOp, UnaryOp};

use crate::budget::Budget;
use crate::frame::ColumnExpr;
use crate::value::{Key, MAX_VALUE_DEPTH};
use crate::{ExecutorError, Value};

/// Wrap a freshly built expression, enforcing the nesting ceiling.
///
/// # Errors
/// [`ExecutorError::NestingDepth`] when the expression tree is too deep.
pub(crate) fn expr_value(expr: ColumnExpr) -> Result<Value, ExecutorError> {
    if expr.depth() > MAX_VALUE_DEPTH {
        return Err(ExecutorError::NestingDepth {
            limit: MAX_VALUE_DEPTH,
        });
    }
    Ok(Value::expr(expr))
}

fn overflow() -> ExecutorError {
    ExecutorError::Overflow("integer result out of range".to_owned())
}

fn unsupported(op: &str, left: &Value, right: &Value) -> ExecutorError {
    ExecutorError::type_error(format!(
        "unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    ))
}

/// `left <op> right`.
///
/// # Errors
/// `TypeError`, `ZeroDivisionError`, `OverflowError`, or an allocation
/// limit error for oversized results.
pub(crate) fn binary(op: BinOp, left: &Value, right: &Value, budget: &mut Budget) -> Result<Value, ExecutorError> {
    if matches!(left, Value::Expr(_)) || matches!(right, Value::Expr(_)) {
        return expr_value(ColumnExpr::binary(
            op,
            ColumnExpr::lift(left),
            ColumnExpr::lift(right),
        ));
    }
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) if matches!(op, BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor) => {
            Ok(Value::Bool(match op {
                BinOp::BitAnd => a & b,
                BinOp::BitOr => a | b,
                _ => a ^ b,
            }))
        }
        (a, b) if a.as_int().is_some() && b.as_int().is_some() => {
            int_op(op, a.as_int().unwrap_or(0), b.as_int().unwrap_or(0))
        }
        (a, b) if a.is_number() && b.is_number() => {
            float_op(op, a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0), left, right)
        }
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => {
            budget.charge(a.len() + b.len())?;
            let mut out = String::with_capacity(a.len() + b.len());
            out.push_str(a);
            out.push_str(b);
            Ok(Value::str(out))
        }
        (Value::Str(s), n) | (n, Value::Str(s)) if op == BinOp::Mul && n.as_int().is_some() => {
            let times = repeat_count(n);
            if s.is_empty() || times == 0 {
                return Ok(Value::str(""));
            }
            budget.charge(s.len().saturating_mul(times))?;
            Ok(Value::str(s.repeat(times)))
        }
        (Value::List(a), Value::List(b)) if op == BinOp::Add => {
            budget.charge(a.len() + b.len())?;
            Ok(Value::list(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == BinOp::Add => {
            budget.charge(a.len() + b.len())?;
            Ok(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Value::List(items), n) | (n, Value::List(items)) if op == BinOp::Mul && n.as_int().is_some() => {
            Ok(Value::list(repeat_items(items, repeat_count(n), budget)?))
        }
        (Value::Tuple(items), n) | (n, Value::Tuple(items)) if op == BinOp::Mul && n.as_int().is_some() => {
            Ok(Value::tuple(repeat_items(items, repeat_count(n), budget)?))
        }
        (Value::Dict(a), Value::Dict(b)) if op == BinOp::BitOr => {
            budget.charge(a.len() + b.len())?;
            let mut merged = (**a).clone();
            for (k, v) in b.iter() {
                merged.insert(k.clone(), v.clone());
            }
            Ok(Value::Dict(Arc::new(merged)))
        }
        _ => Err(unsupported(op.symbol(), left, right)),
    }
}

fn repeat_count(n: &Value) -> usize {
    n.as_int().map_or(0, |n| usize::try_from(n).unwrap_or(0))
}

/// Copies between cancellation checks while repeating a sequence.
const REPEAT_CHECK_INTERVAL: usize = 4096;

fn repeat_items(items: &[Value], times: usize, budget: &mut Budget) -> Result<Vec<Value>, ExecutorError> {
    if items.is_empty() || times == 0 {
        return Ok(Vec::new());
    }
    budget.charge(items.len().saturating_mul(times))?;
    let mut out = Vec::with_capacity(items.len() * times);
    for i in 0..times {
        if i % REPEAT_CHECK_INTERVAL == 0 {
            budget.checkpoint()?;
        }
        out.extend_from_slice(items);
    }
    Ok(out)
}

#[allow(clippy::cast_precision_loss)]
fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value, ExecutorError> {
    let value = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(ExecutorError::ZeroDivision("division by zero".to_owned()));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(ExecutorError::ZeroDivision(
                    "integer division or modulo by zero".to_owned(),
                ));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(ExecutorError::ZeroDivision(
                    "integer division or modulo by zero".to_owned(),
                ));
            }
            let r = a.wrapping_rem(b);
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(ExecutorError::ZeroDivision(
                        "0.0 cannot be raised to a negative power".to_owned(),
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
    };
    Ok(Value::Int(value))
}

fn float_op(op: BinOp, a: f64, b: f64, left: &Value, right: &Value) -> Result<Value, ExecutorError> {
    let zero = |what: &str| Err(ExecutorError::ZeroDivision(format!("float {what} by zero")));
    Ok(Value::Float(match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b == 0.0 => return zero("division"),
        BinOp::Div => a / b,
        BinOp::FloorDiv if b == 0.0 => return zero("floor division"),
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod if b == 0.0 => return zero("modulo"),
        BinOp::Mod => {
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ExecutorError::ZeroDivision(
                    "0.0 cannot be raised to a negative power".to_owned(),
                ));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(ExecutorError::value_error("math domain error"));
            }
            a.powf(b)
        }
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
            return Err(unsupported(op.symbol(), left, right))
        }
    }))
}

/// `left <op> right` for comparison operators.
///
/// # Errors
/// `TypeError` for unordered operands or unsupported membership tests.
pub(crate) fn compare(op: CmpOp, left: &Value, right: &Value, _budget: &mut Budget) -> Result<Value, ExecutorError> {
    if matches!(left, Value::Expr(_)) || matches!(right, Value::Expr(_)) {
        return match op {
            CmpOp::Eq | CmpOp::NotEq | CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
                expr_value(ColumnExpr::compare(op, ColumnExpr::lift(left), ColumnExpr::lift(right)))
            }
            _ => Err(ExecutorError::type_error(format!(
                "'{}' is not supported for expressions",
                op.symbol()
            ))),
        };
    }
    let result = match op {
        CmpOp::Eq => left.py_eq(right),
        CmpOp::NotEq => !left.py_eq(right),
        CmpOp::Lt => left.py_cmp(right)?.is_lt(),
        CmpOp::LtE => left.py_cmp(right)?.is_le(),
        CmpOp::Gt => left.py_cmp(right)?.is_gt(),
        CmpOp::GtE => left.py_cmp(right)?.is_ge(),
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Is => identical(left, right),
        CmpOp::IsNot => !identical(left, right),
    };
    Ok(Value::Bool(result))
}

/// `item in container`.
///
/// # Errors
/// `TypeError` when the container does not support membership.
pub(crate) fn contains(container: &Value, item: &Value) -> Result<bool, ExecutorError> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(ExecutorError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
        Value::Dict(entries) => Ok(entries.contains_key(&Key::from_value(item)?)),
        Value::Range(r) => Ok(item.as_int().is_some_and(|i| r.contains(i))),
        Value::Table(t) => Ok(item.as_str().is_some_and(|name| t.has_column(name))),
        other => Err(ExecutorError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b) || a == b,
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => Arc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Arc::ptr_eq(a, b),
        (Value::Table(a), Value::Table(b)) => Arc::ptr_eq(a, b),
        (Value::Lambda(a), Value::Lambda(b)) => Arc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Module(a), Value::Module(b)) => a == b,
        (Value::DataFn(a), Value::DataFn(b)) => a == b,
        _ => false,
    }
}

/// Arithmetic negation.
///
/// # Errors
/// `TypeError` for non-numbers, `OverflowError` for `-i64::MIN`.
pub(crate) fn negate(value: &Value) -> Result<Value, ExecutorError> {
    match value {
        Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        Value::Bool(b) => Ok(Value::Int(-i64::from(*b))),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Expr(e) => expr_value(ColumnExpr::Neg(Box::new((**e).clone()))),
        other => Err(ExecutorError::type_error(format!(
            "bad operand type for unary -: '{}'",
            other.type_name()
        ))),
    }
}

/// Unary operators.
///
/// # Errors
/// `TypeError` for unsupported operands.
pub(crate) fn unary(op: UnaryOp, value: &Value) -> Result<Value, ExecutorError> {
    match op {
        UnaryOp::Neg => negate(value),
        UnaryOp::Pos => match value {
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::Int(_) | Value::Float(_) | Value::Expr(_) => Ok(value.clone()),
            other => Err(ExecutorError::type_error(format!(
                "bad operand type for unary +: '{}'",
                other.type_name()
            ))),
        },
        UnaryOp::Not => Ok(Value::Bool(!value.truthy()?)),
        UnaryOp::Invert => match value {
            Value::Int(i) => Ok(Value::Int(!i)),
            Value::Bool(b) => Ok(Value::Int(!i64::from(*b))),
            Value::Expr(e) => expr_value(ColumnExpr::Not(Box::new((**e).clone()))),
            other => Err(ExecutorError::type_error(format!(
                "bad operand type for unary ~: '{}'",
                other.type_name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CancelToken, ExecutionLimits};

    fn budget() -> Budget {
        Budget::new(&ExecutionLimits::default(), CancelToken::new())
    }

    fn eval(op: BinOp, a: Value, b: Value) -> Result<Value, ExecutorError> {
        binary(op, &a, &b, &mut budget())
    }

    fn shown(result: Result<Value, ExecutorError>) -> String {
        match result {
            Ok(v) => v.repr(),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn integer_division_follows_floor_semantics() {
        assert_eq!(shown(eval(BinOp::FloorDiv, Value::Int(-7), Value::Int(2))), "-4");
        assert_eq!(shown(eval(BinOp::Mod, Value::Int(-7), Value::Int(2))), "1");
        assert_eq!(shown(eval(BinOp::Mod, Value::Int(7), Value::Int(-2))), "-1");
        assert_eq!(shown(eval(BinOp::Div, Value::Int(7), Value::Int(2))), "3.5");
    }

    #[test]
    fn division_by_zero_is_reported() {
        assert!(matches!(
            eval(BinOp::Div, Value::Int(1), Value::Int(0)),
            Err(ExecutorError::ZeroDivision(_))
        ));
        assert!(matches!(
            eval(BinOp::Mod, Value::Float(1.0), Value::Float(0.0)),
            Err(ExecutorError::ZeroDivision(_))
        ));
    }

    #[test]
    fn integer_overflow_is_an_error() {
        assert!(matches!(
            eval(BinOp::Mul, Value::Int(i64::MAX), Value::Int(2)),
            Err(ExecutorError::Overflow(_))
        ));
        assert!(matches!(
            eval(BinOp::Pow, Value::Int(10), Value::Int(40)),
            Err(ExecutorError::Overflow(_))
        ));
        assert_eq!(shown(eval(BinOp::Pow, Value::Int(2), Value::Int(-1))), "0.5");
    }

    #[test]
    fn sequences_concatenate_and_repeat() {
        assert_eq!(shown(eval(BinOp::Add, Value::str("ab"), Value::str("cd"))), "'abcd'");
        assert_eq!(shown(eval(BinOp::Mul, Value::Int(3), Value::str("x"))), "'xxx'");
        assert_eq!(
            shown(eval(BinOp::Mul, Value::list(vec![Value::Int(0)]), Value::Int(2))),
            "[0, 0]"
        );
    }

    #[test]
    fn oversized_repeat_hits_allocation_limit() {
        let mut tight = Budget::new(
            &ExecutionLimits {
                max_cells: 1_000,
                ..ExecutionLimits::default()
            },
            CancelToken::new(),
        );
        let result = binary(BinOp::Mul, &Value::str("a"), &Value::Int(1_000_000_000_000), &mut tight);
        assert!(matches!(result, Err(ExecutorError::AllocationLimit { .. })));
    }

    #[test]
    fn repeating_empty_sequences_is_immediate() {
        let token = CancelToken::new();
        token.cancel();
        let mut cancelled = Budget::new(&ExecutionLimits::default(), token);
        let huge = Value::Int(1_000_000_000_000_000_000);
        for (empty, expected) in [
            (Value::list(Vec::new()), "[]"),
            (Value::tuple(Vec::new()), "()"),
            (Value::str(""), "''"),
        ] {
            assert_eq!(shown(binary(BinOp::Mul, &empty, &huge, &mut cancelled)), expected);
        }
    }

    #[test]
    fn repeating_checks_for_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        let mut cancelled = Budget::new(&ExecutionLimits::default(), token);
        let result = binary(BinOp::Mul, &Value::list(vec![Value::Int(1)]), &Value::Int(10), &mut cancelled);
        assert!(matches!(result, Err(ExecutorError::Cancelled)));
    }

    #[test]
    fn mixed_types_are_type_errors() {
        let message = shown(eval(BinOp::Add, Value::Int(1), Value::str("a")));
        assert_eq!(message, "TypeError: unsupported operand type(s) for +: 'int' and 'str'");
    }

    #[test]
    fn expressions_absorb_operators() {
        let col = Value::expr(ColumnExpr::Column("a".to_owned()));
        assert!(matches!(eval(BinOp::Add, col.clone(), Value::Int(1)), Ok(Value::Expr(_))));
        let cmp = compare(CmpOp::Gt, &Value::Int(1), &col, &mut budget());
        assert!(matches!(cmp, Ok(Value::Expr(_))));
        assert!(matches!(unary(UnaryOp::Invert, &col), Ok(Value::Expr(_))));
    }

    #[test]
    fn runaway_expression_chains_are_capped() {
        let mut expr = Value::expr(ColumnExpr::Column("a".to_owned()));
        let mut result = Ok(());
        for _ in 0..=MAX_VALUE_DEPTH {
            match binary(BinOp::Add, &expr, &Value::Int(1), &mut budget()) {
                Ok(next) => expr = next,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        assert!(matches!(result, Err(ExecutorError::NestingDepth { .. })));
    }

    #[test]
    fn membership_tests() {
        let list = Value::list(vec![Value::Int(1), Value::Float(2.0)]);
        assert!(contains(&list, &Value::Int(2)).unwrap_or(false));
        assert!(contains(&Value::str("hello"), &Value::str("ell")).unwrap_or(false));
        assert!(contains(&Value::Int(3), &Value::Int(3)).is_err());
    }

    proptest::proptest! {
        #[test]
        fn proptest_int_addition_is_checked(a in proptest::num::i64::ANY, b in proptest::num::i64::ANY) {
            match (eval(BinOp::Add, Value::Int(a), Value::Int(b)), a.checked_add(b)) {
                (Ok(Value::Int(sum)), Some(expected)) => proptest::prop_assert_eq!(sum, expected),
                (Err(ExecutorError::Overflow(_)), None) => {}
                (other, expected) => proptest::prop_assert!(false, "{} vs {:?}", shown(other), expected),
            }
        }

        #[test]
        fn proptest_floor_division_and_modulo_agree(a in -10_000i64..10_000, b in 1i64..100, negative: bool) {
            let b = if negative { -b } else { b };
            let (Ok(Value::Int(q)), Ok(Value::Int(r))) = (
                eval(BinOp::FloorDiv, Value::Int(a), Value::Int(b)),
                eval(BinOp::Mod, Value::Int(a), Value::Int(b)),
            ) else {
                return Err(proptest::test_runner::TestCaseError::fail("int operands must give ints"));
            };
            proptest::prop_assert_eq!(q * b + r, a);
            proptest::prop_assert!(r == 0 || (r < 0) == (b < 0), "remainder takes the divisor's sign");
        }
    }
}
