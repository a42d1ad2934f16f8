//! Free functions bound in the global namespace.

use std::cmp::Ordering;

use indexmap::IndexMap;
use quarry_core::syntax::ast::BinOp;

use crate::args::{int_arg, Args};
use crate::interpreter::Interpreter;
use crate::value::{Builtin, Key, Range};
use crate::{ops, ExecutorError, Value};

fn len_of(value: &Value) -> Result<usize, ExecutorError> {
    Ok(match value {
        Value::Str(s) => s.chars().count(),
        Value::List(items) | Value::Tuple(items) => items.len(),
        Value::Dict(entries) => entries.len(),
        Value::Range(r) => r.len(),
        Value::Table(t) => t.height(),
        other => {
            return Err(ExecutorError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    })
}

fn to_int(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

impl Interpreter<'_> {
    pub(crate) fn call_builtin(&mut self, builtin: Builtin, mut args: Args) -> Result<Value, ExecutorError> {
        let name = builtin.name();
        match builtin {
            Builtin::Print => {
                let sep = match args.take_keyword("sep") {
                    None | Some(Value::None) => " ".to_owned(),
                    Some(v) => v.to_string(),
                };
                let end = match args.take_keyword("end") {
                    None | Some(Value::None) => "\n".to_owned(),
                    Some(v) => v.to_string(),
                };
                let items = args.finish(name)?;
                let line = items.iter().map(ToString::to_string).collect::<Vec<_>>().join(&sep);
                self.budget.charge(line.len() + end.len())?;
                self.stdout.push_str(&line);
                self.stdout.push_str(&end);
                Ok(Value::None)
            }
            Builtin::Len => {
                let [value] = exact::<1>(args, name)?;
                Ok(to_int(len_of(&value)?))
            }
            Builtin::Sum => {
                let start = args.take_keyword("start");
                let mut positional = args.finish_between(name, 1, 2)?.into_iter();
                let iterable = positional.next().unwrap_or(Value::None);
                let mut total = positional.next().or(start).unwrap_or(Value::Int(0));
                for item in self.iterate(&iterable)? {
                    self.budget.tick()?;
                    total = ops::binary(BinOp::Add, &total, &item, &mut self.budget)?;
                }
                Ok(total)
            }
            Builtin::Min | Builtin::Max => self.extreme(builtin, args),
            Builtin::Abs => {
                let [value] = exact::<1>(args, name)?;
                match value {
                    Value::Int(i) => i
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| ExecutorError::Overflow("integer result out of range".to_owned())),
                    Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => Err(ExecutorError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Round => {
                let ndigits = args.take_keyword("ndigits");
                let mut positional = args.finish_between(name, 1, 2)?.into_iter();
                let value = positional.next().unwrap_or(Value::None);
                let ndigits = positional.next().or(ndigits).filter(|v| !v.is_none());
                round(&value, ndigits.as_ref())
            }
            Builtin::Range => {
                let bounds = args
                    .finish_between(name, 1, 3)?
                    .iter()
                    .map(|v| int_arg(v, name))
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => return Err(ExecutorError::type_error("range expected 1 to 3 arguments")),
                };
                if step == 0 {
                    return Err(ExecutorError::value_error("range() arg 3 must not be zero"));
                }
                Ok(Value::Range(Range { start, stop, step }))
            }
            Builtin::Sorted => {
                let key = args.take_keyword("key").filter(|v| !v.is_none());
                let reverse = match args.take_keyword("reverse") {
                    Some(v) => v.truthy()?,
                    None => false,
                };
                let [iterable] = exact::<1>(args, name)?;
                let items = self.collect_items(&iterable)?;
                Ok(Value::list(self.sort_values(items, key.as_ref(), reverse)?))
            }
            Builtin::Str => {
                let positional = args.finish_between(name, 0, 1)?;
                let text = positional.first().map(ToString::to_string).unwrap_or_default();
                self.budget.charge(text.len())?;
                Ok(Value::str(text))
            }
            Builtin::Int => {
                let positional = args.finish_between(name, 0, 1)?;
                match positional.first() {
                    None => Ok(Value::Int(0)),
                    Some(value) => to_int_value(value),
                }
            }
            Builtin::Float => {
                let positional = args.finish_between(name, 0, 1)?;
                match positional.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(value) => to_float_value(value),
                }
            }
            Builtin::Bool => {
                let positional = args.finish_between(name, 0, 1)?;
                match positional.first() {
                    None => Ok(Value::Bool(false)),
                    Some(value) => Ok(Value::Bool(value.truthy()?)),
                }
            }
            Builtin::List | Builtin::Tuple => {
                let positional = args.finish_between(name, 0, 1)?;
                let items = match positional.first() {
                    None => Vec::new(),
                    Some(iterable) => self.collect_items(iterable)?,
                };
                Ok(if builtin == Builtin::List {
                    Value::list(items)
                } else {
                    Value::tuple(items)
                })
            }
            Builtin::Dict => {
                let extra = args.take_keywords();
                let positional = args.finish_between(name, 0, 1)?;
                let mut entries = IndexMap::new();
                match positional.first() {
                    None => {}
                    Some(Value::Dict(source)) => entries = (**source).clone(),
                    Some(iterable) => {
                        for pair in self.collect_items(iterable)? {
                            let kv = self.collect_items(&pair)?;
                            let [k, v] = <[Value; 2]>::try_from(kv).map_err(|kv| {
                                ExecutorError::value_error(format!(
                                    "dictionary update sequence element has length {}; 2 is required",
                                    kv.len()
                                ))
                            })?;
                            entries.insert(Key::from_value(&k)?, v);
                        }
                    }
                }
                for (k, v) in extra {
                    entries.insert(Key::Str(k.into()), v);
                }
                self.budget.charge(entries.len())?;
                Ok(Value::dict(entries))
            }
            Builtin::Zip => {
                let sources = args.finish(name)?;
                let mut columns = Vec::with_capacity(sources.len());
                for source in &sources {
                    columns.push(self.collect_items(source)?);
                }
                let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
                self.budget.charge(rows.saturating_mul(columns.len() + 1))?;
                let mut out = Vec::with_capacity(rows);
                for row in 0..rows {
                    let tuple = Value::tuple(columns.iter().map(|c| c[row].clone()).collect());
                    tuple.ensure_nestable()?;
                    out.push(tuple);
                }
                Ok(Value::list(out))
            }
            Builtin::Enumerate => {
                let start = args.take_keyword("start");
                let mut positional = args.finish_between(name, 1, 2)?.into_iter();
                let iterable = positional.next().unwrap_or(Value::None);
                let start = match positional.next().or(start) {
                    Some(v) => int_arg(&v, name)?,
                    None => 0,
                };
                let items = self.collect_items(&iterable)?;
                self.budget.charge(items.len())?;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in (start..).zip(items) {
                    let pair = Value::tuple(vec![Value::Int(i), item]);
                    pair.ensure_nestable()?;
                    out.push(pair);
                }
                Ok(Value::list(out))
            }
            Builtin::Isinstance => {
                let [value, types] = exact::<2>(args, name)?;
                let candidates = match &types {
                    Value::Tuple(items) => items.to_vec(),
                    single => vec![single.clone()],
                };
                for candidate in &candidates {
                    let Value::Builtin(ty) = candidate else {
                        return Err(ExecutorError::type_error(
                            "isinstance() arg 2 must be a type or tuple of types",
                        ));
                    };
                    if is_instance(&value, *ty)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
        }
    }

    fn extreme(&mut self, builtin: Builtin, mut args: Args) -> Result<Value, ExecutorError> {
        let name = builtin.name();
        let key = args.take_keyword("key").filter(|v| !v.is_none());
        let default = args.take_keyword("default");
        let positional = args.finish(name)?;
        let items = match positional.as_slice() {
            [] => {
                return Err(ExecutorError::type_error(format!(
                    "{name} expected at least 1 argument, got 0"
                )))
            }
            [iterable] => self.collect_items(iterable)?,
            _ => positional,
        };
        let mut best: Option<(Value, Value)> = None;
        for item in items {
            self.budget.tick()?;
            let score = match &key {
                Some(f) => self.call_value(f, Args::positional(vec![item.clone()]))?,
                None => item.clone(),
            };
            let better = match &best {
                None => true,
                Some((best_score, _)) => {
                    let ordering = score.py_cmp(best_score)?;
                    if builtin == Builtin::Min {
                        ordering == Ordering::Less
                    } else {
                        ordering == Ordering::Greater
                    }
                }
            };
            if better {
                best = Some((score, item));
            }
        }
        match (best, default) {
            (Some((_, item)), _) => Ok(item),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(ExecutorError::value_error(format!("{name}() arg is an empty sequence"))),
        }
    }

    /// Stable sort with an optional key function. Comparison failures
    /// surface as `TypeError` instead of being ignored.
    pub(crate) fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> Result<Vec<Value>, ExecutorError> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let score = match key {
                Some(f) => self.call_value(f, Args::positional(vec![item.clone()]))?,
                None => item.clone(),
            };
            keyed.push((score, item));
        }
        self.budget.checkpoint()?;
        let mut failure = None;
        keyed.sort_by(|(a, _), (b, _)| match a.py_cmp(b) {
            Ok(ordering) if reverse => ordering.reverse(),
            Ok(ordering) => ordering,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        Ok(keyed.into_iter().map(|(_, item)| item).collect())
    }
}

/// Exactly `N` positional arguments and no keywords.
fn exact<const N: usize>(args: Args, name: &str) -> Result<[Value; N], ExecutorError> {
    let positional = args.finish_exact(name, N)?;
    <[Value; N]>::try_from(positional)
        .map_err(|_| ExecutorError::type_error(format!("{name}() takes exactly {N} arguments")))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn round(value: &Value, ndigits: Option<&Value>) -> Result<Value, ExecutorError> {
    let digits = ndigits.map(|d| int_arg(d, "round")).transpose()?;
    match (value, digits) {
        (Value::Int(_) | Value::Bool(_), _) => {
            let n = value.as_int().unwrap_or(0);
            match digits {
                Some(d) if d < 0 => {
                    let factor = 10i64.checked_pow(u32::try_from(-d).unwrap_or(u32::MAX)).unwrap_or(i64::MAX);
                    let rounded = (n as f64 / factor as f64).round_ties_even() * factor as f64;
                    Ok(Value::Int(rounded as i64))
                }
                _ => Ok(Value::Int(n)),
            }
        }
        (Value::Float(f), None) => {
            if !f.is_finite() {
                return Err(ExecutorError::value_error("cannot convert float NaN or infinity to integer"));
            }
            let rounded = f.round_ties_even();
            if rounded.abs() >= 9.2e18 {
                return Err(ExecutorError::Overflow("rounded value out of range".to_owned()));
            }
            Ok(Value::Int(rounded as i64))
        }
        (Value::Float(f), Some(d)) => {
            let d = i32::try_from(d.clamp(-308, 308)).unwrap_or(0);
            let factor = 10f64.powi(d);
            let scaled = f * factor;
            if !scaled.is_finite() {
                return Ok(Value::Float(*f));
            }
            Ok(Value::Float(scaled.round_ties_even() / factor))
        }
        (other, _) => Err(ExecutorError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_int_value(value: &Value) -> Result<Value, ExecutorError> {
    match value {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(ExecutorError::value_error("cannot convert float NaN or infinity to integer"));
            }
            let truncated = f.trunc();
            if truncated.abs() >= 9.2e18 {
                return Err(ExecutorError::Overflow("int too large to convert".to_owned()));
            }
            Ok(Value::Int(truncated as i64))
        }
        Value::Str(s) => s
            .trim()
            .replace('_', "")
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ExecutorError::value_error(format!("invalid literal for int() with base 10: {}", value.repr()))),
        other => Err(ExecutorError::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float_value(value: &Value) -> Result<Value, ExecutorError> {
    match value {
        Value::Int(_) | Value::Bool(_) | Value::Float(_) => Ok(Value::Float(value.as_f64().unwrap_or(0.0))),
        Value::Str(s) => {
            let text = s.trim().to_ascii_lowercase();
            let parsed = match text.trim_start_matches(['+', '-']) {
                "nan" => Some(f64::NAN),
                "inf" | "infinity" => Some(if text.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY }),
                _ => text.parse::<f64>().ok(),
            };
            parsed.map(Value::Float).ok_or_else(|| {
                ExecutorError::value_error(format!("could not convert string to float: {}", value.repr()))
            })
        }
        other => Err(ExecutorError::type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn is_instance(value: &Value, ty: Builtin) -> Result<bool, ExecutorError> {
    Ok(match ty {
        Builtin::Int => matches!(value, Value::Int(_) | Value::Bool(_)),
        Builtin::Float => matches!(value, Value::Float(_)),
        Builtin::Bool => matches!(value, Value::Bool(_)),
        Builtin::Str => matches!(value, Value::Str(_)),
        Builtin::List => matches!(value, Value::List(_)),
        Builtin::Tuple => matches!(value, Value::Tuple(_)),
        Builtin::Dict => matches!(value, Value::Dict(_)),
        Builtin::Range => matches!(value, Value::Range(_)),
        other => {
            return Err(ExecutorError::type_error(format!(
                "isinstance() arg 2 must be a type, not '{}'",
                other.name()
            )))
        }
    })
}
