//! The `polars` data namespace: constructors, column expressions and the
//! methods of tables, groupings and expressions.

use std::sync::Arc;

use indexmap::IndexMap;
use quarry_core::syntax::ast::BinOp;

use crate::args::{count_arg, str_arg, Args};
use crate::frame::{read_csv, AggFunc, ColumnExpr, GroupBy, JoinKind, Table};
use crate::interpreter::Interpreter;
use crate::ops;
use crate::value::{DataFn, Key};
use crate::{ExecutorError, Value};

const DEFAULT_PREVIEW_ROWS: usize = 5;

/// Flatten names, expressions and lists of either into expressions.
fn exprs_from(values: Vec<Value>) -> Result<Vec<ColumnExpr>, ExecutorError> {
    let mut exprs = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::Str(name) => exprs.push(ColumnExpr::Column(name.to_string())),
            Value::Expr(expr) => exprs.push((*expr).clone()),
            Value::List(items) | Value::Tuple(items) => exprs.extend(exprs_from(items.to_vec())?),
            other => {
                return Err(ExecutorError::type_error(format!(
                    "expected a column name or expression, got '{}'",
                    other.type_name()
                )))
            }
        }
    }
    Ok(exprs)
}

/// Flatten names and lists of names.
fn names_from(values: Vec<Value>, func: &str) -> Result<Vec<String>, ExecutorError> {
    let mut names = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::List(items) | Value::Tuple(items) => names.extend(names_from(items.to_vec(), func)?),
            other => names.push(str_arg(&other, func)?.to_owned()),
        }
    }
    Ok(names)
}

/// Build a table from `[{column: value}, ...]`. Columns appear in order of
/// first mention; rows missing a column get null.
fn table_from_records(records: &[Value]) -> Result<Table, ExecutorError> {
    let mut columns: IndexMap<String, Vec<Value>> = IndexMap::new();
    for (row, record) in records.iter().enumerate() {
        let Value::Dict(entries) = record else {
            return Err(ExecutorError::type_error(format!(
                "DataFrame records must be dicts, got '{}'",
                record.type_name()
            )));
        };
        for (key, value) in entries.iter() {
            let Key::Str(name) = key else {
                return Err(ExecutorError::type_error("DataFrame column names must be strings"));
            };
            let column = columns
                .entry(name.to_string())
                .or_insert_with(|| vec![Value::None; row]);
            column.push(value.clone());
        }
        for column in columns.values_mut() {
            column.resize(row + 1, Value::None);
        }
    }
    Table::new(columns)
}

impl Interpreter<'_> {
    /// Call a member of the data namespace such as `pl.DataFrame(...)`.
    pub(crate) fn call_data_fn(&mut self, member: DataFn, mut args: Args) -> Result<Value, ExecutorError> {
        match member {
            DataFn::DataFrame => {
                let data = args.take_keyword("data");
                let positional = args.finish_between(member.name(), 0, 1)?;
                let table = match positional.into_iter().next().or(data) {
                    None | Some(Value::None) => Table::empty(),
                    Some(Value::Dict(entries)) => Table::from_dict(&entries, &mut self.budget)?,
                    Some(Value::List(records)) => {
                        self.budget.charge(records.len())?;
                        table_from_records(&records)?
                    }
                    Some(Value::Table(table)) => (*table).clone(),
                    Some(other) => {
                        return Err(ExecutorError::type_error(format!(
                            "DataFrame() cannot be built from '{}'",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::table(table))
            }
            DataFn::ReadCsv | DataFn::ScanCsv => {
                let source = args.take_keyword("source");
                let positional = args.finish_between(member.name(), 0, 1)?;
                let path = positional.into_iter().next().or(source).ok_or_else(|| {
                    ExecutorError::type_error(format!("{}() missing required argument: 'source'", member.name()))
                })?;
                let path = str_arg(&path, member.name())?.to_owned();
                let capabilities = self.capabilities;
                let table = read_csv(&path, capabilities.data_root(), &mut self.budget)?;
                Ok(Value::table(table.with_lazy(member == DataFn::ScanCsv)))
            }
            DataFn::Col => {
                let names = names_from(args.finish_between(member.name(), 1, usize::MAX)?, member.name())?;
                match <[String; 1]>::try_from(names) {
                    Ok([name]) => Ok(Value::expr(ColumnExpr::Column(name))),
                    Err(names) => Ok(Value::list(
                        names.into_iter().map(|n| Value::expr(ColumnExpr::Column(n))).collect(),
                    )),
                }
            }
            DataFn::Lit => {
                let value = args.finish_exact(member.name(), 1)?.remove(0);
                match value {
                    Value::Expr(_) => Ok(value),
                    cell => {
                        cell.ensure_nestable()?;
                        Ok(Value::expr(ColumnExpr::Literal(cell)))
                    }
                }
            }
        }
    }

    pub(crate) fn table_method(&mut self, table: &Arc<Table>, name: &str, mut args: Args) -> Result<Value, ExecutorError> {
        let budget = &mut self.budget;
        let result = match name {
            "select" | "with_columns" | "with_column" => {
                let named = args.take_keywords();
                let mut exprs = exprs_from(args.finish(name)?)?;
                for (alias, value) in named {
                    exprs.push(ColumnExpr::lift(&value).alias(alias));
                }
                if name == "select" {
                    table.select(&exprs, budget)?
                } else {
                    table.with_columns(&exprs, budget)?
                }
            }
            "filter" => {
                let mut predicates = exprs_from(args.finish(name)?)?.into_iter();
                let first = predicates
                    .next()
                    .ok_or_else(|| ExecutorError::type_error("filter() needs at least one predicate"))?;
                let predicate = predicates.fold(first, |acc, p| ColumnExpr::binary(BinOp::BitAnd, acc, p));
                table.filter(&predicate, budget)?
            }
            "sort" => {
                let descending = args.take_keyword("descending").or_else(|| args.take_keyword("reverse"));
                let by = exprs_from(args.finish_between(name, 1, usize::MAX)?)?;
                let flags = match descending {
                    None => vec![false; by.len()],
                    Some(Value::List(flags) | Value::Tuple(flags)) => {
                        flags.iter().map(Value::truthy).collect::<Result<_, _>>()?
                    }
                    Some(flag) => vec![flag.truthy()?; by.len()],
                };
                if flags.len() != by.len() {
                    return Err(ExecutorError::value_error(format!(
                        "the length of `descending` ({}) does not match the length of `by` ({})",
                        flags.len(),
                        by.len()
                    )));
                }
                table.sort(&by, &flags, budget)?
            }
            "head" | "tail" => {
                let keyword = args.take_keyword("n");
                let positional = args.finish_between(name, 0, 1)?;
                let n = match positional.into_iter().next().or(keyword) {
                    Some(v) => count_arg(&v, name)?,
                    None => DEFAULT_PREVIEW_ROWS,
                };
                if name == "head" {
                    table.head(n, budget)?
                } else {
                    table.tail(n, budget)?
                }
            }
            "group_by" | "groupby" => {
                args.take_keyword("maintain_order");
                let keys = names_from(args.finish(name)?, name)?;
                return Ok(Value::GroupBy(Arc::new(GroupBy::new(Arc::clone(table), keys)?)));
            }
            "join" => {
                let on = args.take_keyword("on");
                let how = args.take_keyword("how");
                let mut positional = args.finish_between(name, 1, 2)?.into_iter();
                let other = match positional.next() {
                    Some(Value::Table(other)) => other,
                    Some(v) => {
                        return Err(ExecutorError::type_error(format!(
                            "join() expects a DataFrame, got '{}'",
                            v.type_name()
                        )))
                    }
                    None => return Err(ExecutorError::type_error("join() missing required argument: 'other'")),
                };
                let on = positional
                    .next()
                    .or(on)
                    .ok_or_else(|| ExecutorError::type_error("join() missing required argument: 'on'"))?;
                let on = names_from(vec![on], name)?;
                let how = match &how {
                    Some(v) => JoinKind::parse(str_arg(v, name)?)?,
                    None => JoinKind::Inner,
                };
                table.join(&other, &on, how, budget)?
            }
            "drop" => table.drop_columns(&names_from(args.finish(name)?, name)?)?,
            "rename" => {
                let mapping = match args.finish_exact(name, 1)?.remove(0) {
                    Value::Dict(entries) => entries
                        .iter()
                        .map(|(old, new)| match (old, new) {
                            (Key::Str(old), Value::Str(new)) => Ok((old.to_string(), new.to_string())),
                            _ => Err(ExecutorError::type_error("rename() expects a dict of str to str")),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    other => {
                        return Err(ExecutorError::type_error(format!(
                            "rename() expects a dict, got '{}'",
                            other.type_name()
                        )))
                    }
                };
                table.rename(&mapping)?
            }
            "collect" | "lazy" => {
                args.finish_exact(name, 0)?;
                (**table).clone().with_lazy(name == "lazy")
            }
            "to_dict" => {
                args.take_keyword("as_series");
                args.finish_exact(name, 0)?;
                budget.charge(table.height().saturating_mul(table.width()))?;
                let entries: IndexMap<Key, Value> = table
                    .columns()
                    .iter()
                    .map(|(column, cells)| (Key::Str(column.as_str().into()), Value::list(cells.clone())))
                    .collect();
                let dict = Value::dict(entries);
                dict.ensure_nestable()?;
                return Ok(dict);
            }
            _ => match AggFunc::from_name(name) {
                Some(func) => {
                    args.finish_exact(name, 0)?;
                    table.reduce(func, budget)?
                }
                None => {
                    return Err(ExecutorError::Attribute(format!(
                        "'DataFrame' object has no attribute '{name}'"
                    )))
                }
            },
        };
        Ok(Value::table(result))
    }

    pub(crate) fn group_method(&mut self, group: &Arc<GroupBy>, name: &str, mut args: Args) -> Result<Value, ExecutorError> {
        let exprs = if name == "agg" {
            let named = args.take_keywords();
            let mut exprs = exprs_from(args.finish(name)?)?;
            for (alias, value) in named {
                exprs.push(ColumnExpr::lift(&value).alias(alias));
            }
            exprs
        } else {
            let func = AggFunc::from_name(name)
                .ok_or_else(|| ExecutorError::Attribute(format!("'GroupBy' object has no attribute '{name}'")))?;
            args.finish_exact(name, 0)?;
            group
                .value_columns()
                .map(|column| ColumnExpr::Column(column.to_owned()).agg(func))
                .collect()
        };
        Ok(Value::table(group.agg(&exprs, &mut self.budget)?))
    }

    pub(crate) fn expr_method(&mut self, expr: &Arc<ColumnExpr>, name: &str, args: Args) -> Result<Value, ExecutorError> {
        let expr = (**expr).clone();
        if name == "alias" {
            let alias = args.finish_exact(name, 1)?;
            return ops::expr_value(expr.alias(str_arg(&alias[0], name)?));
        }
        let func = AggFunc::from_name(name)
            .ok_or_else(|| ExecutorError::Attribute(format!("'Expr' object has no attribute '{name}'")))?;
        args.finish_exact(name, 0)?;
        ops::expr_value(expr.agg(func))
    }
}
