//! Methods of the built-in container and string types.
//!
//! Method names are part of the capability vocabulary: a method runs only
//! when its name is a granted callable, whatever the receiver.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::args::{int_arg, str_arg, Args};
use crate::format::format_string;
use crate::frame::AggFunc;
use crate::index::normalize_index;
use crate::interpreter::Interpreter;
use crate::value::Key;
use crate::{ExecutorError, Value};

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith", "endswith",
    "format", "count", "index", "find", "title",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "pop", "insert", "remove", "sort", "reverse", "index", "count", "copy", "clear",
];
const TUPLE_METHODS: &[&str] = &["index", "count"];
const DICT_METHODS: &[&str] = &["keys", "values", "items", "get", "pop", "update", "setdefault", "copy"];
const TABLE_METHODS: &[&str] = &[
    "select", "with_columns", "with_column", "filter", "sort", "head", "tail", "group_by", "groupby", "join",
    "drop", "rename", "collect", "lazy", "to_dict",
];

fn no_attribute(receiver: &Value, name: &str) -> ExecutorError {
    ExecutorError::Attribute(format!(
        "'{}' object has no attribute '{name}'",
        receiver.type_name()
    ))
}

impl Interpreter<'_> {
    /// Whether calling `name` on a place may change the stored value.
    pub(crate) fn mutates(name: &str) -> bool {
        matches!(
            name,
            "append" | "extend" | "pop" | "insert" | "remove" | "sort" | "reverse" | "clear" | "update" | "setdefault"
        )
    }

    pub(crate) fn has_method(receiver: &Value, name: &str) -> bool {
        match receiver {
            Value::Str(_) => STR_METHODS.contains(&name),
            Value::List(_) => LIST_METHODS.contains(&name),
            Value::Tuple(_) => TUPLE_METHODS.contains(&name),
            Value::Dict(_) => DICT_METHODS.contains(&name),
            Value::Table(_) => TABLE_METHODS.contains(&name) || AggFunc::from_name(name).is_some(),
            Value::GroupBy(_) => name == "agg" || AggFunc::from_name(name).is_some(),
            Value::Expr(_) => name == "alias" || AggFunc::from_name(name).is_some(),
            _ => false,
        }
    }

    /// Call `receiver.name(args)`. Mutating methods update `receiver`.
    pub(crate) fn call_method(&mut self, receiver: &mut Value, name: &str, args: Args) -> Result<Value, ExecutorError> {
        if name.starts_with('_') || !Self::has_method(receiver, name) {
            return Err(no_attribute(receiver, name));
        }
        self.ensure_granted(name)?;
        match receiver {
            Value::Str(s) => {
                let s = Arc::clone(s);
                self.str_method(&s, name, args)
            }
            Value::List(items) => self.list_method(items, name, args),
            Value::Tuple(items) => {
                let items = Arc::clone(items);
                sequence_query(&items, name, args)
            }
            Value::Dict(entries) => self.dict_method(entries, name, args),
            Value::Table(table) => {
                let table = Arc::clone(table);
                self.table_method(&table, name, args)
            }
            Value::GroupBy(group) => {
                let group = Arc::clone(group);
                self.group_method(&group, name, args)
            }
            Value::Expr(expr) => {
                let expr = Arc::clone(expr);
                self.expr_method(&expr, name, args)
            }
            other => Err(no_attribute(other, name)),
        }
    }

    fn str_method(&mut self, s: &str, name: &str, mut args: Args) -> Result<Value, ExecutorError> {
        let result = match name {
            "upper" | "lower" | "title" => {
                args.finish_exact(name, 0)?;
                match name {
                    "upper" => s.to_uppercase(),
                    "lower" => s.to_lowercase(),
                    _ => title_case(s),
                }
            }
            "strip" | "lstrip" | "rstrip" => {
                let chars = args.finish_between(name, 0, 1)?;
                let set: Option<Vec<char>> = match chars.first() {
                    None | Some(Value::None) => None,
                    Some(v) => Some(str_arg(v, name)?.chars().collect()),
                };
                let stripped = |c: char| set.as_ref().map_or(c.is_whitespace(), |set| set.contains(&c));
                match name {
                    "strip" => s.trim_matches(stripped),
                    "lstrip" => s.trim_start_matches(stripped),
                    _ => s.trim_end_matches(stripped),
                }
                .to_owned()
            }
            "split" => {
                let sep = args.take_keyword("sep");
                let maxsplit = args.take_keyword("maxsplit");
                let mut positional = args.finish_between(name, 0, 2)?.into_iter();
                let sep = positional.next().or(sep).filter(|v| !v.is_none());
                let limit = match positional.next().or(maxsplit) {
                    Some(v) => usize::try_from(int_arg(&v, name)?).ok(),
                    None => None,
                };
                let parts: Vec<String> = match &sep {
                    None => {
                        self.budget.ensure_room(s.len() + s.len() / 2 + 1)?;
                        split_whitespace(s, limit)
                    }
                    Some(sep) => {
                        let sep = str_arg(sep, name)?;
                        if sep.is_empty() {
                            return Err(ExecutorError::value_error("empty separator"));
                        }
                        let pieces = s.matches(sep).count().min(limit.unwrap_or(usize::MAX)) + 1;
                        self.budget.ensure_room(s.len() + pieces)?;
                        match limit {
                            Some(n) => s.splitn(n + 1, sep).map(str::to_owned).collect(),
                            None => s.split(sep).map(str::to_owned).collect(),
                        }
                    }
                };
                self.budget.charge(s.len() + parts.len())?;
                return Ok(Value::list(parts.into_iter().map(Value::str).collect()));
            }
            "join" => {
                let [iterable] = exact_one(args, name)?;
                let items = self.collect_items(&iterable)?;
                let mut total = s.len().saturating_mul(items.len().saturating_sub(1));
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Str(piece) => total = total.saturating_add(piece.len()),
                        other => {
                            return Err(ExecutorError::type_error(format!(
                                "sequence item {i}: expected str instance, {} found",
                                other.type_name()
                            )))
                        }
                    }
                }
                self.budget.charge(total)?;
                let mut joined = String::with_capacity(total);
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        joined.push_str(s);
                    }
                    if let Value::Str(piece) = item {
                        joined.push_str(piece);
                    }
                }
                return Ok(Value::str(joined));
            }
            "replace" => {
                let positional = args.finish_between(name, 2, 3)?;
                let old = str_arg(&positional[0], name)?;
                let new = str_arg(&positional[1], name)?;
                let limit = match positional.get(2).map(|v| int_arg(v, name)).transpose()? {
                    Some(n) if n >= 0 => usize::try_from(n).unwrap_or(usize::MAX),
                    _ => usize::MAX,
                };
                let matches = if old.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(old).count()
                };
                let hits = matches.min(limit);
                let size = (s.len() - hits * old.len()).saturating_add(hits.saturating_mul(new.len()));
                self.budget.charge(size)?;
                let replaced = if limit == usize::MAX {
                    s.replace(old, new)
                } else {
                    s.replacen(old, new, limit)
                };
                return Ok(Value::str(replaced));
            }
            "startswith" | "endswith" => {
                let [affix] = exact_one(args, name)?;
                let candidates = match &affix {
                    Value::Tuple(items) => items.to_vec(),
                    single => vec![single.clone()],
                };
                for candidate in &candidates {
                    let candidate = str_arg(candidate, name)?;
                    let hit = if name == "startswith" {
                        s.starts_with(candidate)
                    } else {
                        s.ends_with(candidate)
                    };
                    if hit {
                        return Ok(Value::Bool(true));
                    }
                }
                return Ok(Value::Bool(false));
            }
            "format" => {
                let keywords = args.take_keywords();
                let positional = args.finish(name)?;
                let formatted = format_string(s, &positional, &keywords, &mut self.budget)?;
                self.budget.charge(s.len())?;
                return Ok(Value::str(formatted));
            }
            "count" => {
                let [needle] = exact_one(args, name)?;
                let needle = str_arg(&needle, name)?;
                let n = if needle.is_empty() {
                    s.chars().count() + 1
                } else {
                    s.matches(needle).count()
                };
                return Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)));
            }
            "index" | "find" => {
                let [needle] = exact_one(args, name)?;
                let needle = str_arg(&needle, name)?;
                return match s.find(needle) {
                    Some(byte) => Ok(Value::Int(i64::try_from(s[..byte].chars().count()).unwrap_or(i64::MAX))),
                    None if name == "find" => Ok(Value::Int(-1)),
                    None => Err(ExecutorError::value_error("substring not found")),
                };
            }
            _ => return Err(no_attribute(&Value::str(s), name)),
        };
        self.budget.charge(result.len())?;
        Ok(Value::str(result))
    }

    fn list_method(&mut self, items: &mut Arc<Vec<Value>>, name: &str, mut args: Args) -> Result<Value, ExecutorError> {
        match name {
            "append" => {
                let [item] = exact_one(args, name)?;
                item.ensure_nestable()?;
                self.budget.charge(1)?;
                Arc::make_mut(items).push(item);
                Ok(Value::None)
            }
            "extend" => {
                let [iterable] = exact_one(args, name)?;
                let extra = self.collect_items(&iterable)?;
                Arc::make_mut(items).extend(extra);
                Ok(Value::None)
            }
            "insert" => {
                let positional = args.finish_exact(name, 2)?;
                let index = int_arg(&positional[0], name)?;
                let item = positional[1].clone();
                item.ensure_nestable()?;
                self.budget.charge(1)?;
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
                Arc::make_mut(items).insert(usize::try_from(at).unwrap_or(0), item);
                Ok(Value::None)
            }
            "pop" => {
                let positional = args.finish_between(name, 0, 1)?;
                if items.is_empty() {
                    return Err(ExecutorError::Index("pop from empty list".to_owned()));
                }
                let index = match positional.first() {
                    Some(v) => int_arg(v, name)?,
                    None => -1,
                };
                let at = normalize_index(index, items.len())
                    .ok_or_else(|| ExecutorError::Index("pop index out of range".to_owned()))?;
                Ok(Arc::make_mut(items).remove(at))
            }
            "remove" => {
                let [item] = exact_one(args, name)?;
                let at = items
                    .iter()
                    .position(|v| v.py_eq(&item))
                    .ok_or_else(|| ExecutorError::value_error("list.remove(x): x not in list"))?;
                Arc::make_mut(items).remove(at);
                Ok(Value::None)
            }
            "sort" => {
                let key = args.take_keyword("key").filter(|v| !v.is_none());
                let reverse = match args.take_keyword("reverse") {
                    Some(v) => v.truthy()?,
                    None => false,
                };
                args.finish_exact(name, 0)?;
                let taken = std::mem::take(Arc::make_mut(items));
                let sorted = self.sort_values(taken, key.as_ref(), reverse)?;
                *Arc::make_mut(items) = sorted;
                Ok(Value::None)
            }
            "reverse" => {
                args.finish_exact(name, 0)?;
                Arc::make_mut(items).reverse();
                Ok(Value::None)
            }
            "clear" => {
                args.finish_exact(name, 0)?;
                Arc::make_mut(items).clear();
                Ok(Value::None)
            }
            "copy" => {
                args.finish_exact(name, 0)?;
                self.budget.charge(items.len())?;
                Ok(Value::list(items.to_vec()))
            }
            _ => {
                let shared = Arc::clone(items);
                sequence_query(&shared, name, args)
            }
        }
    }

    fn dict_method(
        &mut self,
        entries: &mut Arc<IndexMap<Key, Value>>,
        name: &str,
        mut args: Args,
    ) -> Result<Value, ExecutorError> {
        match name {
            "keys" | "values" | "items" => {
                args.finish_exact(name, 0)?;
                self.budget.charge(entries.len())?;
                let out = match name {
                    "keys" => entries.keys().map(Key::to_value).collect(),
                    "values" => entries.values().cloned().collect(),
                    _ => {
                        let mut pairs = Vec::with_capacity(entries.len());
                        for (k, v) in entries.iter() {
                            let pair = Value::tuple(vec![k.to_value(), v.clone()]);
                            pair.ensure_nestable()?;
                            pairs.push(pair);
                        }
                        pairs
                    }
                };
                Ok(Value::list(out))
            }
            "get" => {
                let positional = args.finish_between(name, 1, 2)?;
                let key = Key::from_value(&positional[0])?;
                Ok(entries
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| positional.get(1).cloned().unwrap_or(Value::None)))
            }
            "pop" => {
                let positional = args.finish_between(name, 1, 2)?;
                let key = Key::from_value(&positional[0])?;
                if !entries.contains_key(&key) {
                    return positional
                        .get(1)
                        .cloned()
                        .ok_or_else(|| ExecutorError::Key(positional[0].repr()));
                }
                Ok(Arc::make_mut(entries).shift_remove(&key).unwrap_or(Value::None))
            }
            "setdefault" => {
                let positional = args.finish_between(name, 1, 2)?;
                let key = Key::from_value(&positional[0])?;
                if let Some(existing) = entries.get(&key) {
                    return Ok(existing.clone());
                }
                let default = positional.get(1).cloned().unwrap_or(Value::None);
                default.ensure_nestable()?;
                self.budget.charge(1)?;
                Arc::make_mut(entries).insert(key, default.clone());
                Ok(default)
            }
            "update" => {
                let extra = args.take_keywords();
                let positional = args.finish_between(name, 0, 1)?;
                let mut updates: Vec<(Key, Value)> = Vec::new();
                match positional.first() {
                    None => {}
                    Some(Value::Dict(other)) => updates.extend(other.iter().map(|(k, v)| (k.clone(), v.clone()))),
                    Some(iterable) => {
                        for pair in self.collect_items(iterable)? {
                            let kv = self.collect_items(&pair)?;
                            let [k, v] = <[Value; 2]>::try_from(kv).map_err(|_| {
                                ExecutorError::value_error("dictionary update sequence element must have length 2")
                            })?;
                            updates.push((Key::from_value(&k)?, v));
                        }
                    }
                }
                updates.extend(extra.into_iter().map(|(k, v)| (Key::Str(k.into()), v)));
                self.budget.charge(updates.len())?;
                for (_, value) in &updates {
                    value.ensure_nestable()?;
                }
                Arc::make_mut(entries).extend(updates);
                Ok(Value::None)
            }
            "copy" => {
                args.finish_exact(name, 0)?;
                self.budget.charge(entries.len())?;
                Ok(Value::dict((**entries).clone()))
            }
            _ => Err(ExecutorError::Attribute(format!("'dict' object has no attribute '{name}'"))),
        }
    }
}

/// `index` and `count` shared by lists and tuples.
fn sequence_query(items: &[Value], name: &str, args: Args) -> Result<Value, ExecutorError> {
    let [needle] = exact_one(args, name)?;
    match name {
        "count" => {
            let n = items.iter().filter(|v| v.py_eq(&needle)).count();
            Ok(Value::Int(i64::try_from(n).unwrap_or(i64::MAX)))
        }
        "index" => items
            .iter()
            .position(|v| v.py_eq(&needle))
            .map(|i| Value::Int(i64::try_from(i).unwrap_or(i64::MAX)))
            .ok_or_else(|| ExecutorError::value_error(format!("{} is not in list", needle.repr()))),
        _ => Err(ExecutorError::Attribute(format!("sequence has no attribute '{name}'"))),
    }
}

fn exact_one(args: Args, name: &str) -> Result<[Value; 1], ExecutorError> {
    let positional = args.finish_exact(name, 1)?;
    <[Value; 1]>::try_from(positional)
        .map_err(|_| ExecutorError::type_error(format!("{name}() takes exactly one argument")))
}

fn split_whitespace(s: &str, limit: Option<usize>) -> Vec<String> {
    let Some(limit) = limit else {
        return s.split_whitespace().map(str::to_owned).collect();
    };
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if parts.len() == limit {
            parts.push(rest.to_owned());
            break;
        }
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        parts.push(rest[..end].to_owned());
        rest = rest[end..].trim_start();
    }
    parts
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

#[cfg(test)]
mod tests {
    use quarry_core::CapabilitySet;

    use crate::interpreter::{global_repr, run_source, run_with_cells};
    use crate::ExecutorError;

    fn refused(source: &str) -> bool {
        matches!(run_with_cells(source, 10_000), Err(ExecutorError::AllocationLimit { .. }))
    }

    #[test]
    fn string_methods() {
        assert_eq!(global_repr("x = '  Hi There '.strip().lower()", "x"), "'hi there'");
        assert_eq!(global_repr("x = 'a,b,,c'.split(',')", "x"), "['a', 'b', '', 'c']");
        assert_eq!(global_repr("x = ' a  b c '.split(maxsplit=1)", "x"), "['a', 'b c ']");
        assert_eq!(global_repr("x = '-'.join(['a', 'b'])", "x"), "'a-b'");
        assert_eq!(global_repr("x = 'aaa'.replace('a', 'b', 2)", "x"), "'bba'");
        assert_eq!(global_repr("x = 'data.csv'.endswith(('.csv', '.tsv'))", "x"), "True");
        assert_eq!(global_repr("x = '{} has {n:,}'.format('a', n=1200)", "x"), "'a has 1,200'");
        assert_eq!(global_repr("x = 'héllo'.index('l')", "x"), "2");
    }

    #[test]
    fn list_methods_mutate_the_named_value() {
        let src = "xs = [3, 1]\nxs.append(2)\nxs.sort()\nlast = xs.pop()\nxs.extend(range(2))";
        assert_eq!(global_repr(src, "xs"), "[1, 2, 0, 1]");
        assert_eq!(global_repr(src, "last"), "3");
        assert_eq!(global_repr("xs = [1, 2, 1]\nn = xs.count(1)", "n"), "2");
    }

    #[test]
    fn methods_on_temporaries_do_not_leak() {
        assert_eq!(global_repr("xs = [1]\nn = list(xs).append(2)", "xs"), "[1]");
    }

    #[test]
    fn dict_methods() {
        let src = "d = {'a': 1}\nd.update(b=2)\nv = d.get('z', 0)\nk = d.keys()\np = d.pop('a')";
        assert_eq!(global_repr(src, "d"), "{'b': 2}");
        assert_eq!(global_repr(src, "v"), "0");
        assert_eq!(global_repr(src, "k"), "['a', 'b']");
        assert_eq!(global_repr(src, "p"), "1");
        assert_eq!(global_repr("d = {'a': 1}\ni = d.items()", "i"), "[('a', 1)]");
    }

    #[test]
    fn error_cases() {
        let caps = CapabilitySet::default();
        assert!(matches!(run_source("x = [].pop()", &caps), Err(ExecutorError::Index(_))));
        assert!(matches!(run_source("x = 'abc'.index('z')", &caps), Err(ExecutorError::Value(_))));
        assert!(matches!(run_source("x = {}.pop('k')", &caps), Err(ExecutorError::Key(_))));
        assert!(matches!(run_source("x = '-'.join([1])", &caps), Err(ExecutorError::Type(_))));
    }

    #[test]
    fn string_results_are_charged_before_they_are_built() {
        assert!(refused("s = 'a' * 1000\nr = 'y' * 1000\nx = s.replace('', r)"));
        assert!(refused("s = 'ab' * 100\nx = s.replace('a', 'z' * 1000)"));
        assert!(refused("sep = 'x' * 200\nparts = [''] * 200\nx = sep.join(parts)"));
        assert!(refused("x = '{:>50000}'.format(1)"));
        assert!(refused("x = f'{1:>9000000000}'"));
        assert!(refused("x = f'{2.5:.9000000000f}'"));
        assert!(run_with_cells("x = '-'.join(['a'] * 100).replace('-', '')", 10_000).is_ok());
    }

    #[test]
    fn granted_method_vocabulary_can_be_extended() {
        let caps = CapabilitySet::default().with_callable("title");
        let out = run_source("x = 'ab cd'.title()", &caps);
        assert!(out.is_ok_and(|o| o.namespace.get("x").is_some_and(|v| v.to_string() == "Ab Cd")));
    }
}
