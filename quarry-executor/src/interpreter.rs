//! Tree-walking evaluator for vetted programs.
//!
//! The interpreter only ever sees a [`VettedProgram`], and the only names it
//! can resolve are the ones in its [`Namespace`], so a snippet reaches
//! nothing the capability set did not grant. Every statement and expression
//! node consumes one step of the [`Budget`], which also carries the
//! allocation ceiling, the deadline and the cancellation flag.

use std::sync::Arc;

use indexmap::IndexMap;
use quarry_auditor::VettedProgram;
use quarry_core::syntax::ast::{
    BinOp, BoolOp, Comprehension, Expr, ExprKind, FStringPart, KeywordArg, Stmt, StmtKind, Target,
};
use quarry_core::CapabilitySet;

use crate::args::Args;
use crate::budget::{Budget, CancelToken};
use crate::format::format_value;
use crate::index::{self, Subscript};
use crate::value::{BoundMethod, DataFn, Key, Lambda, Module, Range};
use crate::{ops, ExecutionLimits, ExecutionOutput, ExecutorError, Namespace, Value};

/// Control flow out of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

/// Evaluate `program` to completion on the current thread.
///
/// The namespace starts from what `capabilities` grants plus `bindings`.
///
/// # Errors
/// Any runtime fault, limit violation or cancellation, as an
/// [`ExecutorError`].
pub fn execute(
    program: &VettedProgram,
    capabilities: &CapabilitySet,
    bindings: Vec<(String, Value)>,
    limits: &ExecutionLimits,
    cancel: CancelToken,
) -> Result<ExecutionOutput, ExecutorError> {
    let mut interpreter = Interpreter {
        capabilities,
        globals: Namespace::seeded(capabilities, bindings),
        scopes: Vec::new(),
        budget: Budget::new(limits, cancel),
        stdout: String::new(),
        call_depth: 0,
        max_call_depth: limits.max_call_depth,
    };
    let result = interpreter.exec_block(&program.program().body);
    tracing::debug!(
        source_hash = %program.source_hash(),
        steps = interpreter.budget.steps(),
        cells = interpreter.budget.cells(),
        elapsed_ms = interpreter.budget.elapsed_ms(),
        ok = result.is_ok(),
        "interpreter finished"
    );
    match result? {
        Flow::Normal => Ok(ExecutionOutput::new(interpreter.globals, interpreter.stdout)),
        Flow::Break => Err(ExecutorError::LoopControl("break")),
        Flow::Continue => Err(ExecutorError::LoopControl("continue")),
    }
}

pub(crate) struct Interpreter<'a> {
    pub(crate) capabilities: &'a CapabilitySet,
    pub(crate) globals: Namespace,
    /// Comprehension and lambda scopes, innermost last.
    scopes: Vec<IndexMap<String, Value>>,
    pub(crate) budget: Budget,
    pub(crate) stdout: String,
    call_depth: usize,
    max_call_depth: usize,
}

/// Values produced by iterating a value. Ranges stay lazy.
pub(crate) enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { range: Range, next: usize },
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Items(items) => items.next(),
            Self::Range { range, next } => {
                if *next >= range.len() {
                    return None;
                }
                let value = range.nth(*next);
                *next += 1;
                Some(Value::Int(value))
            }
        }
    }
}

impl Interpreter<'_> {
    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, ExecutorError> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, ExecutorError> {
        self.budget.tick()?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let rhs = self.eval(value)?;
                self.aug_assign(target, *op, rhs)?;
            }
            StmtKind::Import { names } => {
                for alias in names {
                    let module = self.import(&alias.name)?;
                    self.bind(alias.bound_name(), Value::Module(module));
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let module = self.import(module)?;
                for alias in names {
                    let member = DataFn::from_name(&alias.name).ok_or_else(|| {
                        ExecutorError::Import(format!(
                            "cannot import name '{}' from '{}'",
                            alias.name,
                            module.name()
                        ))
                    })?;
                    let bound = alias.alias.as_deref().unwrap_or(&alias.name);
                    self.bind(bound, Value::DataFn(member));
                }
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy()? { body } else { orelse };
                return self.exec_block(branch);
            }
            StmtKind::While { test, body } => {
                while self.eval(test)?.truthy()? {
                    self.budget.tick()?;
                    if self.exec_block(body)? == Flow::Break {
                        break;
                    }
                }
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                for item in self.iterate(&iterable)? {
                    self.budget.tick()?;
                    self.assign(target, item)?;
                    if self.exec_block(body)? == Flow::Break {
                        break;
                    }
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn import(&self, name: &str) -> Result<Module, ExecutorError> {
        let root = name.split('.').next().unwrap_or(name);
        if !self.capabilities.allows_module(root) {
            return Err(ExecutorError::Import(format!("import of '{name}' is not granted")));
        }
        Module::from_name(name).ok_or_else(|| ExecutorError::Import(format!("No module named '{name}'")))
    }

    // --- names and places -------------------------------------------------

    fn lookup(&self, name: &str) -> Result<Value, ExecutorError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
            .ok_or_else(|| ExecutorError::Name(name.to_owned()))
    }

    fn bind(&mut self, name: &str, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_owned(), value);
            }
            None => {
                self.globals.insert(name, value);
            }
        }
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut Value, ExecutorError> {
        if let Some(scope) = self.scopes.iter_mut().rev().find(|s| s.contains_key(name)) {
            if let Some(slot) = scope.get_mut(name) {
                return Ok(slot);
            }
        }
        self.globals
            .get_mut(name)
            .ok_or_else(|| ExecutorError::Name(name.to_owned()))
    }

    /// Resolve `expr` as an assignable place: a name followed by item
    /// subscripts. Index expressions are evaluated here, left to right.
    fn place(&mut self, expr: &Expr) -> Result<Option<(String, Vec<Value>)>, ExecutorError> {
        match &expr.kind {
            ExprKind::Name(name) => Ok(Some((name.clone(), Vec::new()))),
            ExprKind::Subscript { value, index } if !matches!(index.kind, ExprKind::Slice { .. }) => {
                let Some((name, mut path)) = self.place(value)? else {
                    return Ok(None);
                };
                path.push(self.eval(index)?);
                Ok(Some((name, path)))
            }
            _ => Ok(None),
        }
    }

    /// Run `op` on the value stored at `name[path...]`, mutating it in place.
    ///
    /// The root value is moved out of its slot while `op` runs so that its
    /// storage is uniquely owned and copy-on-write does not clone it.
    fn with_place<T>(
        &mut self,
        name: &str,
        path: &[Value],
        op: impl FnOnce(&mut Self, &mut Value) -> Result<T, ExecutorError>,
    ) -> Result<T, ExecutorError> {
        let mut root = std::mem::replace(self.slot_mut(name)?, Value::None);
        let result = match navigate(&mut root, path) {
            Ok(target) => op(self, target),
            Err(e) => Err(e),
        };
        if let Ok(slot) = self.slot_mut(name) {
            *slot = root;
        }
        result
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), ExecutorError> {
        match target {
            Target::Name(name) => {
                self.bind(name, value);
                Ok(())
            }
            Target::Unpack(targets) => {
                let items: Vec<Value> = self.iterate(&value)?.collect();
                if items.len() < targets.len() {
                    return Err(ExecutorError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                if items.len() > targets.len() {
                    return Err(ExecutorError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            Target::Subscript { object, index } => {
                value.ensure_nestable()?;
                let place = self.place(object)?;
                let subscript = self.subscript(index)?;
                match place {
                    Some((name, path)) => self.with_place(&name, &path, |this, container| {
                        index::set_item(container, subscript, value, &mut this.budget)
                    }),
                    None => {
                        let mut temporary = self.eval(object)?;
                        index::set_item(&mut temporary, subscript, value, &mut self.budget)
                    }
                }
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, rhs: Value) -> Result<(), ExecutorError> {
        let (name, path) = match target {
            Target::Name(name) => (name.clone(), Vec::new()),
            Target::Subscript { object, index } => {
                let Some((name, mut path)) = self.place(object)? else {
                    return Err(ExecutorError::type_error(
                        "augmented assignment target must be a name or an item of one",
                    ));
                };
                match self.subscript(index)? {
                    Subscript::Item(key) => path.push(key),
                    Subscript::Slice { .. } => {
                        return Err(ExecutorError::type_error("slice assignment is not supported"))
                    }
                }
                (name, path)
            }
            Target::Unpack(_) => {
                return Err(ExecutorError::type_error(
                    "illegal expression for augmented assignment",
                ))
            }
        };
        self.with_place(&name, &path, |this, current| {
            if let (BinOp::Add, Value::List(items)) = (op, &mut *current) {
                if let Value::List(extra) = &rhs {
                    this.budget.charge(extra.len())?;
                    Arc::make_mut(items).extend(extra.iter().cloned());
                    return Ok(());
                }
            }
            *current = ops::binary(op, current, &rhs, &mut this.budget)?;
            Ok(())
        })
    }

    // --- expressions ------------------------------------------------------

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, ExecutorError> {
        self.budget.tick()?;
        match &expr.kind {
            ExprKind::None => Ok(Value::None),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Int(i) => Ok(Value::Int(*i)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => {
                self.budget.charge(s.len())?;
                Ok(Value::str(s.as_str()))
            }
            ExprKind::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(text) => {
                            self.budget.charge(text.len())?;
                            out.push_str(text);
                        }
                        FStringPart::Field { expr, spec } => {
                            let value = self.eval(expr)?;
                            let piece = format_value(&value, spec.as_deref().unwrap_or(""), &self.budget)?;
                            self.budget.charge(piece.len())?;
                            out.push_str(&piece);
                        }
                    }
                }
                Ok(Value::str(out))
            }
            ExprKind::Name(name) => self.lookup(name),
            ExprKind::List(items) => Ok(Value::list(self.eval_items(items)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_items(items)?)),
            ExprKind::Dict(entries) => {
                self.budget.charge(entries.len())?;
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = Key::from_value(&self.eval(key)?)?;
                    let value = self.eval(value)?;
                    value.ensure_nestable()?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }
            ExprKind::Attribute { value, attr } => {
                let receiver = self.eval(value)?;
                self.get_attribute(receiver, attr)
            }
            ExprKind::Subscript { value, index } => {
                let container = self.eval(value)?;
                let subscript = self.subscript(index)?;
                index::get_item(&container, &subscript, &mut self.budget)
            }
            ExprKind::Slice { .. } => Err(ExecutorError::type_error("slice syntax is only valid inside []")),
            ExprKind::Call { func, args, keywords } => self.eval_call(func, args, keywords),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                ops::unary(*op, &value)
            }
            ExprKind::Binary { op, left, right } => {
                let (l, r) = (self.eval(left)?, self.eval(right)?);
                ops::binary(*op, &l, &r, &mut self.budget)
            }
            ExprKind::BoolOp { op, left, right } => {
                let l = self.eval(left)?;
                let short_circuit = match op {
                    BoolOp::And => !l.truthy()?,
                    BoolOp::Or => l.truthy()?,
                };
                if short_circuit {
                    Ok(l)
                } else {
                    self.eval(right)
                }
            }
            ExprKind::Compare { left, comparisons } => {
                let mut l = self.eval(left)?;
                let mut result = Value::Bool(true);
                for (i, (op, right)) in comparisons.iter().enumerate() {
                    let r = self.eval(right)?;
                    result = ops::compare(*op, &l, &r, &mut self.budget)?;
                    if i + 1 < comparisons.len() && !result.truthy()? {
                        return Ok(result);
                    }
                    l = r;
                }
                Ok(result)
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            ExprKind::Lambda { params, body } => {
                let mut captured: IndexMap<String, Value> = IndexMap::new();
                for scope in &self.scopes {
                    for (name, value) in scope {
                        captured.insert(name.clone(), value.clone());
                    }
                }
                for value in captured.values() {
                    value.ensure_nestable()?;
                }
                Ok(Value::Lambda(Arc::new(Lambda {
                    params: params.clone(),
                    body: (**body).clone(),
                    captured: captured.into_iter().collect(),
                })))
            }
            ExprKind::ListComp { element, generators } => {
                let mut out = Vec::new();
                self.in_scope(|this| {
                    this.comprehend(generators, &mut |this: &mut Self| -> Result<(), ExecutorError> {
                        let value = this.eval(element)?;
                        value.ensure_nestable()?;
                        this.budget.charge(1)?;
                        out.push(value);
                        Ok(())
                    })
                })?;
                Ok(Value::list(out))
            }
            ExprKind::DictComp { key, value, generators } => {
                let mut out = IndexMap::new();
                self.in_scope(|this| {
                    this.comprehend(generators, &mut |this: &mut Self| -> Result<(), ExecutorError> {
                        let k = Key::from_value(&this.eval(key)?)?;
                        let v = this.eval(value)?;
                        v.ensure_nestable()?;
                        this.budget.charge(1)?;
                        out.insert(k, v);
                        Ok(())
                    })
                })?;
                Ok(Value::dict(out))
            }
        }
    }

    fn eval_items(&mut self, items: &[Expr]) -> Result<Vec<Value>, ExecutorError> {
        self.budget.charge(items.len())?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            let value = self.eval(item)?;
            value.ensure_nestable()?;
            out.push(value);
        }
        Ok(out)
    }

    fn subscript(&mut self, index: &Expr) -> Result<Subscript, ExecutorError> {
        let ExprKind::Slice { lower, upper, step } = &index.kind else {
            return Ok(Subscript::Item(self.eval(index)?));
        };
        let mut bound = |expr: &Option<Box<Expr>>| -> Result<Option<i64>, ExecutorError> {
            let Some(expr) = expr else { return Ok(None) };
            match self.eval(expr)? {
                Value::None => Ok(None),
                v => v.as_int().map(Some).ok_or_else(|| {
                    ExecutorError::type_error("slice indices must be integers or None")
                }),
            }
        };
        Ok(Subscript::Slice {
            lower: bound(lower)?,
            upper: bound(upper)?,
            step: bound(step)?,
        })
    }

    fn in_scope<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T, ExecutorError>) -> Result<T, ExecutorError> {
        self.scopes.push(IndexMap::new());
        let result = body(self);
        self.scopes.pop();
        result
    }

    fn comprehend(
        &mut self,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> Result<(), ExecutorError>,
    ) -> Result<(), ExecutorError> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self);
        };
        let iterable = self.eval(&first.iter)?;
        'items: for item in self.iterate(&iterable)? {
            self.budget.tick()?;
            self.assign(&first.target, item)?;
            for condition in &first.conditions {
                if !self.eval(condition)?.truthy()? {
                    continue 'items;
                }
            }
            self.comprehend(rest, emit)?;
        }
        Ok(())
    }

    // --- calls ------------------------------------------------------------

    fn eval_call(&mut self, func: &Expr, args: &[Expr], keywords: &[KeywordArg]) -> Result<Value, ExecutorError> {
        if let ExprKind::Attribute { value, attr } = &func.kind {
            if attr.starts_with('_') {
                return Err(ExecutorError::Attribute(format!("access to '{attr}' is not permitted")));
            }
            let place = if Self::mutates(attr) { self.place(value)? } else { None };
            let receiver = match place {
                Some(_) => None,
                None => Some(self.eval(value)?),
            };
            let call_args = self.eval_args(args, keywords)?;
            return match (place, receiver) {
                (Some((name, path)), _) => {
                    self.with_place(&name, &path, |this, target| this.call_method(target, attr, call_args))
                }
                (None, Some(Value::Module(module))) => {
                    let member = DataFn::from_name(attr).ok_or_else(|| {
                        ExecutorError::Attribute(format!("module '{}' has no attribute '{attr}'", module.name()))
                    })?;
                    self.call_value(&Value::DataFn(member), call_args)
                }
                (None, Some(mut receiver)) => self.call_method(&mut receiver, attr, call_args),
                (None, None) => Err(ExecutorError::type_error("missing call receiver")),
            };
        }
        let callee = self.eval(func)?;
        let call_args = self.eval_args(args, keywords)?;
        self.call_value(&callee, call_args)
    }

    fn eval_args(&mut self, args: &[Expr], keywords: &[KeywordArg]) -> Result<Args, ExecutorError> {
        let mut positional = Vec::with_capacity(args.len());
        for arg in args {
            positional.push(self.eval(arg)?);
        }
        let mut named = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            if named.iter().any(|(name, _): &(String, Value)| *name == keyword.name) {
                return Err(ExecutorError::type_error(format!(
                    "keyword argument repeated: {}",
                    keyword.name
                )));
            }
            named.push((keyword.name.clone(), self.eval(&keyword.value)?));
        }
        Ok(Args::new(positional, named))
    }

    /// Fail unless the capability set grants calling `name`.
    pub(crate) fn ensure_granted(&self, name: &str) -> Result<(), ExecutorError> {
        if self.capabilities.allows_callable(name) {
            Ok(())
        } else {
            Err(ExecutorError::NotGranted { name: name.to_owned() })
        }
    }

    /// Call any callable value.
    pub(crate) fn call_value(&mut self, callee: &Value, args: Args) -> Result<Value, ExecutorError> {
        match callee {
            Value::Builtin(builtin) => {
                self.ensure_granted(builtin.name())?;
                self.call_builtin(*builtin, args)
            }
            Value::DataFn(member) => {
                self.ensure_granted(member.name())?;
                self.call_data_fn(*member, args)
            }
            Value::Lambda(lambda) => self.call_lambda(lambda, args),
            Value::BoundMethod(method) => {
                let mut receiver = method.receiver.clone();
                self.call_method(&mut receiver, &method.name, args)
            }
            other => Err(ExecutorError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_lambda(&mut self, lambda: &Lambda, mut args: Args) -> Result<Value, ExecutorError> {
        let mut scope: IndexMap<String, Value> = lambda.captured.iter().cloned().collect();
        let mut positional = std::mem::take(&mut args.positional).into_iter();
        for param in &lambda.params {
            let value = match positional.next() {
                Some(value) => value,
                None => args.take_keyword(param).ok_or_else(|| {
                    ExecutorError::type_error(format!("<lambda>() missing required argument: '{param}'"))
                })?,
            };
            scope.insert(param.clone(), value);
        }
        let extra = positional.len();
        if extra > 0 {
            return Err(ExecutorError::type_error(format!(
                "<lambda>() takes {} positional arguments but {} were given",
                lambda.params.len(),
                lambda.params.len() + extra
            )));
        }
        args.finish("<lambda>")?;

        if self.call_depth >= self.max_call_depth {
            return Err(ExecutorError::CallDepth {
                limit: self.max_call_depth,
            });
        }
        self.call_depth += 1;
        let saved = std::mem::replace(&mut self.scopes, vec![scope]);
        let result = self.eval(&lambda.body);
        self.scopes = saved;
        self.call_depth -= 1;
        result
    }

    // --- attributes and iteration -----------------------------------------

    fn get_attribute(&mut self, receiver: Value, attr: &str) -> Result<Value, ExecutorError> {
        if attr.starts_with('_') {
            return Err(ExecutorError::Attribute(format!("access to '{attr}' is not permitted")));
        }
        match (&receiver, attr) {
            (Value::Module(module), _) => DataFn::from_name(attr).map(Value::DataFn).ok_or_else(|| {
                ExecutorError::Attribute(format!("module '{}' has no attribute '{attr}'", module.name()))
            }),
            (Value::Table(table), "columns") => {
                self.budget.charge(table.width())?;
                Ok(Value::list(table.column_names().map(Value::str).collect()))
            }
            (Value::Table(table), "shape") => Ok(Value::tuple(vec![
                Value::Int(i64::try_from(table.height()).unwrap_or(i64::MAX)),
                Value::Int(i64::try_from(table.width()).unwrap_or(i64::MAX)),
            ])),
            (Value::Table(table), "height") => Ok(Value::Int(i64::try_from(table.height()).unwrap_or(i64::MAX))),
            (Value::Table(table), "width") => Ok(Value::Int(i64::try_from(table.width()).unwrap_or(i64::MAX))),
            _ if Self::has_method(&receiver, attr) => {
                receiver.ensure_nestable()?;
                Ok(Value::BoundMethod(Arc::new(BoundMethod {
                    receiver,
                    name: attr.to_owned(),
                })))
            }
            _ => Err(ExecutorError::Attribute(format!(
                "'{}' object has no attribute '{attr}'",
                receiver.type_name()
            ))),
        }
    }

    /// Iterate a value the way a `for` loop does.
    pub(crate) fn iterate(&mut self, value: &Value) -> Result<ValueIter, ExecutorError> {
        let items = match value {
            Value::Range(range) => return Ok(ValueIter::Range { range: *range, next: 0 }),
            Value::List(items) | Value::Tuple(items) => items.to_vec(),
            Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
            Value::Dict(entries) => entries.keys().map(Key::to_value).collect(),
            other => {
                return Err(ExecutorError::type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        };
        self.budget.charge(items.len())?;
        Ok(ValueIter::Items(items.into_iter()))
    }

    /// Materialise an iterable, charging for every item.
    pub(crate) fn collect_items(&mut self, value: &Value) -> Result<Vec<Value>, ExecutorError> {
        if let Value::Range(range) = value {
            self.budget.charge(range.len())?;
        }
        Ok(self.iterate(value)?.collect())
    }
}

fn navigate<'v>(root: &'v mut Value, path: &[Value]) -> Result<&'v mut Value, ExecutorError> {
    let mut target = root;
    for key in path {
        target = index::item_mut(target, key)?;
    }
    Ok(target)
}

/// Vet and run `source` under `caps` with default limits.
#[cfg(test)]
pub(crate) fn run_source(source: &str, caps: &CapabilitySet) -> Result<ExecutionOutput, ExecutorError> {
    let program = match quarry_auditor::vet(source, caps) {
        Ok(p) => p,
        Err(report) => panic!("source must vet: {}", report.summary()),
    };
    execute(&program, caps, Vec::new(), &ExecutionLimits::default(), CancelToken::new())
}

/// Run `source` under an allocation ceiling of `max_cells`.
#[cfg(test)]
pub(crate) fn run_with_cells(source: &str, max_cells: u64) -> Result<ExecutionOutput, ExecutorError> {
    let caps = CapabilitySet::default();
    let program = match quarry_auditor::vet(source, &caps) {
        Ok(p) => p,
        Err(report) => panic!("source must vet: {}", report.summary()),
    };
    let limits = ExecutionLimits {
        max_cells,
        ..ExecutionLimits::default()
    };
    execute(&program, &caps, Vec::new(), &limits, CancelToken::new())
}

/// Run `source` with default capabilities and return `repr(name)`.
#[cfg(test)]
pub(crate) fn global_repr(source: &str, name: &str) -> String {
    match run_source(source, &CapabilitySet::default()) {
        Ok(out) => match out.namespace.get(name) {
            Some(v) => v.repr(),
            None => panic!("{name} must be bound"),
        },
        Err(e) => panic!("run failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Result<ExecutionOutput, ExecutorError> {
        run_source(source, &CapabilitySet::default())
    }

    fn global(source: &str, name: &str) -> String {
        global_repr(source, name)
    }

    #[test]
    fn arithmetic_and_assignment() {
        assert_eq!(global("x = 2 + 3 * 4", "x"), "14");
        assert_eq!(global("x = 7 // 2\nx += 1", "x"), "4");
        assert_eq!(global("a = b = 5", "b"), "5");
        assert_eq!(global("a, b = 1, 2\na, b = b, a", "a"), "2");
    }

    #[test]
    fn control_flow() {
        let src = "total = 0\nfor i in range(10):\n    if i % 2 == 0:\n        continue\n    if i > 7:\n        break\n    total += i\n";
        assert_eq!(global(src, "total"), "16");
        assert_eq!(global("n = 0\nwhile n < 5:\n    n += 1", "n"), "5");
    }

    #[test]
    fn containers_have_value_semantics() {
        let src = "a = [1, 2]\nb = a\nb.append(3)\nb[0] = 9";
        assert_eq!(global(src, "a"), "[1, 2]");
        assert_eq!(global(src, "b"), "[9, 2, 3]");
        assert_eq!(global("d = {'k': [1]}\nd['k'].append(2)", "d"), "{'k': [1, 2]}");
        assert_eq!(global("m = {}\nm['x'] = 1\nm['x'] += 4", "m"), "{'x': 5}");
    }

    #[test]
    fn comprehensions_and_lambdas() {
        assert_eq!(global("xs = [i * i for i in range(5) if i % 2 == 0]", "xs"), "[0, 4, 16]");
        assert_eq!(global("d = {k: len(k) for k in ['a', 'bb']}", "d"), "{'a': 1, 'bb': 2}");
        assert_eq!(global("pairs = [(i, j) for i in range(2) for j in range(2)]", "pairs"), "[(0, 0), (0, 1), (1, 0), (1, 1)]");
        assert_eq!(global("ys = sorted([3, 1, 2], key=lambda v: -v)", "ys"), "[3, 2, 1]");
    }

    #[test]
    fn comprehension_variables_do_not_leak() {
        let out = match run("xs = [i for i in range(3)]") {
            Ok(out) => out,
            Err(e) => panic!("run failed: {e}"),
        };
        assert!(!out.namespace.contains("i"));
    }

    #[test]
    fn fstrings_and_print_capture_output() {
        let out = match run("name = 'ada'\nprint(f'hi {name}, {2 / 3:.2f}')") {
            Ok(out) => out,
            Err(e) => panic!("run failed: {e}"),
        };
        assert_eq!(out.stdout, "hi ada, 0.67\n");
    }

    #[test]
    fn runtime_errors_carry_python_names() {
        let err = run("x = 1 / 0").err().map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("ZeroDivisionError: division by zero"));
        assert!(matches!(run("y = undefined_name"), Err(ExecutorError::Name(_))));
        assert!(matches!(run("a, b = [1]"), Err(ExecutorError::Value(_))));
        assert!(matches!(run("x = [1][5]"), Err(ExecutorError::Index(_))));
        assert!(matches!(run("x = (1, 2)\nx[0] = 3"), Err(ExecutorError::Type(_))));
    }

    #[test]
    fn imports_bind_granted_modules() {
        assert!(run("import polars as p\ndf = p.DataFrame({'a': [1]})").is_ok());
        assert!(run("from polars import col\ne = col('a')").is_ok());
        assert!(matches!(run("from polars import nothing"), Err(ExecutorError::Import(_))));
    }

    #[test]
    fn infinite_loops_hit_the_step_limit() {
        let caps = CapabilitySet::default();
        let program = match quarry_auditor::vet("while True:\n    pass", &caps) {
            Ok(p) => p,
            Err(report) => panic!("must vet: {}", report.summary()),
        };
        let limits = ExecutionLimits {
            max_steps: 10_000,
            ..ExecutionLimits::default()
        };
        let result = execute(&program, &caps, Vec::new(), &limits, CancelToken::new());
        assert!(matches!(result, Err(ExecutorError::StepLimit { limit: 10_000 })));
    }

    #[test]
    fn cancellation_stops_the_run() {
        let caps = CapabilitySet::default();
        let program = match quarry_auditor::vet("while True:\n    pass", &caps) {
            Ok(p) => p,
            Err(report) => panic!("must vet: {}", report.summary()),
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = execute(&program, &caps, Vec::new(), &ExecutionLimits::default(), cancel);
        assert!(matches!(result, Err(ExecutorError::Cancelled)));
    }

    #[test]
    fn runaway_allocation_hits_the_cell_limit() {
        let caps = CapabilitySet::default();
        let program = match quarry_auditor::vet("s = 'x' * 1000000", &caps) {
            Ok(p) => p,
            Err(report) => panic!("must vet: {}", report.summary()),
        };
        let limits = ExecutionLimits {
            max_cells: 1000,
            ..ExecutionLimits::default()
        };
        let result = execute(&program, &caps, Vec::new(), &limits, CancelToken::new());
        assert!(matches!(result, Err(ExecutorError::AllocationLimit { .. })));
    }

    #[test]
    fn deep_nesting_is_refused() {
        let result = run("x = []\nfor i in range(200):\n    x = [x]");
        assert!(matches!(result, Err(ExecutorError::NestingDepth { .. })));
    }

    #[test]
    fn lambda_recursion_through_arguments_is_bounded() {
        let caps = CapabilitySet::default().with_callable("g").with_callable("f");
        let program = match quarry_auditor::vet("f = lambda g, n: g(g, n + 1)\nr = f(f, 0)", &caps) {
            Ok(p) => p,
            Err(report) => panic!("must vet: {}", report.summary()),
        };
        let limits = ExecutionLimits {
            max_call_depth: 8,
            ..ExecutionLimits::default()
        };
        let result = execute(&program, &caps, Vec::new(), &limits, CancelToken::new());
        assert!(matches!(result, Err(ExecutorError::CallDepth { limit: 8 })));
    }

    #[test]
    fn withheld_callables_fail_at_runtime_too() {
        let caps = CapabilitySet::default().without_callable("print").with_callable("p");
        let program = match quarry_auditor::vet("p('x')", &caps) {
            Ok(p) => p,
            Err(report) => panic!("must vet: {}", report.summary()),
        };
        let bindings = vec![("p".to_owned(), Value::Builtin(crate::value::Builtin::Print))];
        let out = execute(&program, &caps, bindings, &ExecutionLimits::default(), CancelToken::new());
        assert!(matches!(out, Err(ExecutorError::NotGranted { name }) if name == "print"));
    }

    #[test]
    fn chained_comparisons() {
        assert_eq!(global("a = 1 < 2 < 3", "a"), "True");
        assert_eq!(global("a = 1 < 3 < 2", "a"), "False");
        assert_eq!(global("a = 2 in [1, 2] and 'x' not in 'abc'", "a"), "True");
    }

    #[test]
    fn slices() {
        assert_eq!(global("xs = list(range(6))[::2]", "xs"), "[0, 2, 4]");
        assert_eq!(global("s = 'hello'[::-1]", "s"), "'olleh'");
    }
}
