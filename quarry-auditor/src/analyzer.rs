//! Static safety analysis over the snippet syntax tree.
//!
//! Every call expression is resolved, not only bare-identifier calls:
//!
//! - `name(...)` requires `name` in the allowed callables;
//! - `base.attr(...)` requires `attr` in the allowed callables, wherever the
//!   chain is rooted (a module alias, a local value, a literal, a call result);
//! - any other callee (`f()()`, `fs[0]()`, `(lambda: x)()`) is rejected as a
//!   computed call target.
//!
//! Attribute names beginning with `_` are rejected outright, which closes the
//! reflection routes (`__class__`, `__globals__`, ...) that attribute chains
//! would otherwise open. Lambda bodies, comprehensions and f-string fields are
//! walked like any other expression.
//!
//! Method names are checked as a vocabulary, not per receiver type: `x.count()`
//! passes for any `x`. The executor only implements methods on its own value
//! types, so an allowed name can never reach host functionality.

use quarry_core::syntax::ast::{
    Comprehension, Expr, ExprKind, FStringPart, ImportAlias, Program, Stmt, StmtKind, Target,
};
use quarry_core::syntax::parse;
use quarry_core::{AnalysisReport, CapabilitySet, Violation, ViolationKind};

use crate::vetted::VettedProgram;

/// Analyze `source` against `capabilities`.
///
/// Never panics and never returns a parser error: a parse failure is
/// reported as a single [`ViolationKind::SyntaxError`] violation.
#[must_use]
pub fn analyze(source: &str, capabilities: &CapabilitySet) -> AnalysisReport {
    match vet(source, capabilities) {
        Ok(_) => AnalysisReport::default(),
        Err(report) => report,
    }
}

/// Analyze `source` and, if it is safe, return the parsed program wrapped as
/// a [`VettedProgram`], the only input the executor accepts.
///
/// # Errors
/// Returns the [`AnalysisReport`] listing every violation when the source is
/// not safe to execute.
pub fn vet(source: &str, capabilities: &CapabilitySet) -> Result<VettedProgram, AnalysisReport> {
    let program = match parse(source) {
        Ok(program) => program,
        Err(e) => {
            let line = e.line().unwrap_or(1);
            tracing::debug!(error = %e, "snippet failed to parse");
            return Err(AnalysisReport::new(vec![Violation::new(
                ViolationKind::SyntaxError,
                "<source>",
                line,
                e.to_string(),
            )]));
        }
    };

    let violations = check_program(&program, capabilities);
    if violations.is_empty() {
        Ok(VettedProgram::new(source, program))
    } else {
        tracing::debug!(count = violations.len(), "snippet rejected by static analysis");
        Err(AnalysisReport::new(violations))
    }
}

/// Walk an already-parsed program and collect violations in source order.
#[must_use]
pub fn check_program(program: &Program, capabilities: &CapabilitySet) -> Vec<Violation> {
    let mut walker = Walker {
        capabilities,
        violations: Vec::new(),
    };
    walker.block(&program.body);
    walker.violations
}

struct Walker<'a> {
    capabilities: &'a CapabilitySet,
    violations: Vec<Violation>,
}

impl Walker<'_> {
    fn flag(&mut self, kind: ViolationKind, construct: impl Into<String>, line: usize, reason: String) {
        self.violations.push(Violation::new(kind, construct, line, reason));
    }

    fn block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.target(target);
                }
                self.expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target);
                self.expr(value);
            }
            StmtKind::Import { names } => {
                for alias in names {
                    self.import(alias.root_module(), &alias.name, line);
                    self.private_alias(alias, line);
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let root = module.split('.').next().unwrap_or(module);
                self.import(root, module, line);
                for alias in names {
                    if alias.name.starts_with('_') {
                        self.flag(
                            ViolationKind::ProhibitedAttribute,
                            format!("{module}.{}", alias.name),
                            line,
                            "private names cannot be imported".to_owned(),
                        );
                    }
                    self.private_alias(alias, line);
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test);
                self.block(body);
                self.block(orelse);
            }
            StmtKind::While { test, body } => {
                self.expr(test);
                self.block(body);
            }
            StmtKind::For { target, iter, body } => {
                self.target(target);
                self.expr(iter);
                self.block(body);
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Pass => {}
        }
    }

    fn import(&mut self, root: &str, full: &str, line: usize) {
        // Relative imports have an empty root and are never allowed.
        if root.is_empty() || !self.capabilities.allows_module(root) {
            self.flag(
                ViolationKind::ProhibitedImport,
                full,
                line,
                format!("module '{full}' is not in the allowed module set"),
            );
        }
    }

    fn private_alias(&mut self, alias: &ImportAlias, line: usize) {
        if let Some(bound) = &alias.alias {
            self.name(bound, line);
        }
    }

    fn name(&mut self, name: &str, line: usize) {
        if name.starts_with("__") {
            self.flag(
                ViolationKind::ProhibitedAttribute,
                name,
                line,
                "dunder names are not accessible".to_owned(),
            );
        }
    }

    fn target(&mut self, target: &Target) {
        match target {
            Target::Name(_) => {}
            Target::Subscript { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Target::Unpack(items) => {
                for item in items {
                    self.target(item);
                }
            }
        }
    }

    fn comprehensions(&mut self, generators: &[Comprehension]) {
        for generator in generators {
            self.target(&generator.target);
            self.expr(&generator.iter);
            for condition in &generator.conditions {
                self.expr(condition);
            }
        }
    }

    fn call_target(&mut self, func: &Expr) {
        match &func.kind {
            ExprKind::Name(name) => {
                if !self.capabilities.allows_callable(name) {
                    self.flag(
                        ViolationKind::ProhibitedCall,
                        name.as_str(),
                        func.line,
                        format!("'{name}' is not an allowed callable"),
                    );
                }
            }
            ExprKind::Attribute { attr, .. } => {
                if !self.capabilities.allows_callable(attr) {
                    self.flag(
                        ViolationKind::ProhibitedCall,
                        describe_callee(func),
                        func.line,
                        format!("method '{attr}' is not an allowed callable"),
                    );
                }
            }
            _ => self.flag(
                ViolationKind::ProhibitedCall,
                describe_callee(func),
                func.line,
                "computed call targets are not allowed; call a name or a method".to_owned(),
            ),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        let line = expr.line;
        match &expr.kind {
            ExprKind::None
            | ExprKind::Bool(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_) => {}
            ExprKind::Name(name) => self.name(name, line),
            ExprKind::FString(parts) => {
                for part in parts {
                    if let FStringPart::Field { expr, .. } = part {
                        self.expr(expr);
                    }
                }
            }
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::Dict(entries) => {
                for (key, value) in entries {
                    self.expr(key);
                    self.expr(value);
                }
            }
            ExprKind::Attribute { value, attr } => {
                if attr.starts_with('_') {
                    self.flag(
                        ViolationKind::ProhibitedAttribute,
                        describe_callee(expr),
                        line,
                        format!("attribute '{attr}' is private"),
                    );
                }
                self.expr(value);
            }
            ExprKind::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            ExprKind::Slice { lower, upper, step } => {
                for bound in [lower, upper, step].into_iter().flatten() {
                    self.expr(bound);
                }
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.call_target(func);
                self.expr(func);
                for arg in args {
                    self.expr(arg);
                }
                for keyword in keywords {
                    self.expr(&keyword.value);
                }
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Binary { left, right, .. } | ExprKind::BoolOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Compare { left, comparisons } => {
                self.expr(left);
                for (_, right) in comparisons {
                    self.expr(right);
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            ExprKind::Lambda { params, body } => {
                for param in params {
                    self.name(param, line);
                }
                self.expr(body);
            }
            ExprKind::ListComp {
                element,
                generators,
            } => {
                self.comprehensions(generators);
                self.expr(element);
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                self.comprehensions(generators);
                self.expr(key);
                self.expr(value);
            }
        }
    }
}

/// Render a callee for violation messages, e.g. `pl.col(...).alias`.
fn describe_callee(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Name(name) => name.clone(),
        ExprKind::Attribute { value, attr } => format!("{}.{attr}", describe_callee(value)),
        ExprKind::Call { func, .. } => format!("{}(...)", describe_callee(func)),
        ExprKind::Subscript { value, .. } => format!("{}[...]", describe_callee(value)),
        ExprKind::Lambda { .. } => "<lambda>".to_owned(),
        _ => "<expression>".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(source: &str) -> AnalysisReport {
        analyze(source, &CapabilitySet::default())
    }

    fn kinds(source: &str) -> Vec<ViolationKind> {
        report(source).violations.into_iter().map(|v| v.kind).collect()
    }

    #[test]
    fn allowed_data_snippet_is_safe() {
        let source = "import polars as pl\n\
                      df = pl.DataFrame({'a': [1, 2, 3]})\n\
                      out = df.filter(pl.col('a') > 1).select(pl.col('a').sum().alias('total'))\n\
                      out";
        let report = report(source);
        assert!(report.is_safe(), "unexpected violations: {}", report.summary());
    }

    #[test]
    fn prohibited_import_is_reported() {
        assert_eq!(kinds("import os"), vec![ViolationKind::ProhibitedImport]);
        assert_eq!(kinds("import os.path as p"), vec![ViolationKind::ProhibitedImport]);
        assert_eq!(kinds("from subprocess import run"), vec![ViolationKind::ProhibitedImport]);
        assert_eq!(kinds("from . import x"), vec![ViolationKind::ProhibitedImport]);
    }

    #[test]
    fn allowed_import_forms_pass() {
        assert!(report("import polars").is_safe());
        assert!(report("import polars as pl").is_safe());
        assert!(report("from polars import col").is_safe());
    }

    #[test]
    fn prohibited_bare_call_is_reported() {
        let report = report("open('/etc/passwd')");
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].kind, ViolationKind::ProhibitedCall);
        assert_eq!(report.violations[0].construct, "open");
    }

    #[test]
    fn attribute_calls_are_checked_by_method_name() {
        let report = report("x = pl.system('ls')");
        assert!(report.has(ViolationKind::ProhibitedCall));
        assert_eq!(report.violations[0].construct, "pl.system");
    }

    #[test]
    fn computed_call_targets_are_rejected() {
        assert!(report("fs[0]()").has(ViolationKind::ProhibitedCall));
        assert!(report("len(x)()").has(ViolationKind::ProhibitedCall));
        assert!(report("(lambda: 1)()").has(ViolationKind::ProhibitedCall));
    }

    #[test]
    fn dunder_attribute_access_is_rejected() {
        assert!(report("x = ().__class__").has(ViolationKind::ProhibitedAttribute));
        assert!(report("y = df._private").has(ViolationKind::ProhibitedAttribute));
        assert!(report("__builtins__").has(ViolationKind::ProhibitedAttribute));
    }

    #[test]
    fn calls_inside_lambdas_and_comprehensions_are_walked() {
        assert!(report("f = lambda x: eval(x)").has(ViolationKind::ProhibitedCall));
        assert!(report("[exec(s) for s in xs]").has(ViolationKind::ProhibitedCall));
        assert!(report("{k: getattr(o, k) for k in ks}").has(ViolationKind::ProhibitedCall));
        assert!(report("s = f'{open(p)}'").has(ViolationKind::ProhibitedCall));
    }

    #[test]
    fn calls_inside_blocks_are_walked() {
        let source = "for i in range(3):\n    if i > 1:\n        compile('x', 'f', 'exec')\n";
        let report = report(source);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].line, 3);
    }

    #[test]
    fn every_violation_is_reported_in_order() {
        let report = report("import os\nimport sys\nopen('x')\n");
        let constructs: Vec<&str> = report.violations.iter().map(|v| v.construct.as_str()).collect();
        assert_eq!(constructs, vec!["os", "sys", "open"]);
    }

    #[test]
    fn parse_failure_is_a_syntax_violation() {
        let report = report("x = (1,");
        assert!(report.is_syntax_error());
        assert_eq!(report.violations.len(), 1);
    }

    #[test]
    fn policy_override_changes_verdict() {
        let caps = CapabilitySet::default().without_callable("print");
        assert!(analyze("print(1)", &caps).has(ViolationKind::ProhibitedCall));
        assert!(analyze("print(1)", &CapabilitySet::default()).is_safe());
    }

    #[test]
    fn vet_returns_program_only_for_safe_source() {
        let caps = CapabilitySet::default();
        assert!(vet("x = 1\nx", &caps).is_ok());
        assert!(vet("import os", &caps).is_err());
    }

    proptest::proptest! {
        #[test]
        fn proptest_analyze_never_panics(source in "\\PC{0,200}") {
            let _ = analyze(&source, &CapabilitySet::default());
        }

        #[test]
        fn proptest_unknown_bare_calls_always_rejected(name in "[a-z]{3,10}_x") {
            let report = analyze(&format!("{name}()"), &CapabilitySet::default());
            proptest::prop_assert!(report.has(ViolationKind::ProhibitedCall));
        }
    }
}
