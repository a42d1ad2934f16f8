//! Capability descriptor: what a sandboxed run may reference.
//!
//! The allow-list is policy, not mechanism. The analyzer and the executor both
//! receive a [`CapabilitySet`] value; nothing in the pipeline hard-codes it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Modules granted by the default policy.
pub const DEFAULT_MODULES: &[&str] = &["polars"];

/// Callable names granted by the default policy: free functions, data
/// namespace constructors, and the method vocabulary of granted values.
pub const DEFAULT_CALLABLES: &[&str] = &[
    // builtins
    "print", "len", "sum", "min", "max", "abs", "round", "range", "sorted", "str", "int", "float",
    "bool", "list", "dict", "tuple", "zip", "enumerate", "isinstance",
    // data namespace
    "read_csv", "scan_csv", "DataFrame", "col", "lit",
    // frame methods
    "select", "filter", "group_by", "groupby", "agg", "join", "with_columns", "with_column",
    "drop", "rename", "sort", "head", "tail", "collect", "lazy", "to_dict",
    // column expression methods
    "mean", "median", "std", "var", "count", "n_unique", "first", "last", "alias",
    // str / list / dict methods
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "format", "find", "append", "extend", "pop", "insert", "remove", "reverse", "copy",
    "clear", "index", "keys", "values", "items", "get", "update", "setdefault",
];

/// The modules and callables a snippet may reference, plus optional
/// read-only data access.
///
/// Immutable for the lifetime of a pipeline; a different policy is a
/// different value passed per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CapabilitySet {
    /// Top-level module names that may be imported and are pre-bound.
    pub allowed_modules: BTreeSet<String>,
    /// Bare function names and method names that may be called.
    pub allowed_callables: BTreeSet<String>,
    /// Directory below which `read_csv`/`scan_csv` may read. `None` withholds
    /// all file access.
    #[serde(default)]
    pub data_root: Option<PathBuf>,
}

impl CapabilitySet {
    /// Build a capability set from explicit module and callable lists.
    pub fn new<M, C>(modules: M, callables: C) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            allowed_modules: modules.into_iter().map(Into::into).collect(),
            allowed_callables: callables.into_iter().map(Into::into).collect(),
            data_root: None,
        }
    }

    /// An empty policy: nothing may be imported or called.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::new(Vec::<String>::new(), Vec::<String>::new())
    }

    /// Grant read-only CSV access below `root`.
    #[must_use]
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(root.into());
        self
    }

    /// Grant an additional callable name.
    #[must_use]
    pub fn with_callable(mut self, name: impl Into<String>) -> Self {
        self.allowed_callables.insert(name.into());
        self
    }

    /// Withdraw a callable name.
    #[must_use]
    pub fn without_callable(mut self, name: &str) -> Self {
        self.allowed_callables.remove(name);
        self
    }

    /// Grant an additional module.
    #[must_use]
    pub fn with_module(mut self, name: impl Into<String>) -> Self {
        self.allowed_modules.insert(name.into());
        self
    }

    #[must_use]
    pub fn allows_module(&self, name: &str) -> bool {
        self.allowed_modules.contains(name)
    }

    #[must_use]
    pub fn allows_callable(&self, name: &str) -> bool {
        self.allowed_callables.contains(name)
    }

    #[must_use]
    pub fn data_root(&self) -> Option<&Path> {
        self.data_root.as_deref()
    }

    /// Check that every granted name is a plain public identifier.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidCapability`] for empty names, names that
    /// are not identifiers, or names starting with an underscore.
    pub fn validate(&self) -> Result<(), CoreError> {
        for name in self.allowed_modules.iter().chain(&self.allowed_callables) {
            let mut chars = name.chars();
            let valid_start = chars.next().is_some_and(char::is_alphabetic);
            if !valid_start || !chars.all(|c| c == '_' || c.is_alphanumeric()) {
                return Err(CoreError::InvalidCapability {
                    reason: format!("'{name}' is not a public identifier"),
                });
            }
        }
        Ok(())
    }
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self::new(DEFAULT_MODULES.iter().copied(), DEFAULT_CALLABLES.iter().copied())
    }
}
