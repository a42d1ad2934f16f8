//! The global name table a run executes in.

use indexmap::IndexMap;
use quarry_core::CapabilitySet;

use crate::value::{Builtin, Module};
use crate::Value;

/// Global bindings of a run, in binding order.
///
/// A fresh namespace holds exactly what the capability set grants: each
/// granted builtin under its own name and each granted module under its name
/// and conventional alias. Nothing else is reachable from the snippet.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    bindings: IndexMap<String, Value>,
}

impl Namespace {
    /// An empty namespace with no builtins at all.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace seeded from `capabilities`, then `extra` bindings, which win
    /// over seeded names.
    #[must_use]
    pub fn seeded(capabilities: &CapabilitySet, extra: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut bindings = IndexMap::new();
        for builtin in Builtin::ALL {
            if capabilities.allows_callable(builtin.name()) {
                bindings.insert(builtin.name().to_owned(), Value::Builtin(*builtin));
            }
        }
        for module in Module::ALL {
            if capabilities.allows_module(module.name()) {
                bindings.insert(module.name().to_owned(), Value::Module(*module));
                bindings.insert(module.alias().to_owned(), Value::Module(*module));
            }
        }
        bindings.extend(extra);
        Self { bindings }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.bindings.get_mut(name)
    }

    /// Bind `name`, returning the value it replaced.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.bindings.insert(name.into(), value)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bound names in binding order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capabilities_seed_builtins_and_modules() {
        let ns = Namespace::seeded(&CapabilitySet::default(), Vec::new());
        assert!(matches!(ns.get("len"), Some(Value::Builtin(Builtin::Len))));
        assert!(matches!(ns.get("pl"), Some(Value::Module(Module::Polars))));
        assert!(matches!(ns.get("polars"), Some(Value::Module(Module::Polars))));
        assert!(!ns.contains("open"));
        assert!(!ns.contains("__builtins__"));
    }

    #[test]
    fn deny_all_seeds_nothing() {
        let ns = Namespace::seeded(&CapabilitySet::deny_all(), Vec::new());
        assert!(ns.is_empty());
    }

    #[test]
    fn withheld_callables_are_not_bound() {
        let caps = CapabilitySet::default().without_callable("print");
        let ns = Namespace::seeded(&caps, Vec::new());
        assert!(!ns.contains("print"));
        assert!(ns.contains("len"));
    }

    #[test]
    fn extra_bindings_override_seeded_names() {
        let ns = Namespace::seeded(&CapabilitySet::default(), vec![("len".to_owned(), Value::Int(3))]);
        assert!(matches!(ns.get("len"), Some(Value::Int(3))));
    }
}
