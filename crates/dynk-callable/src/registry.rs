//! Named callables.

use crate::assign::Assign;
use crate::callable::Callable;
use crate::compound::CompoundOperator;
use crate::copy::CopyCallable;
use crate::function::Less;
use crate::reduction::Reduction;
use crate::{CallableError, CallableResult};
use rustc_hash::FxHashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static BUILTINS: LazyLock<Registry> = LazyLock::new(Registry::with_builtins);

/// The shared registry of builtin callables.
#[must_use]
pub fn builtins() -> &'static Registry {
    &BUILTINS
}

/// Callables looked up by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    callables: FxHashMap<String, Arc<dyn Callable>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the builtin callables.
    #[must_use]
    pub fn with_builtins() -> Self {
        let add: Arc<dyn Callable> = Arc::new(CompoundOperator::add());
        let multiply: Arc<dyn Callable> = Arc::new(CompoundOperator::multiply());
        let min: Arc<dyn Callable> = Arc::new(CompoundOperator::min());
        let max: Arc<dyn Callable> = Arc::new(CompoundOperator::max());

        let entries: [Arc<dyn Callable>; 11] = [
            Arc::new(Assign::new()),
            Arc::new(CopyCallable::new()),
            Arc::new(Less::new()),
            Arc::new(Reduction::named("sum", add.clone())),
            Arc::new(Reduction::named("prod", multiply.clone())),
            Arc::new(Reduction::named("min", min.clone())),
            Arc::new(Reduction::named("max", max.clone())),
            add,
            multiply,
            min,
            max,
        ];
        let callables = entries
            .into_iter()
            .map(|callable| (callable.name().to_string(), callable))
            .collect::<FxHashMap<_, _>>();
        debug!(count = callables.len(), "registered builtin callables");
        Self { callables }
    }

    /// Add a callable under its own name.
    ///
    /// # Errors
    ///
    /// Fails if the name is taken.
    pub fn register(&mut self, callable: Arc<dyn Callable>) -> CallableResult<()> {
        let name = callable.name().to_string();
        if self.callables.contains_key(&name) {
            return Err(CallableError::DuplicateCallable(name));
        }
        self.callables.insert(name, callable);
        Ok(())
    }

    /// Find a callable by name.
    ///
    /// # Errors
    ///
    /// Fails if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> CallableResult<&Arc<dyn Callable>> {
        self.callables
            .get(name)
            .ok_or_else(|| CallableError::UnknownCallable(name.to_string()))
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.callables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert_eq!(
            builtins().names(),
            vec![
                "assign",
                "compound_add",
                "compound_max",
                "compound_min",
                "compound_multiply",
                "copy",
                "less",
                "max",
                "min",
                "prod",
                "sum",
            ]
        );
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = Registry::new();
        registry.register(Arc::new(Assign::new())).unwrap();
        assert_eq!(
            registry.register(Arc::new(Assign::new())),
            Err(CallableError::DuplicateCallable("assign".to_string()))
        );
        assert_eq!(registry.get("assign").unwrap().name(), "assign");
        assert_eq!(
            registry.get("nope").unwrap_err(),
            CallableError::UnknownCallable("nope".to_string())
        );
    }
}
