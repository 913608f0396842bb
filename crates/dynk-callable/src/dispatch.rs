//! Multidispatch tables.
//!
//! A table maps a tuple of type ids to the callable that handles exactly
//! that combination. Tables are filled once and then only read; a missing
//! key is an error, never a fallback to some nearby entry.

use crate::callable::Callable;
use crate::{CallableError, CallableResult};
use dynk_types::TypeId;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Callables keyed by `N` type ids.
pub struct DispatchTable<const N: usize> {
    name: &'static str,
    entries: FxHashMap<[TypeId; N], Arc<dyn Callable>>,
}

impl<const N: usize> DispatchTable<N> {
    /// Create an empty table.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: FxHashMap::default(),
        }
    }

    /// Table name, used in errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add an entry, returning the one it replaces.
    pub fn insert(&mut self, key: [TypeId; N], callable: Arc<dyn Callable>) -> Option<Arc<dyn Callable>> {
        self.entries.insert(key, callable)
    }

    /// Find the callable for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CallableError::NoMatchingOperation`] if there is no entry.
    pub fn lookup(&self, key: &[TypeId; N]) -> CallableResult<&Arc<dyn Callable>> {
        self.entries.get(key).ok_or_else(|| {
            let key = format_key(key);
            debug!(table = self.name, %key, "dispatch miss");
            CallableError::NoMatchingOperation {
                table: self.name,
                key,
            }
        })
    }

    /// Returns true if `key` has an entry.
    #[must_use]
    pub fn contains(&self, key: &[TypeId; N]) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<[TypeId; N]> {
        let mut keys: Vec<_> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

fn format_key(key: &[TypeId]) -> String {
    key.iter().map(|id| id.name()).collect::<Vec<_>>().join(", ")
}

impl<const N: usize> fmt::Debug for DispatchTable<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .finish()
    }
}
