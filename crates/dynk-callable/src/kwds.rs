//! Keyword arguments.

use crate::{CallableError, CallableResult};
use dynk_eval::ErrorMode;
use dynk_types::Type;
use std::fmt;

/// A keyword argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum KwdValue {
    /// An error mode.
    ErrorMode(ErrorMode),
    /// A list of axes.
    Axes(Vec<usize>),
    /// A flag.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A type.
    Type(Type),
}

impl KwdValue {
    /// Name of the value's kind, for diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::ErrorMode(_) => "error mode",
            Self::Axes(_) => "axes",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Type(_) => "type",
        }
    }
}

impl fmt::Display for KwdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorMode(mode) => write!(f, "{mode}"),
            Self::Axes(axes) => write!(f, "{axes:?}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Type(tp) => write!(f, "{tp}"),
        }
    }
}

impl From<ErrorMode> for KwdValue {
    fn from(mode: ErrorMode) -> Self {
        Self::ErrorMode(mode)
    }
}

impl From<bool> for KwdValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for KwdValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<usize>> for KwdValue {
    fn from(axes: Vec<usize>) -> Self {
        Self::Axes(axes)
    }
}

impl From<Type> for KwdValue {
    fn from(tp: Type) -> Self {
        Self::Type(tp)
    }
}

/// Ordered keyword arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kwds {
    entries: Vec<(String, KwdValue)>,
}

impl Kwds {
    /// No keywords.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a keyword, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<KwdValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add or replace a keyword.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<KwdValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Look up a keyword.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&KwdValue> {
        self.entries
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    /// Keyword names, in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Number of keywords.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no keywords.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn wrong_kind(callable: &str, name: &str, expected: &str, found: &KwdValue) -> CallableError {
        CallableError::MalformedKwds {
            callable: callable.to_string(),
            reason: format!("`{name}` must be {expected}, got {} `{found}`", found.kind_name()),
        }
    }

    /// An error-mode keyword, if present.
    ///
    /// # Errors
    ///
    /// Fails if the keyword holds another kind of value.
    pub fn error_mode(&self, callable: &str, name: &str) -> CallableResult<Option<ErrorMode>> {
        match self.get(name) {
            None => Ok(None),
            Some(KwdValue::ErrorMode(mode)) => Ok(Some(*mode)),
            Some(other) => Err(Self::wrong_kind(callable, name, "an error mode", other)),
        }
    }

    /// A boolean keyword, if present.
    ///
    /// # Errors
    ///
    /// Fails if the keyword holds another kind of value.
    pub fn bool(&self, callable: &str, name: &str) -> CallableResult<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(KwdValue::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(Self::wrong_kind(callable, name, "a bool", other)),
        }
    }

    /// An axes keyword, if present. A single integer is one axis.
    ///
    /// # Errors
    ///
    /// Fails if the keyword holds another kind of value or a negative axis.
    pub fn axes(&self, callable: &str, name: &str) -> CallableResult<Option<Vec<usize>>> {
        match self.get(name) {
            None => Ok(None),
            Some(KwdValue::Axes(axes)) => Ok(Some(axes.clone())),
            Some(KwdValue::Int(i)) => usize::try_from(*i)
                .map(|axis| Some(vec![axis]))
                .map_err(|_| CallableError::MalformedKwds {
                    callable: callable.to_string(),
                    reason: format!("`{name}` must not be negative, got {i}"),
                }),
            Some(other) => Err(Self::wrong_kind(callable, name, "a list of axes", other)),
        }
    }
}

impl<N: Into<String>, V: Into<KwdValue>> FromIterator<(N, V)> for Kwds {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut kwds = Self::new();
        for (name, value) in iter {
            kwds.insert(name, value);
        }
        kwds
    }
}
