//! Callable signatures.
//!
//! A signature is written like `(Any, Any) -> Any`. Parameter and return
//! entries are type patterns; the runtime only uses their count, while the
//! keyword names given alongside are checked on every resolve.

use crate::kwds::Kwds;
use crate::{CallableError, CallableResult};
use std::fmt;

/// Positional parameters, return pattern and accepted keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<String>,
    ret: String,
    kwds: Vec<String>,
}

impl Signature {
    /// Build a signature from its parts.
    #[must_use]
    pub fn new(params: &[&str], ret: &str, kwds: &[&str]) -> Self {
        Self {
            params: params.iter().map(|p| (*p).to_string()).collect(),
            ret: ret.to_string(),
            kwds: kwds.iter().map(|k| (*k).to_string()).collect(),
        }
    }

    /// Parse `(P, ...) -> R` with the given keyword names.
    ///
    /// # Errors
    ///
    /// Fails on malformed text or empty entries.
    pub fn parse(text: &str, kwds: &[&str]) -> CallableResult<Self> {
        let invalid = || CallableError::InvalidSignature(text.to_string());
        let (params, ret) = text.split_once("->").ok_or_else(invalid)?;
        let params = params
            .trim()
            .strip_prefix('(')
            .and_then(|p| p.strip_suffix(')'))
            .ok_or_else(invalid)?
            .trim();
        let ret = ret.trim();
        if ret.is_empty() || ret.contains(['(', ')', ',']) {
            return Err(invalid());
        }

        let params: Vec<&str> = if params.is_empty() {
            Vec::new()
        } else {
            params.split(',').map(str::trim).collect()
        };
        if params.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        Ok(Self::new(&params, ret, kwds))
    }

    /// Number of positional parameters.
    #[inline]
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Accepted keyword names.
    #[must_use]
    pub fn kwd_names(&self) -> &[String] {
        &self.kwds
    }

    /// Check an operand count and keyword set against this signature.
    ///
    /// # Errors
    ///
    /// Fails on an arity mismatch or an unknown keyword.
    pub fn check(&self, callable: &str, nsrc: usize, kwds: &Kwds) -> CallableResult<()> {
        if nsrc != self.arity() {
            return Err(CallableError::Arity {
                callable: callable.to_string(),
                expected: self.arity(),
                found: nsrc,
            });
        }
        if let Some(unknown) = kwds.names().find(|name| !self.kwds.iter().any(|k| k == name)) {
            return Err(CallableError::MalformedKwds {
                callable: callable.to_string(),
                reason: format!("unexpected keyword `{unknown}`"),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) -> {}", self.params.join(", "), self.ret)
    }
}
