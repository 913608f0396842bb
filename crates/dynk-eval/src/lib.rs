//! Evaluation context for dynk kernel construction.
//!
//! An [`EvalContext`] carries the defaults that resolve and instantiate
//! consult: the error mode applied to conversions and the chunk size used
//! when an operation has to stage values through a temporary buffer.
//!
//! The context is an ordinary value. Callers build one at the API boundary
//! (usually [`EvalContext::default`] or [`EvalContext::from_env`]) and pass
//! it down explicitly; nothing in the runtime reads ambient global state.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default number of elements staged per chunk by buffered kernels.
pub const DEFAULT_BUFFER_CHUNK_SIZE: usize = 128;

/// Environment variable selecting the default error mode.
pub const ERRMODE_ENV: &str = "DYNK_ERRMODE";

/// Environment variable selecting the buffered chunk size.
pub const BUFFER_CHUNK_ENV: &str = "DYNK_BUFFER_CHUNK";

/// Policy for out-of-range or lossy value conversions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// No checks; out-of-range integers keep their low-order bits.
    NoCheck,
    /// Raise when a value does not fit the destination range.
    Overflow,
    /// Overflow checks, and raise when a fractional part is discarded.
    #[default]
    Fractional,
    /// Raise on any change of value, including float rounding.
    Inexact,
    /// Clamp to the destination range; never raises.
    Saturate,
}

impl ErrorMode {
    /// Get the name of this error mode.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoCheck => "nocheck",
            Self::Overflow => "overflow",
            Self::Fractional => "fractional",
            Self::Inexact => "inexact",
            Self::Saturate => "saturate",
        }
    }

    /// Whether this mode raises on range overflow.
    #[must_use]
    pub const fn checks_overflow(self) -> bool {
        matches!(self, Self::Overflow | Self::Fractional | Self::Inexact)
    }

    /// Whether this mode raises when a fractional part is dropped.
    #[must_use]
    pub const fn checks_fractional(self) -> bool {
        matches!(self, Self::Fractional | Self::Inexact)
    }

    /// Whether this mode raises on float rounding.
    #[must_use]
    pub const fn checks_inexact(self) -> bool {
        matches!(self, Self::Inexact)
    }
}

impl fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ErrorMode {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nocheck" | "none" => Ok(Self::NoCheck),
            "overflow" => Ok(Self::Overflow),
            "fractional" => Ok(Self::Fractional),
            "inexact" => Ok(Self::Inexact),
            "saturate" => Ok(Self::Saturate),
            _ => Err(EvalError::UnknownErrorMode(s.to_string())),
        }
    }
}

/// Defaults consulted while resolving and instantiating kernels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalContext {
    /// Error mode used when a call does not pass one.
    pub errmode: ErrorMode,
    /// Elements staged per chunk by buffered kernels.
    pub buffer_chunk_size: usize,
    /// Emit a trace event for every frame instantiated.
    pub trace_frames: bool,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self {
            errmode: ErrorMode::default(),
            buffer_chunk_size: DEFAULT_BUFFER_CHUNK_SIZE,
            trace_frames: false,
        }
    }
}

impl EvalContext {
    /// Create a context with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default error mode.
    #[must_use]
    pub fn with_errmode(mut self, errmode: ErrorMode) -> Self {
        self.errmode = errmode;
        self
    }

    /// Set the buffered chunk size.
    #[must_use]
    pub fn with_buffer_chunk_size(mut self, size: usize) -> Self {
        self.buffer_chunk_size = size;
        self
    }

    /// Build a context from `DYNK_ERRMODE` and `DYNK_BUFFER_CHUNK`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self, EvalError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a context from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EvalError> {
        let mut ctx = Self::default();
        if let Some(mode) = lookup(ERRMODE_ENV) {
            ctx.errmode = mode.trim().parse()?;
        }
        if let Some(chunk) = lookup(BUFFER_CHUNK_ENV) {
            ctx.buffer_chunk_size = chunk
                .trim()
                .parse()
                .map_err(|_| EvalError::InvalidChunkSize(chunk.clone()))?;
        }
        ctx.validate()?;
        Ok(ctx)
    }

    /// Check that the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the chunk size is zero.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.buffer_chunk_size == 0 {
            return Err(EvalError::InvalidChunkSize("0".to_string()));
        }
        Ok(())
    }
}

/// Errors that can occur while building an evaluation context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// An error mode name was not recognized.
    #[error("unknown error mode: {0}")]
    UnknownErrorMode(String),
    /// The chunk size is not a positive integer.
    #[error("invalid buffer chunk size: {0}")]
    InvalidChunkSize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errmode_roundtrip_names() {
        for mode in [
            ErrorMode::NoCheck,
            ErrorMode::Overflow,
            ErrorMode::Fractional,
            ErrorMode::Inexact,
            ErrorMode::Saturate,
        ] {
            assert_eq!(mode.name().parse::<ErrorMode>().unwrap(), mode);
        }
        assert!("strict".parse::<ErrorMode>().is_err());
    }

    #[test]
    fn test_errmode_checks() {
        assert!(!ErrorMode::NoCheck.checks_overflow());
        assert!(!ErrorMode::Saturate.checks_overflow());
        assert!(ErrorMode::Overflow.checks_overflow());
        assert!(!ErrorMode::Overflow.checks_fractional());
        assert!(ErrorMode::Fractional.checks_fractional());
        assert!(!ErrorMode::Fractional.checks_inexact());
        assert!(ErrorMode::Inexact.checks_inexact());
    }

    #[test]
    fn test_default_context() {
        let ctx = EvalContext::default();
        assert_eq!(ctx.errmode, ErrorMode::Fractional);
        assert_eq!(ctx.buffer_chunk_size, DEFAULT_BUFFER_CHUNK_SIZE);
        assert!(!ctx.trace_frames);
    }

    #[test]
    fn test_from_lookup() {
        let ctx = EvalContext::from_lookup(|key| match key {
            ERRMODE_ENV => Some("nocheck".to_string()),
            BUFFER_CHUNK_ENV => Some("64".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(ctx.errmode, ErrorMode::NoCheck);
        assert_eq!(ctx.buffer_chunk_size, 64);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = EvalContext::from_lookup(|key| {
            (key == BUFFER_CHUNK_ENV).then(|| "lots".to_string())
        })
        .unwrap_err();
        assert_eq!(err, EvalError::InvalidChunkSize("lots".to_string()));

        let err = EvalContext::from_lookup(|key| (key == BUFFER_CHUNK_ENV).then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, EvalError::InvalidChunkSize(_)));
    }
}
