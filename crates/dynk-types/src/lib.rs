//! Dynamic types, array metadata and arrays for the dynk runtime.
//!
//! A [`Type`] describes the layout of array data at runtime: builtin
//! numerics, fixed dimensions, strings and bytes, dates, structs and
//! expression types. Each array pairs its type with [`ArrMeta`] (strides and
//! the memory blocks its variable-length data lives in) and a data pointer.
//!
//! # Overview
//!
//! - [`TypeId`] and [`Kind`] classify types
//! - [`Type`] is the cheap-to-clone type descriptor
//! - [`ArrMeta`] is the per-array metadata tree
//! - [`Array`] is the shared array handle
//! - [`ExprKernelGenerator`] bridges expression types in kernels

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod array;
pub mod arrmeta;
pub mod date;
pub mod expr;
pub mod string;
pub mod type_id;
pub mod types;

pub use array::{AccessFlags, Array, ArrayPreamble, WeakArray};
pub use arrmeta::ArrMeta;
pub use expr::{Byteswap, ByteswapKernel, ExprKernelGenerator};
pub use string::StringData;
pub use type_id::{HasTypeId, Kind, TypeId, NUMERIC_TYPE_IDS};
pub use types::{is_lossless_assignment, ExprType, FixedDim, Shape, StructType, Type};

use dynk_memblock::AllocError;

/// Result type for type construction.
pub type TypeResult<T> = Result<T, TypeError>;

/// Result type for array operations.
pub type ArrayResult<T> = Result<T, ArrayError>;

/// Errors raised while constructing types or their metadata.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// The id does not name a builtin numeric type.
    #[error("`{0}` is not a builtin numeric type")]
    NotBuiltin(TypeId),
    /// Invalid fixed-size bytes layout.
    #[error("invalid fixed_bytes layout: size {size} with alignment {align}")]
    InvalidFixedBytes {
        /// Size in bytes.
        size: usize,
        /// Requested alignment.
        align: usize,
    },
    /// A struct field name was used twice.
    #[error("duplicate struct field `{0}`")]
    DuplicateField(String),
    /// A struct field has a type that cannot be a field.
    #[error("struct field `{name}` cannot have type {tp}")]
    InvalidField {
        /// Field name.
        name: String,
        /// Offending type.
        tp: String,
    },
    /// An expression type was used as the operand of another.
    #[error("expression operand {0} is itself an expression")]
    NestedExpression(String),
    /// An expression type could not be formed.
    #[error("{0}")]
    InvalidExpression(String),
    /// Text that is not a valid calendar date.
    #[error("invalid date `{0}`")]
    InvalidDate(String),
    /// Metadata does not have the shape of the type.
    #[error("metadata does not match type {0}")]
    MetadataMismatch(String),
}

/// Errors raised by array construction and access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArrayError {
    /// The element type is not the one requested.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Requested type.
        expected: String,
        /// Actual type.
        found: String,
    },
    /// The number of values does not fill the shape.
    #[error("shape holds {expected} element(s) but {found} were given")]
    ShapeMismatch {
        /// Elements the shape holds.
        expected: usize,
        /// Elements supplied.
        found: usize,
    },
    /// A scalar read from an array with dimensions.
    #[error("array with {ndim} dimension(s) is not a scalar")]
    NotScalar {
        /// Number of dimensions.
        ndim: usize,
    },
    /// A write through a read-only handle.
    #[error("array is read-only")]
    ReadOnly,
    /// A reinterpreting view that cannot be formed.
    #[error("cannot view {from} as {to}")]
    InvalidView {
        /// Type of the array.
        from: String,
        /// Requested type.
        to: String,
    },
    /// String data without a block to allocate from.
    #[error("array metadata holds no memory block for element data")]
    MissingBlockref,
    /// Type construction failed.
    #[error(transparent)]
    Type(#[from] TypeError),
    /// Storage could not be allocated.
    #[error(transparent)]
    Alloc(#[from] AllocError),
}
