//! Type identifiers and kinds.

use dynk_kernel::Scalar;
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;

/// Identifies the constructor of a [`Type`](crate::Type).
///
/// The first fifteen variants are the builtin numeric scalars; they are the
/// keys of the scalar dispatch tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeId {
    /// Boolean (1 byte).
    Bool,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 128-bit signed integer.
    Int128,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 128-bit unsigned integer.
    UInt128,
    /// Single precision float.
    Float32,
    /// Double precision float.
    Float64,
    /// Complex number (single precision).
    Complex64,
    /// Complex number (double precision).
    Complex128,
    /// Calendar date.
    Date,
    /// Variable-length UTF-8 string.
    String,
    /// Variable-length byte string.
    Bytes,
    /// Fixed-size opaque bytes.
    FixedBytes,
    /// Struct of named fields.
    Struct,
    /// Fixed-size dimension.
    FixedDim,
    /// Expression type.
    Expr,
}

/// The builtin numeric scalars, in dispatch order.
pub const NUMERIC_TYPE_IDS: [TypeId; 15] = [
    TypeId::Bool,
    TypeId::Int8,
    TypeId::Int16,
    TypeId::Int32,
    TypeId::Int64,
    TypeId::Int128,
    TypeId::UInt8,
    TypeId::UInt16,
    TypeId::UInt32,
    TypeId::UInt64,
    TypeId::UInt128,
    TypeId::Float32,
    TypeId::Float64,
    TypeId::Complex64,
    TypeId::Complex128,
];

impl TypeId {
    /// Get the name of this type id.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Int128 => "int128",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::UInt128 => "uint128",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Complex64 => "complex64",
            Self::Complex128 => "complex128",
            Self::Date => "date",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::FixedBytes => "fixed_bytes",
            Self::Struct => "struct",
            Self::FixedDim => "fixed_dim",
            Self::Expr => "expr",
        }
    }

    /// Get the kind of this type id.
    #[must_use]
    pub const fn kind(self) -> Kind {
        match self {
            Self::Bool => Kind::Bool,
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::Int128 => Kind::SInt,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64 | Self::UInt128 => Kind::UInt,
            Self::Float32 | Self::Float64 => Kind::Real,
            Self::Complex64 | Self::Complex128 => Kind::Complex,
            Self::Date => Kind::Date,
            Self::String => Kind::String,
            Self::Bytes | Self::FixedBytes => Kind::Bytes,
            Self::Struct => Kind::Struct,
            Self::FixedDim => Kind::Dim,
            Self::Expr => Kind::Expression,
        }
    }

    /// Returns true for the fifteen builtin numeric scalars.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self.kind(),
            Kind::Bool | Kind::SInt | Kind::UInt | Kind::Real | Kind::Complex
        )
    }

    /// Size and alignment of a builtin numeric scalar.
    #[must_use]
    pub const fn numeric_layout(self) -> Option<(usize, usize)> {
        let layout = match self {
            Self::Bool | Self::Int8 | Self::UInt8 => (1, 1),
            Self::Int16 | Self::UInt16 => (2, 2),
            Self::Int32 | Self::UInt32 | Self::Float32 => (4, 4),
            Self::Int64 | Self::UInt64 | Self::Float64 => (8, 8),
            Self::Int128 | Self::UInt128 => (16, mem::align_of::<i128>()),
            Self::Complex64 => (8, 4),
            Self::Complex128 => (16, 8),
            _ => return None,
        };
        Some(layout)
    }

    /// Bits of precision a numeric scalar carries exactly.
    ///
    /// For floats and complex types this is the mantissa width including
    /// the implicit bit.
    const fn precision(self) -> u32 {
        match self {
            Self::Bool => 1,
            Self::Int8 => 7,
            Self::Int16 => 15,
            Self::Int32 => 31,
            Self::Int64 => 63,
            Self::Int128 => 127,
            Self::UInt8 => 8,
            Self::UInt16 => 16,
            Self::UInt32 => 32,
            Self::UInt64 => 64,
            Self::UInt128 => 128,
            Self::Float32 | Self::Complex64 => 24,
            Self::Float64 | Self::Complex128 => 53,
            _ => 0,
        }
    }

    /// Whether every value of numeric `src` is exactly representable in
    /// numeric `dst`.
    #[must_use]
    pub fn numeric_lossless(dst: Self, src: Self) -> bool {
        use Kind::{Bool, Complex, Real, SInt, UInt};

        if dst == src {
            return true;
        }
        match (dst.kind(), src.kind()) {
            (_, Bool) => dst.is_numeric(),
            (SInt, SInt) | (UInt, UInt) => dst.precision() >= src.precision(),
            (SInt, UInt) => dst.precision() >= src.precision(),
            (Real | Complex, SInt | UInt) => dst.precision() >= src.precision(),
            (Real | Complex, Real) | (Complex, Complex) => dst.precision() >= src.precision(),
            _ => false,
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Broad classification of types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    /// Booleans.
    Bool,
    /// Signed integers.
    SInt,
    /// Unsigned integers.
    UInt,
    /// Real floats.
    Real,
    /// Complex floats.
    Complex,
    /// Strings.
    String,
    /// Byte strings, fixed or variable.
    Bytes,
    /// Dates.
    Date,
    /// Structs.
    Struct,
    /// Array dimensions.
    Dim,
    /// Expression types.
    Expression,
}

/// Rust scalars with a builtin type.
pub trait HasTypeId: Scalar {
    /// The matching type id.
    const TYPE_ID: TypeId;
}

macro_rules! has_type_id {
    ($($ty:ty => $id:ident),* $(,)?) => {
        $(
            impl HasTypeId for $ty {
                const TYPE_ID: TypeId = TypeId::$id;
            }
        )*
    };
}

has_type_id! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    i128 => Int128,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    u128 => UInt128,
    f32 => Float32,
    f64 => Float64,
    Complex<f32> => Complex64,
    Complex<f64> => Complex128,
}
