//! Numeric conversion frames.
//!
//! Every builtin numeric scalar converts through a widened [`Value`]: the
//! source is widened losslessly, then narrowed into the destination under
//! the active [`ErrorMode`].
//!
//! | mode         | out of range      | fraction dropped | float rounding |
//! |--------------|-------------------|------------------|----------------|
//! | `nocheck`    | low-order bits    | truncates        | rounds         |
//! | `overflow`   | error             | truncates        | rounds         |
//! | `fractional` | error             | error            | rounds         |
//! | `inexact`    | error             | error            | error          |
//! | `saturate`   | clamps            | truncates        | rounds         |
//!
//! Complex to real drops the imaginary part; checked modes raise when it is
//! non-zero.

use crate::frame::{FrameRef, Kernel};
use crate::{unary_src, KernelResult};
use dynk_eval::ErrorMode;
use num_complex::Complex;
use std::fmt;
use std::marker::PhantomData;

/// A scalar widened for conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Any signed integer.
    Int(i128),
    /// Any unsigned integer.
    UInt(u128),
    /// Any real float.
    Float(f64),
    /// Any complex float, as (re, im).
    Complex(f64, f64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Complex(re, im) => write!(f, "({re}{im:+}j)"),
        }
    }
}

/// Why a conversion failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind {
    /// The value is outside the destination range.
    Overflow,
    /// A fractional part would be discarded.
    Fractional,
    /// The value would change through rounding.
    Inexact,
    /// A non-zero imaginary part would be discarded.
    ImaginaryLoss,
    /// The source does not denote a valid destination value.
    InvalidValue,
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Overflow => "overflow",
            Self::Fractional => "fractional part lost",
            Self::Inexact => "inexact result",
            Self::ImaginaryLoss => "imaginary part lost",
            Self::InvalidValue => "invalid value",
        };
        f.write_str(text)
    }
}

/// A data-dependent conversion failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} while converting {value} from {src} to {dst}")]
pub struct ConversionError {
    /// Failure category.
    pub kind: ConversionKind,
    /// Rendering of the offending value.
    pub value: String,
    /// Source scalar name.
    pub src: &'static str,
    /// Destination scalar name.
    pub dst: &'static str,
}

impl ConversionError {
    /// Build an error for `value` converted from `src` to `dst`.
    #[must_use]
    pub fn new(kind: ConversionKind, value: impl fmt::Display, src: &'static str, dst: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            src,
            dst,
        }
    }
}

/// A builtin numeric scalar.
pub trait Scalar: Copy + Send + Sync + fmt::Debug + 'static {
    /// Scalar name, e.g. `int32`.
    const NAME: &'static str;

    /// Widen losslessly.
    fn to_value(self) -> Value;

    /// Narrow under an error mode.
    ///
    /// # Errors
    ///
    /// Returns the failure category when the mode rejects the conversion.
    fn from_value(value: Value, mode: ErrorMode) -> Result<Self, ConversionKind>;
}

/// Convert one scalar into another.
///
/// # Errors
///
/// Fails when `mode` rejects the conversion of this particular value.
pub fn convert<D: Scalar, S: Scalar>(value: S, mode: ErrorMode) -> Result<D, ConversionError> {
    let wide = value.to_value();
    D::from_value(wide, mode).map_err(|kind| ConversionError::new(kind, wide, S::NAME, D::NAME))
}

fn out_of_range<T>(mode: ErrorMode, saturated: T, wrapped: T) -> Result<T, ConversionKind> {
    match mode {
        ErrorMode::Saturate => Ok(saturated),
        m if m.checks_overflow() => Err(ConversionKind::Overflow),
        _ => Ok(wrapped),
    }
}

fn check_imaginary(im: f64, mode: ErrorMode) -> Result<(), ConversionKind> {
    if im != 0.0 && mode.checks_overflow() {
        Err(ConversionKind::ImaginaryLoss)
    } else {
        Ok(())
    }
}

fn to_bool(value: Value, mode: ErrorMode) -> Result<bool, ConversionKind> {
    let (truthy, exact) = match value {
        Value::Bool(b) => (b, true),
        Value::Int(i) => (i != 0, i == 0 || i == 1),
        Value::UInt(u) => (u != 0, u <= 1),
        Value::Float(x) => (x != 0.0, x == 0.0 || x == 1.0),
        Value::Complex(re, im) => (re != 0.0 || im != 0.0, im == 0.0 && (re == 0.0 || re == 1.0)),
    };
    if !exact && mode.checks_overflow() {
        Err(ConversionKind::Overflow)
    } else {
        Ok(truthy)
    }
}

/// Narrow to a signed range; the caller truncates with `as`.
fn to_signed(value: Value, mode: ErrorMode, min: i128, max: i128, bits: u32) -> Result<i128, ConversionKind> {
    match value {
        Value::Bool(b) => Ok(i128::from(b)),
        Value::Int(i) if (min..=max).contains(&i) => Ok(i),
        Value::Int(i) => out_of_range(mode, i.clamp(min, max), i),
        Value::UInt(u) => match i128::try_from(u) {
            Ok(i) if i <= max => Ok(i),
            _ => out_of_range(mode, max, u as i128),
        },
        Value::Float(x) => float_to_signed(x, mode, min, max, bits),
        Value::Complex(re, im) => {
            check_imaginary(im, mode)?;
            float_to_signed(re, mode, min, max, bits)
        }
    }
}

fn float_to_signed(x: f64, mode: ErrorMode, min: i128, max: i128, bits: u32) -> Result<i128, ConversionKind> {
    if x.is_nan() {
        return out_of_range(mode, 0, 0);
    }
    let t = x.trunc();
    let limit = 2f64.powi(bits as i32 - 1);
    if t < -limit || t >= limit {
        let saturated = if t < 0.0 { min } else { max };
        return out_of_range(mode, saturated, x as i128);
    }
    if t != x && mode.checks_fractional() {
        return Err(ConversionKind::Fractional);
    }
    Ok(t as i128)
}

/// Narrow to an unsigned range; the caller truncates with `as`.
fn to_unsigned(value: Value, mode: ErrorMode, max: u128, bits: u32) -> Result<u128, ConversionKind> {
    match value {
        Value::Bool(b) => Ok(u128::from(b)),
        Value::Int(i) => match u128::try_from(i) {
            Ok(u) if u <= max => Ok(u),
            _ => out_of_range(mode, if i < 0 { 0 } else { max }, i as u128),
        },
        Value::UInt(u) if u <= max => Ok(u),
        Value::UInt(u) => out_of_range(mode, max, u),
        Value::Float(x) => float_to_unsigned(x, mode, max, bits),
        Value::Complex(re, im) => {
            check_imaginary(im, mode)?;
            float_to_unsigned(re, mode, max, bits)
        }
    }
}

fn float_to_unsigned(x: f64, mode: ErrorMode, max: u128, bits: u32) -> Result<u128, ConversionKind> {
    if x.is_nan() {
        return out_of_range(mode, 0, 0);
    }
    let t = x.trunc();
    let limit = 2f64.powi(bits as i32);
    if t < 0.0 || t >= limit {
        let (saturated, wrapped) = if t < 0.0 {
            (0, (x as i128) as u128)
        } else {
            (max, x as u128)
        };
        return out_of_range(mode, saturated, wrapped);
    }
    if t != x && mode.checks_fractional() {
        return Err(ConversionKind::Fractional);
    }
    Ok(t as u128)
}

const TWO_POW_127: f64 = 170_141_183_460_469_231_731_687_303_715_884_105_728.0;

fn to_real(value: Value, mode: ErrorMode) -> Result<f64, ConversionKind> {
    match value {
        Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        Value::Int(i) => {
            let x = i as f64;
            if mode.checks_inexact() && (x >= TWO_POW_127 || x as i128 != i) {
                return Err(ConversionKind::Inexact);
            }
            Ok(x)
        }
        Value::UInt(u) => {
            let x = u as f64;
            if mode.checks_inexact() && (x >= 2.0 * TWO_POW_127 || x as u128 != u) {
                return Err(ConversionKind::Inexact);
            }
            Ok(x)
        }
        Value::Float(x) => Ok(x),
        Value::Complex(re, im) => {
            check_imaginary(im, mode)?;
            Ok(re)
        }
    }
}

/// Integers round to `f32` in one step; rounding through `f64` first can
/// land on the other side of a tie.
fn to_f32(value: Value, mode: ErrorMode) -> Result<f32, ConversionKind> {
    match value {
        Value::Int(i) => {
            let y = i as f32;
            if mode.checks_inexact() && (y >= TWO_POW_127 as f32 || y as i128 != i) {
                return Err(ConversionKind::Inexact);
            }
            Ok(y)
        }
        Value::UInt(u) => {
            // Values near u128::MAX round past f32::MAX
            let y = u as f32;
            if y.is_infinite() {
                return out_of_range(mode, f32::MAX, y);
            }
            if mode.checks_inexact() && y as u128 != u {
                return Err(ConversionKind::Inexact);
            }
            Ok(y)
        }
        other => narrow_f32(to_real(other, mode)?, mode),
    }
}

fn narrow_f32(x: f64, mode: ErrorMode) -> Result<f32, ConversionKind> {
    let y = x as f32;
    if x.is_finite() && y.is_infinite() {
        let saturated = if x > 0.0 { f32::MAX } else { f32::MIN };
        return out_of_range(mode, saturated, y);
    }
    if mode.checks_inexact() && !x.is_nan() && f64::from(y) != x {
        return Err(ConversionKind::Inexact);
    }
    Ok(y)
}

fn to_complex(value: Value, mode: ErrorMode) -> Result<(f64, f64), ConversionKind> {
    match value {
        Value::Complex(re, im) => Ok((re, im)),
        other => Ok((to_real(other, mode)?, 0.0)),
    }
}

impl Scalar for bool {
    const NAME: &'static str = "bool";

    fn to_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value, mode: ErrorMode) -> Result<Self, ConversionKind> {
        to_bool(value, mode)
    }
}

macro_rules! signed_scalar {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const NAME: &'static str = $name;

                fn to_value(self) -> Value {
                    Value::Int(self as i128)
                }

                fn from_value(value: Value, mode: ErrorMode) -> Result<Self, ConversionKind> {
                    let wide = to_signed(value, mode, <$ty>::MIN as i128, <$ty>::MAX as i128, <$ty>::BITS)?;
                    Ok(wide as $ty)
                }
            }
        )*
    };
}

macro_rules! unsigned_scalar {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const NAME: &'static str = $name;

                fn to_value(self) -> Value {
                    Value::UInt(self as u128)
                }

                fn from_value(value: Value, mode: ErrorMode) -> Result<Self, ConversionKind> {
                    let wide = to_unsigned(value, mode, <$ty>::MAX as u128, <$ty>::BITS)?;
                    Ok(wide as $ty)
                }
            }
        )*
    };
}

signed_scalar! {
    i8 => "int8",
    i16 => "int16",
    i32 => "int32",
    i64 => "int64",
    i128 => "int128",
}

unsigned_scalar! {
    u8 => "uint8",
    u16 => "uint16",
    u32 => "uint32",
    u64 => "uint64",
    u128 => "uint128",
}

impl Scalar for f32 {
    const NAME: &'static str = "float32";

    fn to_value(self) -> Value {
        Value::Float(f64::from(self))
    }

    fn from_value(value: Value, mode: ErrorMode) -> Result<Self, ConversionKind> {
        to_f32(value, mode)
    }
}

impl Scalar for f64 {
    const NAME: &'static str = "float64";

    fn to_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: Value, mode: ErrorMode) -> Result<Self, ConversionKind> {
        to_real(value, mode)
    }
}

impl Scalar for Complex<f32> {
    const NAME: &'static str = "complex64";

    fn to_value(self) -> Value {
        Value::Complex(f64::from(self.re), f64::from(self.im))
    }

    fn from_value(value: Value, mode: ErrorMode) -> Result<Self, ConversionKind> {
        match value {
            Value::Complex(re, im) => Ok(Complex::new(narrow_f32(re, mode)?, narrow_f32(im, mode)?)),
            other => Ok(Complex::new(to_f32(other, mode)?, 0.0)),
        }
    }
}

impl Scalar for Complex<f64> {
    const NAME: &'static str = "complex128";

    fn to_value(self) -> Value {
        Value::Complex(self.re, self.im)
    }

    fn from_value(value: Value, mode: ErrorMode) -> Result<Self, ConversionKind> {
        let (re, im) = to_complex(value, mode)?;
        Ok(Complex::new(re, im))
    }
}

/// Converts a `S` source element into a `D` destination element.
#[derive(Debug)]
pub struct ConvertKernel<D, S> {
    errmode: ErrorMode,
    _marker: PhantomData<fn(S) -> D>,
}

impl<D, S> ConvertKernel<D, S> {
    /// Create a conversion frame for the given error mode.
    #[must_use]
    pub fn new(errmode: ErrorMode) -> Self {
        Self {
            errmode,
            _marker: PhantomData,
        }
    }

    /// Error mode applied by this frame.
    #[must_use]
    pub fn errmode(&self) -> ErrorMode {
        self.errmode
    }
}

impl<D: Scalar, S: Scalar> Kernel for ConvertKernel<D, S> {
    const NAME: &'static str = "convert";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        // Safety: caller contract
        let value = unsafe { src.cast::<S>().read_unaligned() };
        let out = convert::<D, S>(value, self.errmode)?;
        // Safety: caller contract
        unsafe { dst.cast::<D>().write_unaligned(out) };
        Ok(())
    }

    unsafe fn strided(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> KernelResult<()> {
        let (mut src, src_stride) = (unary_src(Self::NAME, src)?, unary_src(Self::NAME, src_stride)?);
        let mut dst = dst;
        for _ in 0..count {
            // Safety: caller contract
            let value = unsafe { src.cast::<S>().read_unaligned() };
            let out = convert::<D, S>(value, self.errmode)?;
            // Safety: caller contract
            unsafe { dst.cast::<D>().write_unaligned(out) };
            dst = dst.wrapping_offset(dst_stride);
            src = src.wrapping_offset(src_stride);
        }
        Ok(())
    }
}
