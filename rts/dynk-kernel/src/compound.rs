//! Accumulating binary operators.
//!
//! A compound frame computes `dst = op(dst, src)` in place. Reductions use
//! them as followup frames, and callables expose them directly as
//! `add_assign`-style operations.

use crate::frame::{FrameRef, Kernel};
use crate::{unary_src, KernelResult};
use num_complex::Complex;
use num_traits::{WrappingAdd, WrappingMul};
use std::fmt::Debug;
use std::marker::PhantomData;

/// Scalars supporting `+` and `*` accumulation.
///
/// Integers wrap on overflow. Booleans accumulate as logical or/and.
pub trait Accumulate: Copy + Send + Sync + Debug + 'static {
    /// Sum of two values.
    fn acc_add(self, other: Self) -> Self;
    /// Product of two values.
    fn acc_mul(self, other: Self) -> Self;
}

/// Scalars with a total enough order for min/max.
pub trait Ordered: Copy + Send + Sync + Debug + 'static {
    /// Smaller of two values.
    fn min_of(self, other: Self) -> Self;
    /// Larger of two values.
    fn max_of(self, other: Self) -> Self;
}

macro_rules! int_ops {
    ($($ty:ty),*) => {
        $(
            impl Accumulate for $ty {
                #[inline]
                fn acc_add(self, other: Self) -> Self {
                    WrappingAdd::wrapping_add(&self, &other)
                }

                #[inline]
                fn acc_mul(self, other: Self) -> Self {
                    WrappingMul::wrapping_mul(&self, &other)
                }
            }

            impl Ordered for $ty {
                #[inline]
                fn min_of(self, other: Self) -> Self {
                    Ord::min(self, other)
                }

                #[inline]
                fn max_of(self, other: Self) -> Self {
                    Ord::max(self, other)
                }
            }
        )*
    };
}

int_ops!(i8, i16, i32, i64, i128, u8, u16, u32, u64, u128);

macro_rules! float_ops {
    ($($ty:ty),*) => {
        $(
            impl Accumulate for $ty {
                #[inline]
                fn acc_add(self, other: Self) -> Self {
                    self + other
                }

                #[inline]
                fn acc_mul(self, other: Self) -> Self {
                    self * other
                }
            }

            impl Ordered for $ty {
                #[inline]
                fn min_of(self, other: Self) -> Self {
                    self.min(other)
                }

                #[inline]
                fn max_of(self, other: Self) -> Self {
                    self.max(other)
                }
            }

            impl Accumulate for Complex<$ty> {
                #[inline]
                fn acc_add(self, other: Self) -> Self {
                    self + other
                }

                #[inline]
                fn acc_mul(self, other: Self) -> Self {
                    self * other
                }
            }
        )*
    };
}

float_ops!(f32, f64);

impl Accumulate for bool {
    fn acc_add(self, other: Self) -> Self {
        self | other
    }

    fn acc_mul(self, other: Self) -> Self {
        self & other
    }
}

impl Ordered for bool {
    fn min_of(self, other: Self) -> Self {
        self & other
    }

    fn max_of(self, other: Self) -> Self {
        self | other
    }
}

/// A binary accumulation `acc = op(acc, value)`.
pub trait CompoundOp<T>: Send + Sync + 'static {
    /// Frame name.
    const NAME: &'static str;

    /// Fold `value` into `acc`.
    fn apply(acc: T, value: T) -> T;
}

/// `dst += src`
#[derive(Debug)]
pub struct Add;

/// `dst *= src`
#[derive(Debug)]
pub struct Multiply;

/// `dst = min(dst, src)`
#[derive(Debug)]
pub struct Min;

/// `dst = max(dst, src)`
#[derive(Debug)]
pub struct Max;

impl<T: Accumulate> CompoundOp<T> for Add {
    const NAME: &'static str = "compound_add";

    #[inline]
    fn apply(acc: T, value: T) -> T {
        acc.acc_add(value)
    }
}

impl<T: Accumulate> CompoundOp<T> for Multiply {
    const NAME: &'static str = "compound_multiply";

    #[inline]
    fn apply(acc: T, value: T) -> T {
        acc.acc_mul(value)
    }
}

impl<T: Ordered> CompoundOp<T> for Min {
    const NAME: &'static str = "compound_min";

    #[inline]
    fn apply(acc: T, value: T) -> T {
        acc.min_of(value)
    }
}

impl<T: Ordered> CompoundOp<T> for Max {
    const NAME: &'static str = "compound_max";

    #[inline]
    fn apply(acc: T, value: T) -> T {
        acc.max_of(value)
    }
}

/// In-place accumulation of `T` values with operator `O`.
#[derive(Debug)]
pub struct CompoundKernel<T, O> {
    _marker: PhantomData<fn(T) -> O>,
}

impl<T, O> CompoundKernel<T, O> {
    /// Create the frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T, O> Default for CompoundKernel<T, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, O> Kernel for CompoundKernel<T, O>
where
    T: Copy + Send + Sync + 'static,
    O: CompoundOp<T>,
{
    const NAME: &'static str = <O as CompoundOp<T>>::NAME;

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        // Safety: caller contract
        unsafe {
            let acc = dst.cast::<T>().read_unaligned();
            let value = src.cast::<T>().read_unaligned();
            dst.cast::<T>().write_unaligned(O::apply(acc, value));
        }
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
        if count == 0 {
            return Ok(());
        }
        if dst_stride == 0 {
            // Safety: caller contract
            let mut acc = unsafe { dst.cast::<T>().read_unaligned() };
            for _ in 0..count {
                // Safety: caller contract
                acc = O::apply(acc, unsafe { src.cast::<T>().read_unaligned() });
                src = src.wrapping_offset(src_stride);
            }
            // Safety: caller contract
            unsafe { dst.cast::<T>().write_unaligned(acc) };
            return Ok(());
        }
        let mut dst = dst;
        for _ in 0..count {
            // Safety: caller contract
            unsafe {
                let acc = dst.cast::<T>().read_unaligned();
                let value = src.cast::<T>().read_unaligned();
                dst.cast::<T>().write_unaligned(O::apply(acc, value));
            }
            dst = dst.wrapping_offset(dst_stride);
            src = src.wrapping_offset(src_stride);
        }
        Ok(())
    }
}
