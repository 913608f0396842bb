//! POD copy frames.
//!
//! Plain-old-data values of equal type are copied bitwise. Sizes 1, 2, 4
//! and 8 get dedicated frames, with separate unaligned variants when the
//! element alignment is smaller than its size; everything else falls back to
//! a byte-count copy.

use crate::buffer::{FrameOffset, KernelBuffer};
use crate::frame::{FrameRef, Kernel};
use crate::{unary_src, KernelRequest, KernelResult};
use std::marker::PhantomData;
use std::ptr;

/// Fixed-width unit moved by the specialized copy frames.
pub trait CopyUnit: Copy + Send + Sync + 'static {
    /// Frame name of the aligned copy.
    const ALIGNED: &'static str;
    /// Frame name of the unaligned copy.
    const UNALIGNED: &'static str;
}

macro_rules! copy_unit {
    ($($ty:ty => $aligned:literal, $unaligned:literal;)*) => {
        $(
            impl CopyUnit for $ty {
                const ALIGNED: &'static str = $aligned;
                const UNALIGNED: &'static str = $unaligned;
            }
        )*
    };
}

copy_unit! {
    u8 => "aligned_copy_1", "unaligned_copy_1";
    u16 => "aligned_copy_2", "unaligned_copy_2";
    u32 => "aligned_copy_4", "unaligned_copy_4";
    u64 => "aligned_copy_8", "unaligned_copy_8";
}

/// Copy of one naturally aligned unit.
#[derive(Debug, Default)]
pub struct AlignedCopy<T>(PhantomData<fn() -> T>);

/// Copy of one unit with no alignment assumption.
#[derive(Debug, Default)]
pub struct UnalignedCopy<T>(PhantomData<fn() -> T>);

/// Copy of an arbitrary number of bytes.
#[derive(Debug)]
pub struct ByteCopy {
    size: usize,
}

impl<T: CopyUnit> Kernel for AlignedCopy<T> {
    const NAME: &'static str = T::ALIGNED;

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        // Safety: caller contract; both sides are aligned for T
        unsafe { dst.cast::<T>().write(src.cast::<T>().read()) };
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
            unsafe { dst.cast::<T>().write(src.cast::<T>().read()) };
            dst = dst.wrapping_offset(dst_stride);
            src = src.wrapping_offset(src_stride);
        }
        Ok(())
    }
}

impl<T: CopyUnit> Kernel for UnalignedCopy<T> {
    const NAME: &'static str = T::UNALIGNED;

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        // Safety: caller contract
        unsafe { dst.cast::<T>().write_unaligned(src.cast::<T>().read_unaligned()) };
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
            unsafe { dst.cast::<T>().write_unaligned(src.cast::<T>().read_unaligned()) };
            dst = dst.wrapping_offset(dst_stride);
            src = src.wrapping_offset(src_stride);
        }
        Ok(())
    }
}

impl Kernel for ByteCopy {
    const NAME: &'static str = "byte_copy";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        // Safety: caller contract; `ptr::copy` tolerates self-assignment
        unsafe { ptr::copy(src, dst, self.size) };
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
            unsafe { ptr::copy(src, dst, self.size) };
            dst = dst.wrapping_offset(dst_stride);
            src = src.wrapping_offset(src_stride);
        }
        Ok(())
    }
}

/// Append the copy frame best suited to an element of `size` bytes whose
/// alignment is `alignment`.
///
/// The aligned frames are only chosen when the alignment equals the size.
/// Any other alignment, larger ones included, gets the unaligned frame.
///
/// # Errors
///
/// Propagates buffer growth failures.
pub fn make_pod_copy(
    ckb: &mut KernelBuffer,
    request: KernelRequest,
    size: usize,
    alignment: usize,
) -> KernelResult<FrameOffset> {
    let aligned = alignment == size;
    match size {
        1 => ckb.append(request, AlignedCopy::<u8>::default()),
        2 if aligned => ckb.append(request, AlignedCopy::<u16>::default()),
        2 => ckb.append(request, UnalignedCopy::<u16>::default()),
        4 if aligned => ckb.append(request, AlignedCopy::<u32>::default()),
        4 => ckb.append(request, UnalignedCopy::<u32>::default()),
        8 if aligned => ckb.append(request, AlignedCopy::<u64>::default()),
        8 => ckb.append(request, UnalignedCopy::<u64>::default()),
        _ => ckb.append(request, ByteCopy { size }),
    }
}
