//! One dimension of strided elementwise evaluation.

use crate::frame::{ChildOffset, FrameRef, Kernel, SrcPtrs};
use crate::{KernelError, KernelResult};
use smallvec::SmallVec;

/// Walks one dimension and hands each run to a strided child.
///
/// The frame takes any number of sources, each with its own stride. A
/// source stride of zero broadcasts a single source element (or a size-1
/// dimension) across the destination dimension.
#[derive(Debug)]
pub struct StridedAssign {
    size: usize,
    dst_stride: isize,
    src_strides: SmallVec<[isize; 4]>,
    child: Option<ChildOffset>,
}

impl StridedAssign {
    /// Create a frame for a dimension of `size` elements read from one
    /// source.
    #[must_use]
    pub fn new(size: usize, dst_stride: isize, src_stride: isize) -> Self {
        Self::with_sources(size, dst_stride, &[src_stride])
    }

    /// Create a frame reading one source per entry of `src_strides`.
    #[must_use]
    pub fn with_sources(size: usize, dst_stride: isize, src_strides: &[isize]) -> Self {
        Self {
            size,
            dst_stride,
            src_strides: SmallVec::from_slice(src_strides),
            child: None,
        }
    }

    /// Link the element-level child.
    pub fn link(&mut self, child: ChildOffset) {
        self.child = Some(child);
    }

    /// Number of elements in the dimension.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of source operands.
    #[must_use]
    pub fn nsrc(&self) -> usize {
        self.src_strides.len()
    }

    fn check_arity(&self, found: usize) -> KernelResult<()> {
        if found == self.nsrc() {
            Ok(())
        } else {
            Err(KernelError::Arity {
                frame: Self::NAME,
                expected: self.nsrc(),
                found,
            })
        }
    }
}

impl Kernel for StridedAssign {
    const NAME: &'static str = "strided_assign";

    unsafe fn single(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        self.check_arity(src.len())?;
        let child = frame.linked_child(self.child)?;
        // Safety: forwarded caller contract
        unsafe { child.strided(dst, self.dst_stride, src, &self.src_strides, self.size) }
    }

    unsafe fn strided(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> KernelResult<()> {
        self.check_arity(src.len())?;
        self.check_arity(src_stride.len())?;
        let child = frame.linked_child(self.child)?;
        let mut src: SrcPtrs = src.iter().copied().collect();
        let mut dst = dst;
        for _ in 0..count {
            // Safety: forwarded caller contract
            unsafe { child.strided(dst, self.dst_stride, &src, &self.src_strides, self.size)? };
            dst = dst.wrapping_offset(dst_stride);
            for (ptr, &stride) in src.iter_mut().zip(src_stride) {
                *ptr = ptr.wrapping_offset(stride);
            }
        }
        Ok(())
    }
}
