//! Reduction frames.
//!
//! A reduction kernel has one frame per source dimension, outermost first.
//! Each frame either reduces its dimension (the destination stride is zero)
//! or broadcasts it (the destination keeps the dimension). The innermost
//! frame owns two element-level children instantiated for
//! [`KernelRequest::Strided`](crate::KernelRequest::Strided):
//!
//! - `init` assigns a source element to the destination, seeding the
//!   accumulator
//! - `followup` folds a source element into the destination
//!
//! Outer frames own the next dimension's frame and drive it through the
//! reduction entry points of [`FrameRef`].
//!
//! The accumulator is seeded from the first element of each reduced run,
//! which is only correct for associative operators. Reducing a dimension of
//! length zero fails with [`KernelError::EmptyReduction`].

use crate::frame::{ChildOffset, FrameRef, Kernel, ReductionKernel};
use crate::{unary_src, KernelError, KernelResult};

/// Innermost dimension, reduced.
#[derive(Debug)]
pub struct InnerReduce {
    size: usize,
    src_stride: isize,
    followup: Option<ChildOffset>,
    init: Option<ChildOffset>,
}

/// Innermost dimension, kept in the destination.
#[derive(Debug)]
pub struct InnerBroadcast {
    size: usize,
    dst_stride: isize,
    src_stride: isize,
    followup: Option<ChildOffset>,
    init: Option<ChildOffset>,
}

/// Outer dimension, reduced.
#[derive(Debug)]
pub struct OuterReduce {
    size: usize,
    src_stride: isize,
    child: Option<ChildOffset>,
}

/// Outer dimension, kept in the destination.
#[derive(Debug)]
pub struct OuterBroadcast {
    size: usize,
    dst_stride: isize,
    src_stride: isize,
    child: Option<ChildOffset>,
}

impl InnerReduce {
    /// Reduce `size` elements spaced `src_stride` bytes apart.
    #[must_use]
    pub fn new(size: usize, src_stride: isize) -> Self {
        Self {
            size,
            src_stride,
            followup: None,
            init: None,
        }
    }

    /// Link the element-level children.
    pub fn link(&mut self, followup: ChildOffset, init: ChildOffset) {
        self.followup = Some(followup);
        self.init = Some(init);
    }
}

impl InnerBroadcast {
    /// Pass `size` elements through to the destination.
    #[must_use]
    pub fn new(size: usize, dst_stride: isize, src_stride: isize) -> Self {
        Self {
            size,
            dst_stride,
            src_stride,
            followup: None,
            init: None,
        }
    }

    /// Link the element-level children.
    pub fn link(&mut self, followup: ChildOffset, init: ChildOffset) {
        self.followup = Some(followup);
        self.init = Some(init);
    }
}

impl OuterReduce {
    /// Reduce `size` sub-arrays spaced `src_stride` bytes apart.
    #[must_use]
    pub fn new(size: usize, src_stride: isize) -> Self {
        Self {
            size,
            src_stride,
            child: None,
        }
    }

    /// Link the next dimension's frame.
    pub fn link(&mut self, child: ChildOffset) {
        self.child = Some(child);
    }
}

impl OuterBroadcast {
    /// Pass `size` sub-arrays through to the destination.
    #[must_use]
    pub fn new(size: usize, dst_stride: isize, src_stride: isize) -> Self {
        Self {
            size,
            dst_stride,
            src_stride,
            child: None,
        }
    }

    /// Link the next dimension's frame.
    pub fn link(&mut self, child: ChildOffset) {
        self.child = Some(child);
    }
}

impl ReductionKernel for InnerReduce {
    unsafe fn single_first(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: *const u8,
    ) -> KernelResult<()> {
        if self.size == 0 {
            return Err(KernelError::EmptyReduction);
        }
        let init = frame.linked_child(self.init)?;
        let followup = frame.linked_child(self.followup)?;
        // Safety: forwarded caller contract
        unsafe {
            init.strided(dst, 0, &[src], &[0], 1)?;
            followup.strided(
                dst,
                0,
                &[src.wrapping_offset(self.src_stride)],
                &[self.src_stride],
                self.size - 1,
            )
        }
    }

    unsafe fn single_followup(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: *const u8,
    ) -> KernelResult<()> {
        let followup = frame.linked_child(self.followup)?;
        // Safety: forwarded caller contract
        unsafe { followup.strided(dst, 0, &[src], &[self.src_stride], self.size) }
    }
}

impl ReductionKernel for InnerBroadcast {
    unsafe fn single_first(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: *const u8,
    ) -> KernelResult<()> {
        let init = frame.linked_child(self.init)?;
        // Safety: forwarded caller contract
        unsafe { init.strided(dst, self.dst_stride, &[src], &[self.src_stride], self.size) }
    }

    unsafe fn single_followup(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: *const u8,
    ) -> KernelResult<()> {
        let followup = frame.linked_child(self.followup)?;
        // Safety: forwarded caller contract
        unsafe { followup.strided(dst, self.dst_stride, &[src], &[self.src_stride], self.size) }
    }
}

impl ReductionKernel for OuterReduce {
    unsafe fn single_first(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: *const u8,
    ) -> KernelResult<()> {
        if self.size == 0 {
            return Err(KernelError::EmptyReduction);
        }
        let child = frame.linked_child(self.child)?;
        // Safety: forwarded caller contract
        unsafe { child.reduce_first_strided(dst, 0, src, self.src_stride, self.size) }
    }

    unsafe fn single_followup(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: *const u8,
    ) -> KernelResult<()> {
        let child = frame.linked_child(self.child)?;
        // Safety: forwarded caller contract
        unsafe { child.reduce_followup_strided(dst, 0, src, self.src_stride, self.size) }
    }
}

impl ReductionKernel for OuterBroadcast {
    unsafe fn single_first(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: *const u8,
    ) -> KernelResult<()> {
        let child = frame.linked_child(self.child)?;
        // Safety: forwarded caller contract
        unsafe { child.reduce_first_strided(dst, self.dst_stride, src, self.src_stride, self.size) }
    }

    unsafe fn single_followup(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: *const u8,
    ) -> KernelResult<()> {
        let child = frame.linked_child(self.child)?;
        // Safety: forwarded caller contract
        unsafe { child.reduce_followup_strided(dst, self.dst_stride, src, self.src_stride, self.size) }
    }
}

/// Plain invocation of a reduction frame runs its "first" entry point.
macro_rules! reduction_frame {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl Kernel for $ty {
                const NAME: &'static str = $name;

                unsafe fn single(
                    &self,
                    frame: FrameRef<'_>,
                    dst: *mut u8,
                    src: &[*const u8],
                ) -> KernelResult<()> {
                    let src = unary_src(Self::NAME, src)?;
                    // Safety: forwarded caller contract
                    unsafe { self.single_first(frame, dst, src) }
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
                    let (src, src_stride) = (unary_src(Self::NAME, src)?, unary_src(Self::NAME, src_stride)?);
                    // Safety: forwarded caller contract
                    unsafe { self.strided_first(frame, dst, dst_stride, src, src_stride, count) }
                }

                fn as_reduction(&self) -> Option<&dyn ReductionKernel> {
                    Some(self)
                }
            }
        )*
    };
}

reduction_frame! {
    InnerReduce => "inner_reduce",
    InnerBroadcast => "inner_broadcast",
    OuterReduce => "outer_reduce",
    OuterBroadcast => "outer_broadcast",
}
