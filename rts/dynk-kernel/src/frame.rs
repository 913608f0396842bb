//! Kernel frame traits and frame references.
//!
//! A frame is any `Send + Sync` value implementing [`Kernel`]. Once appended
//! to a [`KernelBuffer`] it is only reachable through a [`FrameRef`], which
//! pairs the buffer with the frame's offset. Children are reached from a
//! parent through [`ChildOffset`]s recorded during instantiation.

use crate::buffer::{FrameOffset, KernelBuffer};
use crate::{KernelError, KernelRequest, KernelResult};
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;

/// Source pointer list used when a frame walks its operands.
pub type SrcPtrs = SmallVec<[*const u8; 4]>;

/// Offset of a child frame relative to its parent.
///
/// Only [`KernelBuffer::child_offset`] creates these, after checking that
/// the child is a frame appended after the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildOffset(usize);

impl ChildOffset {
    pub(crate) const fn new(rel: usize) -> Self {
        Self(rel)
    }

    /// Distance in bytes from the parent frame.
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// An executable kernel frame.
///
/// # Safety contract for invocation
///
/// Every pointer passed to `single` or `strided` must be valid for reads
/// (sources) or writes (destination) of the element layout the frame was
/// instantiated for, at every position reached through the given strides.
pub trait Kernel: Send + Sync + 'static {
    /// Name used in diagnostics and buffer dumps.
    const NAME: &'static str;

    /// Process one element.
    ///
    /// # Safety
    ///
    /// See the trait-level contract.
    unsafe fn single(&self, frame: FrameRef<'_>, dst: *mut u8, src: &[*const u8])
        -> KernelResult<()>;

    /// Process `count` elements at the given strides.
    ///
    /// The default loops [`Kernel::single`]. On error the loop stops at the
    /// offending element; earlier writes are kept.
    ///
    /// # Safety
    ///
    /// See the trait-level contract.
    unsafe fn strided(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> KernelResult<()> {
        let mut src_ptrs: SrcPtrs = src.iter().copied().collect();
        let mut dst = dst;
        for _ in 0..count {
            // Safety: the caller guarantees `count` elements at these strides
            unsafe { self.single(frame, dst, &src_ptrs)? };
            dst = dst.wrapping_offset(dst_stride);
            for (ptr, &stride) in src_ptrs.iter_mut().zip(src_stride) {
                *ptr = ptr.wrapping_offset(stride);
            }
        }
        Ok(())
    }

    /// View this frame as a reduction frame.
    fn as_reduction(&self) -> Option<&dyn ReductionKernel> {
        None
    }
}

/// Entry points of frames taking part in a reduction.
///
/// A "first" call initializes the destination from the source; a "followup"
/// call folds the source into the destination. Seeding from the first
/// element means no identity value is needed, which restricts reductions to
/// associative operators.
pub trait ReductionKernel: Send + Sync {
    /// Seed `dst` from one source element.
    ///
    /// # Safety
    ///
    /// Same contract as [`Kernel::single`].
    unsafe fn single_first(&self, frame: FrameRef<'_>, dst: *mut u8, src: *const u8)
        -> KernelResult<()>;

    /// Fold one source element into `dst`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Kernel::single`].
    unsafe fn single_followup(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: *const u8,
    ) -> KernelResult<()>;

    /// Seed a strided run of destinations.
    ///
    /// With a zero destination stride every source folds into the same
    /// destination, so only the first element seeds it.
    ///
    /// # Safety
    ///
    /// Same contract as [`Kernel::strided`].
    unsafe fn strided_first(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) -> KernelResult<()> {
        if count == 0 {
            return Ok(());
        }
        if dst_stride == 0 {
            // Safety: caller contract
            unsafe { self.single_first(frame, dst, src)? };
            let mut src = src;
            for _ in 1..count {
                src = src.wrapping_offset(src_stride);
                // Safety: caller contract
                unsafe { self.single_followup(frame, dst, src)? };
            }
        } else {
            let (mut dst, mut src) = (dst, src);
            for _ in 0..count {
                // Safety: caller contract
                unsafe { self.single_first(frame, dst, src)? };
                dst = dst.wrapping_offset(dst_stride);
                src = src.wrapping_offset(src_stride);
            }
        }
        Ok(())
    }

    /// Fold a strided run of sources into destinations.
    ///
    /// # Safety
    ///
    /// Same contract as [`Kernel::strided`].
    unsafe fn strided_followup(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) -> KernelResult<()> {
        let (mut dst, mut src) = (dst, src);
        for _ in 0..count {
            // Safety: caller contract
            unsafe { self.single_followup(frame, dst, src)? };
            dst = dst.wrapping_offset(dst_stride);
            src = src.wrapping_offset(src_stride);
        }
        Ok(())
    }
}

/// Object-safe view of a frame stored in a buffer.
pub(crate) trait ErasedFrame: Send + Sync {
    fn name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    unsafe fn single(&self, frame: FrameRef<'_>, dst: *mut u8, src: &[*const u8])
        -> KernelResult<()>;
    unsafe fn strided(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> KernelResult<()>;
    fn reduction(&self) -> Option<&dyn ReductionKernel>;
}

impl<K: Kernel> ErasedFrame for K {
    fn name(&self) -> &'static str {
        K::NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    unsafe fn single(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        // Safety: forwarded caller contract
        unsafe { Kernel::single(self, frame, dst, src) }
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
        // Safety: forwarded caller contract
        unsafe { Kernel::strided(self, frame, dst, dst_stride, src, src_stride, count) }
    }

    fn reduction(&self) -> Option<&dyn ReductionKernel> {
        self.as_reduction()
    }
}

/// A frame inside a [`KernelBuffer`].
///
/// Borrowing the buffer immutably means no growth can happen while a
/// `FrameRef` is alive.
#[derive(Clone, Copy)]
pub struct FrameRef<'a> {
    buffer: &'a KernelBuffer,
    offset: FrameOffset,
}

impl<'a> FrameRef<'a> {
    /// Callers must have checked that `offset` is a frame boundary.
    pub(crate) fn new(buffer: &'a KernelBuffer, offset: FrameOffset) -> Self {
        Self { buffer, offset }
    }

    fn object(&self) -> &'a dyn ErasedFrame {
        self.buffer.object(self.offset)
    }

    /// Offset of this frame from the buffer origin.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> FrameOffset {
        self.offset
    }

    /// Name of the frame's kernel type.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.object().name()
    }

    /// Convention this frame was instantiated for.
    #[must_use]
    pub fn request(&self) -> KernelRequest {
        self.buffer.header(self.offset).request
    }

    /// The buffer holding this frame.
    #[must_use]
    pub fn buffer(&self) -> &'a KernelBuffer {
        self.buffer
    }

    /// Resolve a child link.
    ///
    /// # Errors
    ///
    /// Fails if the link does not land on a frame boundary.
    pub fn child(&self, child: ChildOffset) -> KernelResult<FrameRef<'a>> {
        self.buffer.frame(self.offset + child.get())
    }

    /// Resolve a child link that may not have been set.
    ///
    /// # Errors
    ///
    /// Fails with [`KernelError::UnlinkedChild`] if `child` is `None`.
    pub fn linked_child(&self, child: Option<ChildOffset>) -> KernelResult<FrameRef<'a>> {
        match child {
            Some(child) => self.child(child),
            None => Err(KernelError::UnlinkedChild { frame: self.name() }),
        }
    }

    /// Read this frame's state as a concrete kernel type.
    ///
    /// # Errors
    ///
    /// Fails if the frame is of a different type.
    pub fn state<K: Kernel>(&self) -> KernelResult<&'a K> {
        self.buffer.frame_at::<K>(self.offset)
    }

    fn expect_request(&self, invoked: KernelRequest) -> KernelResult<()> {
        let instantiated = self.request();
        if instantiated == invoked {
            Ok(())
        } else {
            Err(KernelError::RequestMismatch {
                frame: self.name(),
                instantiated,
                invoked,
            })
        }
    }

    /// Invoke a frame instantiated for [`KernelRequest::Single`].
    ///
    /// # Safety
    ///
    /// See [`Kernel`]'s invocation contract.
    pub unsafe fn single(&self, dst: *mut u8, src: &[*const u8]) -> KernelResult<()> {
        self.expect_request(KernelRequest::Single)?;
        // Safety: forwarded caller contract
        unsafe { self.object().single(*self, dst, src) }
    }

    /// Invoke a frame instantiated for [`KernelRequest::Strided`].
    ///
    /// # Safety
    ///
    /// See [`Kernel`]'s invocation contract.
    pub unsafe fn strided(
        &self,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> KernelResult<()> {
        self.expect_request(KernelRequest::Strided)?;
        // Safety: forwarded caller contract
        unsafe {
            self.object()
                .strided(*self, dst, dst_stride, src, src_stride, count)
        }
    }

    fn reduction(&self) -> KernelResult<&'a dyn ReductionKernel> {
        let object = self.object();
        object
            .reduction()
            .ok_or(KernelError::NotReduction { frame: object.name() })
    }

    /// Seed `dst` from one element.
    ///
    /// # Safety
    ///
    /// See [`Kernel`]'s invocation contract.
    pub unsafe fn reduce_first_single(&self, dst: *mut u8, src: *const u8) -> KernelResult<()> {
        // Safety: forwarded caller contract
        unsafe { self.reduction()?.single_first(*self, dst, src) }
    }

    /// Fold one element into `dst`.
    ///
    /// # Safety
    ///
    /// See [`Kernel`]'s invocation contract.
    pub unsafe fn reduce_followup_single(&self, dst: *mut u8, src: *const u8) -> KernelResult<()> {
        // Safety: forwarded caller contract
        unsafe { self.reduction()?.single_followup(*self, dst, src) }
    }

    /// Seed a strided run.
    ///
    /// # Safety
    ///
    /// See [`Kernel`]'s invocation contract.
    pub unsafe fn reduce_first_strided(
        &self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) -> KernelResult<()> {
        // Safety: forwarded caller contract
        unsafe {
            self.reduction()?
                .strided_first(*self, dst, dst_stride, src, src_stride, count)
        }
    }

    /// Fold a strided run.
    ///
    /// # Safety
    ///
    /// See [`Kernel`]'s invocation contract.
    pub unsafe fn reduce_followup_strided(
        &self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) -> KernelResult<()> {
        // Safety: forwarded caller contract
        unsafe {
            self.reduction()?
                .strided_followup(*self, dst, dst_stride, src, src_stride, count)
        }
    }
}

impl fmt::Debug for FrameRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRef")
            .field("name", &self.name())
            .field("offset", &self.offset)
            .field("request", &self.request())
            .finish()
    }
}
