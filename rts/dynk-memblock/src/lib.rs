//! Reference-counted memory blocks for the dynk array runtime.
//!
//! Every array's data lives in a memory block. Blocks are shared: any number
//! of array handles may hold a [`MemBlockRef`] to the same block, and the
//! block is released when the last strong reference is dropped. Non-owning
//! links use [`WeakMemBlockRef`], which never extends a block's lifetime.
//!
//! # Block kinds
//!
//! - **Pod** - chunked bump allocation for variable-sized element data such
//!   as string bytes (see [`PodMemoryBlock`])
//! - **Zero-init pod** - the same, but every byte handed out is zeroed
//! - **Fixed** - one aligned allocation of known size (see [`FixedMemoryBlock`])
//! - **Array** - an array preamble, implemented by the types crate
//!
//! # Pointer stability
//!
//! Pod blocks grow by appending chunks, never by reallocating existing ones,
//! so an address returned by `allocate` stays valid until the block is
//! dropped or reset.

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod fixed;
pub mod pod;

pub use fixed::FixedMemoryBlock;
pub use pod::PodMemoryBlock;

use std::alloc::{Layout, LayoutError};
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

/// Result type for allocation operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Errors that can occur while allocating from a memory block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// The system allocator could not satisfy the request.
    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory {
        /// Requested allocation size.
        requested: usize,
    },
    /// Invalid layout (size overflow or bad alignment).
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
    /// The block was finalized and accepts no further allocation.
    #[error("memory block is finalized")]
    Finalized,
    /// `resize` was called on something other than the latest allocation.
    #[error("pointer {ptr:#x} is not the most recent allocation of this block")]
    NotLastAllocation {
        /// Address passed to `resize`.
        ptr: usize,
    },
}

impl From<LayoutError> for AllocError {
    fn from(e: LayoutError) -> Self {
        Self::InvalidLayout(e.to_string())
    }
}

/// The concrete flavor of a memory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemBlockKind {
    /// An array preamble (metadata plus data reference).
    Array,
    /// Chunked pod allocation.
    Pod,
    /// Chunked pod allocation that zeroes what it hands out.
    ZeroInitPod,
    /// A single fixed-size allocation.
    Fixed,
}

impl MemBlockKind {
    /// Get the name of this block kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Pod => "pod",
            Self::ZeroInitPod => "zeroinit_pod",
            Self::Fixed => "fixed_size_pod",
        }
    }
}

impl fmt::Display for MemBlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A reference-counted block of memory.
///
/// Implementors must be thread safe: reference counts are atomic and a block
/// may be reachable from arrays living on several threads.
pub trait MemoryBlock: Send + Sync + fmt::Debug + Any {
    /// The concrete kind of this block.
    fn kind(&self) -> MemBlockKind;

    /// Write a human-readable description of the block.
    fn debug_print(&self, out: &mut dyn fmt::Write, indent: &str) -> fmt::Result;

    /// Upcast for downcasting to the concrete block type.
    fn as_any(&self) -> &dyn Any;

    /// View this block as a pod block, if it is one.
    fn as_pod(&self) -> Option<&PodMemoryBlock> {
        None
    }
}

/// A strong, shared reference to a memory block.
#[derive(Clone)]
pub struct MemBlockRef(Arc<dyn MemoryBlock>);

impl MemBlockRef {
    /// Wrap a freshly created block.
    pub fn new<B: MemoryBlock>(block: B) -> Self {
        Self(Arc::new(block))
    }

    /// Number of strong references currently held to the block.
    #[must_use]
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether two references point at the same block.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Create a non-owning reference to the block.
    #[must_use]
    pub fn downgrade(&self) -> WeakMemBlockRef {
        WeakMemBlockRef(Arc::downgrade(&self.0))
    }

    /// Downcast to a concrete block type.
    #[must_use]
    pub fn downcast_ref<B: MemoryBlock>(&self) -> Option<&B> {
        self.0.as_any().downcast_ref::<B>()
    }

    /// Render [`MemoryBlock::debug_print`] into a string.
    #[must_use]
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.0.debug_print(&mut out, "");
        out
    }
}

impl Deref for MemBlockRef {
    type Target = dyn MemoryBlock;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl<B: MemoryBlock> From<Arc<B>> for MemBlockRef {
    fn from(block: Arc<B>) -> Self {
        Self(block)
    }
}

impl fmt::Debug for MemBlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemBlockRef")
            .field("kind", &self.0.kind())
            .field("use_count", &self.use_count())
            .finish()
    }
}

/// A weak back-reference to a memory block.
///
/// Holding one never keeps the block alive.
#[derive(Clone, Debug)]
pub struct WeakMemBlockRef(Weak<dyn MemoryBlock>);

impl WeakMemBlockRef {
    /// Try to obtain a strong reference.
    #[must_use]
    pub fn upgrade(&self) -> Option<MemBlockRef> {
        self.0.upgrade().map(MemBlockRef)
    }

    /// Whether the block is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// Statistics for memory block allocation tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Total bytes handed out and not abandoned.
    pub bytes_allocated: usize,
    /// Total number of allocations performed.
    pub allocation_count: usize,
    /// Bytes left behind by relocating resizes.
    pub abandoned_bytes: usize,
    /// Peak live bytes.
    pub peak_bytes: usize,
    /// Number of failed allocations.
    pub failed_allocations: usize,
}

impl AllocStats {
    /// Create new empty statistics.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes_allocated: 0,
            allocation_count: 0,
            abandoned_bytes: 0,
            peak_bytes: 0,
            failed_allocations: 0,
        }
    }

    /// Record an allocation.
    pub fn record_alloc(&mut self, size: usize) {
        self.bytes_allocated += size;
        self.allocation_count += 1;
        self.peak_bytes = self.peak_bytes.max(self.bytes_allocated);
    }

    /// Record a region left behind by a relocating resize.
    pub fn record_abandon(&mut self, size: usize) {
        self.bytes_allocated = self.bytes_allocated.saturating_sub(size);
        self.abandoned_bytes += size;
    }

    /// Record a failed allocation.
    pub fn record_failure(&mut self) {
        self.failed_allocations += 1;
    }
}

/// Align a size up to the given power-of-two alignment.
#[inline]
#[must_use]
pub const fn align_up(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (size + align - 1) & !(align - 1)
}

/// Check whether a pointer satisfies an alignment.
#[inline]
#[must_use]
pub fn is_aligned(ptr: *const u8, align: usize) -> bool {
    debug_assert!(align.is_power_of_two());
    (ptr as usize) & (align - 1) == 0
}

/// An owned, aligned allocation released on drop.
#[derive(Debug)]
pub(crate) struct RawChunk {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Safety: RawChunk uniquely owns its allocation; access to the bytes is
// synchronized by whichever block holds it.
unsafe impl Send for RawChunk {}
unsafe impl Sync for RawChunk {}

impl RawChunk {
    pub(crate) fn allocate(size: usize, align: usize, zeroed: bool) -> AllocResult<Self> {
        let layout = Layout::from_size_align(size.max(1), align)?;

        // Safety: layout has a non-zero size
        let ptr = unsafe {
            if zeroed {
                std::alloc::alloc_zeroed(layout)
            } else {
                std::alloc::alloc(layout)
            }
        };

        let ptr = NonNull::new(ptr).ok_or(AllocError::OutOfMemory { requested: size })?;
        Ok(Self { ptr, layout })
    }

    #[inline]
    pub(crate) const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub(crate) const fn size(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub(crate) const fn align(&self) -> usize {
        self.layout.align()
    }

    pub(crate) fn contains(&self, addr: usize) -> bool {
        let base = self.ptr.as_ptr() as usize;
        addr >= base && addr <= base + self.layout.size()
    }
}

impl Drop for RawChunk {
    fn drop(&mut self) {
        // Safety: ptr was allocated with exactly this layout
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 16), 16);
    }

    #[test]
    fn test_refcount_and_weak() {
        let block = MemBlockRef::new(PodMemoryBlock::new(8));
        assert_eq!(block.use_count(), 1);

        let second = block.clone();
        assert_eq!(block.use_count(), 2);
        assert!(MemBlockRef::ptr_eq(&block, &second));

        let weak = block.downgrade();
        assert!(weak.is_alive());
        assert_eq!(block.use_count(), 2);

        drop(second);
        drop(block);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_downcast() {
        let block = MemBlockRef::new(PodMemoryBlock::zeroed(4));
        assert_eq!(block.kind(), MemBlockKind::ZeroInitPod);
        assert!(block.as_pod().is_some());
        assert!(block.downcast_ref::<PodMemoryBlock>().is_some());
        assert!(block.downcast_ref::<FixedMemoryBlock>().is_none());
    }

    #[test]
    fn test_debug_string() {
        let block = MemBlockRef::new(FixedMemoryBlock::new(32, 8).unwrap());
        let text = block.debug_string();
        assert!(text.contains("fixed_size_pod"));
        assert!(text.contains("32"));
    }
}
