//! Fixed-size memory blocks.

use crate::{AllocResult, MemBlockKind, MemoryBlock, RawChunk};
use std::any::Any;
use std::fmt;
use std::ptr::NonNull;

/// A single zero-initialized allocation of known size.
///
/// Used as the storage of arrays whose data does not live inline in the
/// array preamble.
#[derive(Debug)]
pub struct FixedMemoryBlock {
    chunk: RawChunk,
    size: usize,
}

impl FixedMemoryBlock {
    /// Allocate `size` zeroed bytes with the given alignment.
    ///
    /// # Errors
    ///
    /// Fails if the layout is invalid or the allocation cannot be made.
    pub fn new(size: usize, alignment: usize) -> AllocResult<Self> {
        let chunk = RawChunk::allocate(size, alignment.max(1).next_power_of_two(), true)?;
        Ok(Self { chunk, size })
    }

    /// Pointer to the first byte.
    #[inline]
    #[must_use]
    pub fn data_ptr(&self) -> NonNull<u8> {
        // Safety: chunk pointers are never null
        unsafe { NonNull::new_unchecked(self.chunk.as_ptr()) }
    }

    /// Usable size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Alignment of the allocation.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.chunk.align()
    }
}

impl MemoryBlock for FixedMemoryBlock {
    fn kind(&self) -> MemBlockKind {
        MemBlockKind::Fixed
    }

    fn debug_print(&self, out: &mut dyn fmt::Write, indent: &str) -> fmt::Result {
        writeln!(out, "{indent}------ memory block ({})", self.kind())?;
        writeln!(out, "{indent} size: {}", self.size)?;
        writeln!(out, "{indent} alignment: {}", self.alignment())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
