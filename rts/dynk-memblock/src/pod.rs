//! Chunked pod memory blocks.
//!
//! A [`PodMemoryBlock`] hands out bytes by bumping a cursor through its
//! current chunk. When a request does not fit, a new chunk is appended and
//! the old ones stay where they are, so earlier addresses remain valid.
//!
//! Variable-sized element data (string and bytes contents) is allocated from
//! pod blocks referenced by the array's metadata.

use crate::{align_up, AllocError, AllocResult, AllocStats, MemBlockKind, MemoryBlock, RawChunk};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use tracing::debug;

/// Size of the first chunk of a pod block.
pub const INITIAL_CHUNK_SIZE: usize = 2048;

/// A chunked bump allocator shared through [`crate::MemBlockRef`].
#[derive(Debug)]
pub struct PodMemoryBlock {
    alignment: usize,
    zeroed: bool,
    state: Mutex<PodState>,
}

#[derive(Debug)]
struct PodState {
    chunks: Vec<RawChunk>,
    /// Offset of the next free byte in the last chunk.
    cursor: usize,
    /// Address and size of the most recent allocation.
    last: Option<(usize, usize)>,
    total_capacity: usize,
    finalized: bool,
    stats: AllocStats,
}

impl PodMemoryBlock {
    /// Create a pod block whose allocations have the given alignment.
    ///
    /// The alignment is rounded up to a power of two.
    #[must_use]
    pub fn new(alignment: usize) -> Self {
        Self::with_zeroing(alignment, false)
    }

    /// Create a pod block that zeroes every byte it hands out.
    #[must_use]
    pub fn zeroed(alignment: usize) -> Self {
        Self::with_zeroing(alignment, true)
    }

    fn with_zeroing(alignment: usize, zeroed: bool) -> Self {
        Self {
            alignment: alignment.max(1).next_power_of_two(),
            zeroed,
            state: Mutex::new(PodState {
                chunks: Vec::new(),
                cursor: 0,
                last: None,
                total_capacity: 0,
                finalized: false,
                stats: AllocStats::new(),
            }),
        }
    }

    /// Alignment of every allocation from this block.
    #[inline]
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Allocate `size` bytes.
    ///
    /// The returned pointer is valid until the block is dropped or reset.
    ///
    /// # Errors
    ///
    /// Fails with [`AllocError::Finalized`] after [`Self::finalize`], or
    /// [`AllocError::OutOfMemory`] if a new chunk cannot be obtained.
    pub fn allocate(&self, size: usize) -> AllocResult<NonNull<u8>> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(AllocError::Finalized);
        }
        state.allocate(size, self.alignment, self.zeroed)
    }

    /// Resize the most recent allocation.
    ///
    /// Grows or shrinks in place when the current chunk has room. Otherwise
    /// the contents move to a fresh region and the old one is abandoned
    /// (it stays valid, and is only freed with the block).
    ///
    /// # Errors
    ///
    /// Fails if `ptr` is not the most recent allocation, if the block is
    /// finalized, or if a new chunk cannot be obtained.
    pub fn resize(&self, ptr: NonNull<u8>, new_size: usize) -> AllocResult<NonNull<u8>> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(AllocError::Finalized);
        }
        state.resize(ptr, new_size, self.alignment, self.zeroed)
    }

    /// Forbid any further allocation.
    pub fn finalize(&self) {
        let mut state = self.state.lock();
        state.finalized = true;
        state.last = None;
    }

    /// Whether [`Self::finalize`] has been called.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }

    /// Release every chunk but the first and rewind the cursor.
    ///
    /// A reset block accepts allocations again even if it was finalized.
    ///
    /// # Safety
    ///
    /// Every pointer previously returned by this block becomes dangling.
    pub unsafe fn reset(&self) {
        let mut state = self.state.lock();
        state.chunks.truncate(1);
        state.total_capacity = state.chunks.first().map_or(0, RawChunk::size);
        state.cursor = 0;
        state.last = None;
        state.finalized = false;
        state.stats.bytes_allocated = 0;
    }

    /// Total bytes reserved across all chunks.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().total_capacity
    }

    /// Number of chunks currently held.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Allocation statistics.
    #[must_use]
    pub fn stats(&self) -> AllocStats {
        self.state.lock().stats
    }
}

impl PodState {
    fn allocate(&mut self, size: usize, align: usize, zeroed: bool) -> AllocResult<NonNull<u8>> {
        let start = match self.fit(size, align) {
            Some(start) => start,
            None => {
                self.grow(size, align)?;
                0
            }
        };

        let base = self
            .chunks
            .last()
            .map(RawChunk::as_ptr)
            .ok_or(AllocError::OutOfMemory { requested: size })?;

        // Safety: start + size lies within the last chunk
        let ptr = unsafe { base.add(start) };
        if zeroed {
            // Safety: the range was just reserved
            unsafe { std::ptr::write_bytes(ptr, 0, size) };
        }

        self.cursor = start + size;
        self.last = Some((ptr as usize, size));
        self.stats.record_alloc(size);

        // Safety: derived from a non-null chunk base
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    fn resize(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
        align: usize,
        zeroed: bool,
    ) -> AllocResult<NonNull<u8>> {
        let addr = ptr.as_ptr() as usize;
        let (_, old_size) = self
            .last
            .filter(|&(last, _)| last == addr)
            .ok_or(AllocError::NotLastAllocation { ptr: addr })?;

        let chunk = self
            .chunks
            .last()
            .filter(|chunk| chunk.contains(addr))
            .ok_or(AllocError::NotLastAllocation { ptr: addr })?;
        let start = addr - chunk.as_ptr() as usize;

        if start.checked_add(new_size).is_some_and(|end| end <= chunk.size()) {
            if zeroed && new_size > old_size {
                // Safety: the extension lies within the chunk
                unsafe { std::ptr::write_bytes(ptr.as_ptr().add(old_size), 0, new_size - old_size) };
            }
            self.cursor = start + new_size;
            self.last = Some((addr, new_size));
            self.stats.bytes_allocated = self.stats.bytes_allocated - old_size + new_size;
            self.stats.peak_bytes = self.stats.peak_bytes.max(self.stats.bytes_allocated);
            return Ok(ptr);
        }

        let moved = self.allocate(new_size, align, zeroed)?;
        // Safety: both regions are live and belong to distinct chunks
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr(), moved.as_ptr(), old_size.min(new_size));
        }
        self.stats.record_abandon(old_size);
        debug!(old_size, new_size, "pod allocation relocated by resize");
        Ok(moved)
    }

    fn fit(&self, size: usize, align: usize) -> Option<usize> {
        let chunk = self.chunks.last()?;
        let start = align_up(self.cursor, align);
        start
            .checked_add(size)
            .is_some_and(|end| end <= chunk.size())
            .then_some(start)
    }

    fn grow(&mut self, min_size: usize, align: usize) -> AllocResult<()> {
        let size = if self.total_capacity == 0 {
            INITIAL_CHUNK_SIZE
        } else {
            self.total_capacity.saturating_mul(2)
        }
        .max(min_size);

        let chunk = match RawChunk::allocate(size, align, false) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.stats.record_failure();
                return Err(match e {
                    AllocError::InvalidLayout(_) => AllocError::OutOfMemory { requested: min_size },
                    other => other,
                });
            }
        };

        self.total_capacity += chunk.size();
        self.chunks.push(chunk);
        self.cursor = 0;
        debug!(
            chunk_size = size,
            chunks = self.chunks.len(),
            "pod memory block grew"
        );
        Ok(())
    }
}

impl MemoryBlock for PodMemoryBlock {
    fn kind(&self) -> MemBlockKind {
        if self.zeroed {
            MemBlockKind::ZeroInitPod
        } else {
            MemBlockKind::Pod
        }
    }

    fn debug_print(&self, out: &mut dyn fmt::Write, indent: &str) -> fmt::Result {
        let state = self.state.lock();
        writeln!(out, "{indent}------ memory block ({})", self.kind())?;
        writeln!(out, "{indent} alignment: {}", self.alignment)?;
        writeln!(out, "{indent} chunks: {}", state.chunks.len())?;
        writeln!(out, "{indent} capacity: {}", state.total_capacity)?;
        writeln!(out, "{indent} allocated: {}", state.stats.bytes_allocated)?;
        writeln!(out, "{indent} finalized: {}", state.finalized)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_pod(&self) -> Option<&PodMemoryBlock> {
        Some(self)
    }
}
