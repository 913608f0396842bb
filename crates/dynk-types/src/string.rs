//! Element layout of string and bytes values.
//!
//! A string element is a `{ptr, len}` pair. The bytes it points at live in
//! the pod memory block referenced by the element's metadata, so they stay
//! valid for as long as any array using that metadata is alive.

use dynk_memblock::{AllocResult, PodMemoryBlock};
use std::ptr;
use std::slice;

/// In-array representation of a string or bytes element.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct StringData {
    ptr: *const u8,
    len: usize,
}

impl StringData {
    /// The empty value.
    pub const EMPTY: Self = Self {
        ptr: ptr::null(),
        len: 0,
    };

    /// Number of bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the value holds no bytes.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0 || self.ptr.is_null()
    }

    /// Read the element stored at `data`.
    ///
    /// # Safety
    ///
    /// `data` must point at a string element whose bytes are still owned by
    /// a live block.
    #[must_use]
    pub unsafe fn read<'a>(data: *const u8) -> &'a [u8] {
        // Safety: caller contract
        let elem = unsafe { data.cast::<StringData>().read_unaligned() };
        if elem.is_empty() {
            return &[];
        }
        // Safety: a non-null element points at `len` bytes of its block
        unsafe { slice::from_raw_parts(elem.ptr, elem.len) }
    }

    /// Copy `bytes` into `pool` and store the element at `data`.
    ///
    /// # Errors
    ///
    /// Fails if the pool cannot allocate.
    ///
    /// # Safety
    ///
    /// `data` must be valid for writing one string element.
    pub unsafe fn store(data: *mut u8, pool: &PodMemoryBlock, bytes: &[u8]) -> AllocResult<()> {
        let elem = if bytes.is_empty() {
            Self::EMPTY
        } else {
            let dst = pool.allocate(bytes.len())?;
            // Safety: `dst` was just allocated for `bytes.len()` bytes
            unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), dst.as_ptr(), bytes.len()) };
            Self {
                ptr: dst.as_ptr(),
                len: bytes.len(),
            }
        };
        // Safety: caller contract
        unsafe { data.cast::<StringData>().write_unaligned(elem) };
        Ok(())
    }

    /// Point the element at `data` to bytes already owned by a block that
    /// outlives it.
    ///
    /// # Safety
    ///
    /// `data` must be valid for writing one string element, and `bytes`
    /// must be owned by a block reachable from the destination metadata.
    pub unsafe fn store_shared(data: *mut u8, bytes: &[u8]) {
        let elem = Self {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
        };
        // Safety: caller contract
        unsafe { data.cast::<StringData>().write_unaligned(elem) };
    }
}
