//! The relocatable kernel buffer.
//!
//! Frames are written back to back into one aligned byte region. Each slot
//! starts with a [`FrameHeader`] followed by the kernel value:
//!
//! ```text
//! | header | pad | kernel state | pad |  header | pad | kernel state | ...
//! ^ offset 0                          ^ offset of the next frame
//! ```
//!
//! Growth allocates a larger region, copies the bytes over and frees the old
//! one. Frame values never hold their own address, so a bitwise move keeps
//! them intact; links between frames are offsets.
//!
//! # Invariants
//!
//! - `data` is `FRAME_ALIGN`-aligned and valid for `capacity` bytes
//! - every offset in `frames` starts an initialized slot, in increasing order
//! - `len` is the end of the last slot and a multiple of `FRAME_ALIGN`

use crate::frame::{ChildOffset, ErasedFrame, FrameRef, Kernel};
use crate::{KernelError, KernelRequest, KernelResult};
use dynk_memblock::align_up;
use std::alloc::{alloc, dealloc, Layout};
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use tracing::{debug, trace};

/// Byte offset of a frame from the buffer origin.
pub type FrameOffset = usize;

/// Alignment of the buffer and of every frame slot.
pub const FRAME_ALIGN: usize = 16;

const INITIAL_CAPACITY: usize = 256;

/// Per-slot bookkeeping written in front of every kernel value.
#[repr(C)]
pub(crate) struct FrameHeader {
    erase: fn(*mut u8) -> *mut dyn ErasedFrame,
    pub(crate) request: KernelRequest,
    kernel_offset: usize,
    slot_size: usize,
}

fn erase<K: Kernel>(ptr: *mut u8) -> *mut dyn ErasedFrame {
    ptr.cast::<K>()
}

/// Statistics for kernel buffer usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Frames appended over the buffer's lifetime.
    pub frames_appended: usize,
    /// Frames dropped by `destroy`.
    pub frames_destroyed: usize,
    /// Number of relocating growths.
    pub grow_count: usize,
    /// Largest capacity reached.
    pub peak_capacity: usize,
}

/// A growable arena of kernel frames linked by offset.
pub struct KernelBuffer {
    data: NonNull<u8>,
    capacity: usize,
    len: usize,
    frames: Vec<FrameOffset>,
    stats: BufferStats,
}

// Safety: every frame stored in the buffer is `Send + Sync` (required by
// `Kernel`), and the raw region is uniquely owned by the buffer.
unsafe impl Send for KernelBuffer {}
unsafe impl Sync for KernelBuffer {}

impl Default for KernelBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuffer {
    /// Create an empty buffer; nothing is allocated until the first append.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: NonNull::dangling(),
            capacity: 0,
            len: 0,
            frames: Vec::new(),
            stats: BufferStats::default(),
        }
    }

    /// Create a buffer with room for `capacity` bytes of frames.
    ///
    /// # Errors
    ///
    /// Fails with [`KernelError::OutOfMemory`] if the region cannot be allocated.
    pub fn with_capacity(capacity: usize) -> KernelResult<Self> {
        let mut buffer = Self::new();
        buffer.reserve(capacity)?;
        Ok(buffer)
    }

    /// Bytes in use.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no frame has been appended.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bytes reserved.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live frames.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Usage statistics.
    #[must_use]
    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Append a frame at the write cursor and return its offset.
    ///
    /// May relocate the buffer. Offsets obtained earlier stay valid; any
    /// reference into the buffer is statically ruled out by the `&mut`
    /// borrow.
    ///
    /// # Errors
    ///
    /// Fails if the kernel is over-aligned or the buffer cannot grow. The
    /// kernel value is dropped in that case.
    pub fn append<K: Kernel>(&mut self, request: KernelRequest, kernel: K) -> KernelResult<FrameOffset> {
        let align = mem::align_of::<K>();
        if align > FRAME_ALIGN {
            return Err(KernelError::FrameAlignment {
                frame: K::NAME,
                align,
            });
        }

        let kernel_offset = align_up(mem::size_of::<FrameHeader>(), align);
        let slot_size = align_up(kernel_offset + mem::size_of::<K>(), FRAME_ALIGN);
        let offset = self.len;
        self.reserve(slot_size)?;

        // Safety: reserve made `slot_size` bytes available at `offset`, the
        // slot start is FRAME_ALIGN-aligned and `kernel_offset` is aligned
        // for K.
        unsafe {
            let slot = self.data.as_ptr().add(offset);
            slot.cast::<FrameHeader>().write(FrameHeader {
                erase: erase::<K>,
                request,
                kernel_offset,
                slot_size,
            });
            slot.add(kernel_offset).cast::<K>().write(kernel);
        }

        self.len += slot_size;
        self.frames.push(offset);
        self.stats.frames_appended += 1;
        trace!(frame = K::NAME, offset, %request, "appended kernel frame");
        Ok(offset)
    }

    fn reserve(&mut self, additional: usize) -> KernelResult<()> {
        let required = self
            .len
            .checked_add(additional)
            .ok_or(KernelError::OutOfMemory { requested: usize::MAX })?;
        if required <= self.capacity {
            return Ok(());
        }

        let new_capacity = align_up(
            required.max(self.capacity * 2).max(INITIAL_CAPACITY),
            FRAME_ALIGN,
        );
        let layout = Layout::from_size_align(new_capacity, FRAME_ALIGN)
            .map_err(|_| KernelError::OutOfMemory { requested: new_capacity })?;

        // Safety: layout has a non-zero size
        let new_data = unsafe { alloc(layout) };
        let new_data =
            NonNull::new(new_data).ok_or(KernelError::OutOfMemory { requested: new_capacity })?;

        if self.capacity > 0 {
            // Safety: both regions are valid for `len` bytes and distinct;
            // the old region was allocated with this exact layout.
            unsafe {
                ptr::copy_nonoverlapping(self.data.as_ptr(), new_data.as_ptr(), self.len);
                dealloc(
                    self.data.as_ptr(),
                    Layout::from_size_align_unchecked(self.capacity, FRAME_ALIGN),
                );
            }
            self.stats.grow_count += 1;
            debug!(
                from = self.capacity,
                to = new_capacity,
                frames = self.frames.len(),
                "kernel buffer relocated"
            );
        }

        self.data = new_data;
        self.capacity = new_capacity;
        self.stats.peak_capacity = self.stats.peak_capacity.max(new_capacity);
        Ok(())
    }

    fn check_offset(&self, offset: FrameOffset) -> KernelResult<()> {
        self.frames
            .binary_search(&offset)
            .map(|_| ())
            .map_err(|_| KernelError::InvalidOffset { offset })
    }

    /// `offset` must be a frame boundary.
    pub(crate) fn header(&self, offset: FrameOffset) -> &FrameHeader {
        // Safety: a header was written at every frame boundary
        unsafe { &*self.data.as_ptr().add(offset).cast::<FrameHeader>() }
    }

    fn object_ptr(&self, offset: FrameOffset) -> *mut dyn ErasedFrame {
        let header = self.header(offset);
        // Safety: the kernel value lives `kernel_offset` bytes into the slot
        let kernel = unsafe { self.data.as_ptr().add(offset + header.kernel_offset) };
        (header.erase)(kernel)
    }

    /// `offset` must be a frame boundary.
    pub(crate) fn object(&self, offset: FrameOffset) -> &dyn ErasedFrame {
        // Safety: the slot holds an initialized kernel of the erased type
        unsafe { &*self.object_ptr(offset) }
    }

    /// Resolve an offset to a frame.
    ///
    /// # Errors
    ///
    /// Fails if no frame starts at `offset`.
    pub fn frame(&self, offset: FrameOffset) -> KernelResult<FrameRef<'_>> {
        self.check_offset(offset)?;
        Ok(FrameRef::new(self, offset))
    }

    /// The root frame (the first one appended).
    ///
    /// # Errors
    ///
    /// Fails if the buffer is empty.
    pub fn root(&self) -> KernelResult<FrameRef<'_>> {
        if self.frames.is_empty() {
            return Err(KernelError::EmptyBuffer);
        }
        self.frame(0)
    }

    /// Read a frame's state as a concrete kernel type.
    ///
    /// # Errors
    ///
    /// Fails if no frame starts at `offset` or it holds another type.
    pub fn frame_at<K: Kernel>(&self, offset: FrameOffset) -> KernelResult<&K> {
        self.check_offset(offset)?;
        let object = self.object(offset);
        object
            .as_any()
            .downcast_ref::<K>()
            .ok_or(KernelError::FrameTypeMismatch {
                offset,
                expected: K::NAME,
                found: object.name(),
            })
    }

    /// Mutable access to a frame's state, for linking children.
    ///
    /// # Errors
    ///
    /// Fails if no frame starts at `offset` or it holds another type.
    pub fn frame_at_mut<K: Kernel>(&mut self, offset: FrameOffset) -> KernelResult<&mut K> {
        self.check_offset(offset)?;
        let found = self.object(offset).name();
        // Safety: the slot holds an initialized kernel and `&mut self` makes
        // this the only reference into the buffer.
        let object = unsafe { &mut *self.object_ptr(offset) };
        object
            .as_any_mut()
            .downcast_mut::<K>()
            .ok_or(KernelError::FrameTypeMismatch {
                offset,
                expected: K::NAME,
                found,
            })
    }

    /// Compute the link from `parent` to a later frame `child`.
    ///
    /// # Errors
    ///
    /// Fails unless both are frames and `child` was appended after `parent`.
    pub fn child_offset(&self, parent: FrameOffset, child: FrameOffset) -> KernelResult<ChildOffset> {
        self.check_offset(parent)?;
        self.check_offset(child)?;
        if child <= parent {
            return Err(KernelError::InvalidChild { parent, child });
        }
        Ok(ChildOffset::new(child - parent))
    }

    /// Iterate over frames in construction order.
    pub fn frames(&self) -> impl Iterator<Item = FrameRef<'_>> + '_ {
        self.frames
            .iter()
            .map(move |&offset| FrameRef::new(self, offset))
    }

    /// Render one line per frame: offset, name and request.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for frame in self.frames() {
            let size = self.header(frame.offset()).slot_size;
            out.push_str(&format!(
                "{:>6}  {:<20} {:<8} ({} bytes)\n",
                frame.offset(),
                frame.name(),
                frame.request(),
                size
            ));
        }
        out
    }

    /// Drop every frame in construction order.
    ///
    /// Parents are appended before their children, so a parent is always
    /// dropped before anything it links to. The region is kept for reuse.
    pub fn destroy(&mut self) {
        let frames = mem::take(&mut self.frames);
        for &offset in &frames {
            let object = self.object_ptr(offset);
            // Safety: the frame is initialized and, with the list taken,
            // can never be dropped a second time.
            unsafe { ptr::drop_in_place(object) };
            self.stats.frames_destroyed += 1;
        }
        self.len = 0;
        if !frames.is_empty() {
            trace!(count = frames.len(), "destroyed kernel frames");
        }
    }
}

impl Drop for KernelBuffer {
    fn drop(&mut self) {
        self.destroy();
        if self.capacity > 0 {
            // Safety: allocated in `reserve` with this layout
            unsafe {
                dealloc(
                    self.data.as_ptr(),
                    Layout::from_size_align_unchecked(self.capacity, FRAME_ALIGN),
                );
            }
        }
    }
}

impl fmt::Debug for KernelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("frames", &self.frames().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Marker {
        value: u64,
    }

    impl Kernel for Marker {
        const NAME: &'static str = "marker";

        unsafe fn single(
            &self,
            _frame: FrameRef<'_>,
            dst: *mut u8,
            _src: &[*const u8],
        ) -> KernelResult<()> {
            unsafe { dst.cast::<u64>().write_unaligned(self.value) };
            Ok(())
        }
    }

    type DropLog = Arc<Mutex<Vec<usize>>>;

    struct Counted {
        log: DropLog,
        id: usize,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.log.lock().unwrap().push(self.id);
        }
    }

    impl Kernel for Counted {
        const NAME: &'static str = "counted";

        unsafe fn single(
            &self,
            _frame: FrameRef<'_>,
            _dst: *mut u8,
            _src: &[*const u8],
        ) -> KernelResult<()> {
            Ok(())
        }
    }

    #[repr(align(32))]
    struct OverAligned;

    impl Kernel for OverAligned {
        const NAME: &'static str = "over_aligned";

        unsafe fn single(
            &self,
            _frame: FrameRef<'_>,
            _dst: *mut u8,
            _src: &[*const u8],
        ) -> KernelResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_offsets_survive_growth() {
        let mut ckb = KernelBuffer::new();
        let offsets: Vec<_> = (0..100u64)
            .map(|value| ckb.append(KernelRequest::Single, Marker { value }).unwrap())
            .collect();

        assert!(ckb.stats().grow_count > 0);
        for (value, &offset) in offsets.iter().enumerate() {
            assert_eq!(ckb.frame_at::<Marker>(offset).unwrap().value, value as u64);
        }
    }

    #[test]
    fn test_root_is_first_frame() {
        let mut ckb = KernelBuffer::new();
        assert_eq!(ckb.root().unwrap_err(), KernelError::EmptyBuffer);
        ckb.append(KernelRequest::Single, Marker { value: 7 }).unwrap();
        ckb.append(KernelRequest::Single, Marker { value: 8 }).unwrap();

        let mut out = 0u64;
        let root = ckb.root().unwrap();
        unsafe { root.single((&mut out as *mut u64).cast(), &[]).unwrap() };
        assert_eq!(out, 7);
    }

    #[test]
    fn test_destroy_in_construction_order() {
        let log = DropLog::default();
        let mut ckb = KernelBuffer::new();
        for id in 0..5 {
            ckb.append(
                KernelRequest::Single,
                Counted {
                    log: Arc::clone(&log),
                    id,
                },
            )
            .unwrap();
        }

        ckb.destroy();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(ckb.frame_count(), 0);

        drop(ckb);
        assert_eq!(log.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_drop_destroys_frames() {
        let log = DropLog::default();
        {
            let mut ckb = KernelBuffer::new();
            ckb.append(
                KernelRequest::Strided,
                Counted {
                    log: Arc::clone(&log),
                    id: 1,
                },
            )
            .unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_frame_type_mismatch() {
        let mut ckb = KernelBuffer::new();
        let off = ckb.append(KernelRequest::Single, Marker { value: 1 }).unwrap();
        let err = ckb.frame_at::<OverAligned>(off).err().unwrap();
        assert_eq!(
            err,
            KernelError::FrameTypeMismatch {
                offset: off,
                expected: "over_aligned",
                found: "marker",
            }
        );
        assert!(ckb.frame_at_mut::<OverAligned>(off).is_err());
    }

    #[test]
    fn test_invalid_offset() {
        let mut ckb = KernelBuffer::new();
        ckb.append(KernelRequest::Single, Marker { value: 1 }).unwrap();
        assert!(matches!(
            ckb.frame(8),
            Err(KernelError::InvalidOffset { offset: 8 })
        ));
    }

    #[test]
    fn test_over_aligned_frame_rejected() {
        let mut ckb = KernelBuffer::new();
        assert!(matches!(
            ckb.append(KernelRequest::Single, OverAligned),
            Err(KernelError::FrameAlignment { align: 32, .. })
        ));
    }

    #[test]
    fn test_child_offset_must_point_forward() {
        let mut ckb = KernelBuffer::new();
        let a = ckb.append(KernelRequest::Single, Marker { value: 1 }).unwrap();
        let b = ckb.append(KernelRequest::Single, Marker { value: 2 }).unwrap();

        let link = ckb.child_offset(a, b).unwrap();
        assert_eq!(link.get(), b - a);
        let child = ckb.frame(a).unwrap().child(link).unwrap();
        assert_eq!(child.offset(), b);

        assert!(matches!(
            ckb.child_offset(b, a),
            Err(KernelError::InvalidChild { .. })
        ));
    }

    #[test]
    fn test_request_mismatch() {
        let mut ckb = KernelBuffer::new();
        ckb.append(KernelRequest::Single, Marker { value: 3 }).unwrap();
        let root = ckb.root().unwrap();
        let mut out = 0u64;
        let err = unsafe { root.strided((&mut out as *mut u64).cast(), 8, &[], &[], 1) }
            .unwrap_err();
        assert_eq!(
            err,
            KernelError::RequestMismatch {
                frame: "marker",
                instantiated: KernelRequest::Single,
                invoked: KernelRequest::Strided,
            }
        );
    }

    #[test]
    fn test_dump_lists_frames() {
        let mut ckb = KernelBuffer::new();
        ckb.append(KernelRequest::Single, Marker { value: 1 }).unwrap();
        ckb.append(KernelRequest::Strided, Marker { value: 2 }).unwrap();
        let dump = ckb.dump();
        assert_eq!(dump.lines().count(), 2);
        assert!(dump.contains("marker"));
        assert!(dump.contains("strided"));
    }
}
