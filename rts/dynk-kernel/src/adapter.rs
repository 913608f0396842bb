//! Adapting single-element frames to strided requests.

use crate::buffer::{FrameOffset, KernelBuffer};
use crate::frame::{ChildOffset, FrameRef, Kernel, SrcPtrs};
use crate::{KernelRequest, KernelResult};

/// A strided frame that loops a single-element child `count` times.
#[derive(Debug, Default)]
pub struct SingleToStrided {
    child: Option<ChildOffset>,
}

impl SingleToStrided {
    /// Create an adapter whose child is linked later.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Link the single-element child.
    pub fn link(&mut self, child: ChildOffset) {
        self.child = Some(child);
    }
}

impl Kernel for SingleToStrided {
    const NAME: &'static str = "single_to_strided";

    unsafe fn single(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let child = frame.linked_child(self.child)?;
        // Safety: forwarded caller contract
        unsafe { child.single(dst, src) }
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
        let child = frame.linked_child(self.child)?;
        let mut src_ptrs: SrcPtrs = src.iter().copied().collect();
        let mut dst = dst;
        for _ in 0..count {
            // Safety: forwarded caller contract
            unsafe { child.single(dst, &src_ptrs)? };
            dst = dst.wrapping_offset(dst_stride);
            for (ptr, &stride) in src_ptrs.iter_mut().zip(src_stride) {
                *ptr = ptr.wrapping_offset(stride);
            }
        }
        Ok(())
    }
}

/// Append a frame that only implements single-element invocation.
///
/// For a strided request a [`SingleToStrided`] adapter is appended first and
/// the kernel becomes its child. Returns the offset of the subtree root.
///
/// # Errors
///
/// Propagates buffer growth failures.
pub fn append_single<K: Kernel>(
    ckb: &mut KernelBuffer,
    request: KernelRequest,
    kernel: K,
) -> KernelResult<FrameOffset> {
    match request {
        KernelRequest::Single => ckb.append(KernelRequest::Single, kernel),
        KernelRequest::Strided => {
            let adapter = ckb.append(KernelRequest::Strided, SingleToStrided::new())?;
            let child = ckb.append(KernelRequest::Single, kernel)?;
            let link = ckb.child_offset(adapter, child)?;
            ckb.frame_at_mut::<SingleToStrided>(adapter)?.link(link);
            Ok(adapter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AddOne;

    impl Kernel for AddOne {
        const NAME: &'static str = "add_one";

        unsafe fn single(
            &self,
            _frame: FrameRef<'_>,
            dst: *mut u8,
            src: &[*const u8],
        ) -> KernelResult<()> {
            unsafe {
                let v = src[0].cast::<i32>().read();
                dst.cast::<i32>().write(v + 1);
            }
            Ok(())
        }
    }

    #[test]
    fn test_strided_request_wraps_single_kernel() {
        let mut ckb = KernelBuffer::new();
        let root = append_single(&mut ckb, KernelRequest::Strided, AddOne).unwrap();
        assert_eq!(root, 0);
        assert_eq!(ckb.frame_count(), 2);

        let src = [1i32, 2, 3];
        let mut dst = [0i32; 3];
        unsafe {
            ckb.root()
                .unwrap()
                .strided(dst.as_mut_ptr().cast(), 4, &[src.as_ptr().cast()], &[4], 3)
                .unwrap();
        }
        assert_eq!(dst, [2, 3, 4]);
    }

    #[test]
    fn test_single_request_appends_directly() {
        let mut ckb = KernelBuffer::new();
        append_single(&mut ckb, KernelRequest::Single, AddOne).unwrap();
        assert_eq!(ckb.frame_count(), 1);
        assert_eq!(ckb.root().unwrap().name(), "add_one");
    }
}
