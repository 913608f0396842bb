//! Kernel buffer integration tests
//!
//! Offset stability across relocation, destruction bookkeeping, conversion
//! behaviour inside strided loops and composed reductions.

use dynk_kernel::compound::{Add, CompoundKernel, Multiply};
use dynk_kernel::convert::{convert, ConvertKernel};
use dynk_kernel::reduce::{InnerReduce, OuterBroadcast};
use dynk_kernel::strided::StridedAssign;
use dynk_kernel::{
    append_single, make_pod_copy, ConversionKind, ErrorMode, FrameRef, Kernel, KernelBuffer,
    KernelError, KernelRequest, KernelResult,
};
use num_complex::Complex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// A frame of configurable size carrying a tag.
struct Tagged<const N: usize> {
    tag: u64,
    _pad: [u64; N],
}

impl<const N: usize> Tagged<N> {
    fn new(tag: u64) -> Self {
        Self { tag, _pad: [0; N] }
    }
}

impl<const N: usize> Kernel for Tagged<N> {
    const NAME: &'static str = "tagged";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        _src: &[*const u8],
    ) -> KernelResult<()> {
        unsafe { dst.cast::<u64>().write_unaligned(self.tag) };
        Ok(())
    }
}

/// Counts how many times it is dropped.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl Kernel for DropCounter {
    const NAME: &'static str = "drop_counter";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        _dst: *mut u8,
        _src: &[*const u8],
    ) -> KernelResult<()> {
        Ok(())
    }
}

#[repr(align(64))]
struct TooAligned;

impl Kernel for TooAligned {
    const NAME: &'static str = "too_aligned";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        _dst: *mut u8,
        _src: &[*const u8],
    ) -> KernelResult<()> {
        Ok(())
    }
}

fn append_tagged(ckb: &mut KernelBuffer, width: u8, tag: u64) -> usize {
    match width % 4 {
        0 => ckb.append(KernelRequest::Single, Tagged::<0>::new(tag)),
        1 => ckb.append(KernelRequest::Single, Tagged::<3>::new(tag)),
        2 => ckb.append(KernelRequest::Single, Tagged::<17>::new(tag)),
        _ => ckb.append(KernelRequest::Single, Tagged::<64>::new(tag)),
    }
    .unwrap()
}

fn read_tag(ckb: &KernelBuffer, offset: usize) -> u64 {
    let mut out = 0u64;
    unsafe {
        ckb.frame(offset)
            .unwrap()
            .single((&mut out as *mut u64).cast(), &[])
            .unwrap();
    }
    out
}

// ============================================================================
// Offset stability
// ============================================================================

proptest! {
    #[test]
    fn offsets_survive_relocation(widths in prop::collection::vec(any::<u8>(), 1..200)) {
        let mut ckb = KernelBuffer::new();
        let offsets: Vec<usize> = widths
            .iter()
            .enumerate()
            .map(|(i, &w)| append_tagged(&mut ckb, w, i as u64))
            .collect();

        prop_assert_eq!(ckb.frame_count(), widths.len());
        for (i, &offset) in offsets.iter().enumerate() {
            prop_assert_eq!(offset % dynk_kernel::FRAME_ALIGN, 0);
            prop_assert_eq!(read_tag(&ckb, offset), i as u64);
        }
        for pair in offsets.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn child_links_resolve_after_growth(extra in 1usize..100) {
        let mut ckb = KernelBuffer::new();
        let root = ckb.append(KernelRequest::Single, StridedAssign::new(2, 8, 8)).unwrap();
        for i in 0..extra {
            append_tagged(&mut ckb, i as u8, 0);
        }
        let child = make_pod_copy(&mut ckb, KernelRequest::Strided, 8, 8).unwrap();
        let link = ckb.child_offset(root, child).unwrap();
        ckb.frame_at_mut::<StridedAssign>(root).unwrap().link(link);

        let src = [3u64, 4];
        let mut dst = [0u64; 2];
        unsafe {
            ckb.root().unwrap().single(dst.as_mut_ptr().cast(), &[src.as_ptr().cast()]).unwrap();
        }
        prop_assert_eq!(dst, src);
    }

    #[test]
    fn widening_round_trips(x in any::<i32>(), y in any::<u16>(), z in any::<f32>()) {
        let wide: f64 = convert(x, ErrorMode::Inexact).unwrap();
        prop_assert_eq!(convert::<i32, f64>(wide, ErrorMode::Inexact).unwrap(), x);

        let wide: i64 = convert(y, ErrorMode::Inexact).unwrap();
        prop_assert_eq!(convert::<u16, i64>(wide, ErrorMode::Inexact).unwrap(), y);

        if !z.is_nan() {
            let wide: Complex<f64> = convert(z, ErrorMode::Inexact).unwrap();
            prop_assert_eq!(convert::<f32, Complex<f64>>(wide, ErrorMode::Inexact).unwrap(), z);
        }
    }

    #[test]
    fn saturate_never_fails(x in any::<i64>()) {
        let narrow: i8 = convert(x, ErrorMode::Saturate).unwrap();
        prop_assert_eq!(i64::from(narrow), x.clamp(i64::from(i8::MIN), i64::from(i8::MAX)));
    }
}

// ============================================================================
// Destruction
// ============================================================================

mod destroy_tests {
    use super::*;

    #[test]
    fn test_every_frame_dropped_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut ckb = KernelBuffer::new();
        for _ in 0..50 {
            ckb.append(KernelRequest::Single, DropCounter(drops.clone()))
                .unwrap();
        }
        ckb.destroy();
        assert_eq!(drops.load(Ordering::SeqCst), 50);
        ckb.destroy();
        drop(ckb);
        assert_eq!(drops.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_partial_construction_is_released() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut ckb = KernelBuffer::new();
        ckb.append(KernelRequest::Single, DropCounter(drops.clone()))
            .unwrap();
        ckb.append(KernelRequest::Single, DropCounter(drops.clone()))
            .unwrap();

        let err = ckb
            .append(KernelRequest::Single, TooAligned)
            .unwrap_err();
        assert!(matches!(err, KernelError::FrameAlignment { align: 64, .. }));
        assert_eq!(ckb.frame_count(), 2);

        drop(ckb);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_adapter_pair_destroyed() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut ckb = KernelBuffer::new();
        append_single(&mut ckb, KernelRequest::Strided, DropCounter(drops.clone())).unwrap();
        assert_eq!(ckb.frame_count(), 2);
        assert_eq!(ckb.stats().frames_appended, 2);
        drop(ckb);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}

// ============================================================================
// Conversions inside kernels
// ============================================================================

mod convert_tests {
    use super::*;

    #[test]
    fn test_strided_conversion_stops_at_failure() {
        let mut ckb = KernelBuffer::new();
        ckb.append(
            KernelRequest::Strided,
            ConvertKernel::<i8, i32>::new(ErrorMode::Overflow),
        )
        .unwrap();

        let src = [1i32, 300, 2];
        let mut dst = [0i8; 3];
        let err = unsafe {
            ckb.root()
                .unwrap()
                .strided(dst.as_mut_ptr().cast(), 1, &[src.as_ptr().cast()], &[4], 3)
        }
        .unwrap_err();

        assert_eq!(dst, [1, 0, 0]);
        match err {
            KernelError::Conversion(e) => {
                assert_eq!(e.kind, ConversionKind::Overflow);
                assert_eq!(e.value, "300");
                assert_eq!((e.src, e.dst), ("int32", "int8"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nocheck_wraps() {
        let mut ckb = KernelBuffer::new();
        ckb.append(
            KernelRequest::Single,
            ConvertKernel::<u8, i32>::new(ErrorMode::NoCheck),
        )
        .unwrap();
        let src = 258i32;
        let mut dst = 0u8;
        unsafe {
            ckb.root()
                .unwrap()
                .single(&mut dst, &[(&src as *const i32).cast()])
                .unwrap();
        }
        assert_eq!(dst, 2);
    }

    #[test]
    fn test_fractional_float_to_int() {
        let mut ckb = KernelBuffer::new();
        ckb.append(
            KernelRequest::Single,
            ConvertKernel::<i64, f64>::new(ErrorMode::Fractional),
        )
        .unwrap();
        let src = 1.25f64;
        let mut dst = 0i64;
        let err = unsafe {
            ckb.root()
                .unwrap()
                .single((&mut dst as *mut i64).cast(), &[(&src as *const f64).cast()])
        }
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "fractional part lost while converting 1.25 from float64 to int64"
        );
    }
}

// ============================================================================
// Reductions and sharing
// ============================================================================

mod reduce_tests {
    use super::*;

    fn row_products() -> KernelBuffer {
        let mut ckb = KernelBuffer::new();
        let root = ckb
            .append(KernelRequest::Single, OuterBroadcast::new(3, 8, 16))
            .unwrap();
        let inner = ckb
            .append(KernelRequest::Strided, InnerReduce::new(2, 8))
            .unwrap();
        let followup = ckb
            .append(KernelRequest::Strided, CompoundKernel::<i64, Multiply>::new())
            .unwrap();
        let init = make_pod_copy(&mut ckb, KernelRequest::Strided, 8, 8).unwrap();

        let (f, i) = (
            ckb.child_offset(inner, followup).unwrap(),
            ckb.child_offset(inner, init).unwrap(),
        );
        ckb.frame_at_mut::<InnerReduce>(inner).unwrap().link(f, i);
        let link = ckb.child_offset(root, inner).unwrap();
        ckb.frame_at_mut::<OuterBroadcast>(root).unwrap().link(link);
        ckb
    }

    #[test]
    fn test_row_products() {
        let ckb = row_products();
        let src = [2i64, 3, 4, 5, -1, 7];
        let mut dst = [0i64; 3];
        unsafe {
            ckb.root()
                .unwrap()
                .single(dst.as_mut_ptr().cast(), &[src.as_ptr().cast()])
                .unwrap();
        }
        assert_eq!(dst, [6, 20, -7]);
    }

    #[test]
    fn test_kernel_shared_between_threads() {
        let ckb = Arc::new(row_products());
        thread::scope(|s| {
            for t in 0..4i64 {
                let ckb = ckb.clone();
                s.spawn(move || {
                    let src = [t, 2, t, 3, t, 4];
                    let mut dst = [0i64; 3];
                    unsafe {
                        ckb.root()
                            .unwrap()
                            .single(dst.as_mut_ptr().cast(), &[src.as_ptr().cast()])
                            .unwrap();
                    }
                    assert_eq!(dst, [2 * t, 3 * t, 4 * t]);
                });
            }
        });
    }

    #[test]
    fn test_dump_lists_frames_in_order() {
        let ckb = row_products();
        let dump = ckb.dump();
        let names = ["outer_broadcast", "inner_reduce", "compound_multiply", "aligned_copy_8"];
        let mut last = 0;
        for name in names {
            let at = dump.find(name).unwrap();
            assert!(at >= last);
            last = at;
        }
    }

    #[test]
    fn test_compound_add_through_adapter() {
        let mut ckb = KernelBuffer::new();
        append_single(
            &mut ckb,
            KernelRequest::Strided,
            CompoundKernel::<f64, Add>::new(),
        )
        .unwrap();
        let src = [1.0f64, 2.0];
        let mut dst = [0.5f64, 0.25];
        unsafe {
            ckb.root()
                .unwrap()
                .strided(dst.as_mut_ptr().cast(), 8, &[src.as_ptr().cast()], &[8], 2)
                .unwrap();
        }
        assert_eq!(dst, [1.5, 2.25]);
    }
}
