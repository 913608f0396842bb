//! Callable integration tests
//!
//! End-to-end resolve, instantiate and execution of assignments,
//! conversions, expression bridges, compound operators, reductions and
//! binary function callables on real arrays.

use dynk_callable::assign::{assign_table, ERROR_MODE};
use dynk_callable::reduction::{AXES, KEEPDIMS};
use dynk_callable::{
    builtins, plan, Assign, CallNode, Callable, CallableError, CallableExt, CallableResult,
    CompoundOperator, CopyCallable, FunctionCallable, Kwds, Less, NodeCursor, Reduction,
    ResolveContext, Signature,
};
use dynk_eval::EvalContext;
use dynk_kernel::{
    append_single, unary_src, ErrorMode, FrameOffset, FrameRef, Kernel, KernelBuffer,
    KernelError, KernelRequest, KernelResult,
};
use dynk_types::{ArrMeta, Array, ExprKernelGenerator, Type, TypeId, NUMERIC_TYPE_IDS};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Route events to the test writer, filtered by `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn assign_into(dst: &Array, src: &Array, kwds: &Kwds) -> CallableResult<()> {
    Assign::new().call_into(dst, &[src], kwds)
}

fn sum_kwds(axes: &[usize], keepdims: bool) -> Kwds {
    Kwds::new()
        .with(AXES, axes.to_vec())
        .with(KEEPDIMS, keepdims)
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    #[test]
    fn integers_survive_a_float_round_trip(values in prop::collection::vec(any::<i32>(), 1..24)) {
        let n = values.len();
        let src = Array::from_values(&values, &[n]).unwrap();
        let wide = Array::empty(Type::fixed_dim(n, Type::of::<f64>())).unwrap();
        assign_into(&wide, &src, &Kwds::new()).unwrap();
        let expected: Vec<f64> = values.iter().map(|&v| f64::from(v)).collect();
        prop_assert_eq!(wide.to_vec::<f64>().unwrap(), expected);

        let back = Array::empty(Type::fixed_dim(n, Type::of::<i32>())).unwrap();
        assign_into(&back, &wide, &Kwds::new()).unwrap();
        prop_assert_eq!(back.to_vec::<i32>().unwrap(), values);
    }

    #[test]
    fn sum_matches_iterator_sum(values in prop::collection::vec(-1000i64..1000, 1..40)) {
        let src = Array::from_values(&values, &[values.len()]).unwrap();
        let total = builtins().get("sum").unwrap().call(&[&src], &Kwds::new()).unwrap();
        prop_assert_eq!(total.scalar::<i64>().unwrap(), values.iter().sum::<i64>());
    }

    #[test]
    fn chunk_size_does_not_change_results(chunk in 1usize..10, values in prop::collection::vec(any::<u16>(), 1..30)) {
        let n = values.len();
        let raw = Array::from_values(&values, &[n]).unwrap();
        let swapped = raw
            .view_as(Type::fixed_dim(n, Type::byteswap(Type::of::<u16>()).unwrap()))
            .unwrap();
        let ectx = EvalContext::default().with_buffer_chunk_size(chunk);
        let copy = CopyCallable::new().call_with(&ectx, &[&swapped], &Kwds::new()).unwrap();
        let expected: Vec<u16> = values.iter().map(|v| v.swap_bytes()).collect();
        prop_assert_eq!(copy.to_vec::<u16>().unwrap(), expected);
    }
}

// ============================================================================
// Assignment
// ============================================================================

mod assign_tests {
    use super::*;

    #[test]
    fn test_lossy_conversion_honors_error_mode() {
        let src = Array::from_values(&[1.5f64, -2.0], &[2]).unwrap();
        let dst = Array::empty(Type::fixed_dim(2, Type::of::<i32>())).unwrap();

        let err = assign_into(&dst, &src, &Kwds::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "fractional part lost while converting 1.5 from float64 to int32"
        );

        let kwds = Kwds::new().with(ERROR_MODE, ErrorMode::NoCheck);
        assign_into(&dst, &src, &kwds).unwrap();
        assert_eq!(dst.to_vec::<i32>().unwrap(), vec![1, -2]);
    }

    #[test]
    fn test_context_error_mode_is_the_default() {
        let src = Array::from_values(&[300i32, -300, 5], &[3]).unwrap();
        let dst = Array::empty(Type::fixed_dim(3, Type::of::<i8>())).unwrap();
        let ectx = EvalContext::default().with_errmode(ErrorMode::Saturate);
        let plan = plan(
            &Assign::new(),
            &ectx,
            Some(dst.tp()),
            &[src.tp().clone()],
            &Kwds::new(),
        )
        .unwrap();
        plan.instantiate(KernelRequest::Single, dst.arrmeta(), &[src.arrmeta()])
            .unwrap()
            .execute(&dst, &[&src])
            .unwrap();
        assert_eq!(dst.to_vec::<i8>().unwrap(), vec![127, -128, 5]);
    }

    #[test]
    fn test_overflow_is_a_kernel_error() {
        let src = Array::from_scalar(70_000u32).unwrap();
        let dst = Array::empty(Type::of::<u16>()).unwrap();
        let err = assign_into(&dst, &src, &Kwds::new()).unwrap_err();
        assert!(matches!(
            err,
            CallableError::Kernel(KernelError::Conversion(_))
        ));
    }

    #[test]
    fn test_broadcasting() {
        let dst = Array::empty(Type::fixed_dims(&[2, 3], Type::of::<i64>())).unwrap();
        assign_into(&dst, &Array::from_scalar(7i64).unwrap(), &Kwds::new()).unwrap();
        assert_eq!(dst.to_vec::<i64>().unwrap(), vec![7; 6]);

        let row = Array::from_values(&[1i64, 2, 3], &[1, 3]).unwrap();
        assign_into(&dst, &row, &Kwds::new()).unwrap();
        assert_eq!(dst.to_vec::<i64>().unwrap(), vec![1, 2, 3, 1, 2, 3]);

        let bad = Array::from_values(&[1i64, 2], &[2]).unwrap();
        assert!(matches!(
            assign_into(&dst, &bad, &Kwds::new()),
            Err(CallableError::Broadcast { .. })
        ));
    }

    #[test]
    fn test_read_only_destination() {
        let src = Array::from_values(&[1u8, 2], &[2]).unwrap();
        let dst = Array::empty(src.tp().clone()).unwrap().readonly();
        assert!(matches!(
            assign_into(&dst, &src, &Kwds::new()),
            Err(CallableError::Array(_))
        ));
    }

    #[test]
    fn test_signature_checks() {
        let a = Array::from_scalar(1i32).unwrap();
        assert!(matches!(
            Assign::new().call(&[&a, &a], &Kwds::new()),
            Err(CallableError::Arity { expected: 1, found: 2, .. })
        ));
        let err = Assign::new()
            .call(&[&a], &Kwds::new().with(AXES, vec![0usize]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed keyword arguments for `assign`: unexpected keyword `axes`"
        );
        let err = Assign::new()
            .call(&[&a], &Kwds::new().with(ERROR_MODE, true))
            .unwrap_err();
        assert!(matches!(err, CallableError::MalformedKwds { .. }));
    }
}

// ============================================================================
// Dispatch
// ============================================================================

mod dispatch_tests {
    use super::*;

    #[test]
    fn test_every_numeric_pair_converts() {
        for dst in NUMERIC_TYPE_IDS {
            for src in NUMERIC_TYPE_IDS {
                assert!(assign_table().contains(&[dst, src]), "{dst} <- {src}");
            }
        }
    }

    #[test]
    fn test_unsupported_pairs_miss() {
        assert!(!assign_table().contains(&[TypeId::Int32, TypeId::String]));
        let src = Array::from_strs(&["1"], &[1]).unwrap();
        let dst = Array::empty(Type::fixed_dim(1, Type::of::<i32>())).unwrap();
        assert_eq!(
            assign_into(&dst, &src, &Kwds::new()),
            Err(CallableError::NoViableAssignment {
                dst: "int32".to_string(),
                src: "string".to_string(),
            })
        );
    }

    #[test]
    fn test_registry() {
        let registry = builtins();
        assert!(registry.get("sum").is_ok());
        assert_eq!(
            registry.get("mean").unwrap_err(),
            CallableError::UnknownCallable("mean".to_string())
        );
        assert_eq!(registry.get("copy").unwrap().signature().to_string(), "(Any) -> Any");
    }
}

// ============================================================================
// Strings, dates and structs
// ============================================================================

mod string_date_tests {
    use super::*;

    #[test]
    fn test_copy_strings_into_a_new_pool() {
        let src = Array::from_strs(&["alpha", "", "gamma"], &[3]).unwrap();
        let copy = CopyCallable::new().call(&[&src], &Kwds::new()).unwrap();
        assert_eq!(copy.to_strings().unwrap(), vec!["alpha", "", "gamma"]);
        drop(src);
        assert_eq!(copy.to_strings().unwrap(), vec!["alpha", "", "gamma"]);
    }

    #[test]
    fn test_strings_and_dates() {
        let text = Array::from_strs(&["2024-02-29", "1969-12-31"], &[2]).unwrap();
        let dates = Array::empty(Type::fixed_dim(2, Type::date())).unwrap();
        assign_into(&dates, &text, &Kwds::new()).unwrap();
        assert_eq!(dates.to_strings().unwrap(), vec!["2024-02-29", "1969-12-31"]);

        let again = Array::empty(Type::fixed_dim(2, Type::string())).unwrap();
        assign_into(&again, &dates, &Kwds::new()).unwrap();
        assert_eq!(again.to_strings().unwrap(), vec!["2024-02-29", "1969-12-31"]);
    }

    #[test]
    fn test_unparsable_date() {
        let text = Array::from_strs(&["2023-02-30"], &[1]).unwrap();
        let dates = Array::empty(Type::fixed_dim(1, Type::date())).unwrap();
        let err = assign_into(&dates, &text, &Kwds::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value while converting 2023-02-30 from string to date"
        );
    }

    #[test]
    fn test_dates_and_structs() {
        let dates = Array::from_dates(&["2000-01-31", "1900-03-01"], &[2]).unwrap();
        let parts = Array::empty(Type::fixed_dim(2, Type::date_struct())).unwrap();
        assign_into(&parts, &dates, &Kwds::new()).unwrap();

        let base = parts.data_ptr();
        let read = |i: usize| unsafe {
            let p = base.add(i * 8);
            (
                p.cast::<i32>().read_unaligned(),
                p.add(4).cast::<i16>().read_unaligned(),
                p.add(6).cast::<i16>().read_unaligned(),
            )
        };
        assert_eq!(read(0), (2000, 1, 31));
        assert_eq!(read(1), (1900, 3, 1));

        let back = Array::empty(Type::fixed_dim(2, Type::date())).unwrap();
        assign_into(&back, &parts, &Kwds::new()).unwrap();
        assert_eq!(back.to_strings().unwrap(), vec!["2000-01-31", "1900-03-01"]);
    }

    #[test]
    fn test_struct_outside_date_range() {
        let parts = Array::empty(Type::fixed_dim(1, Type::date_struct())).unwrap();
        unsafe {
            let p = parts.data_ptr_mut().unwrap();
            p.cast::<i32>().write_unaligned(2_000_000_000);
            p.add(4).cast::<i16>().write_unaligned(1);
            p.add(6).cast::<i16>().write_unaligned(1);
        }
        let dates = Array::empty(Type::fixed_dim(1, Type::date())).unwrap();
        let err = assign_into(&dates, &parts, &Kwds::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value while converting {year: 2000000000, month: 1, day: 1} from struct to date"
        );
        assert_eq!(dates.to_strings().unwrap(), vec!["1970-01-01"]);
    }
}

// ============================================================================
// Expression types
// ============================================================================

mod expr_tests {
    use super::*;

    /// Stores `value - 100`.
    #[derive(Debug)]
    struct Offset;

    struct OffsetKernel {
        delta: i32,
    }

    impl Kernel for OffsetKernel {
        const NAME: &'static str = "offset";

        unsafe fn single(
            &self,
            _frame: FrameRef<'_>,
            dst: *mut u8,
            src: &[*const u8],
        ) -> KernelResult<()> {
            let src = unary_src(Self::NAME, src)?;
            unsafe {
                let v = src.cast::<i32>().read_unaligned();
                dst.cast::<i32>().write_unaligned(v.wrapping_add(self.delta));
            }
            Ok(())
        }
    }

    impl ExprKernelGenerator for Offset {
        fn name(&self) -> &str {
            "offset"
        }

        fn make_operand_to_value(
            &self,
            ckb: &mut KernelBuffer,
            request: KernelRequest,
            _value: &Type,
            _operand: &Type,
            _errmode: ErrorMode,
        ) -> KernelResult<FrameOffset> {
            append_single(ckb, request, OffsetKernel { delta: 100 })
        }

        fn make_value_to_operand(
            &self,
            ckb: &mut KernelBuffer,
            request: KernelRequest,
            _value: &Type,
            _operand: &Type,
            _errmode: ErrorMode,
        ) -> KernelResult<FrameOffset> {
            append_single(ckb, request, OffsetKernel { delta: -100 })
        }
    }

    fn offset_type() -> Type {
        Type::expr(Type::of::<i32>(), Type::of::<i32>(), Arc::new(Offset)).unwrap()
    }

    #[test]
    fn test_custom_generator_reads_and_writes() {
        let raw = Array::from_values(&[1i32, 2, 3, 4, 5], &[5]).unwrap();
        let view = raw.view_as(Type::fixed_dim(5, offset_type())).unwrap();
        let ectx = EvalContext::default().with_buffer_chunk_size(2);
        let values = CopyCallable::new().call_with(&ectx, &[&view], &Kwds::new()).unwrap();
        assert_eq!(values.tp(), &Type::fixed_dim(5, Type::of::<i32>()));
        assert_eq!(values.to_vec::<i32>().unwrap(), vec![101, 102, 103, 104, 105]);

        let stored = Array::empty(Type::fixed_dim(5, offset_type())).unwrap();
        assign_into(&stored, &values, &Kwds::new()).unwrap();
        let raw_back = stored.view_as(Type::fixed_dim(5, Type::of::<i32>())).unwrap();
        assert_eq!(raw_back.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_expression_to_expression() {
        let raw = Array::from_values(&[7u32, 9], &[2]).unwrap();
        let swapped = raw
            .view_as(Type::fixed_dim(2, Type::byteswap(Type::of::<u32>()).unwrap()))
            .unwrap();
        let dst = Array::empty(Type::fixed_dim(2, Type::byteswap(Type::of::<u64>()).unwrap()))
            .unwrap();
        assign_into(&dst, &swapped, &Kwds::new()).unwrap();
        let plain = dst.view_as(Type::fixed_dim(2, Type::of::<u64>())).unwrap();
        let expected: Vec<u64> = [7u32, 9]
            .iter()
            .map(|v| u64::from(v.swap_bytes()).swap_bytes())
            .collect();
        assert_eq!(plain.to_vec::<u64>().unwrap(), expected);
    }
}

// ============================================================================
// Compound operators and reductions
// ============================================================================

mod reduction_tests {
    use super::*;

    fn matrix() -> Array {
        Array::from_values(&[1i32, 2, 3, 4, 5, 6], &[2, 3]).unwrap()
    }

    #[test]
    fn test_compound_add_in_place() {
        let dst = Array::from_values(&[1i32, 2, 3], &[3]).unwrap();
        let src = Array::from_values(&[10i32, 20, 30], &[3]).unwrap();
        CompoundOperator::add().call_into(&dst, &[&src], &Kwds::new()).unwrap();
        assert_eq!(dst.to_vec::<i32>().unwrap(), vec![11, 22, 33]);
        CompoundOperator::max()
            .call_into(&dst, &[&Array::from_scalar(25i32).unwrap()], &Kwds::new())
            .unwrap();
        assert_eq!(dst.to_vec::<i32>().unwrap(), vec![25, 25, 33]);
    }

    #[test]
    fn test_sum_vector() {
        let src = Array::from_values(&[1i32, 2, 3, 4], &[4]).unwrap();
        let sum = builtins().get("sum").unwrap();
        assert_eq!(sum.call(&[&src], &Kwds::new()).unwrap().scalar::<i32>().unwrap(), 10);

        let kept = sum.call(&[&src], &sum_kwds(&[0], true)).unwrap();
        assert_eq!(kept.shape().as_slice(), &[1]);
        assert_eq!(kept.to_vec::<i32>().unwrap(), vec![10]);
    }

    #[test]
    fn test_row_and_column_sums() {
        let sum = builtins().get("sum").unwrap();
        let rows = sum.call(&[&matrix()], &sum_kwds(&[1], false)).unwrap();
        assert_eq!(rows.to_vec::<i32>().unwrap(), vec![6, 15]);
        let cols = sum.call(&[&matrix()], &sum_kwds(&[0], false)).unwrap();
        assert_eq!(cols.to_vec::<i32>().unwrap(), vec![5, 7, 9]);
        let kept = sum.call(&[&matrix()], &sum_kwds(&[1], true)).unwrap();
        assert_eq!(kept.shape().as_slice(), &[2, 1]);
        assert_eq!(kept.to_vec::<i32>().unwrap(), vec![6, 15]);
    }

    #[test]
    fn test_other_reductions() {
        let values = Array::from_values(&[3.5f64, -1.0, 8.25, 2.0], &[2, 2]).unwrap();
        let registry = builtins();
        let min = registry.get("min").unwrap().call(&[&values], &Kwds::new()).unwrap();
        assert_eq!(min.scalar::<f64>().unwrap(), -1.0);
        let max = registry
            .get("max")
            .unwrap()
            .call(&[&values], &sum_kwds(&[0], false))
            .unwrap();
        assert_eq!(max.to_vec::<f64>().unwrap(), vec![8.25, 2.0]);
        let prod = registry.get("prod").unwrap().call(&[&matrix()], &Kwds::new()).unwrap();
        assert_eq!(prod.scalar::<i32>().unwrap(), 720);
    }

    #[test]
    fn test_empty_axis() {
        let empty = Array::empty(Type::fixed_dims(&[0, 3], Type::of::<i32>())).unwrap();
        let sum = builtins().get("sum").unwrap();
        assert_eq!(
            sum.call(&[&empty], &Kwds::new()).unwrap_err(),
            CallableError::EmptyReduction { axis: 0 }
        );
        let cols = sum.call(&[&empty], &sum_kwds(&[0], false));
        assert!(cols.is_err());
        let rows = sum.call(&[&empty], &sum_kwds(&[1], false)).unwrap();
        assert_eq!(rows.shape().as_slice(), &[0]);
    }

    #[test]
    fn test_complex_has_no_min() {
        let z = Array::from_values(
            &[num_complex::Complex::new(1.0f64, 2.0)],
            &[1],
        )
        .unwrap();
        let err = builtins().get("min").unwrap().call(&[&z], &Kwds::new()).unwrap_err();
        assert!(matches!(
            err,
            CallableError::NoMatchingOperation { table: "compound_min", .. }
        ));
        let sum = builtins().get("sum").unwrap().call(&[&z], &Kwds::new()).unwrap();
        assert_eq!(
            sum.scalar::<num_complex::Complex<f64>>().unwrap(),
            num_complex::Complex::new(1.0, 2.0)
        );
    }

    #[test]
    fn test_custom_reduction() {
        let total = Reduction::new(Arc::new(CompoundOperator::add()));
        assert_eq!(total.name(), "reduce");
        let out = total.call(&[&matrix()], &Kwds::new()).unwrap();
        assert_eq!(out.scalar::<i32>().unwrap(), 21);
    }
}

// ============================================================================
// Function callables and comparisons
// ============================================================================

mod function_tests {
    use super::*;

    #[test]
    fn test_less_on_vectors() {
        let a = Array::from_values(&[1i32, 5, -3, 7], &[4]).unwrap();
        let b = Array::from_values(&[2.5f64, 5.0, -3.5, 100.0], &[4]).unwrap();
        let less = builtins().get("less").unwrap();
        let out = less.call(&[&a, &b], &Kwds::new()).unwrap();
        assert_eq!(out.tp(), &Type::fixed_dim(4, Type::of::<bool>()));
        assert_eq!(out.to_vec::<bool>().unwrap(), vec![true, false, false, true]);
    }

    #[test]
    fn test_less_broadcasts_both_operands() {
        let column = Array::from_values(&[0u8, 2], &[2, 1]).unwrap();
        let row = Array::from_values(&[-1i64, 1, 3], &[3]).unwrap();
        let out = Less::new().call(&[&column, &row], &Kwds::new()).unwrap();
        assert_eq!(out.shape().as_slice(), &[2, 3]);
        assert_eq!(
            out.to_vec::<bool>().unwrap(),
            vec![false, true, true, false, false, true]
        );

        let scalar = Array::from_scalar(1i64).unwrap();
        let out = Less::new().call(&[&scalar, &row], &Kwds::new()).unwrap();
        assert_eq!(out.to_vec::<bool>().unwrap(), vec![false, false, true]);
    }

    #[test]
    fn test_less_into_existing_destination() {
        let a = Array::from_values(&[u64::MAX, 1], &[2]).unwrap();
        let b = Array::from_scalar(i64::MIN).unwrap();
        let dst = Array::empty(Type::fixed_dim(2, Type::of::<bool>())).unwrap();
        Less::new().call_into(&dst, &[&b, &a], &Kwds::new()).unwrap();
        assert_eq!(dst.to_vec::<bool>().unwrap(), vec![true, true]);
    }

    #[test]
    fn test_less_shape_mismatch() {
        let a = Array::from_values(&[1i32, 2, 3], &[3]).unwrap();
        let b = Array::from_values(&[1i32, 2], &[2]).unwrap();
        let err = Less::new().call(&[&a, &b], &Kwds::new()).unwrap_err();
        assert_eq!(
            err,
            CallableError::Broadcast {
                dst: "3 * bool".to_string(),
                src: "2 * int32".to_string(),
            }
        );
    }

    #[test]
    fn test_function_callable_with_captured_state() {
        let scale = 10i32;
        let affine = FunctionCallable::new("affine", move |a: i32, b: i16| a * scale + i32::from(b));
        let a = Array::from_values(&[1i32, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        let b = Array::from_values(&[7i16, 8, 9], &[3]).unwrap();
        let out = affine.call(&[&a, &b], &Kwds::new()).unwrap();
        assert_eq!(out.tp(), &Type::fixed_dims(&[2, 3], Type::of::<i32>()));
        assert_eq!(out.to_vec::<i32>().unwrap(), vec![17, 28, 39, 47, 58, 69]);

        let src_tp = [a.tp().clone(), b.tp().clone()];
        let resolved = plan(&affine, &EvalContext::default(), None, &src_tp, &Kwds::new()).unwrap();
        assert_eq!(resolved.graph().names(), vec!["dim", "dim", "affine"]);
    }
}

// ============================================================================
// Kernel lifetime and threads
// ============================================================================

mod lifetime_tests {
    use super::*;

    static DROPPED: AtomicUsize = AtomicUsize::new(0);

    struct Tracked;

    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPPED.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Kernel for Tracked {
        const NAME: &'static str = "tracked";

        unsafe fn single(
            &self,
            _frame: FrameRef<'_>,
            _dst: *mut u8,
            _src: &[*const u8],
        ) -> KernelResult<()> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct ParentNode;

    impl CallNode for ParentNode {
        fn name(&self) -> &str {
            "parent"
        }

        fn instantiate(
            &self,
            cursor: &mut NodeCursor<'_>,
            ckb: &mut KernelBuffer,
            request: KernelRequest,
            dst_meta: &ArrMeta,
            src_meta: &[&ArrMeta],
        ) -> CallableResult<()> {
            ckb.append(request, Tracked)?;
            cursor.instantiate_next(ckb, KernelRequest::Strided, dst_meta, src_meta)?;
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FailingNode;

    impl CallNode for FailingNode {
        fn name(&self) -> &str {
            "failing"
        }

        fn instantiate(
            &self,
            _cursor: &mut NodeCursor<'_>,
            _ckb: &mut KernelBuffer,
            _request: KernelRequest,
            _dst_meta: &ArrMeta,
            _src_meta: &[&ArrMeta],
        ) -> CallableResult<()> {
            Err(CallableError::GraphExhausted)
        }
    }

    #[derive(Debug)]
    struct HalfBuilt {
        signature: Signature,
    }

    impl Callable for HalfBuilt {
        fn name(&self) -> &str {
            "half_built"
        }

        fn signature(&self) -> &Signature {
            &self.signature
        }

        fn resolve(
            &self,
            cx: &mut ResolveContext<'_>,
            _dst_tp: Option<&Type>,
            src_tp: &[Type],
            _kwds: &Kwds,
        ) -> CallableResult<Type> {
            cx.push(ParentNode);
            cx.push(FailingNode);
            Ok(src_tp[0].clone())
        }
    }

    #[derive(Debug)]
    struct Ouroboros {
        signature: Signature,
    }

    impl Callable for Ouroboros {
        fn name(&self) -> &str {
            "ouroboros"
        }

        fn signature(&self) -> &Signature {
            &self.signature
        }

        fn resolve(
            &self,
            cx: &mut ResolveContext<'_>,
            dst_tp: Option<&Type>,
            src_tp: &[Type],
            kwds: &Kwds,
        ) -> CallableResult<Type> {
            cx.resolve_child(self, dst_tp, src_tp, kwds)
        }
    }

    #[test]
    fn test_failed_instantiate_destroys_frames() {
        let callable = HalfBuilt {
            signature: Signature::new(&["Any"], "Any", &[]),
        };
        let tp = Type::of::<i32>();
        let plan = plan(&callable, &EvalContext::default(), None, &[tp.clone()], &Kwds::new())
            .unwrap();
        assert_eq!(plan.graph().names(), vec!["parent", "failing"]);

        let meta = tp.metadata_default_construct();
        let before = DROPPED.load(Ordering::SeqCst);
        let err = plan
            .instantiate(KernelRequest::Single, &meta, &[&meta])
            .unwrap_err();
        assert_eq!(err, CallableError::GraphExhausted);
        assert_eq!(DROPPED.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_frame_dump_when_tracing() {
        init_tracing();
        let ectx = EvalContext {
            trace_frames: true,
            ..EvalContext::default()
        };
        let tp = Type::fixed_dim(2, Type::of::<u8>());
        let plan = plan(&Assign::new(), &ectx, None, &[tp.clone()], &Kwds::new()).unwrap();
        let meta = tp.metadata_default_construct();
        let kernel = plan
            .instantiate(KernelRequest::Single, &meta, &[&meta])
            .unwrap();
        let dump = kernel.buffer().dump();
        assert!(dump.contains("strided_assign"), "{dump}");
        assert_eq!(kernel.buffer().root().unwrap().name(), "strided_assign");
    }

    #[test]
    fn test_recursion_is_bounded() {
        init_tracing();
        let callable = Ouroboros {
            signature: Signature::new(&["Any"], "Any", &[]),
        };
        let err = plan(
            &callable,
            &EvalContext::default(),
            None,
            &[Type::of::<u8>()],
            &Kwds::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CallableError::RecursionLimit { limit: 64, .. }));
    }

    #[test]
    fn test_compiled_kernel_runs_on_many_threads() {
        let src = Array::from_values(&[1i16, -2, 3, -4], &[4]).unwrap();
        let dst_tp = Type::fixed_dim(4, Type::of::<f32>());
        let template = Array::empty(dst_tp.clone()).unwrap();
        let kernel = plan(
            &Assign::new(),
            &EvalContext::default(),
            Some(&dst_tp),
            &[src.tp().clone()],
            &Kwds::new(),
        )
        .unwrap()
        .instantiate(KernelRequest::Single, template.arrmeta(), &[src.arrmeta()])
        .unwrap();

        thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let dst = Array::empty(dst_tp.clone()).unwrap();
                        kernel.execute(&dst, &[&src]).unwrap();
                        dst.to_vec::<f32>().unwrap()
                    })
                })
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), vec![1.0, -2.0, 3.0, -4.0]);
            }
        });
    }

    #[test]
    fn test_kernel_outlives_string_operands() {
        let src = Array::from_strs(&["kept"], &[1]).unwrap();
        let dst = Array::empty(src.tp().clone()).unwrap();
        let kernel = plan(
            &Assign::new(),
            &EvalContext::default(),
            Some(dst.tp()),
            &[src.tp().clone()],
            &Kwds::new(),
        )
        .unwrap()
        .instantiate(KernelRequest::Single, dst.arrmeta(), &[src.arrmeta()])
        .unwrap();
        kernel.execute(&dst, &[&src]).unwrap();
        let copy = dst.shallow_copy();
        drop(dst);
        assert_eq!(copy.to_strings().unwrap(), vec!["kept"]);
        drop(kernel);
        assert_eq!(copy.to_strings().unwrap(), vec!["kept"]);
    }
}
