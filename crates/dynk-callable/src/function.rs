//! Callables built from plain Rust functions.
//!
//! A [`FunctionCallable`] wraps a binary function on scalars. Resolving it
//! walks the operand dimensions like an assignment, with both sources
//! broadcasting against the destination, and pushes the callable itself at
//! the scalar level. Instantiate appends one [`FunctionKernel`] frame.
//!
//! [`Less`] is the builtin comparison. It dispatches on the type ids of
//! both sources to a `FunctionCallable` comparing that exact pair.

use crate::assign::{broadcast_type, resolve_elementwise_n};
use crate::callable::Callable;
use crate::dispatch::DispatchTable;
use crate::graph::{CallNode, NodeCursor, ResolveContext};
use crate::kwds::Kwds;
use crate::signature::Signature;
use crate::{CallableError, CallableResult};
use dynk_kernel::{
    FrameRef, Kernel, KernelBuffer, KernelError, KernelRequest, KernelResult, Scalar, Value,
};
use dynk_types::{ArrMeta, HasTypeId, Type};
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, LazyLock};

type BinaryFn<A, B, R> = Arc<dyn Fn(A, B) -> R + Send + Sync>;

/// A binary scalar function lifted to arrays.
pub struct FunctionCallable<A, B, R> {
    name: String,
    signature: Signature,
    func: BinaryFn<A, B, R>,
}

impl<A: HasTypeId, B: HasTypeId, R: HasTypeId> FunctionCallable<A, B, R> {
    /// Wrap `func` under `name`.
    pub fn new(name: impl Into<String>, func: impl Fn(A, B) -> R + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            signature: Signature::new(&["Any", "Any"], "Any", &[]),
            func: Arc::new(func),
        }
    }
}

impl<A, B, R> Clone for FunctionCallable<A, B, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            signature: self.signature.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<A: HasTypeId, B: HasTypeId, R: HasTypeId> fmt::Debug for FunctionCallable<A, B, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FunctionCallable({}: ({}, {}) -> {})",
            self.name,
            A::TYPE_ID,
            B::TYPE_ID,
            R::TYPE_ID
        )
    }
}

impl<A: HasTypeId, B: HasTypeId, R: HasTypeId> Callable for FunctionCallable<A, B, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn resolve(
        &self,
        cx: &mut ResolveContext<'_>,
        dst_tp: Option<&Type>,
        src_tp: &[Type],
        _kwds: &Kwds,
    ) -> CallableResult<Type> {
        let dst = match dst_tp {
            Some(dst) => dst.clone(),
            None => broadcast_type(src_tp, Type::of::<R>())?,
        };
        let params = [Type::of::<A>(), Type::of::<B>()];
        let ret = Type::of::<R>();
        resolve_elementwise_n(cx, &dst, src_tp, &mut |cx, dst, src| {
            if *dst != ret || src != params.as_slice() {
                return Err(CallableError::OperandMismatch {
                    callable: self.name.clone(),
                    dst: dst.to_string(),
                    src: format_operands(src),
                });
            }
            cx.push(self.clone());
            Ok(())
        })?;
        Ok(dst)
    }
}

impl<A: HasTypeId, B: HasTypeId, R: HasTypeId> CallNode for FunctionCallable<A, B, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(
        &self,
        _cursor: &mut NodeCursor<'_>,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        _dst_meta: &ArrMeta,
        _src_meta: &[&ArrMeta],
    ) -> CallableResult<()> {
        ckb.append(
            request,
            FunctionKernel {
                func: Arc::clone(&self.func),
            },
        )?;
        Ok(())
    }
}

fn insert_less_row<A: HasTypeId>(table: &mut DispatchTable<2>) {
    macro_rules! row {
        ($($b:ty),*) => {
            $(
                table.insert(
                    [A::TYPE_ID, <$b as HasTypeId>::TYPE_ID],
                    Arc::new(FunctionCallable::new("less", |a: A, b: $b| {
                        value_less(a.to_value(), b.to_value())
                    })),
                );
            )*
        };
    }
    row!(bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64);
}

// Complex numbers have no order.
static LESS: LazyLock<DispatchTable<2>> = LazyLock::new(|| {
    let mut table = DispatchTable::new("less");
    macro_rules! rows {
        ($($a:ty),*) => { $( insert_less_row::<$a>(&mut table); )* };
    }
    rows!(bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64);
    table
});

/// Elementwise `a < b` into a boolean array.
///
/// Any pair of real numeric operands compares, by exact value.
#[derive(Debug, Clone)]
pub struct Less {
    signature: Signature,
}

impl Less {
    /// Create the callable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signature: Signature::new(&["Any", "Any"], "bool", &[]),
        }
    }

    /// The dispatch table keyed by both source type ids.
    #[must_use]
    pub fn table(&self) -> &'static DispatchTable<2> {
        &LESS
    }
}

impl Default for Less {
    fn default() -> Self {
        Self::new()
    }
}

impl Callable for Less {
    fn name(&self) -> &str {
        "less"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn resolve(
        &self,
        cx: &mut ResolveContext<'_>,
        dst_tp: Option<&Type>,
        src_tp: &[Type],
        _kwds: &Kwds,
    ) -> CallableResult<Type> {
        let dst = match dst_tp {
            Some(dst) => dst.clone(),
            None => broadcast_type(src_tp, Type::of::<bool>())?,
        };
        resolve_elementwise_n(cx, &dst, src_tp, &mut |cx, dst, src| {
            let key = match src {
                [a, b] => [a.type_id(), b.type_id()],
                _ => {
                    return Err(CallableError::Arity {
                        callable: "less".to_string(),
                        expected: 2,
                        found: src.len(),
                    })
                }
            };
            let entry = LESS.lookup(&key)?;
            cx.resolve_child(entry.as_ref(), Some(dst), src, &Kwds::new())?;
            Ok(())
        })?;
        Ok(dst)
    }
}

fn format_operands(src: &[Type]) -> String {
    src.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Calls a binary function once per element.
pub struct FunctionKernel<A, B, R> {
    func: BinaryFn<A, B, R>,
}

fn pair<T: Copy>(operands: &[T]) -> KernelResult<(T, T)> {
    match operands {
        [a, b] => Ok((*a, *b)),
        _ => Err(KernelError::Arity {
            frame: "function",
            expected: 2,
            found: operands.len(),
        }),
    }
}

impl<A: HasTypeId, B: HasTypeId, R: HasTypeId> Kernel for FunctionKernel<A, B, R> {
    const NAME: &'static str = "function";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let (a, b) = pair(src)?;
        // Safety: caller contract
        unsafe {
            let value = (self.func)(a.cast::<A>().read_unaligned(), b.cast::<B>().read_unaligned());
            dst.cast::<R>().write_unaligned(value);
        }
        Ok(())
    }

    unsafe fn strided(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> KernelResult<()> {
        let (mut a, mut b) = pair(src)?;
        let (a_stride, b_stride) = pair(src_stride)?;
        let mut dst = dst;
        for _ in 0..count {
            // Safety: caller contract
            unsafe {
                let value = (self.func)(a.cast::<A>().read_unaligned(), b.cast::<B>().read_unaligned());
                dst.cast::<R>().write_unaligned(value);
            }
            dst = dst.wrapping_offset(dst_stride);
            a = a.wrapping_offset(a_stride);
            b = b.wrapping_offset(b_stride);
        }
        Ok(())
    }
}

impl<A, B, R> fmt::Debug for FunctionKernel<A, B, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FunctionKernel")
    }
}

/// Exact `a < b` over widened real values.
///
/// Mixed integer and float operands compare by value, without first
/// rounding the integer to a float. NaN is unordered.
#[must_use]
pub fn value_less(a: Value, b: Value) -> bool {
    value_cmp(a, b) == Some(Ordering::Less)
}

fn value_cmp(a: Value, b: Value) -> Option<Ordering> {
    match (real(a)?, real(b)?) {
        (Real::Int(a), Real::Int(b)) => Some(a.cmp(&b)),
        (Real::UInt(a), Real::UInt(b)) => Some(a.cmp(&b)),
        (Real::Int(a), Real::UInt(b)) => Some(int_uint_cmp(a, b)),
        (Real::UInt(a), Real::Int(b)) => Some(int_uint_cmp(b, a).reverse()),
        (Real::Float(a), Real::Float(b)) => a.partial_cmp(&b),
        (Real::Float(a), b) => float_int_cmp(a, b),
        (a, Real::Float(b)) => float_int_cmp(b, a).map(Ordering::reverse),
    }
}

#[derive(Clone, Copy)]
enum Real {
    Int(i128),
    UInt(u128),
    Float(f64),
}

fn real(value: Value) -> Option<Real> {
    match value {
        Value::Bool(b) => Some(Real::UInt(u128::from(b))),
        Value::Int(i) => Some(Real::Int(i)),
        Value::UInt(u) => Some(Real::UInt(u)),
        Value::Float(x) => Some(Real::Float(x)),
        Value::Complex(..) => None,
    }
}

fn int_uint_cmp(a: i128, b: u128) -> Ordering {
    u128::try_from(a).map_or(Ordering::Less, |a| a.cmp(&b))
}

/// Compare a float with an integer.
///
/// Inside the integer's range `floor(x)` converts exactly, and ties on the
/// floor are broken by the fractional part.
fn float_int_cmp(x: f64, int: Real) -> Option<Ordering> {
    if x.is_nan() {
        return None;
    }
    // 2^127, exact in f64
    let half = -(i128::MIN as f64);
    let floor = x.floor();
    let fraction = if x > floor { Ordering::Greater } else { Ordering::Equal };
    let ord = match int {
        Real::Int(_) if floor >= half => Ordering::Greater,
        Real::Int(_) if floor < -half => Ordering::Less,
        Real::Int(i) => (floor as i128).cmp(&i).then(fraction),
        Real::UInt(_) if floor >= 2.0 * half => Ordering::Greater,
        Real::UInt(_) if floor < 0.0 => Ordering::Less,
        Real::UInt(u) => (floor as u128).cmp(&u).then(fraction),
        Real::Float(y) => return x.partial_cmp(&y),
    };
    Some(ord)
}
