//! In-place accumulation callables.
//!
//! A compound operator computes `dst = op(dst, src)` elementwise, with the
//! source broadcasting over the destination like an assignment. Both sides
//! must share one scalar type; there is no implicit promotion.

use crate::assign::{resolve_elementwise, unary_operand};
use crate::callable::Callable;
use crate::dispatch::DispatchTable;
use crate::graph::{CallNode, NodeCursor, ResolveContext};
use crate::kwds::Kwds;
use crate::signature::Signature;
use crate::{CallableError, CallableResult};
use dynk_kernel::compound::{Add, CompoundKernel, CompoundOp, Max, Min, Multiply};
use dynk_kernel::{KernelBuffer, KernelRequest};
use dynk_types::{ArrMeta, HasTypeId, Type};
use num_complex::Complex;
use std::fmt;
use std::marker::PhantomData;
use std::slice;
use std::sync::{Arc, LazyLock};

macro_rules! compound_table {
    ($name:literal, $op:ty; $($ty:ty),*) => {{
        let mut table = DispatchTable::new($name);
        $(
            table.insert(
                [<$ty as HasTypeId>::TYPE_ID],
                Arc::new(CompoundCallable::<$ty, $op>::new()),
            );
        )*
        table
    }};
}

static ADD: LazyLock<DispatchTable<1>> = LazyLock::new(|| {
    compound_table!("compound_add", Add;
        bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128,
        f32, f64, Complex<f32>, Complex<f64>)
});

static MULTIPLY: LazyLock<DispatchTable<1>> = LazyLock::new(|| {
    compound_table!("compound_multiply", Multiply;
        bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128,
        f32, f64, Complex<f32>, Complex<f64>)
});

// Complex numbers have no order.
static MIN: LazyLock<DispatchTable<1>> = LazyLock::new(|| {
    compound_table!("compound_min", Min;
        bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64)
});

static MAX: LazyLock<DispatchTable<1>> = LazyLock::new(|| {
    compound_table!("compound_max", Max;
        bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64)
});

/// `dst = op(dst, src)` over arrays of one scalar type.
#[derive(Debug, Clone)]
pub struct CompoundOperator {
    name: &'static str,
    signature: Signature,
    table: &'static DispatchTable<1>,
}

impl CompoundOperator {
    fn new(name: &'static str, table: &'static DispatchTable<1>) -> Self {
        Self {
            name,
            signature: Signature::new(&["Any"], "Any", &[]),
            table,
        }
    }

    /// `dst += src`
    #[must_use]
    pub fn add() -> Self {
        Self::new("compound_add", &ADD)
    }

    /// `dst *= src`
    #[must_use]
    pub fn multiply() -> Self {
        Self::new("compound_multiply", &MULTIPLY)
    }

    /// `dst = min(dst, src)`
    #[must_use]
    pub fn min() -> Self {
        Self::new("compound_min", &MIN)
    }

    /// `dst = max(dst, src)`
    #[must_use]
    pub fn max() -> Self {
        Self::new("compound_max", &MAX)
    }

    /// The per-type dispatch table.
    #[must_use]
    pub fn table(&self) -> &'static DispatchTable<1> {
        self.table
    }
}

impl Callable for CompoundOperator {
    fn name(&self) -> &str {
        self.name
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
        let src = unary_operand(self.name, src_tp)?;
        let dst = dst_tp.cloned().unwrap_or_else(|| src.clone());
        let table = self.table;
        resolve_elementwise(cx, &dst, src, &mut |cx, dst, src| {
            if dst != src {
                return Err(CallableError::OperandMismatch {
                    callable: table.name().to_string(),
                    dst: dst.to_string(),
                    src: src.to_string(),
                });
            }
            let entry = table.lookup(&[dst.type_id()])?;
            cx.resolve_child(entry.as_ref(), Some(dst), slice::from_ref(src), &Kwds::new())?;
            Ok(())
        })?;
        Ok(dst)
    }
}

/// Accumulation of one scalar type.
pub struct CompoundCallable<T, O> {
    signature: Signature,
    _marker: PhantomData<fn(T) -> O>,
}

impl<T: HasTypeId, O: CompoundOp<T>> CompoundCallable<T, O> {
    /// Create the callable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signature: Signature::new(&["Any"], "Any", &[]),
            _marker: PhantomData,
        }
    }
}

impl<T: HasTypeId, O: CompoundOp<T>> Default for CompoundCallable<T, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: HasTypeId, O: CompoundOp<T>> fmt::Debug for CompoundCallable<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompoundCallable({}, {})", O::NAME, T::TYPE_ID)
    }
}

impl<T: HasTypeId, O: CompoundOp<T>> Callable for CompoundCallable<T, O> {
    fn name(&self) -> &str {
        O::NAME
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
        let src = unary_operand(O::NAME, src_tp)?;
        let tp = Type::of::<T>();
        let dst = dst_tp.cloned().unwrap_or_else(|| tp.clone());
        if *src != tp || dst != tp {
            return Err(CallableError::OperandMismatch {
                callable: O::NAME.to_string(),
                dst: dst.to_string(),
                src: src.to_string(),
            });
        }
        cx.push(CompoundNode::<T, O> {
            _marker: PhantomData,
        });
        Ok(dst)
    }
}

struct CompoundNode<T, O> {
    _marker: PhantomData<fn(T) -> O>,
}

impl<T: HasTypeId, O: CompoundOp<T>> fmt::Debug for CompoundNode<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompoundNode({}, {})", O::NAME, T::TYPE_ID)
    }
}

impl<T: HasTypeId, O: CompoundOp<T>> CallNode for CompoundNode<T, O> {
    fn name(&self) -> &str {
        O::NAME
    }

    fn instantiate(
        &self,
        _cursor: &mut NodeCursor<'_>,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        _dst_meta: &ArrMeta,
        _src_meta: &[&ArrMeta],
    ) -> CallableResult<()> {
        ckb.append(request, CompoundKernel::<T, O>::new())?;
        Ok(())
    }
}
