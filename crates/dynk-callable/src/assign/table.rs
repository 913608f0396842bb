//! The assignment dispatch table.
//!
//! Built once on first use. It holds every ordered pair of the 15 numeric
//! scalars plus the string, bytes, date and struct combinations that have a
//! dedicated kernel.

use super::special::{PodAssign, SpecialAssign, SpecialKind};
use super::ERROR_MODE;
use crate::assign::unary_operand;
use crate::callable::Callable;
use crate::dispatch::DispatchTable;
use crate::graph::{CallNode, NodeCursor, ResolveContext};
use crate::kwds::Kwds;
use crate::signature::Signature;
use crate::{CallableError, CallableResult};
use dynk_eval::ErrorMode;
use dynk_kernel::convert::ConvertKernel;
use dynk_kernel::{KernelBuffer, KernelRequest};
use dynk_types::{ArrMeta, HasTypeId, Type, TypeId};
use num_complex::Complex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static ASSIGN_TABLE: LazyLock<DispatchTable<2>> = LazyLock::new(build);

/// The shared `(dst, src)` assignment table.
#[must_use]
pub fn assign_table() -> &'static DispatchTable<2> {
    &ASSIGN_TABLE
}

macro_rules! numeric_cross_product {
    (@cells $table:ident, $dst:ty; $($src:ty),*) => {
        $(
            $table.insert(
                [<$dst as HasTypeId>::TYPE_ID, <$src as HasTypeId>::TYPE_ID],
                Arc::new(ConvertCallable::<$dst, $src>::new()),
            );
        )*
    };
    (@row $table:ident, $dst:ty) => {
        numeric_cross_product!(@cells $table, $dst;
            bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128,
            f32, f64, Complex<f32>, Complex<f64>);
    };
    ($table:ident; $($dst:ty),*) => {
        $( numeric_cross_product!(@row $table, $dst); )*
    };
}

fn build() -> DispatchTable<2> {
    let mut table = DispatchTable::new("assign");
    numeric_cross_product!(table;
        bool, i8, i16, i32, i64, i128, u8, u16, u32, u64, u128,
        f32, f64, Complex<f32>, Complex<f64>);

    let pod: Arc<dyn Callable> = Arc::new(PodAssign::new());
    table.insert([TypeId::Date, TypeId::Date], pod.clone());
    table.insert([TypeId::FixedBytes, TypeId::FixedBytes], pod);

    for (key, kind) in [
        ([TypeId::String, TypeId::String], SpecialKind::StringCopy),
        ([TypeId::Bytes, TypeId::Bytes], SpecialKind::StringCopy),
        ([TypeId::String, TypeId::Date], SpecialKind::DateToString),
        ([TypeId::Date, TypeId::String], SpecialKind::StringToDate),
        ([TypeId::Struct, TypeId::Date], SpecialKind::DateToStruct),
        ([TypeId::Date, TypeId::Struct], SpecialKind::StructToDate),
    ] {
        table.insert(key, Arc::new(SpecialAssign::new(kind)));
    }

    debug!(entries = table.len(), "built assignment dispatch table");
    table
}

/// Numeric conversion from `S` to `D`.
pub struct ConvertCallable<D, S> {
    signature: Signature,
    _marker: PhantomData<fn(S) -> D>,
}

impl<D: HasTypeId, S: HasTypeId> ConvertCallable<D, S> {
    /// Create the callable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signature: Signature::new(&["Any"], "Any", &[ERROR_MODE]),
            _marker: PhantomData,
        }
    }
}

impl<D: HasTypeId, S: HasTypeId> Default for ConvertCallable<D, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: HasTypeId, S: HasTypeId> fmt::Debug for ConvertCallable<D, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertCallable")
            .field("dst", &D::TYPE_ID)
            .field("src", &S::TYPE_ID)
            .finish()
    }
}

impl<D: HasTypeId, S: HasTypeId> Callable for ConvertCallable<D, S> {
    fn name(&self) -> &str {
        "convert"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn resolve(
        &self,
        cx: &mut ResolveContext<'_>,
        _dst_tp: Option<&Type>,
        src_tp: &[Type],
        kwds: &Kwds,
    ) -> CallableResult<Type> {
        let src = unary_operand(self.name(), src_tp)?;
        let dst = Type::of::<D>();
        if src.type_id() != S::TYPE_ID {
            return Err(CallableError::OperandMismatch {
                callable: self.name().to_string(),
                dst: dst.to_string(),
                src: src.to_string(),
            });
        }
        let errmode = kwds
            .error_mode(self.name(), ERROR_MODE)?
            .unwrap_or(cx.ectx().errmode);
        cx.push(ConvertNode::<D, S> {
            errmode,
            _marker: PhantomData,
        });
        Ok(dst)
    }
}

struct ConvertNode<D, S> {
    errmode: ErrorMode,
    _marker: PhantomData<fn(S) -> D>,
}

impl<D: HasTypeId, S: HasTypeId> fmt::Debug for ConvertNode<D, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConvertNode({} <- {}, {})", D::TYPE_ID, S::TYPE_ID, self.errmode)
    }
}

impl<D: HasTypeId, S: HasTypeId> CallNode for ConvertNode<D, S> {
    fn name(&self) -> &str {
        "convert"
    }

    fn instantiate(
        &self,
        _cursor: &mut NodeCursor<'_>,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        _dst_meta: &ArrMeta,
        _src_meta: &[&ArrMeta],
    ) -> CallableResult<()> {
        ckb.append(request, ConvertKernel::<D, S>::new(self.errmode))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynk_types::NUMERIC_TYPE_IDS;

    #[test]
    fn test_numeric_cross_product_is_complete() {
        let table = assign_table();
        for dst in NUMERIC_TYPE_IDS {
            for src in NUMERIC_TYPE_IDS {
                assert_eq!(table.lookup(&[dst, src]).unwrap().name(), "convert");
            }
        }
        assert_eq!(table.len(), 15 * 15 + 8);
    }

    #[test]
    fn test_special_pairs() {
        let table = assign_table();
        assert_eq!(table.lookup(&[TypeId::String, TypeId::Date]).unwrap().name(), "date_to_string");
        assert_eq!(table.lookup(&[TypeId::Date, TypeId::Date]).unwrap().name(), "pod_assign");
        assert!(!table.contains(&[TypeId::String, TypeId::Int32]));
        assert!(matches!(
            table.lookup(&[TypeId::Struct, TypeId::Struct]),
            Err(CallableError::NoMatchingOperation { table: "assign", .. })
        ));
    }
}
