//! Assignment between arbitrary types.
//!
//! Resolving an assignment peels one dimension at a time off the
//! destination, pushing a [`DimNode`] per level, until both sides are
//! scalars. At the scalar level:
//!
//! - expression types are bridged through a buffered chain (see [`chain`])
//! - equal plain-old-data types get a POD copy
//! - everything else dispatches through the assignment table by
//!   `(dst, src)` type ids, with the error mode downgraded to
//!   [`ErrorMode::NoCheck`] when the pair is statically lossless
//!
//! Source dimensions broadcast: a missing leading dimension, or one of
//! size 1, is read with stride 0.

pub mod chain;
pub mod special;
pub mod table;

use crate::callable::Callable;
use crate::graph::{dim_meta, CallNode, NodeCursor, ResolveContext};
use crate::kwds::Kwds;
use crate::signature::Signature;
use crate::{CallableError, CallableResult};
use chain::ChainNode;
use dynk_eval::ErrorMode;
use dynk_kernel::strided::StridedAssign;
use dynk_kernel::{make_pod_copy, KernelBuffer, KernelRequest};
use dynk_types::{is_lossless_assignment, ArrMeta, Shape, Type};
use smallvec::SmallVec;
use std::slice;
use tracing::debug;

pub use table::assign_table;

/// Keyword selecting the error mode of an assignment.
pub const ERROR_MODE: &str = "error_mode";

/// Assign a source of any type to a destination of any type.
#[derive(Debug, Clone)]
pub struct Assign {
    signature: Signature,
}

impl Assign {
    /// Create the callable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signature: Signature::new(&["Any"], "Any", &[ERROR_MODE]),
        }
    }
}

impl Default for Assign {
    fn default() -> Self {
        Self::new()
    }
}

impl Callable for Assign {
    fn name(&self) -> &str {
        "assign"
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
        let src = unary_operand(self.name(), src_tp)?;
        let dst = dst_tp.cloned().unwrap_or_else(|| src.canonical_type());
        let errmode = kwds
            .error_mode(self.name(), ERROR_MODE)?
            .unwrap_or(cx.ectx().errmode);
        debug!(%dst, %src, %errmode, "resolving assignment");

        resolve_elementwise(cx, &dst, src, &mut |cx, dst, src| {
            resolve_scalar(cx, dst, src, errmode)
        })?;
        Ok(dst)
    }
}

/// The only source type of a unary callable.
pub(crate) fn unary_operand<'t>(callable: &str, src_tp: &'t [Type]) -> CallableResult<&'t Type> {
    match src_tp {
        [only] => Ok(only),
        _ => Err(CallableError::Arity {
            callable: callable.to_string(),
            expected: 1,
            found: src_tp.len(),
        }),
    }
}

/// Push one [`DimNode`] per destination dimension, then resolve the
/// element types with `leaf`.
///
/// # Errors
///
/// Fails if the source cannot broadcast to the destination, or `leaf`
/// fails.
pub(crate) fn resolve_elementwise<F>(
    cx: &mut ResolveContext<'_>,
    dst: &Type,
    src: &Type,
    leaf: &mut F,
) -> CallableResult<()>
where
    F: FnMut(&mut ResolveContext<'_>, &Type, &Type) -> CallableResult<()>,
{
    resolve_elementwise_n(cx, dst, slice::from_ref(src), &mut |cx, dst, src| {
        leaf(cx, dst, unary_operand("dim", src)?)
    })
}

/// [`resolve_elementwise`] over any number of sources.
///
/// Every source broadcasts against the destination independently. At the
/// scalar level `leaf` receives the element type of each source.
///
/// # Errors
///
/// Fails if a source cannot broadcast to the destination, or `leaf` fails.
pub(crate) fn resolve_elementwise_n<F>(
    cx: &mut ResolveContext<'_>,
    dst: &Type,
    srcs: &[Type],
    leaf: &mut F,
) -> CallableResult<()>
where
    F: FnMut(&mut ResolveContext<'_>, &Type, &[Type]) -> CallableResult<()>,
{
    let broadcast = |src: &Type| CallableError::Broadcast {
        dst: dst.to_string(),
        src: src.to_string(),
    };
    let Some(dim) = dst.as_fixed_dim() else {
        if let Some(src) = srcs.iter().find(|src| src.ndim() > 0) {
            return Err(broadcast(src));
        }
        return leaf(cx, dst, srcs);
    };

    let mut consumes_src = SmallVec::with_capacity(srcs.len());
    let mut elements = Vec::with_capacity(srcs.len());
    for src in srcs {
        if src.ndim() < dst.ndim() {
            consumes_src.push(false);
            elements.push(src.clone());
            continue;
        }
        let src_dim = match src.as_fixed_dim() {
            Some(src_dim) if src.ndim() == dst.ndim() => src_dim,
            _ => return Err(broadcast(src)),
        };
        if src_dim.size != dim.size && src_dim.size != 1 {
            return Err(broadcast(src));
        }
        consumes_src.push(true);
        elements.push(src_dim.element.clone());
    }
    cx.push(DimNode {
        dst_tp: dst.clone(),
        size: dim.size,
        consumes_src,
    });
    resolve_elementwise_n(cx, &dim.element, &elements, leaf)
}

/// The type that elements of type `dtype` take when `srcs` broadcast
/// against each other.
///
/// Shapes align at their trailing dimension; a missing or size-1 dimension
/// stretches to match.
///
/// # Errors
///
/// Fails with [`CallableError::Broadcast`] on mismatched sizes.
pub(crate) fn broadcast_type(srcs: &[Type], dtype: Type) -> CallableResult<Type> {
    let mut shape = Shape::new();
    for src in srcs {
        let src_shape = src.shape();
        if src_shape.len() > shape.len() {
            let missing = src_shape.len() - shape.len();
            shape.insert_many(0, std::iter::repeat(1).take(missing));
        }
        let offset = shape.len() - src_shape.len();
        for (i, &src_size) in src_shape.iter().enumerate() {
            let size = shape[offset + i];
            if size == 1 {
                shape[offset + i] = src_size;
            } else if src_size != 1 && src_size != size {
                return Err(CallableError::Broadcast {
                    dst: Type::fixed_dims(&shape, dtype).to_string(),
                    src: src.to_string(),
                });
            }
        }
    }
    Ok(Type::fixed_dims(&shape, dtype))
}

fn resolve_scalar(
    cx: &mut ResolveContext<'_>,
    dst: &Type,
    src: &Type,
    errmode: ErrorMode,
) -> CallableResult<()> {
    let chunk = cx.ectx().buffer_chunk_size.max(1);
    if let Some(expr) = src.as_expr() {
        cx.push(ChainNode::operand_to_value(expr, errmode, chunk));
        return resolve_scalar(cx, dst, &expr.value, errmode);
    }
    if let Some(expr) = dst.as_expr() {
        cx.push(ChainNode::value_to_operand(expr, errmode, chunk));
        return resolve_scalar(cx, &expr.value, src, errmode);
    }

    if dst == src && dst.is_pod() {
        cx.push(PodCopyNode {
            size: dst.data_size(),
            align: dst.data_alignment(),
        });
        return Ok(());
    }

    let entry = assign_table()
        .lookup(&[dst.type_id(), src.type_id()])
        .map_err(|_| CallableError::NoViableAssignment {
            dst: dst.to_string(),
            src: src.to_string(),
        })?;
    let errmode = if is_lossless_assignment(dst, src) {
        ErrorMode::NoCheck
    } else {
        errmode
    };
    let kwds = Kwds::new().with(ERROR_MODE, errmode);
    cx.resolve_child(entry.as_ref(), Some(dst), slice::from_ref(src), &kwds)?;
    Ok(())
}

/// One dimension level of an elementwise operation.
#[derive(Debug)]
pub struct DimNode {
    dst_tp: Type,
    size: usize,
    consumes_src: SmallVec<[bool; 4]>,
}

impl CallNode for DimNode {
    fn name(&self) -> &str {
        "dim"
    }

    fn instantiate(
        &self,
        cursor: &mut NodeCursor<'_>,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        dst_meta: &ArrMeta,
        src_meta: &[&ArrMeta],
    ) -> CallableResult<()> {
        let (size, dst_stride, dst_element) = dim_meta(dst_meta, &self.dst_tp)?;
        if size != self.size {
            return Err(dynk_types::TypeError::MetadataMismatch(self.dst_tp.to_string()).into());
        }
        if src_meta.len() != self.consumes_src.len() {
            return Err(CallableError::Arity {
                callable: self.name().to_string(),
                expected: self.consumes_src.len(),
                found: src_meta.len(),
            });
        }

        let mut src_strides = SmallVec::<[isize; 4]>::new();
        let mut src_elements = SmallVec::<[&ArrMeta; 4]>::new();
        for (&meta, &consumes) in src_meta.iter().zip(&self.consumes_src) {
            if consumes {
                let (src_size, stride, element) = dim_meta(meta, &self.dst_tp)?;
                src_strides.push(if src_size == 1 { 0 } else { stride });
                src_elements.push(element);
            } else {
                src_strides.push(0);
                src_elements.push(meta);
            }
        }

        let root = ckb.append(request, StridedAssign::with_sources(size, dst_stride, &src_strides))?;
        let child = cursor.instantiate_next(ckb, KernelRequest::Strided, dst_element, &src_elements)?;
        let link = ckb.child_offset(root, child)?;
        ckb.frame_at_mut::<StridedAssign>(root)?.link(link);
        Ok(())
    }
}

/// Copy of a plain-old-data element.
#[derive(Debug)]
pub struct PodCopyNode {
    size: usize,
    align: usize,
}

impl PodCopyNode {
    /// Copy `size` bytes aligned to `align`.
    #[must_use]
    pub fn new(size: usize, align: usize) -> Self {
        Self { size, align }
    }
}

impl CallNode for PodCopyNode {
    fn name(&self) -> &str {
        "pod_copy"
    }

    fn instantiate(
        &self,
        _cursor: &mut NodeCursor<'_>,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        _dst_meta: &ArrMeta,
        _src_meta: &[&ArrMeta],
    ) -> CallableResult<()> {
        make_pod_copy(ckb, request, self.size, self.align)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynk_eval::EvalContext;

    fn resolve(dst: &Type, src: &Type) -> CallableResult<Vec<String>> {
        let ectx = EvalContext::default();
        let mut cx = ResolveContext::new(&ectx);
        cx.resolve_child(&Assign::new(), Some(dst), slice::from_ref(src), &Kwds::new())?;
        Ok(cx.into_graph().names().into_iter().map(String::from).collect())
    }

    #[test]
    fn test_equal_pod_types_copy() {
        let tp = Type::fixed_dims(&[2, 3], Type::of::<f64>());
        assert_eq!(resolve(&tp, &tp).unwrap(), vec!["dim", "dim", "pod_copy"]);
    }

    #[test]
    fn test_conversion_dispatches() {
        let names = resolve(&Type::of::<f64>(), &Type::of::<i32>()).unwrap();
        assert_eq!(names, vec!["convert"]);
    }

    #[test]
    fn test_scalar_broadcasts() {
        let names = resolve(&Type::fixed_dim(4, Type::of::<i64>()), &Type::of::<i64>()).unwrap();
        assert_eq!(names, vec!["dim", "pod_copy"]);
    }

    #[test]
    fn test_broadcast_errors() {
        let dst = Type::fixed_dim(4, Type::of::<i64>());
        let src = Type::fixed_dim(3, Type::of::<i64>());
        assert_eq!(
            resolve(&dst, &src),
            Err(CallableError::Broadcast {
                dst: "4 * int64".to_string(),
                src: "3 * int64".to_string(),
            })
        );
        assert!(matches!(
            resolve(&Type::of::<i64>(), &dst),
            Err(CallableError::Broadcast { .. })
        ));
    }

    #[test]
    fn test_broadcast_type() {
        let f64_tp = Type::of::<f64>();
        let row = Type::fixed_dim(3, Type::of::<i32>());
        let column = Type::fixed_dims(&[2, 1], Type::of::<i8>());
        assert_eq!(
            broadcast_type(&[row.clone(), column.clone()], f64_tp.clone()).unwrap(),
            Type::fixed_dims(&[2, 3], f64_tp.clone())
        );
        assert_eq!(
            broadcast_type(&[Type::of::<i32>(), row.clone()], f64_tp.clone()).unwrap(),
            Type::fixed_dim(3, f64_tp.clone())
        );
        assert_eq!(broadcast_type(&[], f64_tp.clone()).unwrap(), f64_tp);
        let err = broadcast_type(&[row, Type::fixed_dim(4, Type::of::<i32>())], Type::of::<bool>())
            .unwrap_err();
        assert_eq!(
            err,
            CallableError::Broadcast {
                dst: "3 * bool".to_string(),
                src: "4 * int32".to_string(),
            }
        );
    }

    #[test]
    fn test_no_viable_assignment() {
        let err = resolve(&Type::of::<i32>(), &Type::string()).unwrap_err();
        assert_eq!(err.to_string(), "no viable assignment from string to int32");
    }

    #[test]
    fn test_expression_bridge_nodes() {
        let tp = Type::byteswap(Type::of::<u32>()).unwrap();
        assert_eq!(
            resolve(&Type::of::<u64>(), &tp).unwrap(),
            vec!["operand_to_value", "convert"]
        );
        assert_eq!(
            resolve(&tp, &Type::of::<u32>()).unwrap(),
            vec!["value_to_operand", "pod_copy"]
        );
    }
}
