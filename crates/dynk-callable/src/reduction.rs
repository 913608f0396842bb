//! Reductions over any subset of axes.
//!
//! A reduction wraps an element-level accumulation callable (a compound
//! operator) and lifts it over the dimensions of its source. Resolve pushes
//! one [`ReductionNode`] per source dimension, outermost first, followed by
//! the innermost level's two children: the followup accumulation and the
//! init assignment that seeds the accumulator from the first element.
//!
//! Because the accumulator is seeded rather than initialized from an
//! identity, only associative operators reduce correctly and an empty
//! reduced axis is an error.

use crate::assign::{unary_operand, Assign};
use crate::callable::Callable;
use crate::graph::{dim_meta, unary_meta, CallNode, NodeCursor, ResolveContext};
use crate::kwds::Kwds;
use crate::signature::Signature;
use crate::{CallableError, CallableResult};
use dynk_kernel::reduce::{InnerBroadcast, InnerReduce, OuterBroadcast, OuterReduce};
use dynk_kernel::{KernelBuffer, KernelRequest};
use dynk_types::{ArrMeta, Type};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::slice;
use std::sync::Arc;
use tracing::debug;

/// Keyword listing the axes to reduce. Absent means every axis.
pub const AXES: &str = "axes";

/// Keyword keeping reduced axes as dimensions of size 1.
pub const KEEPDIMS: &str = "keepdims";

/// Lifts an accumulation callable over the axes of its source.
#[derive(Debug, Clone)]
pub struct Reduction {
    name: String,
    child: Arc<dyn Callable>,
    signature: Signature,
}

impl Reduction {
    /// Reduce with `child`, under the name `reduce`.
    #[must_use]
    pub fn new(child: Arc<dyn Callable>) -> Self {
        Self::named("reduce", child)
    }

    /// Reduce with `child` under a custom name.
    #[must_use]
    pub fn named(name: impl Into<String>, child: Arc<dyn Callable>) -> Self {
        Self {
            name: name.into(),
            child,
            signature: Signature::new(&["Any"], "Any", &[AXES, KEEPDIMS]),
        }
    }

    /// The element-level accumulation.
    #[must_use]
    pub fn child(&self) -> &Arc<dyn Callable> {
        &self.child
    }

    fn reduced_axes(&self, kwds: &Kwds, ndim: usize) -> CallableResult<SmallVec<[bool; 4]>> {
        let mut reduced: SmallVec<[bool; 4]> = SmallVec::from_elem(false, ndim);
        let Some(axes) = kwds.axes(&self.name, AXES)? else {
            reduced.iter_mut().for_each(|r| *r = true);
            return Ok(reduced);
        };
        let mut seen = FxHashSet::default();
        for axis in axes {
            if axis >= ndim {
                return Err(CallableError::InvalidAxis { axis, ndim });
            }
            if !seen.insert(axis) {
                return Err(CallableError::DuplicateAxis(axis));
            }
            reduced[axis] = true;
        }
        Ok(reduced)
    }
}

impl Callable for Reduction {
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
        kwds: &Kwds,
    ) -> CallableResult<Type> {
        let src = unary_operand(&self.name, src_tp)?;
        let shape = src.shape();
        let reduced = self.reduced_axes(kwds, shape.len())?;
        let keepdims = kwds.bool(&self.name, KEEPDIMS)?.unwrap_or(false);
        let dtype = src.dtype().canonical_type();

        if let Some(axis) = (0..shape.len()).find(|&axis| reduced[axis] && shape[axis] == 0) {
            return Err(CallableError::EmptyReduction { axis });
        }

        let dst_shape: Vec<usize> = shape
            .iter()
            .zip(&reduced)
            .filter_map(|(&size, &r)| match (r, keepdims) {
                (false, _) => Some(size),
                (true, true) => Some(1),
                (true, false) => None,
            })
            .collect();
        let result = Type::fixed_dims(&dst_shape, dtype.clone());
        if let Some(dst) = dst_tp {
            if *dst != result {
                return Err(CallableError::OperandMismatch {
                    callable: self.name.clone(),
                    dst: dst.to_string(),
                    src: src.to_string(),
                });
            }
        }
        debug!(reduction = %self.name, %src, dst = %result, ?reduced, keepdims, "resolving reduction");

        if shape.is_empty() {
            cx.resolve_child(&Assign::new(), Some(&result), src_tp, &Kwds::new())?;
            return Ok(result);
        }

        let mut level = src.clone();
        for (axis, &is_reduced) in reduced.iter().enumerate() {
            let Some(dim) = level.as_fixed_dim() else {
                return Err(CallableError::InvalidAxis {
                    axis,
                    ndim: shape.len(),
                });
            };
            let element = dim.element.clone();
            cx.push(ReductionNode {
                axis,
                inner: axis + 1 == shape.len(),
                reduce: is_reduced,
                keepdim: is_reduced && keepdims,
                src_tp: level.clone(),
            });
            level = element;
        }

        cx.resolve_child(self.child.as_ref(), Some(&dtype), slice::from_ref(&level), &Kwds::new())?;
        cx.resolve_child(&Assign::new(), Some(&dtype), slice::from_ref(&level), &Kwds::new())?;
        Ok(result)
    }
}

/// One source dimension of a reduction.
#[derive(Debug)]
pub struct ReductionNode {
    axis: usize,
    inner: bool,
    reduce: bool,
    keepdim: bool,
    src_tp: Type,
}

impl ReductionNode {
    fn frame_name(&self) -> &'static str {
        match (self.inner, self.reduce) {
            (true, true) => "inner_reduce",
            (true, false) => "inner_broadcast",
            (false, true) => "outer_reduce",
            (false, false) => "outer_broadcast",
        }
    }
}

impl CallNode for ReductionNode {
    fn name(&self) -> &str {
        self.frame_name()
    }

    fn instantiate(
        &self,
        cursor: &mut NodeCursor<'_>,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        dst_meta: &ArrMeta,
        src_meta: &[&ArrMeta],
    ) -> CallableResult<()> {
        let src_meta = unary_meta(self.name(), src_meta)?;
        let (size, src_stride, src_element) = dim_meta(src_meta, &self.src_tp)?;
        let (dst_stride, dst_element) = if self.reduce && !self.keepdim {
            (0, dst_meta)
        } else {
            let (_, stride, element) = dim_meta(dst_meta, &self.src_tp)?;
            (stride, element)
        };
        if self.reduce && size == 0 {
            return Err(CallableError::EmptyReduction { axis: self.axis });
        }

        if self.inner {
            let root = if self.reduce {
                ckb.append(request, InnerReduce::new(size, src_stride))?
            } else {
                ckb.append(request, InnerBroadcast::new(size, dst_stride, src_stride))?
            };
            let followup =
                cursor.instantiate_next(ckb, KernelRequest::Strided, dst_element, &[src_element])?;
            let init =
                cursor.instantiate_next(ckb, KernelRequest::Strided, dst_element, &[src_element])?;
            let (followup, init) = (ckb.child_offset(root, followup)?, ckb.child_offset(root, init)?);
            if self.reduce {
                ckb.frame_at_mut::<InnerReduce>(root)?.link(followup, init);
            } else {
                ckb.frame_at_mut::<InnerBroadcast>(root)?.link(followup, init);
            }
            return Ok(());
        }

        let root = if self.reduce {
            ckb.append(request, OuterReduce::new(size, src_stride))?
        } else {
            ckb.append(request, OuterBroadcast::new(size, dst_stride, src_stride))?
        };
        let child = cursor.instantiate_next(ckb, KernelRequest::Strided, dst_element, &[src_element])?;
        let child = ckb.child_offset(root, child)?;
        if self.reduce {
            ckb.frame_at_mut::<OuterReduce>(root)?.link(child);
        } else {
            ckb.frame_at_mut::<OuterBroadcast>(root)?.link(child);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compound::CompoundOperator;
    use dynk_eval::EvalContext;

    fn sum() -> Reduction {
        Reduction::named("sum", Arc::new(CompoundOperator::add()))
    }

    fn resolve(src: &Type, kwds: &Kwds) -> CallableResult<(Type, Vec<String>)> {
        let ectx = EvalContext::default();
        let mut cx = ResolveContext::new(&ectx);
        let dst = cx.resolve_child(&sum(), None, slice::from_ref(src), kwds)?;
        let names = cx.graph().names().into_iter().map(String::from).collect();
        Ok((dst, names))
    }

    #[test]
    fn test_reduce_all_axes() {
        let src = Type::fixed_dims(&[2, 3], Type::of::<i32>());
        let (dst, names) = resolve(&src, &Kwds::new()).unwrap();
        assert_eq!(dst, Type::of::<i32>());
        assert_eq!(
            names,
            vec!["outer_reduce", "inner_reduce", "compound_add", "pod_copy"]
        );
    }

    #[test]
    fn test_keepdims_and_axes() {
        let src = Type::fixed_dims(&[2, 3], Type::of::<f64>());
        let kwds = Kwds::new().with(AXES, vec![1usize]).with(KEEPDIMS, true);
        let (dst, names) = resolve(&src, &kwds).unwrap();
        assert_eq!(dst, Type::fixed_dims(&[2, 1], Type::of::<f64>()));
        assert_eq!(names[..2], ["outer_broadcast", "inner_reduce"]);
    }

    #[test]
    fn test_axis_errors() {
        let src = Type::fixed_dims(&[2, 3], Type::of::<i32>());
        assert_eq!(
            resolve(&src, &Kwds::new().with(AXES, vec![2usize])).unwrap_err(),
            CallableError::InvalidAxis { axis: 2, ndim: 2 }
        );
        assert_eq!(
            resolve(&src, &Kwds::new().with(AXES, vec![0usize, 0])).unwrap_err(),
            CallableError::DuplicateAxis(0)
        );
        let empty = Type::fixed_dims(&[2, 0], Type::of::<i32>());
        assert_eq!(
            resolve(&empty, &Kwds::new().with(AXES, 1i64)).unwrap_err(),
            CallableError::EmptyReduction { axis: 1 }
        );
        // Only the reduced axis may not be empty.
        assert!(resolve(&empty, &Kwds::new().with(AXES, 0i64)).is_ok());
    }

    #[test]
    fn test_scalar_source_copies() {
        let (dst, names) = resolve(&Type::of::<u8>(), &Kwds::new()).unwrap();
        assert_eq!(dst, Type::of::<u8>());
        assert_eq!(names, vec!["pod_copy"]);
    }
}
