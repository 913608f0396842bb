//! Resolve, instantiate and run callables on arrays.
//!
//! [`plan`] runs the resolve phase and returns a [`KernelPlan`]. A plan can
//! be instantiated any number of times against concrete metadata, each time
//! producing a [`CompiledKernel`] that owns its frames. A compiled kernel is
//! immutable and may be executed from several threads at once, as long as
//! each call writes a distinct destination.
//!
//! [`CallableExt`] wraps the three steps for the common case.

use crate::callable::Callable;
use crate::graph::{CallGraph, ResolveContext};
use crate::kwds::Kwds;
use crate::{CallableError, CallableResult};
use dynk_eval::EvalContext;
use dynk_kernel::{KernelBuffer, KernelRequest};
use dynk_types::{ArrMeta, Array, Type};
use smallvec::SmallVec;
use tracing::debug;

/// Resolve `callable` for the given operand types.
///
/// # Errors
///
/// Fails if `ectx` is invalid or no kernel can be built for the operands.
pub fn plan(
    callable: &dyn Callable,
    ectx: &EvalContext,
    dst_tp: Option<&Type>,
    src_tp: &[Type],
    kwds: &Kwds,
) -> CallableResult<KernelPlan> {
    ectx.validate()?;
    let mut cx = ResolveContext::new(ectx);
    let dst_tp = cx.resolve_child(callable, dst_tp, src_tp, kwds)?;
    let graph = cx.into_graph();
    debug!(callable = callable.name(), %dst_tp, nodes = graph.len(), "planned kernel");
    Ok(KernelPlan {
        graph,
        dst_tp,
        src_tp: src_tp.to_vec(),
        trace_frames: ectx.trace_frames,
    })
}

/// The resolved form of a call, ready to instantiate.
#[derive(Debug, Clone)]
pub struct KernelPlan {
    graph: CallGraph,
    dst_tp: Type,
    src_tp: Vec<Type>,
    trace_frames: bool,
}

impl KernelPlan {
    /// The resolved call graph.
    #[must_use]
    pub fn graph(&self) -> &CallGraph {
        &self.graph
    }

    /// Destination type.
    #[must_use]
    pub fn dst_tp(&self) -> &Type {
        &self.dst_tp
    }

    /// Source types.
    #[must_use]
    pub fn src_tp(&self) -> &[Type] {
        &self.src_tp
    }

    /// Build the kernel for concrete metadata.
    ///
    /// If any node fails, the frames appended so far are destroyed before
    /// the error is returned.
    ///
    /// # Errors
    ///
    /// Fails if the metadata does not match the planned types, a node
    /// fails, or nodes are left over.
    pub fn instantiate(
        &self,
        request: KernelRequest,
        dst_meta: &ArrMeta,
        src_meta: &[&ArrMeta],
    ) -> CallableResult<CompiledKernel> {
        let mut ckb = KernelBuffer::new();
        if let Err(err) = self.build(&mut ckb, request, dst_meta, src_meta) {
            debug!(%err, frames = ckb.frame_count(), "instantiate failed, destroying partial kernel");
            ckb.destroy();
            return Err(err);
        }
        if self.trace_frames {
            debug!(dump = %ckb.dump(), "instantiated kernel");
        }
        Ok(CompiledKernel {
            ckb,
            request,
            dst_tp: self.dst_tp.clone(),
            src_tp: self.src_tp.clone(),
            dst_meta: dst_meta.clone(),
            src_meta: src_meta.iter().map(|&meta| meta.clone()).collect(),
        })
    }

    fn build(
        &self,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        dst_meta: &ArrMeta,
        src_meta: &[&ArrMeta],
    ) -> CallableResult<()> {
        if src_meta.len() != self.src_tp.len() {
            return Err(CallableError::Arity {
                callable: "instantiate".to_string(),
                expected: self.src_tp.len(),
                found: src_meta.len(),
            });
        }
        if !self.dst_tp.metadata_matches(dst_meta) {
            return Err(dynk_types::TypeError::MetadataMismatch(self.dst_tp.to_string()).into());
        }
        for (tp, meta) in self.src_tp.iter().zip(src_meta) {
            if !tp.metadata_matches(meta) {
                return Err(dynk_types::TypeError::MetadataMismatch(tp.to_string()).into());
            }
        }

        let mut cursor = self.graph.cursor();
        cursor.instantiate_next(ckb, request, dst_meta, src_meta)?;
        if !cursor.is_exhausted() {
            return Err(CallableError::UnconsumedNodes {
                remaining: cursor.remaining(),
            });
        }
        Ok(())
    }
}

/// A built kernel together with the layout it was built for.
#[derive(Debug)]
pub struct CompiledKernel {
    ckb: KernelBuffer,
    request: KernelRequest,
    dst_tp: Type,
    src_tp: Vec<Type>,
    dst_meta: ArrMeta,
    src_meta: Vec<ArrMeta>,
}

impl CompiledKernel {
    /// The frames of this kernel.
    #[must_use]
    pub fn buffer(&self) -> &KernelBuffer {
        &self.ckb
    }

    /// Invocation convention of the root frame.
    #[must_use]
    pub fn request(&self) -> KernelRequest {
        self.request
    }

    /// Run the kernel on arrays laid out like the instantiation metadata.
    ///
    /// # Errors
    ///
    /// Fails if an operand has another type or layout, the destination is
    /// read-only, or a frame reports an error. Elements written before the
    /// error keep their new values.
    pub fn execute(&self, dst: &Array, src: &[&Array]) -> CallableResult<()> {
        self.check_operand("destination", &self.dst_tp, &self.dst_meta, dst)?;
        if src.len() != self.src_tp.len() {
            return Err(CallableError::Arity {
                callable: "execute".to_string(),
                expected: self.src_tp.len(),
                found: src.len(),
            });
        }
        for (i, ((tp, meta), array)) in self.src_tp.iter().zip(&self.src_meta).zip(src).enumerate() {
            self.check_operand(&format!("source {i}"), tp, meta, array)?;
        }

        let dst_ptr = dst.data_ptr_mut()?;
        let src_ptrs: SmallVec<[*const u8; 4]> = src.iter().map(|array| array.data_ptr()).collect();
        let zeros: SmallVec<[isize; 4]> = SmallVec::from_elem(0, src_ptrs.len());
        let root = self.ckb.root()?;
        // Safety: the operands have the types and layouts the frames were
        // built for, so every pointer they derive stays inside the arrays
        unsafe {
            match self.request {
                KernelRequest::Single => root.single(dst_ptr, &src_ptrs)?,
                KernelRequest::Strided => root.strided(dst_ptr, 0, &src_ptrs, &zeros, 1)?,
            }
        }
        Ok(())
    }

    fn check_operand(&self, operand: &str, tp: &Type, meta: &ArrMeta, array: &Array) -> CallableResult<()> {
        if array.tp() != tp {
            return Err(CallableError::ArgumentMismatch {
                operand: operand.to_string(),
                expected: tp.to_string(),
                found: array.tp().to_string(),
            });
        }
        if !array.arrmeta().layout_eq(meta) {
            return Err(CallableError::ArgumentMismatch {
                operand: operand.to_string(),
                expected: format!("{tp} with the instantiated layout"),
                found: "a different layout".to_string(),
            });
        }
        Ok(())
    }
}

/// Convenience calls on any callable.
pub trait CallableExt: Callable {
    /// Call with the default evaluation context, allocating the result.
    ///
    /// # Errors
    ///
    /// Fails if resolve, instantiate or execution fails.
    fn call(&self, src: &[&Array], kwds: &Kwds) -> CallableResult<Array> {
        self.call_with(&EvalContext::default(), src, kwds)
    }

    /// Call under `ectx`, allocating the result.
    ///
    /// # Errors
    ///
    /// Fails if resolve, instantiate or execution fails.
    fn call_with(&self, ectx: &EvalContext, src: &[&Array], kwds: &Kwds) -> CallableResult<Array> {
        let src_tp: Vec<Type> = src.iter().map(|array| array.tp().clone()).collect();
        let plan = plan(self.as_dyn(), ectx, None, &src_tp, kwds)?;
        let dst = Array::empty(plan.dst_tp().clone())?;
        run(&plan, &dst, src)?;
        Ok(dst)
    }

    /// Call with an existing destination.
    ///
    /// # Errors
    ///
    /// Fails if resolve, instantiate or execution fails.
    fn call_into(&self, dst: &Array, src: &[&Array], kwds: &Kwds) -> CallableResult<()> {
        let src_tp: Vec<Type> = src.iter().map(|array| array.tp().clone()).collect();
        let plan = plan(self.as_dyn(), &EvalContext::default(), Some(dst.tp()), &src_tp, kwds)?;
        run(&plan, dst, src)
    }

    /// Upcast to a trait object.
    fn as_dyn(&self) -> &dyn Callable;
}

impl<C: Callable> CallableExt for C {
    fn as_dyn(&self) -> &dyn Callable {
        self
    }
}

impl CallableExt for dyn Callable {
    fn as_dyn(&self) -> &dyn Callable {
        self
    }
}

fn run(plan: &KernelPlan, dst: &Array, src: &[&Array]) -> CallableResult<()> {
    let src_meta: SmallVec<[&ArrMeta; 4]> = src.iter().map(|array| array.arrmeta()).collect();
    plan.instantiate(KernelRequest::Single, dst.arrmeta(), &src_meta)?
        .execute(dst, src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Assign;

    #[test]
    fn test_plan_validates_context() {
        let ectx = EvalContext::default().with_buffer_chunk_size(0);
        let err = plan(&Assign::new(), &ectx, None, &[Type::of::<i8>()], &Kwds::new()).unwrap_err();
        assert!(matches!(err, CallableError::Eval(_)));
    }

    #[test]
    fn test_instantiate_checks_metadata() {
        let plan = plan(
            &Assign::new(),
            &EvalContext::default(),
            None,
            &[Type::fixed_dim(3, Type::of::<i8>())],
            &Kwds::new(),
        )
        .unwrap();
        let wrong = Type::fixed_dim(4, Type::of::<i8>()).metadata_default_construct();
        let right = plan.src_tp()[0].metadata_default_construct();
        assert!(matches!(
            plan.instantiate(KernelRequest::Single, &wrong, &[&right]),
            Err(CallableError::Type(_))
        ));
        assert!(plan.instantiate(KernelRequest::Single, &right, &[&right]).is_ok());
    }

    #[test]
    fn test_execute_rejects_other_types() {
        let src = Array::from_values(&[1i32, 2], &[2]).unwrap();
        let dst = Assign::new().call(&[&src], &Kwds::new()).unwrap();
        let plan = plan(&Assign::new(), &EvalContext::default(), None, &[src.tp().clone()], &Kwds::new())
            .unwrap();
        let kernel = plan
            .instantiate(KernelRequest::Single, dst.arrmeta(), &[src.arrmeta()])
            .unwrap();
        let other = Array::from_values(&[1i64, 2], &[2]).unwrap();
        assert!(matches!(
            kernel.execute(&dst, &[&other]),
            Err(CallableError::ArgumentMismatch { .. })
        ));
        kernel.execute(&dst, &[&src]).unwrap();
        assert_eq!(dst.to_vec::<i32>().unwrap(), vec![1, 2]);
    }
}
