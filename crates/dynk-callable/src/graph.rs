//! Call graphs and the resolve/instantiate hand-off.
//!
//! Resolve produces an ordered list of nodes; instantiate consumes it
//! front to back through a [`NodeCursor`]. A node that has children (a
//! dimension level, a reduction axis, a buffered chain) is pushed before
//! its children are resolved, so the order of nodes matches the order in
//! which their frames are appended and every subtree's root comes first.

use crate::callable::Callable;
use crate::kwds::Kwds;
use crate::{CallableError, CallableResult};
use dynk_eval::EvalContext;
use dynk_kernel::{FrameOffset, KernelBuffer, KernelRequest};
use dynk_types::{ArrMeta, Type, TypeError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Maximum nesting of `resolve_child` calls.
pub const MAX_RESOLVE_DEPTH: usize = 64;

/// One resolved decision, waiting to be instantiated.
pub trait CallNode: Send + Sync + fmt::Debug {
    /// Name shown in graph listings.
    fn name(&self) -> &str;

    /// Append this node's frame subtree, root first.
    ///
    /// Children are instantiated through `cursor`, which hands out the
    /// nodes pushed after this one.
    ///
    /// # Errors
    ///
    /// Fails if the metadata does not fit what was resolved, or a frame
    /// cannot be appended.
    fn instantiate(
        &self,
        cursor: &mut NodeCursor<'_>,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        dst_meta: &ArrMeta,
        src_meta: &[&ArrMeta],
    ) -> CallableResult<()>;
}

/// The ordered output of resolve.
///
/// Nodes are shared, so cloning a graph is cheap.
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    nodes: Vec<Arc<dyn CallNode>>,
}

impl CallGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node.
    pub fn push(&mut self, node: Arc<dyn CallNode>) {
        self.nodes.push(node);
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.name()).collect()
    }

    /// Start consuming the graph from its first node.
    #[must_use]
    pub fn cursor(&self) -> NodeCursor<'_> {
        NodeCursor {
            graph: self,
            next: 0,
        }
    }
}

/// Position in a [`CallGraph`] during instantiate.
#[derive(Debug)]
pub struct NodeCursor<'g> {
    graph: &'g CallGraph,
    next: usize,
}

impl NodeCursor<'_> {
    /// Instantiate the next node and return the offset of its subtree root.
    ///
    /// # Errors
    ///
    /// Fails if the graph is exhausted, the node fails, or the node
    /// appended no frames.
    pub fn instantiate_next(
        &mut self,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        dst_meta: &ArrMeta,
        src_meta: &[&ArrMeta],
    ) -> CallableResult<FrameOffset> {
        let graph = self.graph;
        let node = graph.nodes.get(self.next).ok_or(CallableError::GraphExhausted)?;
        trace!(node = node.name(), index = self.next, %request, "instantiating call node");
        self.next += 1;

        let root = ckb.len();
        let before = ckb.frame_count();
        node.instantiate(self, ckb, request, dst_meta, src_meta)?;
        if ckb.frame_count() == before {
            return Err(CallableError::EmptySubtree(node.name().to_string()));
        }
        Ok(root)
    }

    /// Nodes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.graph.len() - self.next
    }

    /// Returns true once every node was consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Split dimension metadata into size, stride and element metadata.
pub(crate) fn dim_meta<'m>(meta: &'m ArrMeta, tp: &Type) -> CallableResult<(usize, isize, &'m ArrMeta)> {
    match meta {
        ArrMeta::Dim {
            size,
            stride,
            element,
        } => Ok((*size, *stride, element)),
        _ => Err(TypeError::MetadataMismatch(tp.to_string()).into()),
    }
}

/// The metadata of a node's only source operand.
pub(crate) fn unary_meta<'m>(node: &str, src_meta: &[&'m ArrMeta]) -> CallableResult<&'m ArrMeta> {
    match src_meta {
        [only] => Ok(*only),
        _ => Err(CallableError::Arity {
            callable: node.to_string(),
            expected: 1,
            found: src_meta.len(),
        }),
    }
}

/// State threaded through one resolve.
#[derive(Debug)]
pub struct ResolveContext<'a> {
    graph: CallGraph,
    ectx: &'a EvalContext,
    depth: usize,
}

impl<'a> ResolveContext<'a> {
    /// Start resolving under `ectx`.
    #[must_use]
    pub fn new(ectx: &'a EvalContext) -> Self {
        Self {
            graph: CallGraph::new(),
            ectx,
            depth: 0,
        }
    }

    /// The evaluation context.
    #[inline]
    #[must_use]
    pub fn ectx(&self) -> &'a EvalContext {
        self.ectx
    }

    /// Current nesting of `resolve_child` calls.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Push a node onto the graph.
    pub fn push(&mut self, node: impl CallNode + 'static) {
        self.graph.push(Arc::new(node));
    }

    /// Nodes pushed so far.
    #[must_use]
    pub fn graph(&self) -> &CallGraph {
        &self.graph
    }

    /// Check `callable`'s signature and resolve it.
    ///
    /// # Errors
    ///
    /// Fails on a signature mismatch, when nesting exceeds
    /// [`MAX_RESOLVE_DEPTH`], or when the callable fails.
    pub fn resolve_child(
        &mut self,
        callable: &dyn Callable,
        dst_tp: Option<&Type>,
        src_tp: &[Type],
        kwds: &Kwds,
    ) -> CallableResult<Type> {
        callable.signature().check(callable.name(), src_tp.len(), kwds)?;
        if self.depth >= MAX_RESOLVE_DEPTH {
            return Err(CallableError::RecursionLimit {
                callable: callable.name().to_string(),
                limit: MAX_RESOLVE_DEPTH,
            });
        }

        self.depth += 1;
        let result = callable.resolve(self, dst_tp, src_tp, kwds);
        self.depth -= 1;

        match &result {
            Ok(tp) => trace!(callable = callable.name(), dst = %tp, depth = self.depth, "resolved"),
            Err(err) => debug!(callable = callable.name(), %err, "resolve failed"),
        }
        result
    }

    /// Finish resolving and take the graph.
    #[must_use]
    pub fn into_graph(self) -> CallGraph {
        self.graph
    }
}
