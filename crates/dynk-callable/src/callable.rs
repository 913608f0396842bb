//! The callable trait.

use crate::graph::ResolveContext;
use crate::kwds::Kwds;
use crate::signature::Signature;
use crate::CallableResult;
use dynk_types::Type;
use std::fmt;

/// A unit of computation over dynamically typed arrays.
///
/// A callable only resolves. Everything it decides, down to the strides it
/// will read at instantiate time, goes into the [`CallNode`]s it pushes
/// onto the context's graph.
///
/// [`CallNode`]: crate::graph::CallNode
pub trait Callable: Send + Sync + fmt::Debug {
    /// Registered name.
    fn name(&self) -> &str;

    /// Positional parameters and accepted keywords.
    fn signature(&self) -> &Signature;

    /// Infer the destination type and push this call's nodes.
    ///
    /// `dst_tp` is the requested destination type, or `None` to let the
    /// callable choose. The returned type is the one the destination must
    /// have when the kernel runs.
    ///
    /// Callers go through [`ResolveContext::resolve_child`], which checks
    /// the signature first.
    ///
    /// # Errors
    ///
    /// Fails if the operand types are not supported.
    fn resolve(
        &self,
        cx: &mut ResolveContext<'_>,
        dst_tp: Option<&Type>,
        src_tp: &[Type],
        kwds: &Kwds,
    ) -> CallableResult<Type>;
}
