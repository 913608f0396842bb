//! Copy into the canonical form of the source.

use crate::assign::{unary_operand, Assign, ERROR_MODE};
use crate::callable::Callable;
use crate::graph::ResolveContext;
use crate::kwds::Kwds;
use crate::signature::Signature;
use crate::CallableResult;
use dynk_types::Type;

/// Assignment whose default destination is the source's canonical type.
///
/// Expression types are evaluated on the way, so copying a
/// `byteswap[int32]` array yields plain `int32` data.
#[derive(Debug, Clone)]
pub struct CopyCallable {
    signature: Signature,
    assign: Assign,
}

impl CopyCallable {
    /// Create the callable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signature: Signature::new(&["Any"], "Any", &[ERROR_MODE]),
            assign: Assign::new(),
        }
    }
}

impl Default for CopyCallable {
    fn default() -> Self {
        Self::new()
    }
}

impl Callable for CopyCallable {
    fn name(&self) -> &str {
        "copy"
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
        cx.resolve_child(&self.assign, Some(&dst), src_tp, kwds)
    }
}
