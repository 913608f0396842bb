//! Kernel buffers and kernel frames for the dynk array runtime.
//!
//! A kernel is a tree of small executable frames written into one growable
//! byte region, the [`KernelBuffer`]. Frames refer to their children by
//! offset relative to themselves, never by address, so the buffer can be
//! relocated while it is still being built.
//!
//! # Invocation conventions
//!
//! Each frame is appended for one [`KernelRequest`]:
//!
//! - **Single** - `(dst, src...)`, one element per call
//! - **Strided** - `(dst, dst_stride, src..., src_strides..., count)`
//!
//! Reduction frames additionally expose first/followup entry points used by
//! their parents to seed accumulators from the first element.
//!
//! # Frames provided here
//!
//! - POD copies specialized by size and alignment ([`copy`])
//! - Numeric conversions honoring an [`ErrorMode`] ([`convert`])
//! - Accumulating binary operators ([`compound`])
//! - One dimension of strided assignment ([`strided`])
//! - The four reduction frame shapes ([`reduce`])
//! - A single-to-strided adapter ([`adapter`])

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod adapter;
pub mod buffer;
pub mod compound;
pub mod convert;
pub mod copy;
pub mod frame;
pub mod reduce;
pub mod strided;

pub use adapter::{append_single, SingleToStrided};
pub use buffer::{BufferStats, FrameOffset, KernelBuffer, FRAME_ALIGN};
pub use convert::{ConversionError, ConversionKind, Scalar, Value};
pub use copy::make_pod_copy;
pub use dynk_eval::ErrorMode;
pub use frame::{ChildOffset, FrameRef, Kernel, ReductionKernel, SrcPtrs};

use dynk_memblock::AllocError;
use std::fmt;

/// How a frame expects to be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelRequest {
    /// One element per call.
    Single,
    /// A strided run of `count` elements per call.
    Strided,
}

impl KernelRequest {
    /// Get the name of this request.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Strided => "strided",
        }
    }
}

impl fmt::Display for KernelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Result type for kernel construction and execution.
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors raised while building or running kernel frames.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    /// The kernel buffer could not grow.
    #[error("out of memory: kernel buffer could not grow to {requested} bytes")]
    OutOfMemory {
        /// Capacity that was requested.
        requested: usize,
    },
    /// A frame type needs more alignment than the buffer provides.
    #[error("frame `{frame}` requires alignment {align}, beyond what kernel buffers provide")]
    FrameAlignment {
        /// Frame name.
        frame: &'static str,
        /// Alignment of the frame type.
        align: usize,
    },
    /// The buffer holds no frames.
    #[error("kernel buffer holds no frames")]
    EmptyBuffer,
    /// No frame starts at the given offset.
    #[error("no kernel frame at offset {offset}")]
    InvalidOffset {
        /// Offending offset.
        offset: FrameOffset,
    },
    /// A child link does not point forward to another frame.
    #[error("frame at {child} cannot be a child of frame at {parent}")]
    InvalidChild {
        /// Parent offset.
        parent: FrameOffset,
        /// Child offset.
        child: FrameOffset,
    },
    /// A frame was read back as the wrong concrete type.
    #[error("frame at offset {offset} is `{found}`, not `{expected}`")]
    FrameTypeMismatch {
        /// Offset of the frame.
        offset: FrameOffset,
        /// Requested frame name.
        expected: &'static str,
        /// Actual frame name.
        found: &'static str,
    },
    /// A frame was invoked through a convention it was not built for.
    #[error("frame `{frame}` was instantiated as {instantiated} but invoked as {invoked}")]
    RequestMismatch {
        /// Frame name.
        frame: &'static str,
        /// Convention recorded at instantiation.
        instantiated: KernelRequest,
        /// Convention used by the caller.
        invoked: KernelRequest,
    },
    /// A reduction entry point was used on a non-reduction frame.
    #[error("frame `{frame}` is not a reduction kernel")]
    NotReduction {
        /// Frame name.
        frame: &'static str,
    },
    /// A frame was invoked before its children were linked.
    #[error("frame `{frame}` has an unlinked child")]
    UnlinkedChild {
        /// Frame name.
        frame: &'static str,
    },
    /// A frame received the wrong number of source operands.
    #[error("frame `{frame}` expects {expected} source operand(s), got {found}")]
    Arity {
        /// Frame name.
        frame: &'static str,
        /// Expected source count.
        expected: usize,
        /// Supplied source count.
        found: usize,
    },
    /// A value could not be converted under the active error mode.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    /// A frame that allocates element data was given a block it cannot
    /// allocate from.
    #[error("frame `{frame}` needs a pod memory block for element data")]
    NotPodBlock {
        /// Frame name.
        frame: &'static str,
    },
    /// A reduction ran over an empty dimension.
    #[error("cannot reduce an empty dimension without an identity value")]
    EmptyReduction,
    /// Allocating element data from a memory block failed.
    #[error(transparent)]
    Alloc(#[from] AllocError),
}

/// Extract the single source pointer of a unary frame.
///
/// # Errors
///
/// Returns [`KernelError::Arity`] unless exactly one source is given.
#[inline]
pub fn unary_src<T: Copy>(frame: &'static str, src: &[T]) -> KernelResult<T> {
    match src {
        [only] => Ok(*only),
        _ => Err(KernelError::Arity {
            frame,
            expected: 1,
            found: src.len(),
        }),
    }
}
