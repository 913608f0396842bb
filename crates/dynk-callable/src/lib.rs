//! Callables and kernel generation for the dynk runtime.
//!
//! Running an operation on dynamic arrays happens in two phases:
//!
//! 1. **Resolve** walks the operand types and decides what will run. Each
//!    decision is recorded as a [`CallNode`] pushed onto a [`CallGraph`];
//!    the result is the destination type the caller should expect.
//! 2. **Instantiate** consumes the graph in order, each node appending one
//!    frame subtree to a [`KernelBuffer`](dynk_kernel::KernelBuffer). The
//!    finished buffer is executed through its root frame.
//!
//! # Callables provided
//!
//! - [`Assign`] - conversions between any two types with a viable path
//! - [`CopyCallable`] - assignment into the source's canonical type
//! - [`CompoundOperator`] - in-place add, multiply, min and max
//! - [`FunctionCallable`] - a binary Rust function applied elementwise
//! - [`Less`] - elementwise comparison of any two real numeric types
//! - [`Reduction`] - reductions over any subset of axes
//!
//! The [`Registry`] names the builtins and [`builtins`] returns the shared
//! instance. The [`driver`] module ties resolve, instantiate and execution
//! together for callers working with [`Array`](dynk_types::Array)s.

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod assign;
pub mod callable;
pub mod compound;
pub mod copy;
pub mod dispatch;
pub mod driver;
pub mod function;
pub mod graph;
pub mod kwds;
pub mod reduction;
pub mod registry;
pub mod signature;

pub use assign::Assign;
pub use callable::Callable;
pub use compound::CompoundOperator;
pub use copy::CopyCallable;
pub use dispatch::DispatchTable;
pub use driver::{plan, CallableExt, CompiledKernel, KernelPlan};
pub use function::{FunctionCallable, Less};
pub use graph::{CallGraph, CallNode, NodeCursor, ResolveContext};
pub use kwds::{KwdValue, Kwds};
pub use reduction::Reduction;
pub use registry::{builtins, Registry};
pub use signature::Signature;

use dynk_eval::EvalError;
use dynk_kernel::KernelError;
use dynk_types::{ArrayError, TypeError};

/// Result type for resolve, instantiate and execution.
pub type CallableResult<T> = Result<T, CallableError>;

/// Errors raised while building or running callables.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallableError {
    /// A dispatch table has no entry for the key.
    #[error("no matching operation in `{table}` for ({key})")]
    NoMatchingOperation {
        /// Table name.
        table: &'static str,
        /// The type ids looked up.
        key: String,
    },
    /// No rule can assign one type to the other.
    #[error("no viable assignment from {src} to {dst}")]
    NoViableAssignment {
        /// Destination type.
        dst: String,
        /// Source type.
        src: String,
    },
    /// Source dimensions that cannot broadcast to the destination.
    #[error("cannot broadcast {src} to {dst}")]
    Broadcast {
        /// Destination type.
        dst: String,
        /// Source type.
        src: String,
    },
    /// Operand types that the callable cannot combine.
    #[error("`{callable}` cannot combine destination {dst} with source {src}")]
    OperandMismatch {
        /// Callable name.
        callable: String,
        /// Destination type.
        dst: String,
        /// Source type.
        src: String,
    },
    /// Wrong number of source operands.
    #[error("`{callable}` takes {expected} source operand(s), got {found}")]
    Arity {
        /// Callable name.
        callable: String,
        /// Declared arity.
        expected: usize,
        /// Supplied operands.
        found: usize,
    },
    /// A keyword argument that is unknown or has the wrong kind of value.
    #[error("malformed keyword arguments for `{callable}`: {reason}")]
    MalformedKwds {
        /// Callable name.
        callable: String,
        /// What is wrong.
        reason: String,
    },
    /// A signature string that does not parse.
    #[error("invalid signature `{0}`")]
    InvalidSignature(String),
    /// A reduction axis beyond the source's dimensions.
    #[error("axis {axis} is out of bounds for {ndim} dimension(s)")]
    InvalidAxis {
        /// Requested axis.
        axis: usize,
        /// Source dimensions.
        ndim: usize,
    },
    /// A reduction axis given twice.
    #[error("axis {0} is repeated")]
    DuplicateAxis(usize),
    /// Reduction over an axis of length zero.
    #[error("cannot reduce empty axis {axis} without an identity value")]
    EmptyReduction {
        /// The empty axis.
        axis: usize,
    },
    /// Nested resolution went too deep.
    #[error("resolving `{callable}` exceeded the recursion limit of {limit}")]
    RecursionLimit {
        /// Callable being resolved.
        callable: String,
        /// The limit.
        limit: usize,
    },
    /// Instantiate asked for a node after the last one.
    #[error("call graph exhausted")]
    GraphExhausted,
    /// A node appended no frames.
    #[error("call node `{0}` appended no kernel frames")]
    EmptySubtree(String),
    /// Instantiation finished with nodes left over.
    #[error("{remaining} call node(s) were not instantiated")]
    UnconsumedNodes {
        /// Nodes left.
        remaining: usize,
    },
    /// A compiled kernel was given operands it was not built for.
    #[error("{operand} does not match the compiled kernel: expected {expected}, found {found}")]
    ArgumentMismatch {
        /// Which operand.
        operand: String,
        /// What the kernel was built for.
        expected: String,
        /// What was passed.
        found: String,
    },
    /// A callable name registered twice.
    #[error("callable `{0}` is already registered")]
    DuplicateCallable(String),
    /// A callable name that is not registered.
    #[error("no callable named `{0}`")]
    UnknownCallable(String),
    /// Kernel construction or execution failed.
    #[error(transparent)]
    Kernel(#[from] KernelError),
    /// Type construction failed.
    #[error(transparent)]
    Type(#[from] TypeError),
    /// Array access failed.
    #[error(transparent)]
    Array(#[from] ArrayError),
    /// The evaluation context is unusable.
    #[error(transparent)]
    Eval(#[from] EvalError),
}
