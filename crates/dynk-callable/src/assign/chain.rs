//! Buffered chains bridging expression types.
//!
//! Reading an expression source runs the generator's operand-to-value
//! kernel into a scratch buffer, then the rest of the assignment from that
//! buffer. Writing an expression destination runs the assignment into the
//! buffer first and the generator's value-to-operand kernel second. Strided
//! runs are processed in chunks so the scratch buffer stays bounded.

use crate::graph::{unary_meta, CallNode, NodeCursor};
use crate::CallableResult;
use dynk_eval::ErrorMode;
use dynk_kernel::{
    unary_src, ChildOffset, FrameRef, Kernel, KernelBuffer, KernelRequest, KernelResult,
};
use dynk_memblock::FixedMemoryBlock;
use dynk_types::{ArrMeta, ExprKernelGenerator, ExprType, Type};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    OperandToValue,
    ValueToOperand,
}

/// Resolved bridge through an expression type.
pub struct ChainNode {
    direction: Direction,
    generator: Arc<dyn ExprKernelGenerator>,
    value: Type,
    operand: Type,
    errmode: ErrorMode,
    chunk: usize,
}

impl ChainNode {
    /// Read an expression source into its value type.
    #[must_use]
    pub fn operand_to_value(expr: &ExprType, errmode: ErrorMode, chunk: usize) -> Self {
        Self::new(Direction::OperandToValue, expr, errmode, chunk)
    }

    /// Write a value into an expression destination.
    #[must_use]
    pub fn value_to_operand(expr: &ExprType, errmode: ErrorMode, chunk: usize) -> Self {
        Self::new(Direction::ValueToOperand, expr, errmode, chunk)
    }

    fn new(direction: Direction, expr: &ExprType, errmode: ErrorMode, chunk: usize) -> Self {
        Self {
            direction,
            generator: expr.generator.clone(),
            value: expr.value.clone(),
            operand: expr.operand.clone(),
            errmode,
            chunk: chunk.max(1),
        }
    }
}

impl fmt::Debug for ChainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainNode")
            .field("direction", &self.direction)
            .field("generator", &self.generator.name())
            .field("value", &self.value)
            .field("operand", &self.operand)
            .field("chunk", &self.chunk)
            .finish()
    }
}

impl CallNode for ChainNode {
    fn name(&self) -> &str {
        match self.direction {
            Direction::OperandToValue => "operand_to_value",
            Direction::ValueToOperand => "value_to_operand",
        }
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
        let temp_meta = self.value.metadata_default_construct();
        let root = ckb.append(
            request,
            BufferedChain {
                temp_size: self.value.data_size(),
                temp_align: self.value.data_alignment(),
                chunk: self.chunk,
                temp_meta: temp_meta.clone(),
                first: None,
                second: None,
            },
        )?;

        let (first, second) = match self.direction {
            Direction::OperandToValue => {
                let first = self.generator.make_operand_to_value(
                    ckb,
                    KernelRequest::Strided,
                    &self.value,
                    &self.operand,
                    self.errmode,
                )?;
                let second =
                    cursor.instantiate_next(ckb, KernelRequest::Strided, dst_meta, &[&temp_meta])?;
                (first, second)
            }
            Direction::ValueToOperand => {
                let first =
                    cursor.instantiate_next(ckb, KernelRequest::Strided, &temp_meta, &[src_meta])?;
                let second = self.generator.make_value_to_operand(
                    ckb,
                    KernelRequest::Strided,
                    &self.value,
                    &self.operand,
                    self.errmode,
                )?;
                (first, second)
            }
        };

        let first = ckb.child_offset(root, first)?;
        let second = ckb.child_offset(root, second)?;
        let frame = ckb.frame_at_mut::<BufferedChain>(root)?;
        frame.first = Some(first);
        frame.second = Some(second);
        Ok(())
    }
}

/// Runs two strided children through a scratch buffer of value elements.
///
/// The scratch buffer is allocated per invocation, so one frame can run
/// on several threads at once.
#[derive(Debug)]
pub struct BufferedChain {
    temp_size: usize,
    temp_align: usize,
    chunk: usize,
    // Keeps string pools of the scratch elements alive.
    temp_meta: ArrMeta,
    first: Option<ChildOffset>,
    second: Option<ChildOffset>,
}

impl BufferedChain {
    fn scratch(&self, count: usize) -> KernelResult<FixedMemoryBlock> {
        let size = (self.temp_size * count).max(1);
        Ok(FixedMemoryBlock::new(size, self.temp_align)?)
    }
}

impl Kernel for BufferedChain {
    const NAME: &'static str = "buffered_chain";

    unsafe fn single(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        // Safety: forwarded caller contract
        unsafe { self.strided(frame, dst, 0, src, &[0], 1) }
    }

    unsafe fn strided(
        &self,
        frame: FrameRef<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> KernelResult<()> {
        let (mut src, src_stride) = (unary_src(Self::NAME, src)?, unary_src(Self::NAME, src_stride)?);
        let first = frame.linked_child(self.first)?;
        let second = frame.linked_child(self.second)?;
        let scratch = self.scratch(count.min(self.chunk))?;
        let temp = scratch.data_ptr().as_ptr();
        let temp_stride = self.temp_size as isize;
        trace!(count, chunk = self.chunk, "running buffered chain");

        let mut dst = dst;
        let mut remaining = count;
        while remaining > 0 {
            let n = remaining.min(self.chunk);
            // Safety: the scratch buffer holds `n` value elements; the rest
            // is the caller contract
            unsafe {
                first.strided(temp, temp_stride, &[src], &[src_stride], n)?;
                second.strided(dst, dst_stride, &[temp.cast_const()], &[temp_stride], n)?;
            }
            dst = dst.wrapping_offset(dst_stride * n as isize);
            src = src.wrapping_offset(src_stride * n as isize);
            remaining -= n;
        }
        Ok(())
    }
}
