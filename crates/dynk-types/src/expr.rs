//! Expression type kernel generators.
//!
//! An expression type stores its data in an operand form and exposes a
//! value form. The generator attached to the type emits the kernels that
//! convert between the two, so an assignment can bridge an expression type
//! without knowing what it does.

use crate::types::Type;
use dynk_kernel::{
    append_single, unary_src, ErrorMode, FrameOffset, FrameRef, Kernel, KernelBuffer,
    KernelRequest, KernelResult,
};
use smallvec::SmallVec;
use std::fmt;
use std::ptr;

/// Emits the kernels bridging an expression type's operand and value.
pub trait ExprKernelGenerator: Send + Sync + fmt::Debug {
    /// Generator name, used in type display and equality.
    fn name(&self) -> &str;

    /// Display the expression type.
    ///
    /// # Errors
    ///
    /// Propagates formatter errors.
    fn describe(&self, value: &Type, operand: &Type, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{value}, {operand}]", self.name())
    }

    /// Append a kernel reading operand data and writing value data.
    ///
    /// # Errors
    ///
    /// Propagates buffer failures.
    fn make_operand_to_value(
        &self,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        value: &Type,
        operand: &Type,
        errmode: ErrorMode,
    ) -> KernelResult<FrameOffset>;

    /// Append a kernel reading value data and writing operand data.
    ///
    /// # Errors
    ///
    /// Propagates buffer failures.
    fn make_value_to_operand(
        &self,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        value: &Type,
        operand: &Type,
        errmode: ErrorMode,
    ) -> KernelResult<FrameOffset>;
}

/// Generator of `byteswap[T]`: values stored in the opposite byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Byteswap;

impl Byteswap {
    fn append(ckb: &mut KernelBuffer, request: KernelRequest, value: &Type) -> KernelResult<FrameOffset> {
        let size = value.data_size();
        let halves = value.kind() == crate::Kind::Complex;
        append_single(ckb, request, ByteswapKernel { size, halves })
    }
}

impl ExprKernelGenerator for Byteswap {
    fn name(&self) -> &str {
        "byteswap"
    }

    fn describe(&self, value: &Type, _operand: &Type, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "byteswap[{value}]")
    }

    fn make_operand_to_value(
        &self,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        value: &Type,
        _operand: &Type,
        _errmode: ErrorMode,
    ) -> KernelResult<FrameOffset> {
        Self::append(ckb, request, value)
    }

    fn make_value_to_operand(
        &self,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        value: &Type,
        _operand: &Type,
        _errmode: ErrorMode,
    ) -> KernelResult<FrameOffset> {
        Self::append(ckb, request, value)
    }
}

/// Reverses the bytes of one element.
///
/// Complex values are swapped per component.
#[derive(Debug)]
pub struct ByteswapKernel {
    size: usize,
    halves: bool,
}

impl ByteswapKernel {
    /// Swap elements of `size` bytes, or each half of them.
    #[must_use]
    pub fn new(size: usize, halves: bool) -> Self {
        Self { size, halves }
    }
}

impl Kernel for ByteswapKernel {
    const NAME: &'static str = "byteswap";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        let mut scratch: SmallVec<[u8; 16]> = SmallVec::from_elem(0, self.size);
        // Safety: caller contract; the scratch copy tolerates dst == src
        unsafe { ptr::copy(src, scratch.as_mut_ptr(), self.size) };
        if self.halves {
            let half = self.size / 2;
            scratch[..half].reverse();
            scratch[half..].reverse();
        } else {
            scratch.reverse();
        }
        // Safety: caller contract
        unsafe { ptr::copy_nonoverlapping(scratch.as_ptr(), dst, self.size) };
        Ok(())
    }
}
