//! Assignments that are not numeric conversions.
//!
//! String and bytes elements point into a pod block referenced by the
//! destination metadata. Frames that write them hold a reference to that
//! block, so the block outlives the kernel no matter what happens to the
//! destination array.

use super::{unary_operand, PodCopyNode, ERROR_MODE};
use crate::callable::Callable;
use crate::graph::{unary_meta, CallNode, NodeCursor, ResolveContext};
use crate::kwds::Kwds;
use crate::signature::Signature;
use crate::{CallableError, CallableResult};
use dynk_kernel::{
    append_single, unary_src, ConversionError, ConversionKind, FrameRef, Kernel, KernelBuffer,
    KernelError, KernelRequest, KernelResult,
};
use dynk_memblock::{MemBlockRef, PodMemoryBlock};
use dynk_types::date::{civil_from_days, date_from_parts, format_date, parse_date};
use dynk_types::{ArrMeta, ArrayError, StringData, Type};

/// Byte-for-byte copy between equally sized plain-old-data types.
#[derive(Debug, Clone)]
pub struct PodAssign {
    signature: Signature,
}

impl PodAssign {
    /// Create the callable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signature: Signature::new(&["Any"], "Any", &[ERROR_MODE]),
        }
    }
}

impl Default for PodAssign {
    fn default() -> Self {
        Self::new()
    }
}

impl Callable for PodAssign {
    fn name(&self) -> &str {
        "pod_assign"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn resolve(
        &self,
        cx: &mut ResolveContext<'_>,
        dst_tp: Option<&Type>,
        src_tp: &[Type],
        _kwds: &Kwds,
    ) -> CallableResult<Type> {
        let src = unary_operand(self.name(), src_tp)?;
        let dst = dst_tp.cloned().unwrap_or_else(|| src.clone());
        if dst.data_size() != src.data_size() || !dst.is_pod() || !src.is_pod() {
            return Err(CallableError::NoViableAssignment {
                dst: dst.to_string(),
                src: src.to_string(),
            });
        }
        let align = dst.data_alignment().min(src.data_alignment());
        cx.push(PodCopyNode::new(dst.data_size(), align));
        Ok(dst)
    }
}

/// The assignments handled by [`SpecialAssign`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    /// String to string, or bytes to bytes.
    StringCopy,
    /// Date to ISO text.
    DateToString,
    /// ISO text to date.
    StringToDate,
    /// Date to `{year, month, day}`.
    DateToStruct,
    /// `{year, month, day}` to date.
    StructToDate,
}

impl SpecialKind {
    /// Get the name of this assignment.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::StringCopy => "string_copy",
            Self::DateToString => "date_to_string",
            Self::StringToDate => "string_to_date",
            Self::DateToStruct => "date_to_struct",
            Self::StructToDate => "struct_to_date",
        }
    }

    fn accepts(self, dst: &Type, src: &Type) -> bool {
        match self {
            Self::StringCopy => dst == src && (*dst == Type::string() || *dst == Type::bytes()),
            Self::DateToString => *dst == Type::string() && *src == Type::date(),
            Self::StringToDate => *dst == Type::date() && *src == Type::string(),
            Self::DateToStruct => *dst == Type::date_struct() && *src == Type::date(),
            Self::StructToDate => *dst == Type::date() && *src == Type::date_struct(),
        }
    }
}

/// String, date and struct assignments.
#[derive(Debug, Clone)]
pub struct SpecialAssign {
    kind: SpecialKind,
    signature: Signature,
}

impl SpecialAssign {
    /// Create the callable for one kind of assignment.
    #[must_use]
    pub fn new(kind: SpecialKind) -> Self {
        Self {
            kind,
            signature: Signature::new(&["Any"], "Any", &[ERROR_MODE]),
        }
    }
}

impl Callable for SpecialAssign {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn resolve(
        &self,
        cx: &mut ResolveContext<'_>,
        dst_tp: Option<&Type>,
        src_tp: &[Type],
        _kwds: &Kwds,
    ) -> CallableResult<Type> {
        let src = unary_operand(self.name(), src_tp)?;
        let dst = match (dst_tp, self.kind) {
            (Some(dst), _) => dst.clone(),
            (None, SpecialKind::StringCopy) => src.clone(),
            (None, SpecialKind::DateToString) => Type::string(),
            (None, SpecialKind::StringToDate | SpecialKind::StructToDate) => Type::date(),
            (None, SpecialKind::DateToStruct) => Type::date_struct(),
        };
        if !self.kind.accepts(&dst, src) {
            return Err(CallableError::NoViableAssignment {
                dst: dst.to_string(),
                src: src.to_string(),
            });
        }
        cx.push(SpecialNode { kind: self.kind });
        Ok(dst)
    }
}

#[derive(Debug)]
struct SpecialNode {
    kind: SpecialKind,
}

/// The pod block a string destination allocates from.
fn string_pool(meta: &ArrMeta) -> CallableResult<MemBlockRef> {
    match meta.blockref() {
        Some(block) if block.as_pod().is_some() => Ok(block.clone()),
        _ => Err(ArrayError::MissingBlockref.into()),
    }
}

impl CallNode for SpecialNode {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn instantiate(
        &self,
        _cursor: &mut NodeCursor<'_>,
        ckb: &mut KernelBuffer,
        request: KernelRequest,
        dst_meta: &ArrMeta,
        src_meta: &[&ArrMeta],
    ) -> CallableResult<()> {
        let src_meta = unary_meta(self.name(), src_meta)?;
        match self.kind {
            SpecialKind::StringCopy => {
                let dst_block = string_pool(dst_meta)?;
                let shared = src_meta
                    .blockref()
                    .is_some_and(|src_block| MemBlockRef::ptr_eq(src_block, &dst_block));
                let pool = (!shared).then_some(dst_block);
                append_single(ckb, request, StringCopyKernel { pool })?;
            }
            SpecialKind::DateToString => {
                let pool = string_pool(dst_meta)?;
                append_single(ckb, request, DateFormatKernel { pool })?;
            }
            SpecialKind::StringToDate => {
                append_single(ckb, request, DateParseKernel)?;
            }
            SpecialKind::DateToStruct => {
                append_single(ckb, request, DateSplitKernel)?;
            }
            SpecialKind::StructToDate => {
                append_single(ckb, request, DateJoinKernel)?;
            }
        }
        Ok(())
    }
}

fn pod_block<'b>(block: &'b MemBlockRef, frame: &'static str) -> KernelResult<&'b PodMemoryBlock> {
    block.as_pod().ok_or(KernelError::NotPodBlock { frame })
}

/// Copies string bytes into the destination's block, or shares them when
/// source and destination use the same block.
#[derive(Debug)]
struct StringCopyKernel {
    pool: Option<MemBlockRef>,
}

impl Kernel for StringCopyKernel {
    const NAME: &'static str = "string_copy";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        // Safety: caller contract; source bytes live in the source's block
        let bytes = unsafe { StringData::read(src) };
        match &self.pool {
            // Safety: caller contract
            Some(pool) => unsafe { StringData::store(dst, pod_block(pool, Self::NAME)?, bytes)? },
            // Safety: the destination metadata references the block owning `bytes`
            None => unsafe { StringData::store_shared(dst, bytes) },
        }
        Ok(())
    }
}

/// Formats a date as ISO text.
#[derive(Debug)]
struct DateFormatKernel {
    pool: MemBlockRef,
}

impl Kernel for DateFormatKernel {
    const NAME: &'static str = "date_to_string";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        // Safety: caller contract
        let days = unsafe { src.cast::<i32>().read_unaligned() };
        let text = format_date(days);
        // Safety: caller contract
        unsafe { StringData::store(dst, pod_block(&self.pool, Self::NAME)?, text.as_bytes())? };
        Ok(())
    }
}

/// Parses ISO text into a date.
#[derive(Debug)]
struct DateParseKernel;

impl Kernel for DateParseKernel {
    const NAME: &'static str = "string_to_date";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        // Safety: caller contract
        let text = String::from_utf8_lossy(unsafe { StringData::read(src) });
        let days = parse_date(&text).map_err(|_| {
            ConversionError::new(ConversionKind::InvalidValue, &text, "string", "date")
        })?;
        // Safety: caller contract
        unsafe { dst.cast::<i32>().write_unaligned(days) };
        Ok(())
    }
}

/// Date to `{year: int32, month: int16, day: int16}`.
#[derive(Debug)]
struct DateSplitKernel;

impl Kernel for DateSplitKernel {
    const NAME: &'static str = "date_to_struct";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        // Safety: caller contract
        let days = unsafe { src.cast::<i32>().read_unaligned() };
        let (year, month, day) = civil_from_days(days);
        // Safety: caller contract; field offsets of the date struct
        unsafe {
            dst.cast::<i32>().write_unaligned(year);
            dst.add(4).cast::<i16>().write_unaligned(month as i16);
            dst.add(6).cast::<i16>().write_unaligned(day as i16);
        }
        Ok(())
    }
}

/// `{year: int32, month: int16, day: int16}` to date.
#[derive(Debug)]
struct DateJoinKernel;

impl Kernel for DateJoinKernel {
    const NAME: &'static str = "struct_to_date";

    unsafe fn single(
        &self,
        _frame: FrameRef<'_>,
        dst: *mut u8,
        src: &[*const u8],
    ) -> KernelResult<()> {
        let src = unary_src(Self::NAME, src)?;
        // Safety: caller contract; field offsets of the date struct
        let (year, month, day) = unsafe {
            (
                src.cast::<i32>().read_unaligned(),
                src.add(4).cast::<i16>().read_unaligned(),
                src.add(6).cast::<i16>().read_unaligned(),
            )
        };
        let days = date_from_parts(year, month.into(), day.into()).map_err(|_| {
            ConversionError::new(
                ConversionKind::InvalidValue,
                format!("{{year: {year}, month: {month}, day: {day}}}"),
                "struct",
                "date",
            )
        })?;
        // Safety: caller contract
        unsafe { dst.cast::<i32>().write_unaligned(days) };
        Ok(())
    }
}
