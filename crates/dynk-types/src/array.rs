//! Array handles.
//!
//! An [`Array`] is a shared handle to an [`ArrayPreamble`]: the type, the
//! per-array metadata, a data pointer and access flags. The data either
//! lives in a block owned by the preamble or in a block shared with another
//! array. The preamble is itself a memory block, so a view of an array
//! keeps the original's storage alive by holding a reference to it.

use crate::arrmeta::ArrMeta;
use crate::date::{format_date, parse_date};
use crate::string::StringData;
use crate::type_id::{HasTypeId, Kind};
use crate::types::{Shape, Type};
use crate::{ArrayError, ArrayResult};
use bitflags::bitflags;
use dynk_memblock::{AllocError, FixedMemoryBlock, MemBlockKind, MemBlockRef, MemoryBlock, PodMemoryBlock};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Weak};
use tracing::trace;

bitflags! {
    /// How an array's data may be accessed.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct AccessFlags: u8 {
        /// Data may be read.
        const READ = 0b0000_0001;
        /// Data may be written.
        const WRITE = 0b0000_0010;
        /// Data will never change through any handle.
        const IMMUTABLE = 0b0000_0100;
    }
}

enum Storage {
    Embedded(FixedMemoryBlock),
    Shared(MemBlockRef),
}

/// The shared state behind an [`Array`].
pub struct ArrayPreamble {
    tp: Type,
    arrmeta: ArrMeta,
    data: NonNull<u8>,
    flags: AccessFlags,
    storage: Storage,
}

// Safety: `data` points into `storage`, which is owned or kept alive by the
// preamble; the pointer itself is never mutated after construction.
unsafe impl Send for ArrayPreamble {}
unsafe impl Sync for ArrayPreamble {}

impl fmt::Debug for ArrayPreamble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayPreamble")
            .field("tp", &self.tp)
            .field("flags", &self.flags)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

impl MemoryBlock for ArrayPreamble {
    fn kind(&self) -> MemBlockKind {
        MemBlockKind::Array
    }

    fn debug_print(&self, out: &mut dyn fmt::Write, indent: &str) -> fmt::Result {
        writeln!(out, "{indent}------ array")?;
        writeln!(out, "{indent} type: {}", self.tp)?;
        writeln!(out, "{indent} flags: {:?}", self.flags)?;
        writeln!(out, "{indent} data: {:p}", self.data)?;
        writeln!(out, "{indent} arrmeta: {:?}", self.arrmeta)?;
        let inner = format!("{indent} ");
        match &self.storage {
            Storage::Embedded(block) => block.debug_print(out, &inner),
            Storage::Shared(block) => block.debug_print(out, &inner),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A shared handle to array data with its type and layout.
#[derive(Clone)]
pub struct Array(Arc<ArrayPreamble>);

/// A non-owning array handle.
#[derive(Clone)]
pub struct WeakArray(Weak<ArrayPreamble>);

impl WeakArray {
    /// Get a strong handle if the array is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Array> {
        self.0.upgrade().map(Array)
    }
}

impl Array {
    /// Allocate zeroed, writable, C-contiguous storage for `tp`.
    ///
    /// # Errors
    ///
    /// Fails if the storage cannot be allocated.
    pub fn empty(tp: Type) -> ArrayResult<Self> {
        let size = tp
            .checked_data_size()
            .ok_or_else(|| AllocError::InvalidLayout(format!("size of {tp} overflows")))?;
        let block = FixedMemoryBlock::new(size, tp.data_alignment())?;
        let data = block.data_ptr();
        let arrmeta = tp.metadata_default_construct();
        trace!(%tp, size, "allocated array");
        Ok(Self(Arc::new(ArrayPreamble {
            tp,
            arrmeta,
            data,
            flags: AccessFlags::READ | AccessFlags::WRITE,
            storage: Storage::Embedded(block),
        })))
    }

    /// An array of the given shape holding `values` in row-major order.
    ///
    /// # Errors
    ///
    /// Fails if the shape does not hold exactly `values.len()` elements.
    pub fn from_values<T: HasTypeId>(values: &[T], shape: &[usize]) -> ArrayResult<Self> {
        check_count(shape, values.len())?;
        let array = Self::empty(Type::fixed_dims(shape, Type::of::<T>()))?;
        // Safety: the fresh storage holds exactly `values.len()` elements of T
        unsafe {
            ptr::copy_nonoverlapping(
                values.as_ptr().cast::<u8>(),
                array.0.data.as_ptr(),
                mem::size_of_val(values),
            );
        }
        Ok(array)
    }

    /// A zero-dimensional array holding `value`.
    ///
    /// # Errors
    ///
    /// Fails if the storage cannot be allocated.
    pub fn from_scalar<T: HasTypeId>(value: T) -> ArrayResult<Self> {
        Self::from_values(&[value], &[])
    }

    /// A string array of the given shape.
    ///
    /// # Errors
    ///
    /// Fails on a shape mismatch or allocation failure.
    pub fn from_strs(values: &[&str], shape: &[usize]) -> ArrayResult<Self> {
        check_count(shape, values.len())?;
        let array = Self::empty(Type::fixed_dims(shape, Type::string()))?;
        let pool = array.string_pool()?;
        let stride = mem::size_of::<StringData>();
        for (i, value) in values.iter().enumerate() {
            // Safety: element `i` of fresh contiguous storage
            unsafe { StringData::store(array.0.data.as_ptr().add(i * stride), pool, value.as_bytes())? };
        }
        Ok(array)
    }

    /// A date array parsed from ISO `YYYY-MM-DD` strings.
    ///
    /// # Errors
    ///
    /// Fails on a shape mismatch or an unparsable date.
    pub fn from_dates(values: &[&str], shape: &[usize]) -> ArrayResult<Self> {
        check_count(shape, values.len())?;
        let days = values
            .iter()
            .map(|text| parse_date(text))
            .collect::<Result<Vec<i32>, _>>()?;
        let array = Self::empty(Type::fixed_dims(shape, Type::date()))?;
        // Safety: the fresh storage holds exactly `days.len()` dates
        unsafe {
            ptr::copy_nonoverlapping(
                days.as_ptr().cast::<u8>(),
                array.0.data.as_ptr(),
                mem::size_of_val(days.as_slice()),
            );
        }
        Ok(array)
    }

    fn string_pool(&self) -> ArrayResult<&PodMemoryBlock> {
        let mut meta = &self.0.arrmeta;
        while let Some(element) = meta.element() {
            meta = element;
        }
        meta.blockref()
            .and_then(|block| block.as_pod())
            .ok_or(ArrayError::MissingBlockref)
    }

    /// The array's type.
    #[inline]
    #[must_use]
    pub fn tp(&self) -> &Type {
        &self.0.tp
    }

    /// The array's layout metadata.
    #[inline]
    #[must_use]
    pub fn arrmeta(&self) -> &ArrMeta {
        &self.0.arrmeta
    }

    /// Access flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> AccessFlags {
        self.0.flags
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.0.tp.ndim()
    }

    /// Dimension sizes.
    #[must_use]
    pub fn shape(&self) -> Shape {
        self.0.tp.shape()
    }

    /// Pointer to the first element.
    #[inline]
    #[must_use]
    pub fn data_ptr(&self) -> *const u8 {
        self.0.data.as_ptr()
    }

    /// Pointer to the first element, for writing.
    ///
    /// # Errors
    ///
    /// Fails unless the array is writable.
    pub fn data_ptr_mut(&self) -> ArrayResult<*mut u8> {
        if self.0.flags.contains(AccessFlags::WRITE) {
            Ok(self.0.data.as_ptr())
        } else {
            Err(ArrayError::ReadOnly)
        }
    }

    /// Block holding the data when it is not embedded in this array.
    #[must_use]
    pub fn data_ref(&self) -> Option<&MemBlockRef> {
        match &self.0.storage {
            Storage::Shared(block) => Some(block),
            Storage::Embedded(_) => None,
        }
    }

    /// Number of strong handles to this array.
    #[must_use]
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether both handles refer to the same array.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// A non-owning handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakArray {
        WeakArray(Arc::downgrade(&self.0))
    }

    fn storage_ref(&self) -> MemBlockRef {
        match &self.0.storage {
            Storage::Embedded(_) => MemBlockRef::from(self.0.clone()),
            Storage::Shared(block) => block.clone(),
        }
    }

    fn derived(&self, tp: Type, arrmeta: ArrMeta, flags: AccessFlags) -> Self {
        Self(Arc::new(ArrayPreamble {
            tp,
            arrmeta,
            data: self.0.data,
            flags,
            storage: Storage::Shared(self.storage_ref()),
        }))
    }

    /// A new handle sharing this array's data and metadata blocks.
    #[must_use]
    pub fn shallow_copy(&self) -> Self {
        self.derived(self.0.tp.clone(), self.0.arrmeta.clone(), self.0.flags)
    }

    /// A read-only, immutable view of the same data.
    #[must_use]
    pub fn readonly(&self) -> Self {
        self.derived(
            self.0.tp.clone(),
            self.0.arrmeta.clone(),
            AccessFlags::READ | AccessFlags::IMMUTABLE,
        )
    }

    /// Reinterpret C-contiguous data as another type of the same size.
    ///
    /// # Errors
    ///
    /// Fails if the sizes differ, the data is not contiguous, or either
    /// type references memory blocks.
    pub fn view_as(&self, tp: Type) -> ArrayResult<Self> {
        let invalid = || ArrayError::InvalidView {
            from: self.0.tp.to_string(),
            to: tp.to_string(),
        };
        if tp.data_size() != self.0.tp.data_size()
            || tp.has_blockrefs()
            || self.0.tp.has_blockrefs()
            || !is_c_contiguous(&self.0.tp, &self.0.arrmeta)
        {
            return Err(invalid());
        }
        let arrmeta = tp.metadata_default_construct();
        Ok(self.derived(tp, arrmeta, self.0.flags))
    }

    /// Pointers to every element, in row-major order.
    #[must_use]
    pub fn element_ptrs(&self) -> Vec<*const u8> {
        let mut out = Vec::new();
        collect_elements(&self.0.arrmeta, self.data_ptr(), &mut out);
        out
    }

    /// Copy all elements out as `T`.
    ///
    /// # Errors
    ///
    /// Fails unless the element type is exactly `T`.
    pub fn to_vec<T: HasTypeId>(&self) -> ArrayResult<Vec<T>> {
        let dtype = self.0.tp.dtype();
        if dtype != Type::of::<T>() {
            return Err(ArrayError::TypeMismatch {
                expected: Type::of::<T>().to_string(),
                found: dtype.to_string(),
            });
        }
        Ok(self
            .element_ptrs()
            .into_iter()
            // Safety: each pointer addresses one element of type T
            .map(|p| unsafe { p.cast::<T>().read_unaligned() })
            .collect())
    }

    /// Read the only element of a zero-dimensional array.
    ///
    /// # Errors
    ///
    /// Fails for arrays with dimensions or of another element type.
    pub fn scalar<T: HasTypeId>(&self) -> ArrayResult<T> {
        let ndim = self.ndim();
        if ndim != 0 {
            return Err(ArrayError::NotScalar { ndim });
        }
        self.to_vec::<T>()?
            .pop()
            .ok_or(ArrayError::NotScalar { ndim })
    }

    /// Render string, bytes or date elements as text.
    ///
    /// # Errors
    ///
    /// Fails for other element types.
    pub fn to_strings(&self) -> ArrayResult<Vec<String>> {
        let dtype = self.0.tp.dtype();
        let ptrs = self.element_ptrs();
        match dtype.kind() {
            Kind::String | Kind::Bytes if dtype.fixed_bytes_layout().is_none() => Ok(ptrs
                .into_iter()
                // Safety: string elements of this array's live blocks
                .map(|p| String::from_utf8_lossy(unsafe { StringData::read(p) }).into_owned())
                .collect()),
            Kind::Date => Ok(ptrs
                .into_iter()
                // Safety: each pointer addresses one date
                .map(|p| format_date(unsafe { p.cast::<i32>().read_unaligned() }))
                .collect()),
            _ => Err(ArrayError::TypeMismatch {
                expected: "string, bytes or date".to_string(),
                found: dtype.to_string(),
            }),
        }
    }

    /// Multi-line description of the array and its storage.
    #[must_use]
    pub fn debug_print(&self) -> String {
        let mut out = String::new();
        // Writing to a String never fails
        let _ = self.0.debug_print(&mut out, "");
        out
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Array").field(&self.0).finish()
    }
}

impl From<Array> for MemBlockRef {
    fn from(array: Array) -> Self {
        MemBlockRef::from(array.0)
    }
}

fn check_count(shape: &[usize], found: usize) -> ArrayResult<()> {
    let expected = shape
        .iter()
        .try_fold(1usize, |count, &size| count.checked_mul(size))
        .ok_or_else(|| AllocError::InvalidLayout(format!("shape {shape:?} overflows")))?;
    if expected == found {
        Ok(())
    } else {
        Err(ArrayError::ShapeMismatch { expected, found })
    }
}

fn is_c_contiguous(tp: &Type, meta: &ArrMeta) -> bool {
    match (tp.as_fixed_dim(), meta) {
        (Some(dim), ArrMeta::Dim { stride, element, .. }) => {
            (dim.size <= 1 || *stride == dim.element.data_size() as isize)
                && is_c_contiguous(&dim.element, element)
        }
        (None, _) => true,
        _ => false,
    }
}

fn collect_elements(meta: &ArrMeta, data: *const u8, out: &mut Vec<*const u8>) {
    match meta {
        ArrMeta::Dim { size, stride, element } => {
            let mut p = data;
            for _ in 0..*size {
                collect_elements(element, p, out);
                p = p.wrapping_offset(*stride);
            }
        }
        _ => out.push(data),
    }
}
