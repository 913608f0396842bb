//! The dynamic type representation.

use crate::arrmeta::ArrMeta;
use crate::expr::{Byteswap, ExprKernelGenerator};
use crate::string::StringData;
use crate::type_id::{HasTypeId, Kind, TypeId};
use crate::{TypeError, TypeResult};
use dynk_memblock::{align_up, MemBlockRef, PodMemoryBlock};
use smallvec::SmallVec;
use std::fmt;
use std::mem;
use std::sync::Arc;

/// Dimension sizes, outermost first.
pub type Shape = SmallVec<[usize; 4]>;

/// A dynamic array or element type.
///
/// Cheap to clone: compound types share their parts through `Arc`.
#[derive(Clone)]
pub struct Type(Repr);

#[derive(Clone)]
enum Repr {
    Builtin(TypeId),
    FixedDim(Arc<FixedDim>),
    String,
    Bytes,
    Date,
    FixedBytes { size: usize, align: usize },
    Struct(Arc<StructType>),
    Expr(Arc<ExprType>),
}

/// A dimension of fixed size.
#[derive(Clone, PartialEq, Eq)]
pub struct FixedDim {
    /// Number of elements.
    pub size: usize,
    /// Element type.
    pub element: Type,
}

/// A struct of named fields laid out in declaration order.
#[derive(Clone, PartialEq, Eq)]
pub struct StructType {
    names: Vec<String>,
    types: Vec<Type>,
    offsets: Vec<usize>,
    size: usize,
    align: usize,
}

impl StructType {
    /// Field names.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Field types.
    #[must_use]
    pub fn types(&self) -> &[Type] {
        &self.types
    }

    /// Byte offsets of the fields.
    #[must_use]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Index of a field by name.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// A type whose stored (operand) form differs from its value form.
///
/// Data is stored as `operand`; reading it produces `value` by running the
/// generator's operand-to-value kernel.
pub struct ExprType {
    /// Type seen by readers.
    pub value: Type,
    /// Type of the stored bytes.
    pub operand: Type,
    /// Emits the bridging kernels.
    pub generator: Arc<dyn ExprKernelGenerator>,
}

impl PartialEq for ExprType {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.operand == other.operand
            && self.generator.name() == other.generator.name()
    }
}

impl Eq for ExprType {}

impl Type {
    /// The builtin type of a Rust scalar.
    #[must_use]
    pub fn of<T: HasTypeId>() -> Self {
        Self(Repr::Builtin(T::TYPE_ID))
    }

    /// The builtin numeric type with this id.
    ///
    /// # Errors
    ///
    /// Fails if `id` is not one of the numeric scalars.
    pub fn builtin(id: TypeId) -> TypeResult<Self> {
        if id.is_numeric() {
            Ok(Self(Repr::Builtin(id)))
        } else {
            Err(TypeError::NotBuiltin(id))
        }
    }

    /// A fixed dimension of `size` elements.
    #[must_use]
    pub fn fixed_dim(size: usize, element: Type) -> Self {
        Self(Repr::FixedDim(Arc::new(FixedDim { size, element })))
    }

    /// Nested fixed dimensions, outermost first, around `dtype`.
    #[must_use]
    pub fn fixed_dims(shape: &[usize], dtype: Type) -> Self {
        shape
            .iter()
            .rev()
            .fold(dtype, |element, &size| Self::fixed_dim(size, element))
    }

    /// Variable-length UTF-8 string.
    #[must_use]
    pub fn string() -> Self {
        Self(Repr::String)
    }

    /// Variable-length bytes.
    #[must_use]
    pub fn bytes() -> Self {
        Self(Repr::Bytes)
    }

    /// Calendar date.
    #[must_use]
    pub fn date() -> Self {
        Self(Repr::Date)
    }

    /// Opaque bytes of a fixed size.
    ///
    /// # Errors
    ///
    /// The alignment must be a power of two dividing `size`.
    pub fn fixed_bytes(size: usize, align: usize) -> TypeResult<Self> {
        if !align.is_power_of_two() || size % align != 0 {
            return Err(TypeError::InvalidFixedBytes { size, align });
        }
        Ok(Self(Repr::FixedBytes { size, align }))
    }

    /// A struct with C layout.
    ///
    /// # Errors
    ///
    /// Field names must be unique, and fields cannot be dimensions or
    /// expression types.
    pub fn struct_of<N: Into<String>>(fields: impl IntoIterator<Item = (N, Type)>) -> TypeResult<Self> {
        let mut names: Vec<String> = Vec::new();
        let mut types = Vec::new();
        for (name, tp) in fields {
            let name = name.into();
            if names.contains(&name) {
                return Err(TypeError::DuplicateField(name));
            }
            if matches!(tp.kind(), Kind::Dim | Kind::Expression) {
                return Err(TypeError::InvalidField { name, tp: tp.to_string() });
            }
            names.push(name);
            types.push(tp);
        }
        Ok(Self::laid_out_struct(names, types))
    }

    fn laid_out_struct(names: Vec<String>, types: Vec<Type>) -> Self {
        let mut offsets = Vec::with_capacity(types.len());
        let mut size = 0;
        let mut align = 1;
        for tp in &types {
            let field_align = tp.data_alignment();
            let offset = align_up(size, field_align);
            size = offset + tp.data_size();
            align = align.max(field_align);
            offsets.push(offset);
        }
        Self(Repr::Struct(Arc::new(StructType {
            names,
            types,
            offsets,
            size: align_up(size, align),
            align,
        })))
    }

    /// `{year: int32, month: int16, day: int16}`, the struct form of a date.
    #[must_use]
    pub fn date_struct() -> Self {
        Self::laid_out_struct(
            vec!["year".into(), "month".into(), "day".into()],
            vec![Self::of::<i32>(), Self::of::<i16>(), Self::of::<i16>()],
        )
    }

    /// An expression type bridging `operand` storage to `value`.
    ///
    /// # Errors
    ///
    /// The operand must not itself be an expression, and the value cannot
    /// be a dimension.
    pub fn expr(value: Type, operand: Type, generator: Arc<dyn ExprKernelGenerator>) -> TypeResult<Self> {
        if operand.is_expression() {
            return Err(TypeError::NestedExpression(operand.to_string()));
        }
        if value.ndim() > 0 || operand.ndim() > 0 {
            return Err(TypeError::InvalidExpression(format!(
                "expression types are scalar, got value {value} over operand {operand}"
            )));
        }
        Ok(Self(Repr::Expr(Arc::new(ExprType {
            value,
            operand,
            generator,
        }))))
    }

    /// `value` stored with its bytes reversed.
    ///
    /// # Errors
    ///
    /// Only numeric scalars can be byteswapped.
    pub fn byteswap(value: Type) -> TypeResult<Self> {
        if !value.type_id().is_numeric() {
            return Err(TypeError::InvalidExpression(format!("cannot byteswap {value}")));
        }
        let operand = Self::fixed_bytes(value.data_size(), 1)?;
        Self::expr(value, operand, Arc::new(Byteswap))
    }

    /// Get the type id.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        match &self.0 {
            Repr::Builtin(id) => *id,
            Repr::FixedDim(_) => TypeId::FixedDim,
            Repr::String => TypeId::String,
            Repr::Bytes => TypeId::Bytes,
            Repr::Date => TypeId::Date,
            Repr::FixedBytes { .. } => TypeId::FixedBytes,
            Repr::Struct(_) => TypeId::Struct,
            Repr::Expr(_) => TypeId::Expr,
        }
    }

    /// Get the kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.type_id().kind()
    }

    /// Bytes of element data for one value of this type.
    ///
    /// Saturates for dimensions too large to address; storage is sized
    /// with [`Self::checked_data_size`].
    #[must_use]
    pub fn data_size(&self) -> usize {
        match &self.0 {
            Repr::Builtin(id) => id.numeric_layout().map_or(0, |(size, _)| size),
            Repr::FixedDim(dim) => dim.size.saturating_mul(dim.element.data_size()),
            Repr::String | Repr::Bytes => mem::size_of::<StringData>(),
            Repr::Date => mem::size_of::<i32>(),
            Repr::FixedBytes { size, .. } => *size,
            Repr::Struct(st) => st.size,
            Repr::Expr(expr) => expr.operand.data_size(),
        }
    }

    /// Bytes of element data, or `None` if the size does not fit in `isize`.
    #[must_use]
    pub fn checked_data_size(&self) -> Option<usize> {
        let size = match &self.0 {
            Repr::FixedDim(dim) => dim.size.checked_mul(dim.element.checked_data_size()?)?,
            Repr::Expr(expr) => return expr.operand.checked_data_size(),
            _ => self.data_size(),
        };
        isize::try_from(size).is_ok().then_some(size)
    }

    /// Required alignment of element data.
    #[must_use]
    pub fn data_alignment(&self) -> usize {
        match &self.0 {
            Repr::Builtin(id) => id.numeric_layout().map_or(1, |(_, align)| align),
            Repr::FixedDim(dim) => dim.element.data_alignment(),
            Repr::String | Repr::Bytes => mem::align_of::<StringData>(),
            Repr::Date => mem::align_of::<i32>(),
            Repr::FixedBytes { align, .. } => *align,
            Repr::Struct(st) => st.align,
            Repr::Expr(expr) => expr.operand.data_alignment(),
        }
    }

    /// Number of leading dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        match &self.0 {
            Repr::FixedDim(dim) => 1 + dim.element.ndim(),
            _ => 0,
        }
    }

    /// Sizes of the leading dimensions.
    #[must_use]
    pub fn shape(&self) -> Shape {
        let mut shape = Shape::new();
        let mut tp = self;
        while let Some(dim) = tp.as_fixed_dim() {
            shape.push(dim.size);
            tp = &dim.element;
        }
        shape
    }

    /// View as a dimension.
    #[must_use]
    pub fn as_fixed_dim(&self) -> Option<&FixedDim> {
        match &self.0 {
            Repr::FixedDim(dim) => Some(dim),
            _ => None,
        }
    }

    /// Element type of a dimension.
    #[must_use]
    pub fn element_type(&self) -> Option<&Type> {
        self.as_fixed_dim().map(|dim| &dim.element)
    }

    /// View as a struct.
    #[must_use]
    pub fn as_struct(&self) -> Option<&StructType> {
        match &self.0 {
            Repr::Struct(st) => Some(st),
            _ => None,
        }
    }

    /// View as an expression type.
    #[must_use]
    pub fn as_expr(&self) -> Option<&ExprType> {
        match &self.0 {
            Repr::Expr(expr) => Some(expr),
            _ => None,
        }
    }

    /// The element type below all dimensions.
    #[must_use]
    pub fn dtype(&self) -> Type {
        let mut tp = self;
        while let Some(element) = tp.element_type() {
            tp = element;
        }
        tp.clone()
    }

    /// Plain old data: copyable bitwise, owning no references.
    #[must_use]
    pub fn is_pod(&self) -> bool {
        match &self.0 {
            Repr::Builtin(_) | Repr::Date | Repr::FixedBytes { .. } => true,
            Repr::FixedDim(dim) => dim.element.is_pod(),
            Repr::Struct(st) => st.types.iter().all(Type::is_pod),
            Repr::String | Repr::Bytes | Repr::Expr(_) => false,
        }
    }

    /// Returns true for expression types.
    #[must_use]
    pub fn is_expression(&self) -> bool {
        matches!(self.0, Repr::Expr(_))
    }

    /// Whether any element below the dimensions is an expression type.
    #[must_use]
    pub fn has_expression(&self) -> bool {
        self.dtype().is_expression()
    }

    /// The type as seen by readers, with dimensions preserved.
    #[must_use]
    pub fn value_type(&self) -> Type {
        match &self.0 {
            Repr::Expr(expr) => expr.value.clone(),
            Repr::FixedDim(dim) if dim.element.has_expression() => {
                Self::fixed_dim(dim.size, dim.element.value_type())
            }
            _ => self.clone(),
        }
    }

    /// The type of the stored bytes, with dimensions preserved.
    #[must_use]
    pub fn operand_type(&self) -> Type {
        match &self.0 {
            Repr::Expr(expr) => expr.operand.clone(),
            Repr::FixedDim(dim) if dim.element.has_expression() => {
                Self::fixed_dim(dim.size, dim.element.operand_type())
            }
            _ => self.clone(),
        }
    }

    /// The plain type a copy of this type produces.
    #[must_use]
    pub fn canonical_type(&self) -> Type {
        self.value_type()
    }

    /// Size in bytes of this type's metadata in flat form.
    #[must_use]
    pub fn metadata_size(&self) -> usize {
        match &self.0 {
            Repr::FixedDim(dim) => 2 * mem::size_of::<usize>() + dim.element.metadata_size(),
            Repr::String | Repr::Bytes => mem::size_of::<usize>(),
            Repr::Struct(st) => st
                .types
                .iter()
                .map(|tp| mem::size_of::<usize>() + tp.metadata_size())
                .sum(),
            Repr::Expr(expr) => expr.operand.metadata_size(),
            Repr::Builtin(_) | Repr::Date | Repr::FixedBytes { .. } => 0,
        }
    }

    /// Whether `self` needs a blockref somewhere in its metadata.
    #[must_use]
    pub fn has_blockrefs(&self) -> bool {
        match &self.0 {
            Repr::String | Repr::Bytes => true,
            Repr::FixedDim(dim) => dim.element.has_blockrefs(),
            Repr::Struct(st) => st.types.iter().any(Type::has_blockrefs),
            Repr::Expr(expr) => expr.operand.has_blockrefs(),
            _ => false,
        }
    }

    /// Fresh metadata for C-contiguous data of this type.
    ///
    /// Each string or bytes element gets a new pod block for its bytes.
    #[must_use]
    pub fn metadata_default_construct(&self) -> ArrMeta {
        match &self.0 {
            Repr::FixedDim(dim) => ArrMeta::Dim {
                size: dim.size,
                stride: dim.element.data_size() as isize,
                element: Box::new(dim.element.metadata_default_construct()),
            },
            Repr::String | Repr::Bytes => {
                ArrMeta::Blockref(Some(MemBlockRef::new(PodMemoryBlock::new(1))))
            }
            Repr::Struct(st) => ArrMeta::Struct {
                offsets: st.offsets.clone(),
                fields: st
                    .types
                    .iter()
                    .map(Type::metadata_default_construct)
                    .collect(),
            },
            Repr::Expr(expr) => expr.operand.metadata_default_construct(),
            Repr::Builtin(_) | Repr::Date | Repr::FixedBytes { .. } => ArrMeta::Empty,
        }
    }

    /// Copy `src` metadata, sharing its blockrefs.
    ///
    /// # Errors
    ///
    /// Fails if `src` does not describe this type.
    pub fn metadata_copy_construct(&self, src: &ArrMeta) -> TypeResult<ArrMeta> {
        if !self.metadata_matches(src) {
            return Err(TypeError::MetadataMismatch(self.to_string()));
        }
        Ok(src.clone())
    }

    /// Release metadata, dropping its blockref references.
    pub fn metadata_destruct(&self, meta: ArrMeta) {
        drop(meta);
    }

    /// Whether `meta` has the structure this type requires.
    #[must_use]
    pub fn metadata_matches(&self, meta: &ArrMeta) -> bool {
        match (&self.0, meta) {
            (Repr::FixedDim(dim), ArrMeta::Dim { size, element, .. }) => {
                *size == dim.size && dim.element.metadata_matches(element)
            }
            (Repr::String | Repr::Bytes, ArrMeta::Blockref(_)) => true,
            (Repr::Struct(st), ArrMeta::Struct { offsets, fields }) => {
                *offsets == st.offsets
                    && fields.len() == st.types.len()
                    && st.types.iter().zip(fields).all(|(tp, m)| tp.metadata_matches(m))
            }
            (Repr::Expr(expr), meta) => expr.operand.metadata_matches(meta),
            (Repr::Builtin(_) | Repr::Date | Repr::FixedBytes { .. }, ArrMeta::Empty) => true,
            _ => false,
        }
    }

    /// Size and alignment of a fixed-bytes type.
    #[must_use]
    pub fn fixed_bytes_layout(&self) -> Option<(usize, usize)> {
        match self.0 {
            Repr::FixedBytes { size, align } => Some((size, align)),
            _ => None,
        }
    }
}

/// Whether assigning any `src` value to `dst` is exact.
///
/// Assignments that pass this test never need value checks, so they run
/// with the checks switched off.
#[must_use]
pub fn is_lossless_assignment(dst: &Type, src: &Type) -> bool {
    if dst == src {
        return true;
    }
    let (d, s) = (dst.type_id(), src.type_id());
    d.is_numeric() && s.is_numeric() && TypeId::numeric_lossless(d, s)
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Repr::Builtin(a), Repr::Builtin(b)) => a == b,
            (Repr::FixedDim(a), Repr::FixedDim(b)) => Arc::ptr_eq(a, b) || a == b,
            (Repr::String, Repr::String)
            | (Repr::Bytes, Repr::Bytes)
            | (Repr::Date, Repr::Date) => true,
            (
                Repr::FixedBytes { size: s1, align: a1 },
                Repr::FixedBytes { size: s2, align: a2 },
            ) => s1 == s2 && a1 == a2,
            (Repr::Struct(a), Repr::Struct(b)) => Arc::ptr_eq(a, b) || a == b,
            (Repr::Expr(a), Repr::Expr(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl Eq for Type {}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Builtin(id) => f.write_str(id.name()),
            Repr::FixedDim(dim) => write!(f, "{} * {}", dim.size, dim.element),
            Repr::String => f.write_str("string"),
            Repr::Bytes => f.write_str("bytes"),
            Repr::Date => f.write_str("date"),
            Repr::FixedBytes { size, align } => write!(f, "fixed_bytes[{size}, align={align}]"),
            Repr::Struct(st) => {
                f.write_str("{")?;
                for (i, (name, tp)) in st.names.iter().zip(&st.types).enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {tp}")?;
                }
                f.write_str("}")
            }
            Repr::Expr(expr) => expr.generator.describe(&expr.value, &expr.operand, f),
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({self})")
    }
}

impl fmt::Debug for FixedDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} * {:?}", self.size, self.element)
    }
}

impl fmt::Debug for StructType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructType")
            .field("names", &self.names)
            .field("offsets", &self.offsets)
            .field("size", &self.size)
            .finish()
    }
}

impl fmt::Debug for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExprType")
            .field("value", &self.value)
            .field("operand", &self.operand)
            .field("generator", &self.generator.name())
            .finish()
    }
}
