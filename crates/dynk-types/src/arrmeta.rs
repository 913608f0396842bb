//! Per-array layout metadata.
//!
//! Metadata mirrors the type tree: one [`ArrMeta::Dim`] per dimension, a
//! blockref for string and bytes elements, one entry per struct field. Two
//! arrays of the same type can have different metadata (strides, the block
//! holding their string bytes), which is why kernels are instantiated
//! against metadata rather than types alone.

use dynk_memblock::MemBlockRef;

/// Layout metadata for one array.
#[derive(Debug, Clone)]
pub enum ArrMeta {
    /// Scalar element with no metadata.
    Empty,
    /// A dimension.
    Dim {
        /// Number of elements.
        size: usize,
        /// Byte distance between consecutive elements.
        stride: isize,
        /// Metadata of the element type.
        element: Box<ArrMeta>,
    },
    /// Memory block owning variable-length element bytes.
    Blockref(Option<MemBlockRef>),
    /// Struct fields.
    Struct {
        /// Byte offsets of the fields.
        offsets: Vec<usize>,
        /// Metadata of each field.
        fields: Vec<ArrMeta>,
    },
}

impl ArrMeta {
    /// Metadata for a dimension.
    #[must_use]
    pub fn dim(size: usize, stride: isize, element: ArrMeta) -> Self {
        Self::Dim {
            size,
            stride,
            element: Box::new(element),
        }
    }

    /// Size and stride of a dimension.
    #[inline]
    #[must_use]
    pub fn size_stride(&self) -> Option<(usize, isize)> {
        match self {
            Self::Dim { size, stride, .. } => Some((*size, *stride)),
            _ => None,
        }
    }

    /// Element metadata of a dimension.
    #[inline]
    #[must_use]
    pub fn element(&self) -> Option<&ArrMeta> {
        match self {
            Self::Dim { element, .. } => Some(element),
            _ => None,
        }
    }

    /// The blockref of a string or bytes element.
    #[must_use]
    pub fn blockref(&self) -> Option<&MemBlockRef> {
        match self {
            Self::Blockref(block) => block.as_ref(),
            _ => None,
        }
    }

    /// Strides of all leading dimensions.
    #[must_use]
    pub fn strides(&self) -> Vec<isize> {
        let mut strides = Vec::new();
        let mut meta = self;
        while let Self::Dim { stride, element, .. } = meta {
            strides.push(*stride);
            meta = element;
        }
        strides
    }

    /// Same sizes and strides, and the same blocks.
    #[must_use]
    pub fn layout_eq(&self, other: &ArrMeta) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (
                Self::Dim { size: s1, stride: t1, element: e1 },
                Self::Dim { size: s2, stride: t2, element: e2 },
            ) => s1 == s2 && t1 == t2 && e1.layout_eq(e2),
            (Self::Blockref(a), Self::Blockref(b)) => match (a, b) {
                (Some(a), Some(b)) => MemBlockRef::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            },
            (Self::Struct { offsets: o1, fields: f1 }, Self::Struct { offsets: o2, fields: f2 }) => {
                o1 == o2 && f1.len() == f2.len() && f1.iter().zip(f2).all(|(a, b)| a.layout_eq(b))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynk_memblock::PodMemoryBlock;

    #[test]
    fn test_layout_eq_compares_strides() {
        let a = ArrMeta::dim(3, 8, ArrMeta::Empty);
        let b = ArrMeta::dim(3, 8, ArrMeta::Empty);
        let c = ArrMeta::dim(3, -8, ArrMeta::Empty);
        assert!(a.layout_eq(&b));
        assert!(!a.layout_eq(&c));
        assert!(!a.layout_eq(&ArrMeta::Empty));
    }

    #[test]
    fn test_layout_eq_compares_block_identity() {
        let block = MemBlockRef::new(PodMemoryBlock::new(1));
        let a = ArrMeta::Blockref(Some(block.clone()));
        let b = ArrMeta::Blockref(Some(block));
        let c = ArrMeta::Blockref(Some(MemBlockRef::new(PodMemoryBlock::new(1))));
        assert!(a.layout_eq(&b));
        assert!(!a.layout_eq(&c));
    }

    #[test]
    fn test_strides() {
        let meta = ArrMeta::dim(2, 24, ArrMeta::dim(3, 8, ArrMeta::Empty));
        assert_eq!(meta.strides(), vec![24, 8]);
        assert_eq!(meta.element().unwrap().size_stride(), Some((3, 8)));
    }
}
