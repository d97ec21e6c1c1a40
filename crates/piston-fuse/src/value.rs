use std::fmt;

use crate::{DType, InvariantError, Shape, Stride};

/// Element type, dimensions and layout of one tensor value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub dtype: DType,
    pub shape: Shape,
    pub stride: Stride,
}

impl TensorType {
    /// A tensor with row-major strides.
    pub fn new(dtype: DType, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let stride = Stride::from(&shape);
        Self {
            dtype,
            shape,
            stride,
        }
    }

    pub fn with_stride(dtype: DType, shape: impl Into<Shape>, stride: impl Into<Stride>) -> Self {
        Self {
            dtype,
            shape: shape.into(),
            stride: stride.into(),
        }
    }

    pub fn scalar(dtype: DType) -> Self {
        Self::new(dtype, Shape::scalar())
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Number of elements spanned by the view in memory.
    pub fn element_space(&self) -> usize {
        if self.shape.iter().any(|&d| d == 0) {
            return 0;
        }
        self.shape
            .iter()
            .zip(self.stride.iter())
            .map(|(&d, &s)| (d - 1) * s.unsigned_abs())
            .sum::<usize>()
            + 1
    }

    /// Row-major and dense.
    pub fn is_standard(&self) -> bool {
        self.shape.is_contiguous(&self.stride)
    }

    pub fn is_broadcasted(&self) -> bool {
        self.stride.iter().any(|&s| s == 0)
    }

    /// Dense, possibly permuted.
    pub fn is_packed(&self) -> bool {
        !self.is_broadcasted() && self.numel() == self.element_space()
    }

    pub fn as_standard(&self) -> TensorType {
        TensorType::new(self.dtype, self.shape.clone())
    }

    pub fn with_dtype(&self, dtype: DType) -> TensorType {
        TensorType::new(dtype, self.shape.clone())
    }

    /// Same element type and dimensions. Strides are not compared.
    pub fn same_shape(&self, other: &TensorType) -> bool {
        self.dtype == other.dtype && self.shape == other.shape
    }
}

impl fmt::Debug for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.dtype, self.shape)?;
        if !self.is_standard() {
            write!(f, "{{{:?}}}", self.stride)?;
        }
        Ok(())
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Output type of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Tensor(TensorType),
    Tuple(Vec<TensorType>),
}

impl ValueType {
    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            ValueType::Tensor(t) => Some(t),
            ValueType::Tuple(_) => None,
        }
    }

    pub fn tensor(&self, op: &'static str) -> Result<&TensorType, InvariantError> {
        self.as_tensor().ok_or(InvariantError::ExpectedTensor { op })
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, ValueType::Tuple(_))
    }

    /// The component tensors: one for a tensor, each element for a tuple.
    pub fn elements(&self) -> Vec<TensorType> {
        match self {
            ValueType::Tensor(t) => vec![t.clone()],
            ValueType::Tuple(ts) => ts.clone(),
        }
    }

    /// Element-type and dimension equality across every component.
    pub fn same_shape(&self, other: &ValueType) -> bool {
        let (a, b) = (self.elements(), other.elements());
        a.len() == b.len()
            && self.is_tuple() == other.is_tuple()
            && a.iter().zip(b.iter()).all(|(x, y)| x.same_shape(y))
    }

    /// A single tensor for one element, a tuple otherwise.
    pub fn from_elements(mut elements: Vec<TensorType>) -> Self {
        if elements.len() == 1 {
            ValueType::Tensor(elements.remove(0))
        } else {
            ValueType::Tuple(elements)
        }
    }
}

impl From<TensorType> for ValueType {
    fn from(t: TensorType) -> Self {
        ValueType::Tensor(t)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Tensor(t) => write!(f, "{t}"),
            ValueType::Tuple(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Boundary types of a module: parameters in declaration order, then returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub params: Vec<TensorType>,
    pub returns: Vec<TensorType>,
}

impl Signature {
    pub fn output(&self) -> ValueType {
        ValueType::from_elements(self.returns.clone())
    }
}
