use derive_new::new;
use half::f16;

use crate::{DType, InvariantError, Operation, Signature, TensorType, ValueType};

use super::{no_modules, tensor_inputs};

/// Named module input.
#[derive(new, Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TensorType,
}

impl Operation for Param {
    fn name(&self) -> &'static str {
        "@param"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        tensor_inputs(self.name(), inputs, 0..=0)?;
        no_modules(self.name(), modules)?;
        Ok(self.ty.clone().into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    I8(Vec<i8>),
    I32(Vec<i32>),
    Bool(Vec<bool>),
}

impl LiteralData {
    pub fn len(&self) -> usize {
        match self {
            LiteralData::F32(v) => v.len(),
            LiteralData::F16(v) => v.len(),
            LiteralData::I8(v) => v.len(),
            LiteralData::I32(v) => v.len(),
            LiteralData::Bool(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this storage can back a tensor of `dtype`. Fp8 values are held as f32.
    pub fn holds(&self, dtype: DType) -> bool {
        matches!(
            (self, dtype),
            (LiteralData::F32(_), DType::F32 | DType::Fp8E4M3Fnuz)
                | (LiteralData::F16(_), DType::F16)
                | (LiteralData::I8(_), DType::I8 | DType::U8)
                | (LiteralData::I32(_), DType::I32 | DType::I64)
                | (LiteralData::Bool(_), DType::Bool)
        )
    }
}

/// Embedded constant tensor.
#[derive(new, Debug, Clone, PartialEq)]
pub struct Literal {
    pub ty: TensorType,
    pub data: LiteralData,
}

impl Literal {
    /// A one-element literal of a floating `dtype`.
    pub fn scalar(dtype: DType, value: f32) -> Result<Self, InvariantError> {
        let data = match dtype {
            DType::F32 | DType::Fp8E4M3Fnuz => LiteralData::F32(vec![value]),
            DType::F16 => LiteralData::F16(vec![f16::from_f32(value)]),
            _ => {
                return Err(InvariantError::UnsupportedDType {
                    op: "@literal",
                    dtype,
                })
            }
        };
        Ok(Self::new(TensorType::scalar(dtype), data))
    }
}

impl Operation for Literal {
    fn name(&self) -> &'static str {
        "@literal"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        tensor_inputs(self.name(), inputs, 0..=0)?;
        no_modules(self.name(), modules)?;
        if !self.data.holds(self.ty.dtype) {
            return Err(InvariantError::UnsupportedDType {
                op: self.name(),
                dtype: self.ty.dtype,
            });
        }
        if self.data.len() != self.ty.numel() {
            return Err(InvariantError::LiteralSize {
                expected: self.ty.numel(),
                actual: self.data.len(),
            });
        }
        Ok(self.ty.clone().into())
    }
}

/// Terminal instruction of a module. Several inputs return a tuple.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Return;

impl Operation for Return {
    fn name(&self) -> &'static str {
        "@return"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let tensors = tensor_inputs(self.name(), inputs, 1..=usize::MAX)?;
        no_modules(self.name(), modules)?;
        Ok(ValueType::from_elements(
            tensors.into_iter().cloned().collect(),
        ))
    }
}
