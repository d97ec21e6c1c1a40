use crate::{DType, InvariantError, Operation, Signature, TensorType, ValueType};

use super::{no_modules, same_dims, same_dtype, tensor_inputs};

/// `where(cond, on_true, on_false)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Where;

impl Operation for Where {
    fn name(&self) -> &'static str {
        "where"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let op = self.name();
        let ts = tensor_inputs(op, inputs, 3..=3)?;
        no_modules(op, modules)?;
        let dims = same_dims(op, &ts)?;
        if ts[0].dtype != DType::Bool {
            return Err(InvariantError::DTypeMismatch {
                op,
                expected: DType::Bool,
                actual: ts[0].dtype,
            });
        }
        same_dtype(op, &ts[1..])?;
        Ok(TensorType::new(ts[1].dtype, dims.clone()).into())
    }
}

/// `clip(x, min, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Clip;

impl Operation for Clip {
    fn name(&self) -> &'static str {
        "clip"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let op = self.name();
        let ts = tensor_inputs(op, inputs, 3..=3)?;
        no_modules(op, modules)?;
        let dims = same_dims(op, &ts)?;
        same_dtype(op, &ts)?;
        Ok(TensorType::new(ts[0].dtype, dims.clone()).into())
    }
}
