use derive_new::new;

use crate::{DType, InvariantError, Operation, Signature, TensorType, ValueType};

use super::{no_modules, same_dims, tensor_inputs};

#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convert {
    pub to: DType,
}

impl Operation for Convert {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let ts = tensor_inputs(self.name(), inputs, 1..=1)?;
        no_modules(self.name(), modules)?;
        Ok(ts[0].with_dtype(self.to).into())
    }
}

/// `quantizelinear(x, scale[, zero_point])`. Without a zero point the result is `U8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quantize;

impl Operation for Quantize {
    fn name(&self) -> &'static str {
        "quantizelinear"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let op = self.name();
        let ts = tensor_inputs(op, inputs, 2..=3)?;
        no_modules(op, modules)?;
        let dims = same_dims(op, &ts)?;
        let dtype = ts.get(2).map(|zp| zp.dtype).unwrap_or(DType::U8);
        Ok(TensorType::new(dtype, dims.clone()).into())
    }
}

/// `dequantizelinear(x, scale[, zero_point])`, producing the scale's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dequantize;

impl Operation for Dequantize {
    fn name(&self) -> &'static str {
        "dequantizelinear"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let op = self.name();
        let ts = tensor_inputs(op, inputs, 2..=3)?;
        no_modules(op, modules)?;
        let dims = same_dims(op, &ts)?;
        Ok(TensorType::new(ts[1].dtype, dims.clone()).into())
    }
}
