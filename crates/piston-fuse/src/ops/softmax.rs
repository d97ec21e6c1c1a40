use derive_new::new;

use crate::{InvariantError, Operation, Signature, ValueType};

use super::{no_modules, tensor_inputs};

#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Softmax {
    pub axis: usize,
}

impl Operation for Softmax {
    fn name(&self) -> &'static str {
        "softmax"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let ts = tensor_inputs(self.name(), inputs, 1..=1)?;
        no_modules(self.name(), modules)?;
        if self.axis >= ts[0].rank() {
            return Err(InvariantError::DimOutOfRange {
                dim: self.axis,
                shape: ts[0].shape.clone(),
            });
        }
        Ok(ts[0].as_standard().into())
    }
}
