use derive_new::new;

use crate::{InvariantError, Operation, RVec, Signature, TensorType, ValueType};

use super::{no_modules, tensor_inputs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
    Min,
}

impl ReduceOp {
    pub fn kernel_name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "reduce_sum",
            ReduceOp::Mean => "reduce_mean",
            ReduceOp::Max => "reduce_max",
            ReduceOp::Min => "reduce_min",
        }
    }
}

/// Reduction over `axes`. Reduced dimensions are kept with extent 1.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Reduce {
    pub op: ReduceOp,
    pub axes: RVec<usize>,
}

impl Operation for Reduce {
    fn name(&self) -> &'static str {
        self.op.kernel_name()
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let ts = tensor_inputs(self.name(), inputs, 1..=1)?;
        no_modules(self.name(), modules)?;
        let mut shape = ts[0].shape.clone();
        for &axis in &self.axes {
            if axis >= shape.rank() {
                return Err(InvariantError::DimOutOfRange {
                    dim: axis,
                    shape: ts[0].shape.clone(),
                });
            }
            shape[axis] = 1;
        }
        Ok(TensorType::new(ts[0].dtype, shape).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rvec, DType};

    #[test]
    fn keeps_reduced_dims() {
        let x = TensorType::new(DType::F32, [8, 16, 32]).into();
        let out = Reduce::new(ReduceOp::Mean, rvec![2])
            .compute_type(&[x], &[])
            .unwrap();
        assert_eq!(out, TensorType::new(DType::F32, [8, 16, 1]).into());
    }
}
