use derive_new::new;
#[cfg(test)]
use test_strategy::Arbitrary;

use crate::{InvariantError, Operation, Signature, TensorType, ValueType};

use super::{no_modules, same_dims, same_dtype, tensor_inputs};

#[cfg_attr(test, derive(Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,
}

impl BinaryOp {
    pub fn kernel_name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Pow => "pow",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
        }
    }
}

/// Elementwise binary operation. Operands share dimensions; broadcasting is explicit.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binary {
    pub op: BinaryOp,
}

impl Operation for Binary {
    fn name(&self) -> &'static str {
        self.op.kernel_name()
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let op = self.name();
        let ts = tensor_inputs(op, inputs, 2..=2)?;
        no_modules(op, modules)?;
        let dims = same_dims(op, &ts)?;
        same_dtype(op, &ts)?;
        Ok(TensorType::new(ts[0].dtype, dims.clone()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;
    use test_strategy::proptest;

    #[proptest(cases = 16)]
    fn output_is_standard(op: BinaryOp) {
        let lhs = TensorType::with_stride(DType::F32, [4, 3], vec![0isize, 1]);
        let rhs = TensorType::new(DType::F32, [4, 3]);
        let out = Binary::new(op)
            .compute_type(&[lhs.into(), rhs.clone().into()], &[])
            .unwrap();
        proptest::prop_assert_eq!(out, rhs.into());
    }

    #[test]
    fn mismatched_dims() {
        let lhs = TensorType::new(DType::F32, [4, 3]);
        let rhs = TensorType::new(DType::F32, [1, 3]);
        assert!(matches!(
            Binary::new(BinaryOp::Add).compute_type(&[lhs.into(), rhs.into()], &[]),
            Err(InvariantError::ShapeMismatch { op: "add", .. })
        ));
    }
}
