use derive_new::new;

use crate::{InvariantError, Operation, Shape, Signature, TensorType, ValueType};

use super::{no_modules, same_dtype, tensor_inputs};

/// Batched matrix multiply, `[..., m, k] x [..., k, n] -> [..., m, n]`.
///
/// The quantized form takes 8-bit operands and accumulates into
/// [`DType::quant_accumulator`](crate::DType::quant_accumulator).
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dot {
    pub quantized: bool,
}

impl Dot {
    /// Contraction length of a dot whose left operand has type `lhs`.
    pub fn contraction(lhs: &TensorType) -> usize {
        lhs.shape.last().unwrap_or(1)
    }

    pub(crate) fn output_shape(
        op: &'static str,
        lhs: &Shape,
        rhs: &Shape,
    ) -> Result<Shape, InvariantError> {
        for s in [lhs, rhs] {
            if s.rank() < 2 {
                return Err(InvariantError::RankMismatch {
                    op,
                    accepted: 2..=usize::MAX,
                    actual: s.rank(),
                });
            }
        }
        let (lr, rr) = (lhs.rank(), rhs.rank());
        if lhs.batch() != rhs.batch() || lhs[lr - 1] != rhs[rr - 2] {
            return Err(InvariantError::ShapeMismatch {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
                op,
            });
        }
        let mut out = Shape::from(lhs.batch());
        out.push(lhs[lr - 2]);
        out.push(rhs[rr - 1]);
        Ok(out)
    }
}

impl Operation for Dot {
    fn name(&self) -> &'static str {
        if self.quantized {
            "quant_dot"
        } else {
            "dot"
        }
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let op = self.name();
        let ts = tensor_inputs(op, inputs, 2..=2)?;
        no_modules(op, modules)?;
        same_dtype(op, &ts)?;
        let out = Self::output_shape(op, &ts[0].shape, &ts[1].shape)?;
        let dtype = if self.quantized {
            ts[0]
                .dtype
                .quant_accumulator()
                .ok_or(InvariantError::UnsupportedDType {
                    op,
                    dtype: ts[0].dtype,
                })?
        } else {
            ts[0].dtype
        };
        Ok(TensorType::new(dtype, out).into())
    }
}
