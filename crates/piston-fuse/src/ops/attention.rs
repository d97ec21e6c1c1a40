use derive_new::new;

use crate::{DType, InvariantError, Operation, Signature, TensorType, ValueType};

use super::{no_modules, same_dims, tensor_inputs, Dot};

/// How the scaled scores are adjusted before the softmax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionMask {
    None,
    /// `scores + bias`
    Bias,
    /// `where(cond, scores, fill)`
    Select,
}

impl AttentionMask {
    pub fn from_arity(inputs: usize) -> Option<Self> {
        match inputs {
            3 => Some(AttentionMask::None),
            4 => Some(AttentionMask::Bias),
            5 => Some(AttentionMask::Select),
            _ => None,
        }
    }
}

/// Pre-composed attention: `dot(softmax(scale * dot(a, b) [mask]), v)`.
///
/// Inputs are `a, b, v`, `a, b, bias, v`, or `a, b, cond, fill, v`.
#[derive(new, Debug, Clone, PartialEq)]
pub struct Attention {
    pub scale: f32,
}

impl Operation for Attention {
    fn name(&self) -> &'static str {
        "gemm_softmax_gemm"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let op = self.name();
        let ts = tensor_inputs(op, inputs, 3..=5)?;
        no_modules(op, modules)?;
        let (a, b, v) = (ts[0], ts[1], ts[ts.len() - 1]);
        for t in [b, v] {
            if t.dtype != a.dtype {
                return Err(InvariantError::DTypeMismatch {
                    op,
                    expected: a.dtype,
                    actual: t.dtype,
                });
            }
        }
        let scores = Dot::output_shape(op, &a.shape, &b.shape)?;
        let out = Dot::output_shape(op, &scores, &v.shape)?;
        let scores_ty = TensorType::new(a.dtype, scores);
        match AttentionMask::from_arity(ts.len()) {
            Some(AttentionMask::Bias) => {
                same_dims(op, &[&scores_ty, ts[2]])?;
            }
            Some(AttentionMask::Select) => {
                same_dims(op, &[&scores_ty, ts[2], ts[3]])?;
                if ts[2].dtype != DType::Bool {
                    return Err(InvariantError::DTypeMismatch {
                        op,
                        expected: DType::Bool,
                        actual: ts[2].dtype,
                    });
                }
            }
            _ => {}
        }
        Ok(TensorType::new(a.dtype, out).into())
    }
}
