//! Operations that carry a sub-module.
use derive_new::new;

use crate::{InvariantError, Op, Operation, RVec, Signature, TensorType, ValueType};

use super::{match_params, same_dims, single_module, tensor_inputs};

/// Elementwise computation described by a scalar-bodied module.
///
/// All inputs share dimensions; the output takes those dimensions and the
/// element type the body returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pointwise;

impl Operation for Pointwise {
    fn name(&self) -> &'static str {
        "pointwise"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let op = self.name();
        let ts = tensor_inputs(op, inputs, 1..=usize::MAX)?;
        let body = single_module(op, modules)?;
        let dims = same_dims(op, &ts)?;
        if body.params.len() != ts.len() {
            return Err(InvariantError::InputArity {
                op,
                accepted: body.params.len()..=body.params.len(),
                actual: ts.len(),
            });
        }
        for (t, p) in ts.iter().zip(body.params.iter()) {
            if t.dtype != p.dtype {
                return Err(InvariantError::DTypeMismatch {
                    op,
                    expected: p.dtype,
                    actual: t.dtype,
                });
            }
        }
        match body.returns.as_slice() {
            [ret] => Ok(TensorType::new(ret.dtype, dims.clone()).into()),
            other => Err(InvariantError::ModuleReturns {
                op,
                expected: 1,
                actual: other.len(),
            }),
        }
    }
}

/// A reduction, split across workgroups, together with its fused prologue and epilogue.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct SplitFusedReduce {
    pub axes: RVec<usize>,
}

impl Operation for SplitFusedReduce {
    fn name(&self) -> &'static str {
        "split_fused_reduce"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let op = self.name();
        let ts = tensor_inputs(op, inputs, 1..=usize::MAX)?;
        let body = single_module(op, modules)?;
        match_params(op, &ts, body)?;
        if body.returns.is_empty() {
            return Err(InvariantError::ModuleReturns {
                op,
                expected: 1,
                actual: 0,
            });
        }
        Ok(body.output())
    }
}

/// Call into a bypass region compiled by the offload backend.
///
/// `anchor` is the dot, convolution or attention operation the region is
/// built around.
#[derive(Debug, Clone, PartialEq)]
pub struct Offload {
    pub anchor: Box<Op>,
}

impl Offload {
    pub fn new(anchor: Op) -> Self {
        Self {
            anchor: Box::new(anchor),
        }
    }
}

impl Operation for Offload {
    fn name(&self) -> &'static str {
        "offload"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let op = self.name();
        let ts = tensor_inputs(op, inputs, 2..=usize::MAX)?;
        let region = single_module(op, modules)?;
        for (index, t) in ts.iter().enumerate() {
            if !(t.is_packed() || t.is_broadcasted()) {
                return Err(InvariantError::InvalidLayout {
                    op,
                    index,
                    ty: (*t).clone(),
                });
            }
        }
        match_params(op, &ts, region)?;
        if region.returns.is_empty() {
            return Err(InvariantError::ModuleReturns {
                op,
                expected: 1,
                actual: 0,
            });
        }
        Ok(region.output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    fn scalar_body(n: usize, ret: DType) -> Signature {
        Signature {
            params: vec![TensorType::scalar(DType::F32); n],
            returns: vec![TensorType::scalar(ret)],
        }
    }

    #[test]
    fn pointwise_takes_body_dtype() {
        let x = TensorType::new(DType::F32, [4, 8]);
        let out = Pointwise
            .compute_type(&[x.clone().into(), x.into()], &[scalar_body(2, DType::Bool)])
            .unwrap();
        assert_eq!(out, TensorType::new(DType::Bool, [4, 8]).into());
    }

    #[test]
    fn offload_rejects_sliced_inputs() {
        let sliced = TensorType::with_stride(DType::F32, [2, 2], vec![3isize, 1]);
        let region = Signature {
            params: vec![sliced.as_standard(); 2],
            returns: vec![sliced.as_standard()],
        };
        let res = Offload::new(Op::Dot(Default::default()))
            .compute_type(&[sliced.clone().into(), sliced.into()], &[region]);
        assert!(matches!(res, Err(InvariantError::InvalidLayout { index: 0, .. })));
    }

    #[test]
    fn offload_returns_region_tuple() {
        let a = TensorType::new(DType::F16, [8, 8]);
        let b = TensorType::new(DType::F16, [8, 1]);
        let region = Signature {
            params: vec![a.clone(), a.clone()],
            returns: vec![b.clone(), a.clone()],
        };
        let out = Offload::new(Op::Dot(Default::default()))
            .compute_type(&[a.clone().into(), a.clone().into()], &[region])
            .unwrap();
        assert_eq!(out, ValueType::Tuple(vec![b, a]));
    }
}
