use crate::{rvec, DType, InvariantError, Operation, RVec, Shape, Signature, TensorType, ValueType};

use super::{no_modules, same_dtype, tensor_inputs};

/// N-d convolution over `[N, C, spatial...]` with weights `[K, C / group, kernel...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conv {
    pub padding: RVec<usize>,
    pub stride: RVec<usize>,
    pub dilation: RVec<usize>,
    pub group: usize,
    pub quantized: bool,
}

impl Conv {
    /// Unpadded, unit-stride convolution over `spatial` dimensions.
    pub fn new(spatial: usize) -> Self {
        Self {
            padding: rvec![0; spatial],
            stride: rvec![1; spatial],
            dilation: rvec![1; spatial],
            group: 1,
            quantized: false,
        }
    }

    pub fn with_group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding.iter_mut().for_each(|p| *p = padding);
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride.iter_mut().for_each(|s| *s = stride);
        self
    }

    pub fn quantized(mut self) -> Self {
        self.quantized = true;
        self
    }

    pub fn spatial(&self) -> usize {
        self.padding.len()
    }

    fn output_dtype(&self, op: &'static str, input: DType) -> Result<DType, InvariantError> {
        if !self.quantized {
            return Ok(input);
        }
        input
            .quant_accumulator()
            .ok_or(InvariantError::UnsupportedDType { op, dtype: input })
    }
}

impl Operation for Conv {
    fn name(&self) -> &'static str {
        if self.quantized {
            "quant_convolution"
        } else {
            "convolution"
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
        let (input, weights) = (&ts[0].shape, &ts[1].shape);
        let rank = self.spatial() + 2;
        for s in [input, weights] {
            if s.rank() != rank {
                return Err(InvariantError::RankMismatch {
                    op,
                    accepted: rank..=rank,
                    actual: s.rank(),
                });
            }
        }
        if self.stride.len() != self.spatial() || self.dilation.len() != self.spatial() {
            return Err(InvariantError::InvalidAttribute {
                op,
                reason: "padding, stride and dilation must cover every spatial dim".into(),
            });
        }
        if self.group == 0 || input[1] != weights[1] * self.group || weights[0] % self.group != 0
        {
            return Err(InvariantError::ShapeMismatch {
                lhs: input.clone(),
                rhs: weights.clone(),
                op,
            });
        }

        let mut out: Shape = Shape::new(rvec![input[0], weights[0]]);
        for i in 0..self.spatial() {
            let padded = input[i + 2] + 2 * self.padding[i];
            let window = self.dilation[i] * weights[i + 2].saturating_sub(1) + 1;
            if window > padded || self.stride[i] == 0 {
                return Err(InvariantError::InvalidAttribute {
                    op,
                    reason: format!("kernel window {window} exceeds padded input {padded}"),
                });
            }
            out.push((padded - window) / self.stride[i] + 1);
        }
        Ok(TensorType::new(self.output_dtype(op, ts[0].dtype)?, out).into())
    }
}
