use derive_new::new;

use crate::{InvariantError, RVec, TensorType};

/// Reorders dimensions; the strides follow.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Permute {
    pub dims: RVec<usize>,
}

impl Permute {
    pub fn output(&self, src: &TensorType) -> Result<TensorType, InvariantError> {
        if self.dims.len() != src.rank() {
            return Err(InvariantError::RankMismatch {
                op: "transpose",
                accepted: src.rank()..=src.rank(),
                actual: self.dims.len(),
            });
        }
        let mut seen = vec![false; src.rank()];
        for &d in &self.dims {
            if d >= src.rank() {
                return Err(InvariantError::DimOutOfRange {
                    dim: d,
                    shape: src.shape.clone(),
                });
            }
            if std::mem::replace(&mut seen[d], true) {
                return Err(InvariantError::DuplicateDims);
            }
        }
        let shape: RVec<usize> = self.dims.iter().map(|&d| src.shape[d]).collect();
        Ok(TensorType::with_stride(
            src.dtype,
            shape,
            src.stride.permute(&self.dims),
        ))
    }
}
