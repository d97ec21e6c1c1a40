use derive_new::new;

use crate::{InvariantError, RVec, TensorType};

/// Restricts `axes` to `[starts, ends)`. The view keeps the source strides.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub axes: RVec<usize>,
    pub starts: RVec<usize>,
    pub ends: RVec<usize>,
}

impl Slice {
    pub fn output(&self, src: &TensorType) -> Result<TensorType, InvariantError> {
        if self.axes.len() != self.starts.len() || self.axes.len() != self.ends.len() {
            return Err(InvariantError::InvalidAttribute {
                op: "slice",
                reason: "axes, starts and ends differ in length".into(),
            });
        }
        let mut shape = src.shape.clone();
        for ((&axis, &start), &end) in self.axes.iter().zip(&self.starts).zip(&self.ends) {
            if axis >= shape.rank() {
                return Err(InvariantError::DimOutOfRange {
                    dim: axis,
                    shape: src.shape.clone(),
                });
            }
            let end = end.min(shape[axis]);
            if start >= end {
                return Err(InvariantError::InvalidAttribute {
                    op: "slice",
                    reason: format!("empty range {start}..{end} on axis {axis}"),
                });
            }
            shape[axis] = end - start;
        }
        Ok(TensorType::with_stride(src.dtype, shape, src.stride.clone()))
    }
}
