use derive_new::new;

use crate::{InvariantError, RVec, Shape, TensorType};

/// Materializes a row-major copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Contiguous;

#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Reshape {
    pub dims: Shape,
}

impl Reshape {
    pub fn output(&self, src: &TensorType) -> Result<TensorType, InvariantError> {
        if src.numel() != self.dims.numel() {
            return Err(InvariantError::ReshapeNumel {
                from: src.shape.clone(),
                to: self.dims.clone(),
            });
        }
        Ok(TensorType::new(src.dtype, self.dims.clone()))
    }
}

/// Drops unit dimensions; all of them when `axes` is empty.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Squeeze {
    pub axes: RVec<usize>,
}

impl Squeeze {
    pub fn output(&self, src: &TensorType) -> Result<TensorType, InvariantError> {
        let mut axes: Vec<usize> = if self.axes.is_empty() {
            (0..src.rank()).filter(|&i| src.shape[i] == 1).collect()
        } else {
            self.axes.to_vec()
        };
        axes.sort_unstable_by(|a, b| b.cmp(a));
        axes.dedup();
        let (mut shape, mut stride) = (src.shape.clone(), src.stride.clone());
        for axis in axes {
            if axis >= src.rank() || src.shape[axis] != 1 {
                return Err(InvariantError::InvalidAttribute {
                    op: "squeeze",
                    reason: format!("axis {axis} of {:?} is not a unit dimension", src.shape),
                });
            }
            shape.remove(axis);
            stride.remove(axis);
        }
        Ok(TensorType::with_stride(src.dtype, shape, stride))
    }
}

/// Inserts unit dimensions at `axes`, given as positions in the output.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Unsqueeze {
    pub axes: RVec<usize>,
}

impl Unsqueeze {
    pub fn output(&self, src: &TensorType) -> Result<TensorType, InvariantError> {
        let mut axes = self.axes.to_vec();
        axes.sort_unstable();
        let rank = src.rank() + axes.len();
        let (mut shape, mut stride) = (src.shape.clone(), src.stride.clone());
        for axis in axes {
            if axis >= rank || axis > shape.rank() {
                return Err(InvariantError::DimOutOfRange {
                    dim: axis,
                    shape: src.shape.clone(),
                });
            }
            let inner = if axis < shape.rank() {
                stride[axis] * shape[axis] as isize
            } else {
                1
            };
            shape.insert(axis, 1);
            stride.insert(axis, inner);
        }
        Ok(TensorType::with_stride(src.dtype, shape, stride))
    }
}

/// Collapses to 2-d around `axis`.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flatten {
    pub axis: usize,
}

impl Flatten {
    pub fn output(&self, src: &TensorType) -> Result<TensorType, InvariantError> {
        if self.axis > src.rank() {
            return Err(InvariantError::DimOutOfRange {
                dim: self.axis,
                shape: src.shape.clone(),
            });
        }
        let outer: usize = (*src.shape)[..self.axis].iter().product();
        let inner: usize = (*src.shape)[self.axis..].iter().product();
        Ok(TensorType::new(src.dtype, [outer, inner]))
    }
}
