use derive_new::new;

use crate::{InvariantError, RVec, Shape, Stride, TensorType};

/// Places the source dimensions at `axis` of `to`; every other axis gets a zero stride.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub axis: usize,
    pub to: Shape,
}

impl Broadcast {
    pub fn output(&self, src: &TensorType) -> Result<TensorType, InvariantError> {
        let fits = self.axis + src.rank() <= self.to.rank()
            && src
                .shape
                .iter()
                .enumerate()
                .all(|(i, &d)| d == self.to[self.axis + i]);
        if !fits {
            return Err(InvariantError::BroadcastingFailed(vec![
                src.shape.clone(),
                self.to.clone(),
            ]));
        }
        let mut stride: RVec<isize> = self.to.iter().map(|_| 0).collect();
        for (i, &s) in src.stride.iter().enumerate() {
            stride[self.axis + i] = s;
        }
        Ok(TensorType::with_stride(
            src.dtype,
            self.to.clone(),
            Stride::new(stride),
        ))
    }
}

/// Numpy-style broadcast to `to`, aligning trailing dimensions.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct MultiBroadcast {
    pub to: Shape,
}

impl MultiBroadcast {
    pub fn output(&self, src: &TensorType) -> Result<TensorType, InvariantError> {
        let failed = || InvariantError::BroadcastingFailed(vec![src.shape.clone(), self.to.clone()]);
        if src.rank() > self.to.rank() {
            return Err(failed());
        }
        let offset = self.to.rank() - src.rank();
        let mut stride: RVec<isize> = self.to.iter().map(|_| 0).collect();
        for i in 0..src.rank() {
            let (from, to) = (src.shape[i], self.to[offset + i]);
            if from == to {
                stride[offset + i] = src.stride[i];
            } else if from != 1 {
                return Err(failed());
            }
        }
        Ok(TensorType::with_stride(
            src.dtype,
            self.to.clone(),
            Stride::new(stride),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{shape, DType};

    #[test]
    fn bias_broadcast_over_channels() {
        let bias = TensorType::new(DType::F32, [32]);
        let out = Broadcast::new(1, shape![1, 32, 8, 8]).output(&bias).unwrap();
        assert_eq!(&(*out.stride)[..], &[0, 1, 0, 0]);
        assert!(out.is_broadcasted());
    }

    #[test]
    fn multibroadcast_scalar() {
        let scalar = TensorType::scalar(DType::F16);
        let out = MultiBroadcast::new(shape![4, 4]).output(&scalar).unwrap();
        assert_eq!(&(*out.stride)[..], &[0, 0]);
        assert!(MultiBroadcast::new(shape![3])
            .output(&TensorType::new(DType::F16, [2]))
            .is_err());
    }
}
