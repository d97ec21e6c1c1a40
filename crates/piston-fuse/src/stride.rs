use std::ops::Index;
use std::slice::Iter;

use crate::{RVec, Shape};

/// Element strides of a tensor view. A zero stride marks a broadcast axis.
#[derive(Clone, PartialEq, Eq, Default, Hash)]
pub struct Stride(RVec<isize>);

impl Stride {
    pub fn new(stride: RVec<isize>) -> Self {
        Self(stride)
    }

    pub fn iter(&self) -> Iter<'_, isize> {
        self.0.iter()
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn permute(&self, perm: &[usize]) -> Self {
        Self(perm.iter().map(|&p| self.0[p]).collect())
    }

    pub fn remove(&mut self, index: usize) -> isize {
        self.0.remove(index)
    }

    pub fn insert(&mut self, index: usize, stride: isize) {
        self.0.insert(index, stride);
    }
}

impl std::fmt::Debug for Stride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut shape = format!("[{}", self.0.first().unwrap_or(&0));
        for dim in self.0.iter().skip(1) {
            shape.push_str(&format!("x{dim}"));
        }
        write!(f, "{shape}]")
    }
}

impl core::ops::Deref for Stride {
    type Target = [isize];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Index<usize> for Stride {
    type Output = isize;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl From<&Shape> for Stride {
    /// Row-major strides for `shape`.
    fn from(shape: &Shape) -> Self {
        let mut stride: RVec<isize> = shape.iter().map(|_| 0).collect();
        let mut acc = 1isize;
        for (s, &dim) in stride.iter_mut().zip(shape.iter()).rev() {
            *s = acc;
            acc *= dim as isize;
        }
        Self(stride)
    }
}

impl From<Vec<isize>> for Stride {
    fn from(stride: Vec<isize>) -> Self {
        Self(stride.into())
    }
}
