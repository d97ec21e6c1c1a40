use std::ops::RangeInclusive;

use crate::{DType, Shape, TensorType};

/// Shape-inference precondition failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantError {
    #[error("Shape mismatch in {op}: lhs: {lhs:?}, rhs: {rhs:?}.")]
    ShapeMismatch {
        lhs: Shape,
        rhs: Shape,
        op: &'static str,
    },
    #[error("Rank mismatch in {op}. {accepted:?} != {actual}.")]
    RankMismatch {
        op: &'static str,
        accepted: RangeInclusive<usize>,
        actual: usize,
    },
    #[error("Wrong input arity for {op}. Allowed range is {accepted:?}, node has {actual}.")]
    InputArity {
        op: &'static str,
        accepted: RangeInclusive<usize>,
        actual: usize,
    },
    #[error("Wrong module arity for {op}. Allowed range is {accepted:?}, node has {actual}.")]
    ModuleArity {
        op: &'static str,
        accepted: RangeInclusive<usize>,
        actual: usize,
    },
    #[error("DType mismatch in {op}, expected {expected:?}, got {actual:?}.")]
    DTypeMismatch {
        op: &'static str,
        expected: DType,
        actual: DType,
    },
    #[error("Unsupported DType {dtype:?} for {op}.")]
    UnsupportedDType { op: &'static str, dtype: DType },
    #[error("Duplicate dims in permutation.")]
    DuplicateDims,
    #[error("Broadcasting failed: {0:?}")]
    BroadcastingFailed(Vec<Shape>),
    #[error("Dim out of range {dim} in shape {shape:?}.")]
    DimOutOfRange { dim: usize, shape: Shape },
    #[error("Cannot reshape {from:?} into {to:?}.")]
    ReshapeNumel { from: Shape, to: Shape },
    #[error("{op} expects a tensor input, got a tuple.")]
    ExpectedTensor { op: &'static str },
    #[error("{op} expects a tuple input.")]
    ExpectedTuple { op: &'static str },
    #[error("Tuple index {index} out of range for {len} elements.")]
    TupleIndex { index: usize, len: usize },
    #[error("{op} input {index} is {actual:?} but the module parameter is {expected:?}.")]
    ParamMismatch {
        op: &'static str,
        index: usize,
        expected: TensorType,
        actual: TensorType,
    },
    #[error("{op} input {index} must be packed or broadcasted, got {ty:?}.")]
    InvalidLayout {
        op: &'static str,
        index: usize,
        ty: TensorType,
    },
    #[error("{op} module must return exactly {expected} value(s), got {actual}.")]
    ModuleReturns {
        op: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Literal holds {actual} elements but its type needs {expected}.")]
    LiteralSize { expected: usize, actual: usize },
    #[error("Invalid attribute for {op}: {reason}.")]
    InvalidAttribute { op: &'static str, reason: String },
}
