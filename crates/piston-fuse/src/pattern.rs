//! Operation pattern classification.

use crate::Op;

/// Coarse class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpPattern {
    /// Element-wise operations with 1:1 input-output mapping and same shape.
    Elemwise = 0,

    /// Shape-only operations: each output element is one input element.
    Injective = 1,

    /// Reductions and softmax.
    Reduce = 2,

    /// Anchors a fusion: dot, convolution, attention and offload calls.
    ComputeIntensive = 3,

    /// Boundaries (`@param`, `@literal`, `@return`). Never fused.
    Opaque = 4,
}

impl Op {
    pub fn pattern(&self) -> OpPattern {
        match self {
            Op::Unary(_)
            | Op::Binary(_)
            | Op::Where(_)
            | Op::Clip(_)
            | Op::Convert(_)
            | Op::Quantize(_)
            | Op::Dequantize(_)
            | Op::Pointwise(_) => OpPattern::Elemwise,
            Op::Reindex(_) | Op::TupleElem(_) => OpPattern::Injective,
            Op::Softmax(_) | Op::Reduce(_) | Op::SplitFusedReduce(_) => OpPattern::Reduce,
            Op::Dot(_) | Op::Conv(_) | Op::Attention(_) | Op::Offload(_) => {
                OpPattern::ComputeIntensive
            }
            Op::Param(_) | Op::Literal(_) | Op::Return(_) => OpPattern::Opaque,
        }
    }
}
