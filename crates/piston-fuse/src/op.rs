use crate::ops::*;
use crate::{DType, InvariantError, Shape, Signature, TensorType, ValueType};

/// A named computation with a pure type rule.
///
/// `modules` are the signatures of the sub-modules the instruction carries,
/// in the order they are attached.
pub trait Operation {
    fn name(&self) -> &'static str;

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError>;
}

/// Every operation a [`Program`](crate::Program) can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Param(Param),
    Literal(Literal),
    Return(Return),
    Dot(Dot),
    Conv(Conv),
    Attention(Attention),
    Unary(Unary),
    Binary(Binary),
    Where(Where),
    Clip(Clip),
    Convert(Convert),
    Quantize(Quantize),
    Dequantize(Dequantize),
    Softmax(Softmax),
    Reduce(Reduce),
    Reindex(Reindex),
    TupleElem(TupleElem),
    Pointwise(Pointwise),
    SplitFusedReduce(SplitFusedReduce),
    Offload(Offload),
}

impl Op {
    fn as_operation(&self) -> &dyn Operation {
        match self {
            Op::Param(o) => o,
            Op::Literal(o) => o,
            Op::Return(o) => o,
            Op::Dot(o) => o,
            Op::Conv(o) => o,
            Op::Attention(o) => o,
            Op::Unary(o) => o,
            Op::Binary(o) => o,
            Op::Where(o) => o,
            Op::Clip(o) => o,
            Op::Convert(o) => o,
            Op::Quantize(o) => o,
            Op::Dequantize(o) => o,
            Op::Softmax(o) => o,
            Op::Reduce(o) => o,
            Op::Reindex(o) => o,
            Op::TupleElem(o) => o,
            Op::Pointwise(o) => o,
            Op::SplitFusedReduce(o) => o,
            Op::Offload(o) => o,
        }
    }

    pub fn is_param(&self) -> bool {
        matches!(self, Op::Param(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Op::Literal(_))
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Op::Return(_))
    }

    /// `@param`, `@literal` and `@return`.
    pub fn is_boundary(&self) -> bool {
        matches!(self, Op::Param(_) | Op::Literal(_) | Op::Return(_))
    }

    pub fn is_reshaper(&self) -> bool {
        matches!(self, Op::Reindex(_))
    }

    pub fn as_reindex(&self) -> Option<&Reindex> {
        match self {
            Op::Reindex(r) => Some(r),
            _ => None,
        }
    }

    pub fn param_name(&self) -> Option<&str> {
        match self {
            Op::Param(p) => Some(&p.name),
            _ => None,
        }
    }

    pub fn param(name: impl Into<String>, ty: TensorType) -> Self {
        Op::Param(Param::new(name.into(), ty))
    }

    pub fn ret() -> Self {
        Op::Return(Return)
    }

    pub fn dot() -> Self {
        Op::Dot(Dot::new(false))
    }

    pub fn quant_dot() -> Self {
        Op::Dot(Dot::new(true))
    }

    pub fn unary(op: UnaryOp) -> Self {
        Op::Unary(Unary::new(op))
    }

    pub fn binary(op: BinaryOp) -> Self {
        Op::Binary(Binary::new(op))
    }

    pub fn add() -> Self {
        Self::binary(BinaryOp::Add)
    }

    pub fn mul() -> Self {
        Self::binary(BinaryOp::Mul)
    }

    pub fn relu() -> Self {
        Self::unary(UnaryOp::Relu)
    }

    pub fn convert(to: DType) -> Self {
        Op::Convert(Convert::new(to))
    }

    pub fn softmax(axis: usize) -> Self {
        Op::Softmax(Softmax::new(axis))
    }

    pub fn contiguous() -> Self {
        Op::Reindex(Reindex::Contiguous(Contiguous))
    }

    pub fn reshape(dims: impl Into<Shape>) -> Self {
        Op::Reindex(Reindex::reshape(dims))
    }

    pub fn multibroadcast(to: impl Into<Shape>) -> Self {
        Op::Reindex(Reindex::MultiBroadcast(MultiBroadcast::new(to.into())))
    }

    pub fn tuple_elem(index: usize) -> Self {
        Op::TupleElem(TupleElem::new(index))
    }

    pub fn offload(anchor: Op) -> Self {
        Op::Offload(Offload::new(anchor))
    }
}

impl Operation for Op {
    fn name(&self) -> &'static str {
        self.as_operation().name()
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        self.as_operation().compute_type(inputs, modules)
    }
}

macro_rules! impl_from_op {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Op {
                fn from(op: $variant) -> Self {
                    Op::$variant(op)
                }
            }
        )*
    };
}

impl_from_op!(
    Param,
    Literal,
    Dot,
    Conv,
    Attention,
    Unary,
    Binary,
    Where,
    Clip,
    Convert,
    Quantize,
    Dequantize,
    Softmax,
    Reduce,
    Reindex,
    TupleElem,
    Pointwise,
    SplitFusedReduce,
    Offload,
);

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Param(p) => write!(f, "@param:{}", p.name),
            Op::Offload(o) => write!(f, "offload[{}]", o.anchor.name()),
            Op::Attention(a) => write!(f, "gemm_softmax_gemm[scale={}]", a.scale),
            Op::Conv(c) if c.group > 1 => write!(f, "{}[group={}]", self.name(), c.group),
            Op::Reindex(r) => write!(f, "{}", r.name()),
            _ => f.write_str(self.name()),
        }
    }
}
