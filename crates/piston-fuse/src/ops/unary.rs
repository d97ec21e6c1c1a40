use derive_new::new;
#[cfg(test)]
use test_strategy::Arbitrary;

use crate::{InvariantError, Operation, Signature, ValueType};

use super::{no_modules, tensor_inputs};

#[cfg_attr(test, derive(Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Abs,
    Neg,
    Relu,
    Exp,
    Log,
    Sqrt,
    Rsqrt,
    Recip,
    Sigmoid,
    Tanh,
    Erf,
    Ceil,
    Floor,
}

impl UnaryOp {
    pub fn kernel_name(&self) -> &'static str {
        match self {
            UnaryOp::Abs => "abs",
            UnaryOp::Neg => "neg",
            UnaryOp::Relu => "relu",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Rsqrt => "rsqrt",
            UnaryOp::Recip => "recip",
            UnaryOp::Sigmoid => "sigmoid",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Erf => "erf",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Floor => "floor",
        }
    }

    /// Only meaningful on floating-point values.
    pub fn is_transcendental(&self) -> bool {
        !matches!(self, UnaryOp::Abs | UnaryOp::Neg | UnaryOp::Relu)
    }
}

#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unary {
    pub op: UnaryOp,
}

impl Operation for Unary {
    fn name(&self) -> &'static str {
        self.op.kernel_name()
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let ts = tensor_inputs(self.name(), inputs, 1..=1)?;
        no_modules(self.name(), modules)?;
        Ok(ts[0].as_standard().into())
    }
}
