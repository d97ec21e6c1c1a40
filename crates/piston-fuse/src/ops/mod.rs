mod attention;
mod binary;
mod boundary;
mod cast;
mod conv;
mod matmul;
mod reduce;
mod region;
pub mod reindex;
mod softmax;
mod ternary;
mod tuple;
mod unary;

pub use attention::*;
pub use binary::*;
pub use boundary::*;
pub use cast::*;
pub use conv::*;
pub use matmul::*;
pub use reduce::*;
pub use region::*;
pub use reindex::*;
pub use softmax::*;
pub use ternary::*;
pub use tuple::*;
pub use unary::*;

use std::ops::RangeInclusive;

use crate::{InvariantError, Shape, Signature, TensorType, ValueType};

/// Checks the input count and that every input is a single tensor.
pub(crate) fn tensor_inputs<'a>(
    op: &'static str,
    inputs: &'a [ValueType],
    accepted: RangeInclusive<usize>,
) -> Result<Vec<&'a TensorType>, InvariantError> {
    if !accepted.contains(&inputs.len()) {
        return Err(InvariantError::InputArity {
            op,
            accepted,
            actual: inputs.len(),
        });
    }
    inputs.iter().map(|i| i.tensor(op)).collect()
}

pub(crate) fn no_modules(op: &'static str, modules: &[Signature]) -> Result<(), InvariantError> {
    if !modules.is_empty() {
        return Err(InvariantError::ModuleArity {
            op,
            accepted: 0..=0,
            actual: modules.len(),
        });
    }
    Ok(())
}

pub(crate) fn single_module<'a>(
    op: &'static str,
    modules: &'a [Signature],
) -> Result<&'a Signature, InvariantError> {
    match modules {
        [module] => Ok(module),
        _ => Err(InvariantError::ModuleArity {
            op,
            accepted: 1..=1,
            actual: modules.len(),
        }),
    }
}

/// All tensors must share dimensions; returns them.
pub(crate) fn same_dims<'a>(
    op: &'static str,
    tensors: &[&'a TensorType],
) -> Result<&'a Shape, InvariantError> {
    let first = &tensors[0].shape;
    for t in &tensors[1..] {
        if &t.shape != first {
            return Err(InvariantError::ShapeMismatch {
                lhs: first.clone(),
                rhs: t.shape.clone(),
                op,
            });
        }
    }
    Ok(first)
}

pub(crate) fn same_dtype(op: &'static str, tensors: &[&TensorType]) -> Result<(), InvariantError> {
    let expected = tensors[0].dtype;
    for t in &tensors[1..] {
        if t.dtype != expected {
            return Err(InvariantError::DTypeMismatch {
                op,
                expected,
                actual: t.dtype,
            });
        }
    }
    Ok(())
}

/// Inputs must match the module parameters in declaration order.
pub(crate) fn match_params(
    op: &'static str,
    inputs: &[&TensorType],
    module: &Signature,
) -> Result<(), InvariantError> {
    if inputs.len() != module.params.len() {
        return Err(InvariantError::InputArity {
            op,
            accepted: module.params.len()..=module.params.len(),
            actual: inputs.len(),
        });
    }
    for (index, (input, param)) in inputs.iter().zip(module.params.iter()).enumerate() {
        if !input.same_shape(param) {
            return Err(InvariantError::ParamMismatch {
                op,
                index,
                expected: param.clone(),
                actual: (*input).clone(),
            });
        }
    }
    Ok(())
}
