use derive_new::new;

use crate::{InvariantError, Operation, Signature, ValueType};

use super::no_modules;

/// Selects one component of a multi-output value.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleElem {
    pub index: usize,
}

impl Operation for TupleElem {
    fn name(&self) -> &'static str {
        "get_tuple_elem"
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        no_modules(self.name(), modules)?;
        match inputs {
            [ValueType::Tuple(elements)] => elements
                .get(self.index)
                .cloned()
                .map(ValueType::Tensor)
                .ok_or(InvariantError::TupleIndex {
                    index: self.index,
                    len: elements.len(),
                }),
            [ValueType::Tensor(_)] => Err(InvariantError::ExpectedTuple { op: self.name() }),
            _ => Err(InvariantError::InputArity {
                op: self.name(),
                accepted: 1..=1,
                actual: inputs.len(),
            }),
        }
    }
}
