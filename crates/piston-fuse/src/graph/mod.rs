//! Instruction graph: an arena of instructions grouped into ordered modules.
mod display;
mod program;
mod verify;

pub use program::*;
pub use verify::*;

use slotmap::new_key_type;

use crate::{InvariantError, Op, Operation, RVec, TensorType, ValueType};

new_key_type! {
    /// Stable handle of an instruction.
    pub struct InsId;

    /// Stable handle of a module.
    pub struct ModuleId;
}

/// A node in a module.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) op: Op,
    pub(crate) inputs: RVec<InsId>,
    pub(crate) module_inputs: RVec<ModuleId>,
    pub(crate) ty: ValueType,
    /// Consumers, each listed once.
    pub(crate) outputs: RVec<InsId>,
    pub(crate) module: ModuleId,
}

impl Instruction {
    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    pub fn inputs(&self) -> &[InsId] {
        &self.inputs
    }

    pub fn module_inputs(&self) -> &[ModuleId] {
        &self.module_inputs
    }

    pub fn ty(&self) -> &ValueType {
        &self.ty
    }

    pub fn tensor(&self) -> Result<&TensorType, InvariantError> {
        self.ty.tensor(self.op.name())
    }

    pub fn outputs(&self) -> &[InsId] {
        &self.outputs
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }
}

/// An ordered, acyclic sequence of instructions.
///
/// A bypass region is a detached module hosting a fused computation; it is
/// referenced by the `offload` call that owns it.
#[derive(Debug, Clone)]
pub struct Module {
    pub(crate) name: String,
    pub(crate) order: Vec<InsId>,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &[InsId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, ins: InsId) -> Option<usize> {
        self.order.iter().position(|&i| i == ins)
    }

    pub fn last(&self) -> Option<InsId> {
        self.order.last().copied()
    }
}
