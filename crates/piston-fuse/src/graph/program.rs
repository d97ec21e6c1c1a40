use std::ops::Index;

use slotmap::SlotMap;

use super::{InsId, Instruction, Module, ModuleId};
use crate::ops::Literal;
use crate::{HashMap, HashSet, InvariantError, Op, Operation, RVec, Signature, TensorType, ValueType};

/// Structural edit failures.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Unknown module {0:?}.")]
    UnknownModule(ModuleId),
    #[error("Unknown instruction {0:?}.")]
    UnknownInstruction(InsId),
    #[error("Module {0:?} already exists.")]
    DuplicateModule(String),
    #[error("Parameter {name:?} is already declared in module {module:?}.")]
    DuplicateParam { module: String, name: String },
    #[error("Module {0:?} already has a return.")]
    DuplicateReturn(String),
    #[error("Nothing may follow the return of module {0:?}.")]
    AfterReturn(String),
    #[error("The main module cannot be removed.")]
    RemoveMain,
    #[error("Instruction {ins:?} is not part of module {module:?}.")]
    ForeignInstruction { ins: InsId, module: String },
    #[error("{name} still has {consumers} consumer(s).")]
    StillConsumed { name: &'static str, consumers: usize },
    #[error("Cannot replace a {from} value with a {to} value.")]
    TypeMismatch { from: ValueType, to: ValueType },
    #[error("{name} would be placed before its input {input:?}.")]
    OrderViolation { name: &'static str, input: InsId },
    #[error(transparent)]
    Invariant(#[from] InvariantError),
}

/// A tensor program: one arena of instructions and the modules that order them.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) instructions: SlotMap<InsId, Instruction>,
    pub(crate) modules: SlotMap<ModuleId, Module>,
    by_name: HashMap<String, ModuleId>,
    main: ModuleId,
}

impl Program {
    pub const MAIN: &'static str = "main";

    pub fn new() -> Self {
        let mut modules = SlotMap::with_key();
        let main = modules.insert(Module {
            name: Self::MAIN.to_string(),
            order: Vec::new(),
        });
        let mut by_name = HashMap::default();
        by_name.insert(Self::MAIN.to_string(), main);
        Self {
            instructions: SlotMap::with_key(),
            modules,
            by_name,
            main,
        }
    }

    pub fn main(&self) -> ModuleId {
        self.main
    }

    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules.iter()
    }

    pub fn get(&self, id: InsId) -> Option<&Instruction> {
        self.instructions.get(id)
    }

    pub fn contains(&self, id: InsId) -> bool {
        self.instructions.contains_key(id)
    }

    /// Number of live instructions across all modules.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Creates an empty bypass region.
    pub fn create_module(&mut self, name: impl Into<String>) -> Result<ModuleId, GraphError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(GraphError::DuplicateModule(name));
        }
        let id = self.modules.insert(Module {
            name: name.clone(),
            order: Vec::new(),
        });
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Copies `src` into a new bypass region. Returns the region and the
    /// mapping from source instructions to their copies.
    pub fn copy_module(
        &mut self,
        src: ModuleId,
        name: impl Into<String>,
    ) -> Result<(ModuleId, HashMap<InsId, InsId>), GraphError> {
        let order = self.check_module(src)?.order.clone();
        let dst = self.create_module(name)?;
        let mut map = HashMap::default();
        for ins in order {
            let inst = self.check_ins(ins)?.clone();
            let inputs = inst
                .inputs
                .iter()
                .map(|i| map.get(i).copied().ok_or(GraphError::UnknownInstruction(*i)))
                .collect::<Result<RVec<_>, _>>()?;
            let end = self.modules[dst].order.len();
            let copy = self.insert_at(dst, end, inst.op, &inputs, &inst.module_inputs)?;
            map.insert(ins, copy);
        }
        Ok((dst, map))
    }

    pub fn remove_module(&mut self, id: ModuleId) -> Result<(), GraphError> {
        if id == self.main {
            return Err(GraphError::RemoveMain);
        }
        let module = self
            .modules
            .remove(id)
            .ok_or(GraphError::UnknownModule(id))?;
        self.by_name.remove(&module.name);
        for &ins in module.order.iter().rev() {
            if let Some(inst) = self.instructions.remove(ins) {
                for input in inst.inputs {
                    self.remove_output(input, ins);
                }
            }
        }
        Ok(())
    }

    /// Declares a module parameter after the existing ones.
    pub fn add_parameter(
        &mut self,
        m: ModuleId,
        name: impl Into<String>,
        ty: TensorType,
    ) -> Result<InsId, GraphError> {
        let name = name.into();
        if self.parameter(m, &name).is_some() {
            return Err(GraphError::DuplicateParam {
                module: self.check_module(m)?.name.clone(),
                name,
            });
        }
        let index = self.after_params(m)?;
        self.insert_at(m, index, Op::param(name, ty), &[], &[])
    }

    /// Adds a constant right after the parameters.
    pub fn add_literal(&mut self, m: ModuleId, literal: Literal) -> Result<InsId, GraphError> {
        let index = self.after_params(m)?;
        self.insert_at(m, index, Op::Literal(literal), &[], &[])
    }

    /// Appends to `m`, keeping its return last.
    pub fn add_instruction(
        &mut self,
        m: ModuleId,
        op: impl Into<Op>,
        inputs: &[InsId],
        module_inputs: &[ModuleId],
    ) -> Result<InsId, GraphError> {
        let module = self.check_module(m)?;
        let index = match module.last() {
            Some(last) if self.instructions[last].op.is_return() => module.len() - 1,
            _ => module.len(),
        };
        self.insert_at(m, index, op.into(), inputs, module_inputs)
    }

    /// Inserts before `pos`.
    pub fn insert_instruction(
        &mut self,
        pos: InsId,
        op: impl Into<Op>,
        inputs: &[InsId],
        module_inputs: &[ModuleId],
    ) -> Result<InsId, GraphError> {
        let (m, index) = self.locate(pos)?;
        self.insert_at(m, index, op.into(), inputs, module_inputs)
    }

    /// Inserts right after `pos`.
    pub fn insert_after(
        &mut self,
        pos: InsId,
        op: impl Into<Op>,
        inputs: &[InsId],
        module_inputs: &[ModuleId],
    ) -> Result<InsId, GraphError> {
        let (m, index) = self.locate(pos)?;
        if self.instructions[pos].op.is_return() {
            return Err(GraphError::AfterReturn(self.modules[m].name.clone()));
        }
        self.insert_at(m, index + 1, op.into(), inputs, module_inputs)
    }

    pub fn add_return(&mut self, m: ModuleId, inputs: &[InsId]) -> Result<InsId, GraphError> {
        if self.return_of(m).is_some() {
            return Err(GraphError::DuplicateReturn(self.modules[m].name.clone()));
        }
        let end = self.check_module(m)?.len();
        self.insert_at(m, end, Op::ret(), inputs, &[])
    }

    /// Rewires every consumer of `old` (other than `new` itself) to `new`.
    ///
    /// Both must have the same element types and dimensions, and `new` must
    /// precede every rewired consumer.
    pub fn replace_instruction(&mut self, old: InsId, new: InsId) -> Result<(), GraphError> {
        let (from, to) = (self.check_ins(old)?.ty.clone(), self.check_ins(new)?.ty.clone());
        if !from.same_shape(&to) {
            return Err(GraphError::TypeMismatch { from, to });
        }
        let (m, new_pos) = self.locate(new)?;
        let consumers: Vec<InsId> = self.instructions[old]
            .outputs
            .iter()
            .copied()
            .filter(|&c| c != new)
            .collect();
        for &c in &consumers {
            match self.modules[m].position(c) {
                Some(pos) if pos > new_pos => {}
                _ => {
                    return Err(GraphError::OrderViolation {
                        name: self.instructions[c].op.name(),
                        input: new,
                    })
                }
            }
        }
        for c in consumers {
            self.replace_argument(c, old, new)?;
        }
        Ok(())
    }

    /// Swaps `old` for `new` in the inputs of `ins` and re-derives its type.
    pub fn replace_argument(&mut self, ins: InsId, old: InsId, new: InsId) -> Result<(), GraphError> {
        let entry = self
            .instructions
            .get_mut(ins)
            .ok_or(GraphError::UnknownInstruction(ins))?;
        entry
            .inputs
            .iter_mut()
            .filter(|i| **i == old)
            .for_each(|i| *i = new);
        self.remove_output(old, ins);
        self.add_output(new, ins);
        self.refresh_type(ins)
    }

    /// Replaces the operation and operands of `ins` in place. The instruction
    /// keeps its identity and consumers, so the new type must match the old
    /// one in element type and dimensions.
    pub fn replace_with(
        &mut self,
        ins: InsId,
        op: impl Into<Op>,
        inputs: &[InsId],
        module_inputs: &[ModuleId],
    ) -> Result<(), GraphError> {
        let op = op.into();
        let (m, index) = self.locate(ins)?;
        self.check_placement(m, index, op.name(), inputs)?;
        let ty = self.infer(&op, inputs, module_inputs)?;
        let old = &self.instructions[ins];
        if !old.ty.same_shape(&ty) {
            return Err(GraphError::TypeMismatch {
                from: old.ty.clone(),
                to: ty,
            });
        }
        let old_inputs = std::mem::take(&mut self.instructions[ins].inputs);
        for input in old_inputs {
            self.remove_output(input, ins);
        }
        for &input in inputs {
            self.add_output(input, ins);
        }
        let entry = &mut self.instructions[ins];
        entry.op = op;
        entry.inputs = inputs.into();
        entry.module_inputs = module_inputs.into();
        if entry.ty != ty {
            entry.ty = ty;
            let consumers = entry.outputs.clone();
            for c in consumers {
                self.refresh_type(c)?;
            }
        }
        Ok(())
    }

    /// Removes an instruction nobody consumes.
    pub fn remove_instruction(&mut self, ins: InsId) -> Result<(), GraphError> {
        let inst = self.check_ins(ins)?;
        if !inst.outputs.is_empty() {
            return Err(GraphError::StillConsumed {
                name: inst.op.name(),
                consumers: inst.outputs.len(),
            });
        }
        let (m, index) = self.locate(ins)?;
        self.modules[m].order.remove(index);
        if let Some(inst) = self.instructions.remove(ins) {
            for input in inst.inputs {
                self.remove_output(input, ins);
            }
        }
        Ok(())
    }

    /// Relocates `ins` to just before `pos` in the same module.
    pub fn move_before(&mut self, ins: InsId, pos: InsId) -> Result<(), GraphError> {
        let (m, from) = self.locate(ins)?;
        let (pm, _) = self.locate(pos)?;
        if m != pm {
            return Err(GraphError::ForeignInstruction {
                ins,
                module: self.modules[pm].name.clone(),
            });
        }
        let order = &mut self.modules[m].order;
        order.remove(from);
        let to = order
            .iter()
            .position(|&i| i == pos)
            .ok_or(GraphError::UnknownInstruction(pos))?;
        order.insert(to, ins);
        Ok(())
    }

    /// Whether `to` depends on `from` through its inputs, or is `from`.
    pub fn reaches(&self, from: InsId, to: InsId) -> bool {
        let mut visited = HashSet::default();
        let mut stack = vec![to];
        while let Some(id) = stack.pop() {
            if id == from {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(inst) = self.instructions.get(id) {
                stack.extend(inst.inputs.iter().copied());
            }
        }
        false
    }

    /// Parameters of `m` in declaration order.
    pub fn parameters(&self, m: ModuleId) -> Vec<InsId> {
        self.modules
            .get(m)
            .map(|module| {
                module
                    .order
                    .iter()
                    .copied()
                    .filter(|&i| self.instructions[i].op.is_param())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn parameter(&self, m: ModuleId, name: &str) -> Option<InsId> {
        self.parameters(m)
            .into_iter()
            .find(|&i| self.instructions[i].op.param_name() == Some(name))
    }

    pub fn return_of(&self, m: ModuleId) -> Option<InsId> {
        let last = self.modules.get(m)?.last()?;
        self.instructions[last].op.is_return().then_some(last)
    }

    pub fn signature(&self, m: ModuleId) -> Result<Signature, GraphError> {
        let module = self.check_module(m)?;
        let params = self
            .parameters(m)
            .into_iter()
            .map(|p| Ok(self.instructions[p].tensor()?.clone()))
            .collect::<Result<Vec<_>, GraphError>>()?;
        let returns = match module.last() {
            Some(last) if self.instructions[last].op.is_return() => self.instructions[last]
                .inputs
                .iter()
                .map(|&i| Ok(self.instructions[i].tensor()?.clone()))
                .collect::<Result<Vec<_>, GraphError>>()?,
            Some(last) => self.instructions[last].ty.elements(),
            None => Vec::new(),
        };
        Ok(Signature { params, returns })
    }

    pub(crate) fn check_module(&self, m: ModuleId) -> Result<&Module, GraphError> {
        self.modules.get(m).ok_or(GraphError::UnknownModule(m))
    }

    pub(crate) fn check_ins(&self, ins: InsId) -> Result<&Instruction, GraphError> {
        self.instructions
            .get(ins)
            .ok_or(GraphError::UnknownInstruction(ins))
    }

    /// Module and position of `ins`.
    pub fn locate(&self, ins: InsId) -> Result<(ModuleId, usize), GraphError> {
        let m = self.check_ins(ins)?.module;
        let index = self
            .check_module(m)?
            .position(ins)
            .ok_or(GraphError::UnknownInstruction(ins))?;
        Ok((m, index))
    }

    pub(crate) fn infer(
        &self,
        op: &Op,
        inputs: &[InsId],
        module_inputs: &[ModuleId],
    ) -> Result<ValueType, GraphError> {
        let types = inputs
            .iter()
            .map(|&i| Ok(self.check_ins(i)?.ty.clone()))
            .collect::<Result<Vec<_>, GraphError>>()?;
        let signatures = module_inputs
            .iter()
            .map(|&m| self.signature(m))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(op.compute_type(&types, &signatures)?)
    }

    fn after_params(&self, m: ModuleId) -> Result<usize, GraphError> {
        let module = self.check_module(m)?;
        Ok(module
            .order
            .iter()
            .rposition(|&i| self.instructions[i].op.is_param())
            .map_or(0, |p| p + 1))
    }

    /// Every input must live in `m` before `index`.
    fn check_placement(
        &self,
        m: ModuleId,
        index: usize,
        name: &'static str,
        inputs: &[InsId],
    ) -> Result<(), GraphError> {
        let module = self.check_module(m)?;
        for &input in inputs {
            if self.check_ins(input)?.module != m {
                return Err(GraphError::ForeignInstruction {
                    ins: input,
                    module: module.name.clone(),
                });
            }
            match module.position(input) {
                Some(p) if p < index => {}
                _ => return Err(GraphError::OrderViolation { name, input }),
            }
        }
        Ok(())
    }

    fn insert_at(
        &mut self,
        m: ModuleId,
        index: usize,
        op: Op,
        inputs: &[InsId],
        module_inputs: &[ModuleId],
    ) -> Result<InsId, GraphError> {
        self.check_placement(m, index, op.name(), inputs)?;
        let ty = self.infer(&op, inputs, module_inputs)?;
        let id = self.instructions.insert(Instruction {
            op,
            inputs: inputs.into(),
            module_inputs: module_inputs.into(),
            ty,
            outputs: RVec::new(),
            module: m,
        });
        for &input in inputs {
            self.add_output(input, id);
        }
        self.modules[m].order.insert(index, id);
        Ok(id)
    }

    fn add_output(&mut self, producer: InsId, consumer: InsId) {
        if let Some(p) = self.instructions.get_mut(producer) {
            if !p.outputs.contains(&consumer) {
                p.outputs.push(consumer);
            }
        }
    }

    fn remove_output(&mut self, producer: InsId, consumer: InsId) {
        let still_used = self
            .instructions
            .get(consumer)
            .is_some_and(|c| c.inputs.contains(&producer));
        if still_used {
            return;
        }
        if let Some(p) = self.instructions.get_mut(producer) {
            p.outputs.retain(|o| *o != consumer);
        }
    }

    /// Re-derives the type of `ins` and, when it changed, of its consumers.
    fn refresh_type(&mut self, ins: InsId) -> Result<(), GraphError> {
        let mut work = vec![ins];
        while let Some(id) = work.pop() {
            let inst = self.check_ins(id)?;
            let ty = self.infer(&inst.op, &inst.inputs, &inst.module_inputs)?;
            let entry = &mut self.instructions[id];
            if entry.ty != ty {
                entry.ty = ty;
                work.extend(entry.outputs.iter().copied());
            }
        }
        Ok(())
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<InsId> for Program {
    type Output = Instruction;

    fn index(&self, id: InsId) -> &Self::Output {
        &self.instructions[id]
    }
}

impl Index<ModuleId> for Program {
    type Output = Module;

    fn index(&self, id: ModuleId) -> &Self::Output {
        &self.modules[id]
    }
}
