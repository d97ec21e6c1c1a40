use super::{InsId, ModuleId, Program};
use crate::{HashMap, InvariantError, Op, Operation, ValueType};

/// A broken structural invariant, located by module name and position.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("{module}: entry {index} is not a live instruction of this module.")]
    Ownership { module: String, index: usize },
    #[error("{module}: {name} at {index} uses an input not defined earlier in the module.")]
    Order {
        module: String,
        index: usize,
        name: &'static str,
    },
    #[error("{module}: consumer edges of {name} at {index} do not mirror the input edges.")]
    Edges {
        module: String,
        index: usize,
        name: &'static str,
    },
    #[error("{module}: return at {index} is not the last instruction.")]
    MisplacedReturn { module: String, index: usize },
    #[error("{module}: {name} at {index} stores {stored} but infers {inferred}.")]
    StaleType {
        module: String,
        index: usize,
        name: &'static str,
        stored: ValueType,
        inferred: ValueType,
    },
    #[error("{module}: {name} at {index} fails type inference.")]
    Inference {
        module: String,
        index: usize,
        name: &'static str,
        #[source]
        source: InvariantError,
    },
    #[error("{module}: {name} at {index} references a missing module.")]
    MissingModule {
        module: String,
        index: usize,
        name: &'static str,
    },
    #[error("{0} instruction(s) are not listed by any module.")]
    Orphans(usize),
}

impl Program {
    /// Checks every structural invariant of every module.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let mut listed = 0;
        for (id, module) in self.modules.iter() {
            self.verify_module(id)?;
            listed += module.order.len();
        }
        if listed != self.instructions.len() {
            return Err(VerifyError::Orphans(self.instructions.len().abs_diff(listed)));
        }
        Ok(())
    }

    fn verify_module(&self, m: ModuleId) -> Result<(), VerifyError> {
        let module = &self.modules[m];
        let name_of = || module.name.clone();
        let mut positions: HashMap<InsId, usize> = HashMap::default();

        for (index, &id) in module.order.iter().enumerate() {
            let inst = match self.instructions.get(id) {
                Some(inst) if inst.module == m && !positions.contains_key(&id) => inst,
                _ => {
                    return Err(VerifyError::Ownership {
                        module: name_of(),
                        index,
                    })
                }
            };
            let name = inst.op.name();

            if inst.inputs.iter().any(|i| !positions.contains_key(i)) {
                return Err(VerifyError::Order {
                    module: name_of(),
                    index,
                    name,
                });
            }

            let inputs_mirrored = inst.inputs.iter().all(|&i| {
                self.instructions
                    .get(i)
                    .is_some_and(|p| p.outputs.contains(&id))
            });
            let outputs_mirrored = inst.outputs.iter().all(|&o| {
                self.instructions
                    .get(o)
                    .is_some_and(|c| c.inputs.contains(&id))
            });
            let mut unique = inst.outputs.to_vec();
            unique.sort();
            unique.dedup();
            if !inputs_mirrored || !outputs_mirrored || unique.len() != inst.outputs.len() {
                return Err(VerifyError::Edges {
                    module: name_of(),
                    index,
                    name,
                });
            }

            if matches!(inst.op, Op::Return(_)) && index + 1 != module.order.len() {
                return Err(VerifyError::MisplacedReturn {
                    module: name_of(),
                    index,
                });
            }

            if inst
                .module_inputs
                .iter()
                .any(|&sub| !self.modules.contains_key(sub) || sub == m)
            {
                return Err(VerifyError::MissingModule {
                    module: name_of(),
                    index,
                    name,
                });
            }

            let inferred = self
                .infer(&inst.op, &inst.inputs, &inst.module_inputs)
                .map_err(|e| match e {
                    crate::GraphError::Invariant(source) => VerifyError::Inference {
                        module: name_of(),
                        index,
                        name,
                        source,
                    },
                    _ => VerifyError::MissingModule {
                        module: name_of(),
                        index,
                        name,
                    },
                })?;
            if inferred != inst.ty {
                return Err(VerifyError::StaleType {
                    module: name_of(),
                    index,
                    name,
                    stored: inst.ty.clone(),
                    inferred,
                });
            }

            positions.insert(id, index);
        }
        Ok(())
    }
}
