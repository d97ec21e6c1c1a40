use log::trace;

use crate::{GraphError, HashSet, ModuleId, Program};

/// What a dead-code sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DceStats {
    pub instructions: usize,
    pub modules: usize,
}

/// Removes unconsumed instructions and modules nothing references.
///
/// Parameters, returns, and the last instruction of a module without a
/// return are always kept. Removal runs back to front so a producer whose
/// only consumers were dead goes in the same sweep.
pub fn eliminate_dead_code(program: &mut Program) -> Result<DceStats, GraphError> {
    let mut stats = DceStats::default();
    let modules: Vec<ModuleId> = program.modules().map(|(id, _)| id).collect();
    for m in modules {
        let order = program[m].instructions().to_vec();
        let has_return = program.return_of(m).is_some();
        let last = order.last().copied();
        for ins in order.into_iter().rev() {
            let inst = &program[ins];
            let keep = !inst.outputs().is_empty()
                || inst.op().is_param()
                || inst.op().is_return()
                || (!has_return && Some(ins) == last);
            if !keep {
                trace!("DCE: removing {} from {}", inst.name(), program[m].name());
                program.remove_instruction(ins)?;
                stats.instructions += 1;
            }
        }
    }

    let mut live = HashSet::default();
    let mut stack = vec![program.main()];
    while let Some(m) = stack.pop() {
        if !live.insert(m) {
            continue;
        }
        for &ins in program[m].instructions() {
            stack.extend(program[ins].module_inputs().iter().copied());
        }
    }
    let dead: Vec<ModuleId> = program
        .modules()
        .map(|(id, _)| id)
        .filter(|id| !live.contains(id))
        .collect();
    for m in dead {
        trace!("DCE: removing module {}", program[m].name());
        program.remove_module(m)?;
        stats.modules += 1;
    }
    Ok(stats)
}
