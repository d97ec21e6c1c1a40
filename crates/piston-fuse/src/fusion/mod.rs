//! Rewrite rules that move offloadable subgraphs into bypass regions.
//!
//! Each rule pairs a [`Matcher`] with an `apply` step. Matching is read-only;
//! `apply` either declines before touching the program or performs the whole
//! rewrite.
mod attention;
mod input;
mod pointwise;
mod region;
mod reshape;
mod split_reduce;
mod standalone;
mod stats;

pub use attention::*;
pub use input::*;
pub use pointwise::*;
pub use region::*;
pub use reshape::*;
pub use split_reduce::*;
pub use standalone::*;
pub use stats::*;

use log::trace;

use crate::{GraphError, Heuristics, InsId, InvariantError, Match, Matcher, ModuleId, Program, VerifyError};

#[derive(Debug, thiserror::Error)]
pub enum FuseError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Invariant(#[from] InvariantError),
    #[error("Program is malformed after fusion: {0}")]
    Verify(#[from] VerifyError),
    #[error("Match has no binding named {0:?}.")]
    MissingBinding(&'static str),
    #[error("Parameter {0:?} has no bound input.")]
    UnboundParam(String),
}

/// State threaded through every rule of one driver invocation.
pub struct RewriteContext<'a> {
    pub program: &'a mut Program,
    pub names: &'a mut NameCounter,
    pub heuristics: &'a Heuristics,
}

pub trait Rewrite {
    fn name(&self) -> &'static str;

    fn matcher(&self) -> Matcher;

    /// Returns `Ok(false)` when the match is declined, in which case the
    /// program is untouched.
    fn apply(&self, ctx: &mut RewriteContext<'_>, m: &Match) -> Result<bool, FuseError>;
}

/// Mints region names for one driver invocation.
#[derive(Debug, Default)]
pub struct NameCounter {
    next: usize,
}

impl NameCounter {
    /// `<prefix><n>` for the next `n` whose name is free.
    pub fn fresh(&mut self, program: &Program, prefix: &str) -> String {
        loop {
            let name = format!("{prefix}{}", self.next);
            self.next += 1;
            if !program.has_module(&name) {
                return name;
            }
        }
    }

    /// `name` when free, otherwise `name_<n>`.
    pub fn unique(&mut self, program: &Program, name: &str) -> String {
        if program.has_module(name) {
            self.fresh(program, &format!("{name}_"))
        } else {
            name.to_string()
        }
    }
}

/// Removes the given instructions if nothing consumes them, then their
/// inputs that became dead, and the modules they alone referenced.
/// Parameters and returns stay.
pub fn prune(program: &mut Program, roots: impl IntoIterator<Item = InsId>) -> Result<usize, FuseError> {
    let mut work: Vec<InsId> = roots.into_iter().collect();
    let mut removed = 0;
    while let Some(ins) = work.pop() {
        let Some(inst) = program.get(ins) else {
            continue;
        };
        if !inst.outputs().is_empty() || inst.op().is_param() || inst.op().is_return() {
            continue;
        }
        let inputs = inst.inputs().to_vec();
        let modules = inst.module_inputs().to_vec();
        trace!("Pruning {}", inst.name());
        program.remove_instruction(ins)?;
        removed += 1;
        work.extend(inputs);
        for m in modules {
            release_module(program, m)?;
        }
    }
    Ok(removed)
}

/// Removes `m` when no instruction references it, then the modules only it referenced.
pub fn release_module(program: &mut Program, m: ModuleId) -> Result<(), FuseError> {
    let mut work = vec![m];
    while let Some(m) = work.pop() {
        if m == program.main() || program.module(m).is_none() {
            continue;
        }
        let referenced = program
            .instructions
            .values()
            .any(|i| i.module != m && i.module_inputs.contains(&m));
        if referenced {
            continue;
        }
        let nested: Vec<ModuleId> = program[m]
            .instructions()
            .iter()
            .flat_map(|&i| program[i].module_inputs().to_vec())
            .collect();
        trace!("Releasing module {}", program[m].name());
        program.remove_module(m)?;
        work.extend(nested);
    }
    Ok(())
}

/// Moves `from` and every instruction between it and `pos` that depends on
/// it to just before `pos`, keeping their relative order.
pub fn relocate_dependents(program: &mut Program, from: InsId, pos: InsId) -> Result<(), FuseError> {
    let (m, start) = program.locate(from)?;
    let (_, end) = program.locate(pos)?;
    if end <= start {
        return Ok(());
    }
    let span = program[m].instructions()[start..end].to_vec();
    for ins in span {
        if program.reaches(from, ins) {
            program.move_before(ins, pos)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Op, TensorType};

    #[test]
    fn fresh_names_skip_taken() -> anyhow::Result<()> {
        let mut p = Program::new();
        p.create_module("offload_dot0")?;
        let mut names = NameCounter::default();
        assert_eq!(names.fresh(&p, "offload_dot"), "offload_dot1");
        assert_eq!(names.fresh(&p, "offload_convolution"), "offload_convolution2");
        assert_eq!(names.unique(&p, "offload_pw"), "offload_pw");
        assert_eq!(names.unique(&p, "offload_dot0"), "offload_dot0_3");
        Ok(())
    }

    #[test]
    fn relocate_keeps_order() -> anyhow::Result<()> {
        let mut p = Program::new();
        let m = p.main();
        let x = p.add_parameter(m, "x", TensorType::new(DType::F32, [4]))?;
        let a = p.add_instruction(m, Op::relu(), &[x], &[])?;
        let b = p.add_instruction(m, Op::add(), &[a, x], &[])?;
        let c = p.add_instruction(m, Op::mul(), &[x, x], &[])?;
        let d = p.add_instruction(m, Op::add(), &[b, b], &[])?;
        let pos = p.add_instruction(m, Op::add(), &[c, c], &[])?;
        relocate_dependents(&mut p, a, pos)?;
        assert_eq!(p[m].instructions(), &[x, c, a, b, d, pos]);
        p.verify()?;
        Ok(())
    }

    #[test]
    fn prune_releases_bodies() -> anyhow::Result<()> {
        let mut p = Program::new();
        let m = p.main();
        let ty = TensorType::new(DType::F32, [4]);
        let x = p.add_parameter(m, "x", ty.clone())?;
        let body = p.create_module("pw")?;
        let bx = p.add_parameter(body, "x0", TensorType::scalar(DType::F32))?;
        let r = p.add_instruction(body, Op::relu(), &[bx], &[])?;
        p.add_return(body, &[r])?;
        let pw = p.add_instruction(m, crate::ops::Pointwise, &[x], &[body])?;
        let c = p.add_instruction(m, Op::contiguous(), &[pw], &[])?;
        let live = p.add_instruction(m, Op::relu(), &[x], &[])?;
        p.add_return(m, &[live])?;

        assert_eq!(prune(&mut p, [c])?, 2);
        assert!(!p.has_module("pw"));
        assert!(p.contains(x));
        p.verify()?;
        Ok(())
    }
}
