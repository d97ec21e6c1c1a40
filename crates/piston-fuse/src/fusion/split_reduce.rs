use log::{debug, trace};

use super::{
    offload_contiguous, prune, relocate_dependents, release_module, FuseError, RegionBuilder,
    ReplayMode, Rewrite, RewriteContext,
};
use crate::{any_input, pred, GraphError, Match, Matcher, Op, Predicate};

/// Merges a split reduction into the single-output offload call it consumes.
///
/// The call's region is copied and the reduction body replayed on top of the
/// anchor value. If the call has other consumers, its value is appended to the
/// region's returns and those consumers read the last element.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitReduce;

impl Rewrite for SplitReduce {
    fn name(&self) -> &'static str {
        "split_reduce"
    }

    fn matcher(&self) -> Matcher {
        pred(Predicate::SplitReduce).and(any_input(pred(Predicate::SingleOutputOffload).bind("gemm")))
    }

    fn apply(&self, ctx: &mut RewriteContext<'_>, m: &Match) -> Result<bool, FuseError> {
        let program = &mut *ctx.program;
        let (reduce, gemm) = (m.root, m.get("gemm")?);
        let reduce_inputs = program[reduce].inputs().to_vec();
        if reduce_inputs
            .iter()
            .any(|&i| i != gemm && program.reaches(gemm, i))
        {
            trace!("{}: another input depends on the offload call, declining", self.name());
            return Ok(false);
        }
        let tuple_out = program[reduce].ty().is_tuple();
        if tuple_out
            && program[reduce]
                .outputs()
                .iter()
                .any(|&c| !matches!(program[c].op(), Op::TupleElem(_)))
        {
            trace!("{}: tuple consumed whole, declining", self.name());
            return Ok(false);
        }
        let (&[body], &[old_region]) = (program[reduce].module_inputs(), program[gemm].module_inputs()) else {
            return Ok(false);
        };
        let Some(old_ret) = program.return_of(old_region) else {
            return Ok(false);
        };
        let Op::Offload(offload) = program[gemm].op() else {
            return Ok(false);
        };
        let anchor = (*offload.anchor).clone();
        let gemm_inputs = program[gemm].inputs().to_vec();
        let multi = program[gemm].outputs().len() > 1;

        let name = ctx.names.unique(
            program,
            &format!("{}_{}", program[old_region].name(), program[body].name()),
        );
        let (module, copies) = program.copy_module(old_region, name.as_str())?;
        let ret = *copies
            .get(&old_ret)
            .ok_or(GraphError::UnknownInstruction(old_ret))?;
        let value = *program[ret]
            .inputs()
            .first()
            .ok_or(GraphError::UnknownInstruction(ret))?;
        program.remove_instruction(ret)?;

        let mut region = RegionBuilder::from_copy(program, module, &gemm_inputs)?;
        region.map.insert(gemm, value);
        let mut returns = region.fuse(program, body, &reduce_inputs, ReplayMode::InlinePointwise)?;
        if multi {
            returns.push(value);
        }
        let last = returns.len() - 1;
        let inputs = region.finish(program, &returns)?;
        let inputs = offload_contiguous(program, &inputs)?;

        if multi {
            let call = program.insert_instruction(reduce, Op::offload(anchor), &inputs, &[module])?;
            let gemm_value = program.insert_instruction(reduce, Op::tuple_elem(last), &[call], &[])?;
            relocate_dependents(program, gemm, reduce)?;
            program.replace_instruction(gemm, gemm_value)?;
            if tuple_out {
                for c in program[reduce].outputs().to_vec() {
                    let op = program[c].op().clone();
                    program.replace_with(c, op, &[call], &[])?;
                }
                program.remove_instruction(reduce)?;
            } else {
                program.replace_with(reduce, Op::tuple_elem(0), &[call], &[])?;
            }
            prune(program, [gemm])?;
        } else {
            program.replace_with(reduce, Op::offload(anchor), &inputs, &[module])?;
            prune(program, [gemm])?;
        }
        release_module(program, body)?;
        release_module(program, old_region)?;
        debug!("{}: merged into {name} (multi: {multi})", self.name());
        Ok(true)
    }
}
