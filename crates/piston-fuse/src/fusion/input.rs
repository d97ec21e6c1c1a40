use log::{debug, trace};

use super::{offload_contiguous, prune, release_module, FuseError, RegionBuilder, ReplayMode, Rewrite, RewriteContext};
use crate::{any_input, name, pred, InsId, InvariantError, Match, Matcher, Op, Predicate};

/// Pulls a pointwise producer into the offload call it alone feeds.
///
/// The new region replays the pointwise body first, broadcasting operands
/// where the scalar body meets full tensors, then the old region.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputFusion;

impl Rewrite for InputFusion {
    fn name(&self) -> &'static str {
        "input_fusion"
    }

    fn matcher(&self) -> Matcher {
        name("offload").and(any_input(
            pred(Predicate::InputPointwise)
                .and(pred(Predicate::UsedOnce))
                .bind("pw"),
        ))
    }

    fn apply(&self, ctx: &mut RewriteContext<'_>, m: &Match) -> Result<bool, FuseError> {
        let program = &mut *ctx.program;
        let (call, pw) = (m.root, m.get("pw")?);
        let (&[old_region], &[body]) = (program[call].module_inputs(), program[pw].module_inputs()) else {
            return Ok(false);
        };
        let Op::Offload(offload) = program[call].op() else {
            return Ok(false);
        };
        let anchor = (*offload.anchor).clone();
        let call_inputs = program[call].inputs().to_vec();
        let pw_inputs = program[pw].inputs().to_vec();

        // An offload call takes at least two inputs.
        let mut outer: Vec<InsId> = Vec::with_capacity(pw_inputs.len() + call_inputs.len());
        for &i in pw_inputs.iter().chain(&call_inputs) {
            if i != pw && !outer.contains(&i) {
                outer.push(i);
            }
        }
        if outer.len() < 2 {
            trace!("{}: merged call would take {} input(s), declining", self.name(), outer.len());
            return Ok(false);
        }

        let name = ctx.names.unique(
            program,
            &format!("{}:{}", program[body].name(), program[old_region].name()),
        );
        let mut region = RegionBuilder::new(program, name.as_str())?;
        let module = region.module;
        let produced = region.fuse(program, body, &pw_inputs, ReplayMode::CommonOp)?;
        let value = *produced.first().ok_or(InvariantError::ModuleReturns {
            op: "pointwise",
            expected: 1,
            actual: 0,
        })?;
        region.map.insert(pw, value);
        let returns = region.fuse(program, old_region, &call_inputs, ReplayMode::Plain)?;
        let inputs = region.finish(program, &returns)?;
        let inputs = offload_contiguous(program, &inputs)?;
        program.replace_with(call, Op::offload(anchor), &inputs, &[module])?;
        prune(program, [pw])?;
        release_module(program, old_region)?;
        debug!("{}: built {name}", self.name());
        Ok(true)
    }
}
