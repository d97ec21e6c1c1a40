use log::{debug, trace};

use super::{
    offload_contiguous, prune, relocate_dependents, release_module, FuseError, RegionBuilder,
    ReplayMode, ReshapeChain, Rewrite, RewriteContext, VIEW_RESHAPERS,
};
use crate::{any_input, any_of, names, pred, skip, Match, Matcher, Mode, Op, Operation, Predicate};

/// Fuses a dot or convolution into the pointwise instruction it feeds.
///
/// When the anchor, or a shape-only step between it and the pointwise, has
/// other consumers, the region returns `(anchor, pointwise)` and those
/// consumers read element 0 of the call.
#[derive(Debug, Clone, Copy)]
pub struct AnchorPointwise {
    pub conv_mode: Mode,
    pub dot_mode: Mode,
}

impl Rewrite for AnchorPointwise {
    fn name(&self) -> &'static str {
        "anchor_pointwise"
    }

    fn matcher(&self) -> Matcher {
        let anchor = any_of(vec![
            pred(Predicate::Dot {
                mode: self.dot_mode,
                anchor: true,
            }),
            pred(Predicate::Conv(self.conv_mode)),
        ]);
        pred(Predicate::Pointwise).and(any_input(
            skip(names(&VIEW_RESHAPERS), anchor.bind("anchor")).bind("x"),
        ))
    }

    fn apply(&self, ctx: &mut RewriteContext<'_>, m: &Match) -> Result<bool, FuseError> {
        let program = &mut *ctx.program;
        let (pw, anchor, x) = (m.root, m.get("anchor")?, m.get("x")?);
        let other_reaches = program[pw]
            .inputs()
            .iter()
            .filter(|&&i| i != x)
            .any(|&i| program.reaches(anchor, i));
        if other_reaches {
            trace!("{}: another input depends on the anchor, declining", self.name());
            return Ok(false);
        }
        let &[body] = program[pw].module_inputs() else {
            return Ok(false);
        };

        let chain = ReshapeChain::walk(program, x, false);
        let multi = program[anchor].outputs().len() > 1
            || chain.nodes.iter().any(|&n| program[n].outputs().len() > 1);
        let op = program[anchor].op().clone();
        let anchor_name = op.name();
        let anchor_inputs = program[anchor].inputs().to_vec();
        let pw_inputs = program[pw].inputs().to_vec();
        let dims = program[pw].tensor()?.shape.clone();

        let name = ctx.names.unique(program, &format!("offload_{}", program[body].name()));
        let mut region = RegionBuilder::new(program, name.as_str())?;
        let module = region.module;
        let anchor_r = region.fuse_anchor(program, &op, &anchor_inputs)?;
        region.rehome_literals(program, body, &dims)?;
        let x_r = chain.replay(program, module, anchor_r)?;
        region.map.insert(x, x_r);
        let fused = region.fuse(program, body, &pw_inputs, ReplayMode::Plain)?;
        let returns: Vec<_> = if multi {
            std::iter::once(anchor_r).chain(fused).collect()
        } else {
            fused
        };
        let inputs = region.finish(program, &returns)?;
        let inputs = offload_contiguous(program, &inputs)?;

        if multi {
            let call = program.insert_instruction(pw, Op::offload(op), &inputs, &[module])?;
            program.replace_with(pw, Op::tuple_elem(1), &[call], &[])?;
            let elem0 = program.insert_instruction(pw, Op::tuple_elem(0), &[call], &[])?;
            relocate_dependents(program, anchor, pw)?;
            program.replace_instruction(anchor, elem0)?;
            program.remove_instruction(anchor)?;
            prune(program, chain.nodes.iter().copied().chain(anchor_inputs))?;
        } else {
            program.replace_with(pw, Op::offload(op), &inputs, &[module])?;
            prune(program, [x])?;
        }
        release_module(program, body)?;
        debug!("{}: fused {anchor_name} into {name} (multi: {multi})", self.name());
        Ok(true)
    }
}
