use log::debug;

use super::{offload_contiguous, prune, FuseError, RegionBuilder, Rewrite, RewriteContext};
use crate::{all_inputs, pred, DType, Match, Matcher, Mode, Op, Operation, Predicate};

/// Element types a standalone region accepts as anchor inputs; others are not matched.
const STANDALONE_TYPES: [DType; 4] = [DType::F32, DType::F16, DType::I8, DType::Fp8E4M3Fnuz];

/// Wraps a lone dot or convolution in its own region.
///
/// Shape-only chains feeding the anchor move into the region, so the call
/// takes the tensors above them.
#[derive(Debug, Clone, Copy)]
pub struct StandaloneAnchor {
    predicate: Predicate,
}

impl StandaloneAnchor {
    pub fn conv(mode: Mode) -> Self {
        Self {
            predicate: Predicate::Conv(mode),
        }
    }

    pub fn dot(mode: Mode) -> Self {
        Self {
            predicate: Predicate::Dot { mode, anchor: false },
        }
    }
}

impl Rewrite for StandaloneAnchor {
    fn name(&self) -> &'static str {
        match self.predicate {
            Predicate::Conv(_) => "standalone_convolution",
            _ => "standalone_dot",
        }
    }

    fn matcher(&self) -> Matcher {
        pred(self.predicate).and(all_inputs(pred(Predicate::ElementType(&STANDALONE_TYPES))))
    }

    fn apply(&self, ctx: &mut RewriteContext<'_>, m: &Match) -> Result<bool, FuseError> {
        let program = &mut *ctx.program;
        let anchor = m.root;
        let op = program[anchor].op().clone();
        let old_inputs = program[anchor].inputs().to_vec();
        let name = ctx.names.fresh(program, &format!("offload_{}", op.name()));
        let mut region = RegionBuilder::new(program, name.as_str())?;
        let module = region.module;
        let result = region.fuse_anchor(program, &op, &old_inputs)?;
        let inputs = region.finish(program, &[result])?;
        let inputs = offload_contiguous(program, &inputs)?;
        program.replace_with(anchor, Op::offload(op), &inputs, &[module])?;
        prune(program, old_inputs)?;
        debug!("{}: wrapped into {name}", self.name());
        Ok(true)
    }
}
