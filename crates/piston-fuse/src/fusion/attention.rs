use log::{debug, trace};

use super::{
    offload_contiguous, prune, release_module, FuseError, RegionBuilder, ReplayMode, ReshapeChain,
    Rewrite, RewriteContext,
};
use crate::ops::{AttentionMask, Literal, Where};
use crate::{any_input, name, pred, DType, InsId, InvariantError, Match, Matcher, Op, Predicate, Program};

const ATTENTION: &str = "gemm_softmax_gemm";

/// Rebuilds `gemm_softmax_gemm` from its parts inside a region.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandaloneAttention;

/// [`StandaloneAttention`] plus the pointwise instruction that is the
/// attention's only consumer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FusedAttention;

impl Rewrite for StandaloneAttention {
    fn name(&self) -> &'static str {
        "attention"
    }

    fn matcher(&self) -> Matcher {
        name(ATTENTION)
    }

    fn apply(&self, ctx: &mut RewriteContext<'_>, m: &Match) -> Result<bool, FuseError> {
        let program = &mut *ctx.program;
        let gsg = m.root;
        let Some(scale) = attention_scale(program, gsg) else {
            trace!("{}: unsupported element type, declining", self.name());
            return Ok(false);
        };
        let op = program[gsg].op().clone();
        let old_inputs = program[gsg].inputs().to_vec();
        let name = ctx.names.fresh(program, &format!("offload_{ATTENTION}"));
        let mut region = RegionBuilder::new(program, name.as_str())?;
        let module = region.module;
        let out = rebuild(program, &mut region, scale, &old_inputs)?;
        let inputs = region.finish(program, &[out])?;
        let inputs = offload_contiguous(program, &inputs)?;
        program.replace_with(gsg, Op::offload(op), &inputs, &[module])?;
        prune(program, old_inputs)?;
        debug!("{}: rebuilt into {name}", self.name());
        Ok(true)
    }
}

impl Rewrite for FusedAttention {
    fn name(&self) -> &'static str {
        "fused_attention"
    }

    fn matcher(&self) -> Matcher {
        pred(Predicate::Pointwise).and(any_input(
            name(ATTENTION).and(pred(Predicate::UsedOnce)).bind("gsg"),
        ))
    }

    fn apply(&self, ctx: &mut RewriteContext<'_>, m: &Match) -> Result<bool, FuseError> {
        let program = &mut *ctx.program;
        let (pw, gsg) = (m.root, m.get("gsg")?);
        let Some(scale) = attention_scale(program, gsg) else {
            trace!("{}: unsupported element type, declining", self.name());
            return Ok(false);
        };
        let &[body] = program[pw].module_inputs() else {
            return Ok(false);
        };
        let op = program[gsg].op().clone();
        let gsg_inputs = program[gsg].inputs().to_vec();
        let pw_inputs = program[pw].inputs().to_vec();
        let dims = program[pw].tensor()?.shape.clone();
        let body_name = program[body].name().to_string();

        let name = ctx.names.fresh(program, &format!("offload_{ATTENTION}"));
        let mut region = RegionBuilder::new(program, name.as_str())?;
        let module = region.module;
        let out = rebuild(program, &mut region, scale, &gsg_inputs)?;
        region.rehome_literals(program, body, &dims)?;
        region.map.insert(gsg, out);
        let fused = region.fuse(program, body, &pw_inputs, ReplayMode::Plain)?;
        let inputs = region.finish(program, &fused)?;
        let inputs = offload_contiguous(program, &inputs)?;
        program.replace_with(pw, Op::offload(op), &inputs, &[module])?;
        prune(program, [gsg])?;
        release_module(program, body)?;
        debug!("{}: rebuilt with {body_name} into {name}", self.name());
        Ok(true)
    }
}

/// The scale of an attention over `F32` or `F16` operands.
fn attention_scale(program: &Program, gsg: InsId) -> Option<f32> {
    let Op::Attention(attention) = program[gsg].op() else {
        return None;
    };
    let dtype = program[gsg].ty().as_tensor()?.dtype;
    matches!(dtype, DType::F32 | DType::F16).then_some(attention.scale)
}

/// `dot(softmax(scale * dot(y0, y1) [mask], last axis), z)`, with the
/// shape-only chains above the query, key and value threaded through.
fn rebuild(
    program: &mut Program,
    region: &mut RegionBuilder,
    scale: f32,
    inputs: &[InsId],
) -> Result<InsId, FuseError> {
    let mask = AttentionMask::from_arity(inputs.len()).ok_or(InvariantError::InputArity {
        op: ATTENTION,
        accepted: 3..=5,
        actual: inputs.len(),
    })?;
    let m = region.module;
    let gemm0 = region.fuse_anchor(program, &Op::dot(), &inputs[..2])?;
    let scores = program[gemm0].tensor()?.clone();

    let literal = program.add_literal(m, Literal::scalar(scores.dtype, scale)?)?;
    let scale = program.add_instruction(m, Op::multibroadcast(scores.shape.clone()), &[literal], &[])?;
    let scaled = program.add_instruction(m, Op::mul(), &[gemm0, scale], &[])?;
    let masked = match mask {
        AttentionMask::None => scaled,
        AttentionMask::Bias => {
            let bias = region.add_named_input(program, inputs[2], "y_bias")?;
            program.add_instruction(m, Op::add(), &[scaled, bias], &[])?
        }
        AttentionMask::Select => {
            let cond = region.add_named_input(program, inputs[2], "y_cond")?;
            let fill = region.add_named_input(program, inputs[3], "y_const")?;
            program.add_instruction(m, Where, &[cond, scaled, fill], &[])?
        }
    };
    let probs = program.add_instruction(m, Op::softmax(scores.rank() - 1), &[masked], &[])?;

    let v = ReshapeChain::walk(program, inputs[inputs.len() - 1], true);
    let z = region.add_named_input(program, v.upper, "z")?;
    let z = v.replay(program, m, z)?;
    Ok(program.add_instruction(m, Op::dot(), &[probs, z], &[])?)
}
