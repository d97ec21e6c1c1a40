//! Offload eligibility.
//!
//! Every classifier is a pure function of the program, one instruction and
//! the active [`Mode`]. None of them mutate.
#[cfg(test)]
use test_strategy::Arbitrary;

use crate::ops::{Conv, Dot, ReduceOp, Reindex};
use crate::{DType, Heuristics, InsId, Op, Program};

/// How aggressively an operation family is offloaded.
///
/// Ordered from most to least permissive; [`Mode::most_restrictive`] picks
/// the later of two.
#[cfg_attr(test, derive(Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    All,
    Fast,
    /// Only 8-bit operands. [`FuseConfig::mode`](crate::FuseConfig::mode)
    /// never resolves to it; callers building rules directly may pick it.
    Int8,
    None,
}

impl Mode {
    pub fn most_restrictive(self, other: Mode) -> Mode {
        std::cmp::max(self, other)
    }
}

/// Result types the offload backend can produce.
const SUPPORTED_TYPES: [DType; 6] = [
    DType::F32,
    DType::F16,
    DType::Fp8E4M3Fnuz,
    DType::I8,
    DType::I32,
    DType::Bool,
];

const ANY_TYPE_OPS: [&str; 3] = ["@literal", "@param", "@return"];

const NO_BOOL_OPS: [&str; 16] = [
    "convolution",
    "quant_convolution",
    "dot",
    "quant_dot",
    "add",
    "clip",
    "relu",
    "sub",
    "mul",
    "div",
    "pow",
    "where",
    "quantizelinear",
    "dequantizelinear",
    "abs",
    "neg",
];

const FLOAT_OPS: [&str; 11] = [
    "ceil", "erf", "exp", "floor", "log", "recip", "sqrt", "rsqrt", "sigmoid", "softmax", "tanh",
];

/// Whether `ins` is a dot the backend should take.
///
/// `anchor` marks a dot considered as the head of a fused region; only then
/// does [`Mode::Fast`] bound the contraction length.
///
/// [`Mode::Int8`] accepts a dot only when every operand is 8-bit (`I8`, `U8`
/// or fp8). This is stricter than a plain non-`Fast` mode, which accepts
/// every dot.
pub fn is_offload_dot(program: &Program, ins: InsId, mode: Mode, anchor: bool, h: &Heuristics) -> bool {
    if mode == Mode::None {
        return false;
    }
    let Some(inst) = program.get(ins) else {
        return false;
    };
    if !matches!(inst.op(), Op::Dot(_)) {
        return false;
    }
    let Ok(out) = inst.tensor() else {
        return false;
    };
    // fp8 x fp8 -> fp8 has no offload kernel.
    if out.dtype.is_fp8() {
        return false;
    }
    let inputs: Vec<_> = inst
        .inputs()
        .iter()
        .filter_map(|&i| program[i].ty().as_tensor())
        .collect();
    match mode {
        Mode::All => true,
        Mode::Int8 => inputs.iter().all(|t| t.dtype.is_8bit()),
        Mode::Fast if anchor => inputs
            .first()
            .is_some_and(|a| Dot::contraction(a) <= h.dot_k_threshold),
        _ => true,
    }
}

/// Whether `ins` is a convolution the backend should take.
pub fn is_offload_conv(program: &Program, ins: InsId, mode: Mode, h: &Heuristics) -> bool {
    if mode == Mode::None {
        return false;
    }
    let Some(inst) = program.get(ins) else {
        return false;
    };
    let Op::Conv(Conv { group, .. }) = inst.op() else {
        return false;
    };
    let Ok(out) = inst.tensor() else {
        return false;
    };
    if *group > 1 && out.rank() != 4 {
        return false;
    }
    let (Some(x), Some(w)) = (
        inst.inputs().first().and_then(|&i| program[i].ty().as_tensor()),
        inst.inputs().get(1).and_then(|&i| program[i].ty().as_tensor()),
    ) else {
        return false;
    };
    if x.dtype.is_fp8() || x.dtype == DType::I8 {
        return true;
    }
    match mode {
        Mode::Int8 => false,
        Mode::All => true,
        _ if *group > 1 || w.rank() != 4 => true,
        _ if w.shape[2] != w.shape[3] => true,
        _ => h.conv_kernel_divisor == 0 || w.shape[3] % h.conv_kernel_divisor != 0,
    }
}

/// Whether a single instruction of a pointwise body can be offloaded.
///
/// `producer` selects the stricter variant used when the pointwise feeds an
/// existing offload call.
pub fn is_pointwise_op_supported(program: &Program, ins: InsId, h: &Heuristics, producer: bool) -> bool {
    let Some(inst) = program.get(ins) else {
        return false;
    };
    let name = inst.name();
    if producer && h.input_fusion_excluded.iter().any(|e| e == name) {
        return false;
    }
    let dtype = match inst.ty().as_tensor() {
        Some(t) => t.dtype,
        None if inst.op().is_return() => match inst.ty().elements().first() {
            Some(t) => t.dtype,
            None => return false,
        },
        None => return false,
    };
    if !SUPPORTED_TYPES.contains(&dtype) {
        return false;
    }
    if ANY_TYPE_OPS.contains(&name) {
        return true;
    }
    if dtype != DType::Bool && NO_BOOL_OPS.contains(&name) {
        return true;
    }
    if dtype.is_float() && FLOAT_OPS.contains(&name) {
        return true;
    }
    if let Op::Convert(_) = inst.op() {
        let from_ok = inst.inputs().iter().all(|&i| {
            program[i]
                .ty()
                .as_tensor()
                .is_some_and(|t| matches!(t.dtype, DType::F32 | DType::F16))
        });
        return dtype.is_float() && !dtype.is_fp8() && from_ok;
    }
    false
}

/// Whether `ins` is a `pointwise` whose whole body can be offloaded.
pub fn is_offload_pointwise(program: &Program, ins: InsId, h: &Heuristics, producer: bool) -> bool {
    let Some(inst) = program.get(ins) else {
        return false;
    };
    if !matches!(inst.op(), Op::Pointwise(_)) {
        return false;
    }
    let [body] = inst.module_inputs() else {
        return false;
    };
    program.module(*body).is_some_and(|m| {
        m.instructions()
            .iter()
            .all(|&i| is_pointwise_op_supported(program, i, h, producer))
    })
}

/// `reduce_mean` or `reduce_sum` with a floating result.
pub fn is_supported_reduce(program: &Program, ins: InsId) -> bool {
    program.get(ins).is_some_and(|inst| {
        matches!(inst.op(), Op::Reduce(r) if matches!(r.op, ReduceOp::Sum | ReduceOp::Mean))
            && inst.ty().as_tensor().is_some_and(|t| t.dtype.is_float())
    })
}

/// Whether `ins` is a `split_fused_reduce` whose body can be offloaded.
pub fn is_offload_split_reduce(program: &Program, ins: InsId, h: &Heuristics) -> bool {
    let Some(inst) = program.get(ins) else {
        return false;
    };
    if !matches!(inst.op(), Op::SplitFusedReduce(_)) {
        return false;
    }
    let [body] = inst.module_inputs() else {
        return false;
    };
    let Some(body) = program.module(*body) else {
        return false;
    };
    body.instructions().iter().all(|&i| match program[i].op() {
        Op::Reduce(_) => is_supported_reduce(program, i),
        Op::Pointwise(_) => is_offload_pointwise(program, i, h, false),
        Op::Reindex(Reindex::Slice(_)) => false,
        Op::Reindex(_) => true,
        op => op.is_boundary(),
    })
}

/// Classifier predicates, evaluated by the [`Matcher`](crate::Matcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Dot { mode: Mode, anchor: bool },
    Conv(Mode),
    Pointwise,
    /// Pointwise feeding an offload call.
    InputPointwise,
    SplitReduce,
    UsedOnce,
    /// An offload call returning one tensor.
    SingleOutputOffload,
    /// A tensor whose element type is one of these.
    ElementType(&'static [DType]),
}

impl Predicate {
    pub fn eval(&self, program: &Program, ins: InsId, h: &Heuristics) -> bool {
        match *self {
            Predicate::Dot { mode, anchor } => is_offload_dot(program, ins, mode, anchor, h),
            Predicate::Conv(mode) => is_offload_conv(program, ins, mode, h),
            Predicate::Pointwise => is_offload_pointwise(program, ins, h, false),
            Predicate::InputPointwise => is_offload_pointwise(program, ins, h, true),
            Predicate::SplitReduce => is_offload_split_reduce(program, ins, h),
            Predicate::UsedOnce => program.get(ins).is_some_and(|i| i.outputs().len() == 1),
            Predicate::SingleOutputOffload => program.get(ins).is_some_and(|i| {
                matches!(i.op(), Op::Offload(_)) && i.ty().as_tensor().is_some()
            }),
            Predicate::ElementType(dtypes) => program
                .get(ins)
                .and_then(|i| i.ty().as_tensor())
                .is_some_and(|t| dtypes.contains(&t.dtype)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Pointwise, Reduce};
    use crate::{rvec, ModuleId, TensorType};
    use test_strategy::proptest;

    fn dot_program(k: usize, dtype: DType) -> anyhow::Result<(Program, InsId)> {
        let mut p = Program::new();
        let m = p.main();
        let a = p.add_parameter(m, "a", TensorType::new(dtype, [64, k]))?;
        let b = p.add_parameter(m, "b", TensorType::new(dtype, [k, 64]))?;
        let op = if dtype.is_8bit() { Op::quant_dot() } else { Op::dot() };
        let dot = p.add_instruction(m, op, &[a, b], &[])?;
        Ok((p, dot))
    }

    fn conv_program(
        group: usize,
        x: &[usize],
        w: &[usize],
        dtype: DType,
    ) -> anyhow::Result<(Program, InsId)> {
        let mut p = Program::new();
        let m = p.main();
        let xs = p.add_parameter(m, "x", TensorType::new(dtype, x))?;
        let ws = p.add_parameter(m, "w", TensorType::new(dtype, w))?;
        let conv = Conv::new(x.len() - 2).with_group(group);
        let conv = if dtype == DType::I8 { conv.quantized() } else { conv };
        let ins = p.add_instruction(m, conv, &[xs, ws], &[])?;
        Ok((p, ins))
    }

    fn pointwise_body(p: &mut Program, name: &str, dtype: DType, op: Op) -> anyhow::Result<ModuleId> {
        let body = p.create_module(name)?;
        let x = p.add_parameter(body, "x0", TensorType::scalar(dtype))?;
        let r = p.add_instruction(body, op, &[x], &[])?;
        p.add_return(body, &[r])?;
        Ok(body)
    }

    #[test]
    fn contraction_bound_only_for_anchors() -> anyhow::Result<()> {
        let h = Heuristics::default();
        let (p, dot) = dot_program(4096, DType::F32)?;
        assert!(!is_offload_dot(&p, dot, Mode::Fast, true, &h));
        assert!(is_offload_dot(&p, dot, Mode::Fast, false, &h));
        assert!(is_offload_dot(&p, dot, Mode::All, true, &h));
        assert!(!is_offload_dot(&p, dot, Mode::None, false, &h));

        let (p, dot) = dot_program(1024, DType::F16)?;
        assert!(is_offload_dot(&p, dot, Mode::Fast, true, &h));
        assert!(!is_offload_dot(&p, dot, Mode::Int8, true, &h));
        Ok(())
    }

    #[test]
    fn fp8_dot_is_rejected() -> anyhow::Result<()> {
        let h = Heuristics::default();
        let mut p = Program::new();
        let m = p.main();
        let ty = TensorType::new(DType::Fp8E4M3Fnuz, [16, 16]);
        let a = p.add_parameter(m, "a", ty.clone())?;
        let b = p.add_parameter(m, "b", ty)?;
        let dot = p.add_instruction(m, Op::dot(), &[a, b], &[])?;
        let qdot = p.add_instruction(m, Op::quant_dot(), &[a, b], &[])?;
        assert!(!is_offload_dot(&p, dot, Mode::All, false, &h));
        assert!(is_offload_dot(&p, qdot, Mode::Int8, true, &h));
        Ok(())
    }

    #[test]
    fn grouped_conv_needs_4d_output() -> anyhow::Result<()> {
        let h = Heuristics::default();
        let (p, conv) = conv_program(8, &[1, 16, 32], &[16, 2, 3], DType::F32)?;
        for mode in [Mode::All, Mode::Fast, Mode::Int8] {
            assert!(!is_offload_conv(&p, conv, mode, &h));
        }
        let (p, conv) = conv_program(8, &[1, 16, 8, 8], &[16, 2, 3, 3], DType::F32)?;
        assert!(is_offload_conv(&p, conv, Mode::Fast, &h));
        Ok(())
    }

    #[test]
    fn square_kernel_heuristic() -> anyhow::Result<()> {
        let h = Heuristics::default();
        let (p, conv) = conv_program(1, &[1, 4, 8, 8], &[4, 4, 3, 3], DType::F16)?;
        assert!(!is_offload_conv(&p, conv, Mode::Fast, &h));
        assert!(is_offload_conv(&p, conv, Mode::All, &h));
        let (p, conv) = conv_program(1, &[1, 4, 8, 8], &[4, 4, 1, 1], DType::F16)?;
        assert!(is_offload_conv(&p, conv, Mode::Fast, &h));
        let (p, conv) = conv_program(1, &[1, 4, 8, 8], &[4, 4, 3, 1], DType::F16)?;
        assert!(is_offload_conv(&p, conv, Mode::Fast, &h));
        let (p, conv) = conv_program(1, &[1, 4, 8, 8], &[4, 4, 3, 3], DType::I8)?;
        assert!(is_offload_conv(&p, conv, Mode::Fast, &h));
        assert!(!is_offload_conv(&p, conv, Mode::None, &h));
        Ok(())
    }

    #[test]
    fn pointwise_type_rules() -> anyhow::Result<()> {
        let h = Heuristics {
            input_fusion_excluded: vec!["sigmoid".into()],
            ..Default::default()
        };
        let mut p = Program::new();
        let m = p.main();
        let x = p.add_parameter(m, "x", TensorType::new(DType::F32, [4]))?;
        let xi = p.add_parameter(m, "xi", TensorType::new(DType::I32, [4]))?;

        let sig = pointwise_body(&mut p, "pw_sig", DType::F32, Op::unary(crate::ops::UnaryOp::Sigmoid))?;
        let pw = p.add_instruction(m, Pointwise, &[x], &[sig])?;
        assert!(is_offload_pointwise(&p, pw, &h, false));
        assert!(!is_offload_pointwise(&p, pw, &h, true));

        let exp = pointwise_body(&mut p, "pw_exp", DType::I32, Op::unary(crate::ops::UnaryOp::Exp))?;
        let pw = p.add_instruction(m, Pointwise, &[xi], &[exp])?;
        assert!(!is_offload_pointwise(&p, pw, &h, false));

        let cvt = pointwise_body(&mut p, "pw_cvt", DType::F32, Op::convert(DType::F16))?;
        let pw = p.add_instruction(m, Pointwise, &[x], &[cvt])?;
        assert!(is_offload_pointwise(&p, pw, &h, false));

        let to_fp8 = pointwise_body(&mut p, "pw_fp8", DType::F32, Op::convert(DType::Fp8E4M3Fnuz))?;
        let pw = p.add_instruction(m, Pointwise, &[x], &[to_fp8])?;
        assert!(!is_offload_pointwise(&p, pw, &h, false));
        Ok(())
    }

    #[test]
    fn split_reduce_body() -> anyhow::Result<()> {
        let h = Heuristics::default();
        let mut p = Program::new();
        let m = p.main();
        let ty = TensorType::new(DType::F32, [4, 8]);
        let x = p.add_parameter(m, "x", ty.clone())?;
        let body = p.create_module("reduce_body")?;
        let bx = p.add_parameter(body, "x0", ty)?;
        let r = p.add_instruction(body, Reduce::new(ReduceOp::Mean, rvec![1]), &[bx], &[])?;
        p.add_return(body, &[r])?;
        let sfr = p.add_instruction(m, crate::ops::SplitFusedReduce::new(rvec![1]), &[x], &[body])?;
        assert!(is_offload_split_reduce(&p, sfr, &h));

        let maxed = p.create_module("max_body")?;
        let mx = p.add_parameter(maxed, "x0", TensorType::new(DType::F32, [4, 8]))?;
        let r = p.add_instruction(maxed, Reduce::new(ReduceOp::Max, rvec![1]), &[mx], &[])?;
        p.add_return(maxed, &[r])?;
        let sfr = p.add_instruction(m, crate::ops::SplitFusedReduce::new(rvec![1]), &[x], &[maxed])?;
        assert!(!is_offload_split_reduce(&p, sfr, &h));
        Ok(())
    }

    #[proptest(cases = 32)]
    fn most_restrictive_is_commutative(a: Mode, b: Mode) {
        proptest::prop_assert_eq!(a.most_restrictive(b), b.most_restrictive(a));
        proptest::prop_assert!(a.most_restrictive(b) >= a);
    }

    #[proptest(cases = 32)]
    fn classifiers_are_idempotent(mode: Mode, #[strategy(1usize..4096)] k: usize) {
        let h = Heuristics::default();
        let (p, dot) = dot_program(k, DType::F16).unwrap();
        let first = is_offload_dot(&p, dot, mode, true, &h);
        proptest::prop_assert_eq!(first, is_offload_dot(&p, dot, mode, true, &h));
        proptest::prop_assert_eq!(first, mode != Mode::None && mode != Mode::Int8 && (mode == Mode::All || k <= 1024));
    }
}
