mod common;

use common::*;
use piston_fuse::ops::{Attention, Conv, Permute, Reduce, ReduceOp, SplitFusedReduce, UnaryOp};
use piston_fuse::{rvec, DType, FuseConfig, FuseOffload, Op, Program, TensorType, ValueType};
use test_strategy::proptest;

#[test]
fn conv_bias_relu_becomes_one_call() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let x = p.add_parameter(main, "x", f32([1, 4, 8, 8]))?;
    let w = p.add_parameter(main, "w", f32([8, 4, 1, 1]))?;
    let bias = p.add_parameter(main, "bias", f32([1, 8, 8, 8]))?;
    let conv = p.add_instruction(main, Conv::new(2), &[x, w], &[])?;
    let pw = pointwise(&mut p, "pointwise0", &[conv, bias], |p, m, args| {
        let sum = p.add_instruction(m, Op::add(), &[args[0], args[1]], &[])?;
        Ok(p.add_instruction(m, Op::relu(), &[sum], &[])?)
    })?;
    p.add_return(main, &[pw])?;
    let before = p[pw].ty().clone();

    let stats = FuseOffload::default().run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.anchor_pointwise, 1);
    assert_eq!(stats.standalone, 0);
    assert_eq!(offload_calls(&p), vec![pw]);
    assert_eq!(p[pw].ty(), &before);
    assert_eq!(p[pw].inputs(), &[x, w, bias]);
    assert!(!p.contains(conv));
    assert!(!p.has_module("pointwise0"));

    let region = region_of(&p, pw);
    assert_eq!(p[region].name(), "offload_pointwise0");
    assert_eq!(
        op_names(&p, region),
        ["@param", "@param", "@param", "convolution", "add", "relu", "@return"]
    );
    let params: Vec<_> = p
        .parameters(region)
        .into_iter()
        .map(|i| p[i].op().param_name().unwrap_or_default().to_string())
        .collect();
    assert_eq!(params, ["y0", "y1", "x2"]);
    Ok(())
}

#[test]
fn long_contraction_is_only_wrapped() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([64, 4096]))?;
    let b = p.add_parameter(main, "b", f32([4096, 64]))?;
    let dot = p.add_instruction(main, Op::dot(), &[a, b], &[])?;
    let pw = relu_pointwise(&mut p, "pointwise0", dot)?;
    p.add_return(main, &[pw])?;

    let stats = FuseOffload::default().run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.anchor_pointwise, 0);
    assert_eq!(stats.standalone, 1);
    assert_eq!(offload_calls(&p), vec![dot]);
    assert_eq!(p[pw].name(), "pointwise");
    assert_eq!(p[pw].inputs(), &[dot]);
    assert_eq!(p[region_of(&p, dot)].name(), "offload_dot0");
    Ok(())
}

#[test]
fn grouped_conv1d_is_left_alone() -> anyhow::Result<()> {
    init_logger();
    for device in ["gfx90a", "gfx1100"] {
        let mut p = Program::new();
        let main = p.main();
        let x = p.add_parameter(main, "x", f32([1, 16, 32]))?;
        let w = p.add_parameter(main, "w", f32([16, 2, 3]))?;
        let conv = p.add_instruction(main, Conv::new(1).with_group(8), &[x, w], &[])?;
        let pw = relu_pointwise(&mut p, "pointwise0", conv)?;
        p.add_return(main, &[pw])?;

        let pass = FuseOffload::new(FuseConfig::default().with_device_name(device));
        let stats = pass.run(&mut p)?;
        assert_eq!(stats.rewrites(), 0);
        assert!(offload_calls(&p).is_empty());
        assert_eq!(p[conv].name(), "convolution");
    }
    Ok(())
}

#[test]
fn second_path_to_anchor_declines() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([16, 32]))?;
    let b = p.add_parameter(main, "b", f32([32, 16]))?;
    let dot = p.add_instruction(main, Op::dot(), &[a, b], &[])?;
    let e = p.add_instruction(main, Op::unary(UnaryOp::Exp), &[dot], &[])?;
    let pw = pointwise(&mut p, "pointwise0", &[dot, e], |p, m, args| {
        Ok(p.add_instruction(m, Op::mul(), &[args[0], args[1]], &[])?)
    })?;
    p.add_return(main, &[pw])?;

    let stats = FuseOffload::default().run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.anchor_pointwise, 0);
    assert!(stats.declined >= 1);
    assert_eq!(p[pw].name(), "pointwise");
    assert_eq!(stats.standalone, 1);
    assert_eq!(offload_calls(&p), vec![dot]);
    Ok(())
}

#[test]
fn shared_anchor_splits_into_tuple() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([16, 32]))?;
    let b = p.add_parameter(main, "b", f32([32, 8]))?;
    let dot = p.add_instruction(main, Op::dot(), &[a, b], &[])?;
    let side = p.add_instruction(main, Op::unary(UnaryOp::Tanh), &[dot], &[])?;
    let pw = relu_pointwise(&mut p, "pointwise0", dot)?;
    p.add_return(main, &[pw, side])?;
    let anchor_ty = p[dot].ty().clone();

    let stats = FuseOffload::default().run(&mut p)?;
    p.verify()?;
    assert_eq!(stats.anchor_pointwise, 1);

    let [call] = offload_calls(&p)[..] else {
        panic!("expected one offload call");
    };
    assert_eq!(
        p[call].ty(),
        &ValueType::Tuple(vec![anchor_ty.as_tensor().cloned().unwrap(), f32([16, 8])])
    );
    assert_eq!(p[pw].op(), &Op::tuple_elem(1));
    assert_eq!(p[pw].inputs(), &[call]);

    let elem0 = p[side].inputs()[0];
    assert_eq!(p[elem0].op(), &Op::tuple_elem(0));
    assert_eq!(p[elem0].inputs(), &[call]);
    assert!(!p.contains(dot));
    let region = region_of(&p, call);
    assert_eq!(op_names(&p, region), ["@param", "@param", "dot", "relu", "@return"]);
    Ok(())
}

#[test]
fn mean_over_shared_dot_returns_both() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([4, 32]))?;
    let b = p.add_parameter(main, "b", f32([32, 16]))?;
    let dot = p.add_instruction(main, Op::dot(), &[a, b], &[])?;
    let early = p.add_instruction(main, Op::relu(), &[dot], &[])?;

    let body = p.create_module("reduce_mean0")?;
    let bx = p.add_parameter(body, "x0", f32([4, 16]))?;
    let mean = p.add_instruction(body, Reduce::new(ReduceOp::Mean, rvec![1]), &[bx], &[])?;
    p.add_return(body, &[mean])?;
    let sfr = p.add_instruction(main, SplitFusedReduce::new(rvec![1]), &[dot], &[body])?;
    let late = p.add_instruction(main, Op::unary(UnaryOp::Exp), &[dot], &[])?;
    p.add_return(main, &[sfr, early, late])?;

    let cfg = FuseConfig::default().with_reduce_fusion(true);
    let stats = FuseOffload::new(cfg).run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.standalone, 1);
    assert_eq!(stats.split_reduce, 1);
    let [call] = offload_calls(&p)[..] else {
        panic!("expected one offload call");
    };
    assert_eq!(
        p[call].ty(),
        &ValueType::Tuple(vec![f32([4, 1]), f32([4, 16])])
    );
    assert_eq!(p[sfr].op(), &Op::tuple_elem(0));
    assert_eq!(p[sfr].inputs(), &[call]);
    let dot_value = p[early].inputs()[0];
    assert_eq!(p[dot_value].op(), &Op::tuple_elem(1));
    assert_eq!(p[late].inputs(), &[dot_value]);
    assert!(!p.contains(dot));

    let order = p[main].instructions();
    let pos = |i| order.iter().position(|&x| x == i);
    assert!(pos(dot_value) < pos(early));

    let region = region_of(&p, call);
    assert_eq!(p[region].name(), "offload_dot0_reduce_mean0");
    assert_eq!(
        op_names(&p, region),
        ["@param", "@param", "dot", "reduce_mean", "@return"]
    );
    assert!(!p.has_module("offload_dot0"));
    assert!(!p.has_module("reduce_mean0"));
    Ok(())
}

#[test]
fn reduce_fusion_inlines_pointwise() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([4, 32]))?;
    let b = p.add_parameter(main, "b", f32([32, 16]))?;
    let dot = p.add_instruction(main, Op::dot(), &[a, b], &[])?;

    let body = p.create_module("reduce_sum0")?;
    let bx = p.add_parameter(body, "x0", f32([4, 16]))?;
    let square = pointwise_body(&mut p, "square", &[DType::F32], |p, m, args| {
        Ok(p.add_instruction(m, Op::mul(), &[args[0], args[0]], &[])?)
    })?;
    let sq = p.add_instruction(body, piston_fuse::ops::Pointwise, &[bx], &[square])?;
    let sum = p.add_instruction(body, Reduce::new(ReduceOp::Sum, rvec![1]), &[sq], &[])?;
    p.add_return(body, &[sum])?;
    let sfr = p.add_instruction(main, SplitFusedReduce::new(rvec![1]), &[dot], &[body])?;
    p.add_return(main, &[sfr])?;

    let cfg = FuseConfig::default().with_reduce_fusion(true);
    let stats = FuseOffload::new(cfg).run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.split_reduce, 1);
    assert_eq!(offload_calls(&p), vec![sfr]);
    let region = region_of(&p, sfr);
    assert_eq!(
        op_names(&p, region),
        ["@param", "@param", "dot", "mul", "reduce_sum", "@return"]
    );
    assert!(!p.has_module("square"));
    Ok(())
}

#[test]
fn attention_absorbs_trailing_pointwise() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let ty = |s: [usize; 3]| TensorType::new(DType::F16, s);
    let q = p.add_parameter(main, "q", ty([2, 16, 8]))?;
    let k = p.add_parameter(main, "k", ty([2, 8, 16]))?;
    let bias = p.add_parameter(main, "bias", ty([2, 16, 16]))?;
    let v = p.add_parameter(main, "v", ty([2, 16, 8]))?;
    let gsg = p.add_instruction(main, Attention::new(0.125), &[q, k, bias, v], &[])?;
    let pw = pointwise(&mut p, "pointwise0", &[gsg], |p, m, args| {
        Ok(p.add_instruction(m, Op::convert(DType::F32), &[args[0]], &[])?)
    })?;
    p.add_return(main, &[pw])?;

    let cfg = FuseConfig::default().with_specific_ops("attention");
    assert!(cfg.attention_enabled());
    let stats = FuseOffload::new(cfg).run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.attention, 1);
    assert_eq!(offload_calls(&p), vec![pw]);
    assert_eq!(p[pw].inputs(), &[q, k, bias, v]);
    assert!(!p.contains(gsg));
    let region = region_of(&p, pw);
    assert_eq!(p[region].name(), "offload_gemm_softmax_gemm0");
    assert_eq!(
        op_names(&p, region),
        [
            "@param",
            "@param",
            "@param",
            "@param",
            "@literal",
            "dot",
            "multibroadcast",
            "mul",
            "add",
            "softmax",
            "dot",
            "convert",
            "@return"
        ]
    );
    Ok(())
}

#[test]
fn attention_stays_without_request() -> anyhow::Result<()> {
    let mut p = Program::new();
    let main = p.main();
    let t = TensorType::new(DType::F32, [8, 8]);
    let q = p.add_parameter(main, "q", t.clone())?;
    let k = p.add_parameter(main, "k", t.clone())?;
    let v = p.add_parameter(main, "v", t)?;
    let gsg = p.add_instruction(main, Attention::new(1.0), &[q, k, v], &[])?;
    p.add_return(main, &[gsg])?;
    let stats = FuseOffload::default().run(&mut p)?;
    assert_eq!(stats.attention, 0);
    assert_eq!(p[gsg].name(), "gemm_softmax_gemm");
    Ok(())
}

#[test]
fn input_fusion_pulls_producer_in() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([16, 32]))?;
    let b = p.add_parameter(main, "b", f32([32, 8]))?;
    let scaled = pointwise(&mut p, "pointwise0", &[a], |p, m, args| {
        let two = p.add_literal(m, piston_fuse::ops::Literal::scalar(DType::F32, 2.0)?)?;
        Ok(p.add_instruction(m, Op::mul(), &[args[0], two], &[])?)
    })?;
    let dot = p.add_instruction(main, Op::dot(), &[scaled, b], &[])?;
    p.add_return(main, &[dot])?;

    let cfg = FuseConfig::default().with_input_fusion(true);
    let stats = FuseOffload::new(cfg).run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.standalone, 1);
    assert_eq!(stats.input_fusion, 1);
    assert_eq!(offload_calls(&p), vec![dot]);
    assert_eq!(p[dot].inputs(), &[a, b]);
    assert!(!p.contains(scaled));
    let region = region_of(&p, dot);
    assert_eq!(p[region].name(), "pointwise0:offload_dot0");
    assert_eq!(
        op_names(&p, region),
        ["@param", "@param", "@literal", "multibroadcast", "mul", "dot", "@return"]
    );
    assert!(!p.has_module("offload_dot0"));
    Ok(())
}

#[test]
fn disabled_pass_is_a_no_op() -> anyhow::Result<()> {
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([4, 4]))?;
    let dot = p.add_instruction(main, Op::dot(), &[a, a], &[])?;
    p.add_return(main, &[dot])?;
    let before = p.to_string();
    let stats = FuseOffload::new(FuseConfig::default().with_disabled(true)).run(&mut p)?;
    assert_eq!(stats.rewrites(), 0);
    assert_eq!(p.to_string(), before);
    Ok(())
}

#[test]
fn excluded_family_is_skipped() -> anyhow::Result<()> {
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([4, 8]))?;
    let b = p.add_parameter(main, "b", f32([8, 4]))?;
    let dot = p.add_instruction(main, Op::dot(), &[a, b], &[])?;
    let pw = relu_pointwise(&mut p, "pointwise0", dot)?;
    p.add_return(main, &[pw])?;
    let cfg = FuseConfig::default().with_specific_ops("!fused_dot,~dot");
    let stats = FuseOffload::new(cfg).run(&mut p)?;
    assert_eq!(stats.rewrites(), 0);
    assert!(offload_calls(&p).is_empty());
    Ok(())
}

#[test]
fn shared_transpose_splits_into_tuple() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([16, 32]))?;
    let b = p.add_parameter(main, "b", f32([32, 8]))?;
    let dot = p.add_instruction(main, Op::dot(), &[a, b], &[])?;
    let t = p.add_instruction(main, Permute::new(rvec![1, 0]), &[dot], &[])?;
    let side = p.add_instruction(main, Op::unary(UnaryOp::Tanh), &[t], &[])?;
    let pw = relu_pointwise(&mut p, "pointwise0", t)?;
    p.add_return(main, &[pw, side])?;
    let (pw_ty, side_ty) = (p[pw].ty().clone(), p[side].ty().clone());

    let stats = FuseOffload::default().run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.anchor_pointwise, 1);
    let [call] = offload_calls(&p)[..] else {
        panic!("expected one offload call");
    };
    assert_eq!(
        p[call].ty(),
        &ValueType::Tuple(vec![f32([16, 8]), f32([8, 16])])
    );
    assert_eq!(p[pw].op(), &Op::tuple_elem(1));
    assert_eq!(p[pw].ty(), &pw_ty);
    assert_eq!(p[side].ty(), &side_ty);
    assert_eq!(p[side].inputs(), &[t]);
    let elem0 = p[t].inputs()[0];
    assert_eq!(p[elem0].op(), &Op::tuple_elem(0));
    assert!(!p.contains(dot));
    assert_eq!(
        op_names(&p, region_of(&p, call)),
        ["@param", "@param", "dot", "transpose", "relu", "@return"]
    );
    Ok(())
}

#[test]
fn lone_attention_is_rebuilt() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let q = p.add_parameter(main, "q", f32([8, 8]))?;
    let k = p.add_parameter(main, "k", f32([8, 8]))?;
    let v = p.add_parameter(main, "v", f32([8, 8]))?;
    let gsg = p.add_instruction(main, Attention::new(0.5), &[q, k, v], &[])?;
    p.add_return(main, &[gsg])?;
    let before = p[gsg].ty().clone();

    let cfg = FuseConfig::default().with_specific_ops("attention");
    let stats = FuseOffload::new(cfg).run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.attention, 1);
    assert_eq!(offload_calls(&p), vec![gsg]);
    assert_eq!(p[gsg].ty(), &before);
    assert_eq!(p[gsg].inputs(), &[q, k, v]);
    let region = region_of(&p, gsg);
    assert_eq!(p[region].name(), "offload_gemm_softmax_gemm0");
    assert_eq!(
        op_names(&p, region),
        [
            "@param",
            "@param",
            "@param",
            "@literal",
            "dot",
            "multibroadcast",
            "mul",
            "softmax",
            "dot",
            "@return"
        ]
    );
    Ok(())
}

#[test]
fn select_attention_keeps_condition_and_fill() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let half = |s: [usize; 3]| TensorType::new(DType::F16, s);
    let q = p.add_parameter(main, "q", half([2, 16, 8]))?;
    let k = p.add_parameter(main, "k", half([2, 8, 16]))?;
    let cond = p.add_parameter(main, "cond", TensorType::new(DType::Bool, [2, 16, 16]))?;
    let fill = p.add_parameter(main, "fill", half([2, 16, 16]))?;
    let v = p.add_parameter(main, "v", half([2, 16, 8]))?;
    let gsg = p.add_instruction(main, Attention::new(0.125), &[q, k, cond, fill, v], &[])?;
    p.add_return(main, &[gsg])?;
    let before = p[gsg].ty().clone();

    let cfg = FuseConfig::default().with_specific_ops("attention");
    let stats = FuseOffload::new(cfg).run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.attention, 1);
    assert_eq!(p[gsg].ty(), &before);
    assert_eq!(p[gsg].inputs(), &[q, k, cond, fill, v]);
    let region = region_of(&p, gsg);
    let params: Vec<_> = p
        .parameters(region)
        .into_iter()
        .map(|i| p[i].op().param_name().unwrap_or_default().to_string())
        .collect();
    assert_eq!(params, ["y0", "y1", "y_cond", "y_const", "z"]);
    assert!(op_names(&p, region).contains(&"where"));
    Ok(())
}

#[test]
fn input_fusion_declines_shared_input() -> anyhow::Result<()> {
    init_logger();
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([16, 16]))?;
    let scaled = relu_pointwise(&mut p, "pointwise0", a)?;
    let at = p.add_instruction(main, Permute::new(rvec![1, 0]), &[a], &[])?;
    let dot = p.add_instruction(main, Op::dot(), &[scaled, at], &[])?;
    p.add_return(main, &[dot])?;
    let before = p[dot].ty().clone();

    let cfg = FuseConfig::default().with_input_fusion(true);
    let stats = FuseOffload::new(cfg).run(&mut p)?;
    p.verify()?;

    assert_eq!(stats.standalone, 1);
    assert_eq!(stats.input_fusion, 0);
    assert!(stats.declined >= 1);
    assert_eq!(offload_calls(&p), vec![dot]);
    assert_eq!(p[dot].ty(), &before);
    assert_eq!(p[dot].inputs(), &[scaled, a]);
    assert_eq!(p[region_of(&p, dot)].name(), "offload_dot0");
    assert!(!p.has_module("pointwise0:offload_dot0"));
    Ok(())
}

const UNARY: [UnaryOp; 13] = [
    UnaryOp::Abs,
    UnaryOp::Neg,
    UnaryOp::Relu,
    UnaryOp::Exp,
    UnaryOp::Log,
    UnaryOp::Sqrt,
    UnaryOp::Rsqrt,
    UnaryOp::Recip,
    UnaryOp::Sigmoid,
    UnaryOp::Tanh,
    UnaryOp::Erf,
    UnaryOp::Ceil,
    UnaryOp::Floor,
];

#[proptest(cases = 24)]
fn fusion_preserves_output_types(
    #[strategy(1usize..8)] m: usize,
    #[strategy(1usize..2048)] k: usize,
    #[strategy(1usize..8)] n: usize,
    #[strategy(0usize..13)] op: usize,
    shared: bool,
) {
    let op = UNARY[op];
    let mut p = Program::new();
    let main = p.main();
    let a = p.add_parameter(main, "a", f32([m, k])).unwrap();
    let b = p.add_parameter(main, "b", f32([k, n])).unwrap();
    let dot = p.add_instruction(main, Op::dot(), &[a, b], &[]).unwrap();
    let pw = pointwise(&mut p, "pointwise0", &[dot], |p, body, args| {
        Ok(p.add_instruction(body, Op::unary(op), &[args[0]], &[])?)
    })
    .unwrap();
    let mut outs = vec![pw];
    if shared {
        outs.push(p.add_instruction(main, Op::relu(), &[dot], &[]).unwrap());
    }
    p.add_return(main, &outs).unwrap();
    let ret = p.return_of(main).unwrap();
    let before = p[ret].ty().clone();

    let stats = FuseOffload::default().run(&mut p).unwrap();
    p.verify().unwrap();
    proptest::prop_assert_eq!(p[ret].ty(), &before);
    proptest::prop_assert_eq!(stats.rewrites(), 1);
    proptest::prop_assert_eq!(stats.anchor_pointwise, usize::from(k <= 1024));
    proptest::prop_assert_eq!(offload_calls(&p).len(), 1);
}
