#![allow(dead_code)]

use piston_fuse::ops::Pointwise;
use piston_fuse::{DType, InsId, ModuleId, Op, Program, TensorType};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A scalar-bodied pointwise module named `name` with one `x<i>` parameter
/// per entry of `params`. `build` returns the value to return.
pub fn pointwise_body(
    p: &mut Program,
    name: &str,
    params: &[DType],
    build: impl FnOnce(&mut Program, ModuleId, &[InsId]) -> anyhow::Result<InsId>,
) -> anyhow::Result<ModuleId> {
    let body = p.create_module(name)?;
    let args = params
        .iter()
        .enumerate()
        .map(|(i, &dtype)| p.add_parameter(body, format!("x{i}"), TensorType::scalar(dtype)))
        .collect::<Result<Vec<_>, _>>()?;
    let out = build(p, body, &args)?;
    p.add_return(body, &[out])?;
    Ok(body)
}

/// Adds `pointwise(inputs)` to the main module over a fresh body.
pub fn pointwise(
    p: &mut Program,
    name: &str,
    inputs: &[InsId],
    build: impl FnOnce(&mut Program, ModuleId, &[InsId]) -> anyhow::Result<InsId>,
) -> anyhow::Result<InsId> {
    let dtypes = inputs
        .iter()
        .map(|&i| Ok(p[i].tensor()?.dtype))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let body = pointwise_body(p, name, &dtypes, build)?;
    let main = p.main();
    Ok(p.add_instruction(main, Pointwise, inputs, &[body])?)
}

/// `pointwise(x) = relu(x)`
pub fn relu_pointwise(p: &mut Program, name: &str, x: InsId) -> anyhow::Result<InsId> {
    pointwise(p, name, &[x], |p, m, args| Ok(p.add_instruction(m, Op::relu(), &[args[0]], &[])?))
}

pub fn op_names(p: &Program, m: ModuleId) -> Vec<&'static str> {
    p[m].instructions().iter().map(|&i| p[i].name()).collect()
}

pub fn offload_calls(p: &Program) -> Vec<InsId> {
    let main = p.main();
    p[main]
        .instructions()
        .iter()
        .copied()
        .filter(|&i| matches!(p[i].op(), Op::Offload(_)))
        .collect()
}

pub fn region_of(p: &Program, call: InsId) -> ModuleId {
    p[call].module_inputs()[0]
}

pub fn f32(shape: impl Into<piston_fuse::Shape>) -> TensorType {
    TensorType::new(DType::F32, shape)
}
