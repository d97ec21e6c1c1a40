//! Building bypass regions by replaying sub-programs.
use log::trace;

use super::{FuseError, ReshapeChain};
use crate::ops::Literal;
use crate::{GraphError, HashMap, InsId, InvariantError, ModuleId, Op, OpPattern, Program, Shape};

/// How [`RegionBuilder::fuse`] treats the instructions it replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    Plain,
    /// `pointwise` instructions are expanded in place.
    InlinePointwise,
    /// Elementwise operands with differing dimensions are broadcast to a
    /// common shape.
    CommonOp,
}

/// A bypass region under construction.
///
/// `map` translates instructions of the enclosing module, and of replayed
/// sub-programs, to their counterparts in the region. Every region parameter
/// is bound to the enclosing-module instruction that feeds it at the call site.
#[derive(Debug)]
pub struct RegionBuilder {
    pub module: ModuleId,
    pub map: HashMap<InsId, InsId>,
    bindings: HashMap<InsId, InsId>,
}

impl RegionBuilder {
    pub fn new(program: &mut Program, name: impl Into<String>) -> Result<Self, FuseError> {
        Ok(Self {
            module: program.create_module(name)?,
            map: HashMap::default(),
            bindings: HashMap::default(),
        })
    }

    /// Continues a copied region whose parameters are fed by `inputs`, in
    /// declaration order. An input feeding several parameters maps to the first.
    pub fn from_copy(program: &Program, module: ModuleId, inputs: &[InsId]) -> Result<Self, FuseError> {
        let params = program.parameters(module);
        if params.len() != inputs.len() {
            return Err(InvariantError::InputArity {
                op: "offload",
                accepted: params.len()..=params.len(),
                actual: inputs.len(),
            }
            .into());
        }
        let mut builder = Self {
            module,
            map: HashMap::default(),
            bindings: HashMap::default(),
        };
        for (&p, &outer) in params.iter().zip(inputs) {
            builder.bindings.insert(p, outer);
            builder.map.entry(outer).or_insert(p);
        }
        Ok(builder)
    }

    /// Declares a parameter typed as `outer` made standard and binds it to `outer`.
    pub fn add_named_input(
        &mut self,
        program: &mut Program,
        outer: InsId,
        name: impl Into<String>,
    ) -> Result<InsId, FuseError> {
        let ty = program[outer].tensor()?.as_standard();
        let param = program.add_parameter(self.module, name, ty)?;
        self.bindings.insert(param, outer);
        Ok(param)
    }

    /// Like [`add_named_input`](Self::add_named_input) with the next free `x<n>` name,
    /// and records `outer` in the map.
    pub fn add_input(&mut self, program: &mut Program, outer: InsId) -> Result<InsId, FuseError> {
        let mut n = program.parameters(self.module).len();
        while program.parameter(self.module, &format!("x{n}")).is_some() {
            n += 1;
        }
        let param = self.add_named_input(program, outer, format!("x{n}"))?;
        self.map.insert(outer, param);
        Ok(param)
    }

    /// Threads each input's shape-only chain through a `y<i>` parameter and
    /// applies `op` to the results. Inputs are not deduplicated.
    pub fn fuse_anchor(&mut self, program: &mut Program, op: &Op, inputs: &[InsId]) -> Result<InsId, FuseError> {
        let mut args = Vec::with_capacity(inputs.len());
        for (i, &input) in inputs.iter().enumerate() {
            let chain = ReshapeChain::walk(program, input, true);
            let param = self.add_named_input(program, chain.upper, format!("y{i}"))?;
            args.push(chain.replay(program, self.module, param)?);
        }
        Ok(program.add_instruction(self.module, op.clone(), &args, &[])?)
    }

    /// Copies the literals of `body` into the region, broadcast to `dims`,
    /// and maps them.
    pub fn rehome_literals(&mut self, program: &mut Program, body: ModuleId, dims: &Shape) -> Result<(), FuseError> {
        let map = &mut self.map;
        Self::rehome_into(program, self.module, body, dims, map)
    }

    fn rehome_into(
        program: &mut Program,
        region: ModuleId,
        body: ModuleId,
        dims: &Shape,
        map: &mut HashMap<InsId, InsId>,
    ) -> Result<(), FuseError> {
        let literals: Vec<(InsId, Literal)> = program[body]
            .instructions()
            .iter()
            .filter_map(|&i| match program[i].op() {
                Op::Literal(lit) => Some((i, lit.clone())),
                _ => None,
            })
            .collect();
        for (ins, lit) in literals {
            let copy = program.add_literal(region, lit)?;
            let wide = program.add_instruction(region, Op::multibroadcast(dims.clone()), &[copy], &[])?;
            map.insert(ins, wide);
        }
        Ok(())
    }

    /// Replays `body` into the region with its parameters bound, in
    /// declaration order, to `inputs`. Inputs the map does not know yet
    /// become new region parameters. Returns the region values `body` returns.
    pub fn fuse(
        &mut self,
        program: &mut Program,
        body: ModuleId,
        inputs: &[InsId],
        mode: ReplayMode,
    ) -> Result<Vec<InsId>, FuseError> {
        for &input in inputs {
            if !self.map.contains_key(&input) {
                self.add_input(program, input)?;
            }
        }
        let params = program.parameters(body);
        for (i, &p) in params.iter().enumerate() {
            let outer = inputs.get(i).ok_or_else(|| {
                FuseError::UnboundParam(program[p].op().param_name().unwrap_or_default().to_string())
            })?;
            let bound = lookup(&self.map, *outer)?;
            self.map.insert(p, bound);
        }
        let module = self.module;
        replay(program, module, body, &mut self.map, mode)
    }

    /// Adds the region's return and yields the call-site inputs: the
    /// instruction bound to each parameter, in declaration order.
    pub fn finish(self, program: &mut Program, returns: &[InsId]) -> Result<Vec<InsId>, FuseError> {
        program.add_return(self.module, returns)?;
        program
            .parameters(self.module)
            .into_iter()
            .map(|p| {
                self.bindings.get(&p).copied().ok_or_else(|| {
                    FuseError::UnboundParam(program[p].op().param_name().unwrap_or_default().to_string())
                })
            })
            .collect()
    }
}

/// Replays every instruction of `body` not already in `map` into `region`.
fn replay(
    program: &mut Program,
    region: ModuleId,
    body: ModuleId,
    map: &mut HashMap<InsId, InsId>,
    mode: ReplayMode,
) -> Result<Vec<InsId>, FuseError> {
    let order = program[body].instructions().to_vec();
    let mut returns = None;
    for ins in order {
        if map.contains_key(&ins) {
            continue;
        }
        let inst = program[ins].clone();
        if inst.op().is_return() {
            returns = Some(inst.inputs().to_vec());
            continue;
        }
        if inst.op().is_param() {
            let name = inst.op().param_name().unwrap_or_default().to_string();
            return Err(FuseError::UnboundParam(name));
        }
        let mut args = inst
            .inputs()
            .iter()
            .map(|&i| lookup(map, i))
            .collect::<Result<Vec<_>, _>>()?;
        let copy = match (mode, inst.op()) {
            (_, Op::Literal(lit)) => program.add_literal(region, lit.clone())?,
            (ReplayMode::InlinePointwise, Op::Pointwise(_)) => {
                let [nested] = inst.module_inputs() else {
                    return Err(InvariantError::ModuleArity {
                        op: "pointwise",
                        accepted: 1..=1,
                        actual: inst.module_inputs().len(),
                    }
                    .into());
                };
                let dims = inst.tensor()?.shape.clone();
                inline(program, region, *nested, &args, &dims)?
            }
            (ReplayMode::CommonOp, op) if op.pattern() == OpPattern::Elemwise && args.len() > 1 => {
                broadcast_common(program, region, &mut args)?;
                program.add_instruction(region, op.clone(), &args, inst.module_inputs())?
            }
            (_, op) => program.add_instruction(region, op.clone(), &args, inst.module_inputs())?,
        };
        map.insert(ins, copy);
    }
    match returns {
        Some(values) => values.iter().map(|&v| lookup(map, v)).collect(),
        None => {
            let last = program[body].last();
            Ok(last.and_then(|l| map.get(&l).copied()).into_iter().collect())
        }
    }
}

fn lookup(map: &HashMap<InsId, InsId>, ins: InsId) -> Result<InsId, FuseError> {
    map.get(&ins)
        .copied()
        .ok_or(FuseError::Graph(GraphError::UnknownInstruction(ins)))
}

/// Expands a pointwise body over region values `args`, with its literals
/// broadcast to `dims`. Returns its first return value.
fn inline(
    program: &mut Program,
    region: ModuleId,
    body: ModuleId,
    args: &[InsId],
    dims: &Shape,
) -> Result<InsId, FuseError> {
    trace!("Inlining pointwise body {}", program[body].name());
    let mut local = HashMap::default();
    RegionBuilder::rehome_into(program, region, body, dims, &mut local)?;
    for (i, p) in program.parameters(body).into_iter().enumerate() {
        let arg = args.get(i).ok_or_else(|| {
            FuseError::UnboundParam(program[p].op().param_name().unwrap_or_default().to_string())
        })?;
        local.insert(p, *arg);
    }
    let values = replay(program, region, body, &mut local, ReplayMode::Plain)?;
    values.first().copied().ok_or(
        InvariantError::ModuleReturns {
            op: "pointwise",
            expected: 1,
            actual: 0,
        }
        .into(),
    )
}

/// Broadcasts every operand whose dimensions differ from the common shape.
fn broadcast_common(program: &mut Program, region: ModuleId, args: &mut [InsId]) -> Result<(), FuseError> {
    let shapes = args
        .iter()
        .map(|&a| Ok(program[a].tensor()?.shape.clone()))
        .collect::<Result<Vec<Shape>, FuseError>>()?;
    let refs: Vec<&Shape> = shapes.iter().collect();
    let common = Shape::multi_broadcast(&refs).ok_or_else(|| InvariantError::BroadcastingFailed(shapes.clone()))?;
    for (arg, shape) in args.iter_mut().zip(shapes.iter()) {
        if *shape != common {
            *arg = program.add_instruction(region, Op::multibroadcast(common.clone()), &[*arg], &[])?;
        }
    }
    Ok(())
}

/// Call-site inputs must be packed or broadcasted; anything else gets a
/// `contiguous` right after it.
pub fn offload_contiguous(program: &mut Program, inputs: &[InsId]) -> Result<Vec<InsId>, FuseError> {
    let mut fixed: HashMap<InsId, InsId> = HashMap::default();
    let mut out = Vec::with_capacity(inputs.len());
    for &input in inputs {
        if let Some(&c) = fixed.get(&input) {
            out.push(c);
            continue;
        }
        let ty = program[input].tensor()?;
        if ty.is_packed() || ty.is_broadcasted() {
            out.push(input);
        } else {
            let c = program.insert_after(input, Op::contiguous(), &[input], &[])?;
            fixed.insert(input, c);
            out.push(c);
        }
    }
    Ok(out)
}
