//! Shape-only chains between a fusion boundary and the instruction feeding it.
use crate::ops::Reindex;
use crate::{GraphError, InsId, ModuleId, Op, Program};

/// Shape-only operations a rule may thread into a region.
pub const RESHAPERS: [&str; 9] = [
    "slice",
    "transpose",
    "broadcast",
    "multibroadcast",
    "contiguous",
    "reshape",
    "squeeze",
    "flatten",
    "unsqueeze",
];

/// [`RESHAPERS`] without `slice`.
pub const VIEW_RESHAPERS: [&str; 8] = [
    "transpose",
    "broadcast",
    "multibroadcast",
    "contiguous",
    "reshape",
    "squeeze",
    "flatten",
    "unsqueeze",
];

/// A run of shape-only instructions ending at a non-shape-only one.
#[derive(Debug, Clone, PartialEq)]
pub struct ReshapeChain {
    /// The first instruction that is not shape-only.
    pub upper: InsId,
    /// The walked instructions, outermost first.
    pub nodes: Vec<InsId>,
    /// Their operations, outermost first. Regrouping operations are
    /// recorded as a `reshape` to their output dimensions.
    pub ops: Vec<Op>,
}

impl ReshapeChain {
    /// Walks up from `ins`. `slice` stops the walk unless `through_slice`.
    pub fn walk(program: &Program, ins: InsId, through_slice: bool) -> Self {
        let mut chain = ReshapeChain {
            upper: ins,
            nodes: Vec::new(),
            ops: Vec::new(),
        };
        while let Some(inst) = program.get(chain.upper) {
            let Some(reindex) = inst.op().as_reindex() else {
                break;
            };
            if matches!(reindex, Reindex::Slice(_)) && !through_slice {
                break;
            }
            let op = match inst.ty().as_tensor() {
                Some(out) if reindex.is_regrouping() => Op::reshape(out.shape.clone()),
                _ => inst.op().clone(),
            };
            chain.nodes.push(chain.upper);
            chain.ops.push(op);
            chain.upper = inst.inputs()[0];
        }
        chain
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Re-materializes the chain in module `m` on top of `base`, innermost
    /// first. Returns the outermost result.
    pub fn replay(&self, program: &mut Program, m: ModuleId, base: InsId) -> Result<InsId, GraphError> {
        self.ops.iter().rev().try_fold(base, |cur, op| {
            program.add_instruction(m, op.clone(), &[cur], &[])
        })
    }
}
