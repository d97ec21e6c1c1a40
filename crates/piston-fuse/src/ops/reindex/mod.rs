mod broadcast;
mod permute;
mod slice;
mod view;

pub use broadcast::*;
pub use permute::*;
pub use slice::*;
pub use view::*;

use crate::{InvariantError, Op, Operation, Shape, Signature, TensorType, ValueType};

use super::{no_modules, tensor_inputs};

/// Shape-only operations: they change the view or layout of a tensor, never its values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reindex {
    Slice(Slice),
    Permute(Permute),
    Broadcast(Broadcast),
    MultiBroadcast(MultiBroadcast),
    Contiguous(Contiguous),
    Reshape(Reshape),
    Squeeze(Squeeze),
    Unsqueeze(Unsqueeze),
    Flatten(Flatten),
}

impl Reindex {
    pub fn name(&self) -> &'static str {
        match self {
            Reindex::Slice(_) => "slice",
            Reindex::Permute(_) => "transpose",
            Reindex::Broadcast(_) => "broadcast",
            Reindex::MultiBroadcast(_) => "multibroadcast",
            Reindex::Contiguous(_) => "contiguous",
            Reindex::Reshape(_) => "reshape",
            Reindex::Squeeze(_) => "squeeze",
            Reindex::Unsqueeze(_) => "unsqueeze",
            Reindex::Flatten(_) => "flatten",
        }
    }

    /// Squeeze, unsqueeze and flatten only regroup dimensions.
    pub fn is_regrouping(&self) -> bool {
        matches!(
            self,
            Reindex::Squeeze(_) | Reindex::Unsqueeze(_) | Reindex::Flatten(_)
        )
    }

    pub fn output(&self, src: &TensorType) -> Result<TensorType, InvariantError> {
        match self {
            Reindex::Slice(s) => s.output(src),
            Reindex::Permute(p) => p.output(src),
            Reindex::Broadcast(b) => b.output(src),
            Reindex::MultiBroadcast(b) => b.output(src),
            Reindex::Contiguous(_) => Ok(src.as_standard()),
            Reindex::Reshape(r) => r.output(src),
            Reindex::Squeeze(s) => s.output(src),
            Reindex::Unsqueeze(u) => u.output(src),
            Reindex::Flatten(f) => f.output(src),
        }
    }

    pub fn reshape(dims: impl Into<Shape>) -> Self {
        Reindex::Reshape(Reshape::new(dims.into()))
    }
}

macro_rules! impl_from_reindex {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Reindex {
                fn from(r: $variant) -> Self {
                    Reindex::$variant(r)
                }
            }

            impl From<$variant> for Op {
                fn from(r: $variant) -> Self {
                    Op::Reindex(Reindex::$variant(r))
                }
            }
        )*
    };
}

impl_from_reindex!(
    Slice,
    Permute,
    Broadcast,
    MultiBroadcast,
    Contiguous,
    Reshape,
    Squeeze,
    Unsqueeze,
    Flatten,
);

impl Operation for Reindex {
    fn name(&self) -> &'static str {
        Reindex::name(self)
    }

    fn compute_type(
        &self,
        inputs: &[ValueType],
        modules: &[Signature],
    ) -> Result<ValueType, InvariantError> {
        let ts = tensor_inputs(self.name(), inputs, 1..=1)?;
        no_modules(self.name(), modules)?;
        Ok(self.output(ts[0])?.into())
    }
}
