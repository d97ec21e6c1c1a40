use crate::DceStats;

/// What one run of the offload pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionStats {
    /// Attention instructions rebuilt, with or without a trailing pointwise
    pub attention: usize,
    /// Anchors fused with a downstream pointwise
    pub anchor_pointwise: usize,
    /// Anchors wrapped on their own
    pub standalone: usize,
    /// Split reductions merged into an offload call
    pub split_reduce: usize,
    /// Pointwise producers pulled into an offload call
    pub input_fusion: usize,
    /// Matches a rule declined
    pub declined: usize,
    /// Removed by dead-code elimination
    pub dce: DceStats,
    /// Offload calls in the main module afterwards
    pub offload_calls: usize,
}

impl FusionStats {
    pub fn rewrites(&self) -> usize {
        self.attention + self.anchor_pointwise + self.standalone + self.split_reduce + self.input_fusion
    }
}

impl std::fmt::Display for FusionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Offload Statistics:")?;
        writeln!(f, "  Attention:        {}", self.attention)?;
        writeln!(f, "  Anchor+pointwise: {}", self.anchor_pointwise)?;
        writeln!(f, "  Standalone:       {}", self.standalone)?;
        writeln!(f, "  Split reduce:     {}", self.split_reduce)?;
        writeln!(f, "  Input fusion:     {}", self.input_fusion)?;
        writeln!(f, "  Declined:         {}", self.declined)?;
        writeln!(f, "  DCE instructions: {}", self.dce.instructions)?;
        writeln!(f, "  DCE modules:      {}", self.dce.modules)?;
        writeln!(f, "  Offload calls:    {}", self.offload_calls)?;
        Ok(())
    }
}
