use log::{debug, info, trace};

use crate::fusion::{
    AnchorPointwise, FuseError, FusedAttention, FusionStats, InputFusion, NameCounter, Rewrite,
    RewriteContext, SplitReduce, StandaloneAnchor, StandaloneAttention,
};
use crate::{eliminate_dead_code, FuseConfig, HashSet, Matcher, Op, Program};

/// The offload pass: runs every enabled rule family to exhaustion.
///
/// Order: attention (fused, then standalone), anchor+pointwise, standalone
/// convolution and dot, dead-code elimination, split reduce, input fusion.
#[derive(Debug, Clone, Default)]
pub struct FuseOffload {
    config: FuseConfig,
}

impl FuseOffload {
    pub fn new(config: FuseConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(FuseConfig::from_env()?))
    }

    pub fn config(&self) -> &FuseConfig {
        &self.config
    }

    pub fn run(&self, program: &mut Program) -> Result<FusionStats, FuseError> {
        let mut stats = FusionStats::default();
        if self.config.disabled {
            debug!("Offload fusion disabled");
            return Ok(stats);
        }
        let cfg = &self.config;
        let mut names = NameCounter::default();
        let mut ctx = RewriteContext {
            program,
            names: &mut names,
            heuristics: &cfg.heuristics,
        };

        if cfg.attention_enabled() {
            stats.attention += run_family(&mut ctx, &[&FusedAttention], &mut stats.declined)?;
            stats.attention += run_family(&mut ctx, &[&StandaloneAttention], &mut stats.declined)?;
        }
        let fused = AnchorPointwise {
            conv_mode: cfg.mode("fused_convolution"),
            dot_mode: cfg.mode("fused_dot"),
        };
        stats.anchor_pointwise = run_family(&mut ctx, &[&fused], &mut stats.declined)?;
        let conv = StandaloneAnchor::conv(cfg.mode("convolution"));
        let dot = StandaloneAnchor::dot(cfg.mode("dot"));
        stats.standalone = run_family(&mut ctx, &[&conv, &dot], &mut stats.declined)?;
        stats.dce = eliminate_dead_code(ctx.program)?;
        if cfg.reduce_fusion {
            stats.split_reduce = run_family(&mut ctx, &[&SplitReduce], &mut stats.declined)?;
        }
        if cfg.input_fusion {
            stats.input_fusion = run_family(&mut ctx, &[&InputFusion], &mut stats.declined)?;
        }

        let main = ctx.program.main();
        stats.offload_calls = ctx.program[main]
            .instructions()
            .iter()
            .filter(|&&i| matches!(ctx.program[i].op(), Op::Offload(_)))
            .count();
        info!("{stats}");
        Ok(stats)
    }
}

/// Scans the main module in order, applying the first rule that accepts a
/// match and restarting after every rewrite. Returns the number of rewrites.
fn run_family(
    ctx: &mut RewriteContext<'_>,
    rules: &[&dyn Rewrite],
    declined: &mut usize,
) -> Result<usize, FuseError> {
    let matchers: Vec<Matcher> = rules.iter().map(|r| r.matcher()).collect();
    let mut seen = HashSet::default();
    let mut applied = 0;
    'scan: loop {
        let main = ctx.program.main();
        let order = ctx.program[main].instructions().to_vec();
        for ins in order {
            for (i, (rule, matcher)) in rules.iter().zip(&matchers).enumerate() {
                let Some(found) = matcher.matches(ctx.program, ins, ctx.heuristics) else {
                    continue;
                };
                if rule.apply(ctx, &found)? {
                    applied += 1;
                    #[cfg(debug_assertions)]
                    ctx.program.verify()?;
                    continue 'scan;
                }
                if seen.insert((i, ins)) {
                    *declined += 1;
                }
                trace!("{} declined at {ins:?}", rule.name());
            }
        }
        break;
    }
    let family: Vec<&str> = rules.iter().map(|r| r.name()).collect();
    debug!("{}: {applied} rewrite(s)", family.join("+"));
    Ok(applied)
}
