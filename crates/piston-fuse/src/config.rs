//! Pass configuration, from the environment or built programmatically.
use anyhow::Context;

use crate::Mode;

pub const DISABLE_VAR: &str = "PISTON_OFFLOAD_DISABLE";
pub const OPS_VAR: &str = "PISTON_OFFLOAD_OPS";
pub const REDUCE_FUSION_VAR: &str = "PISTON_OFFLOAD_REDUCE_FUSION";
pub const INPUT_FUSION_VAR: &str = "PISTON_OFFLOAD_INPUT_FUSION";
pub const DOT_K_THRESHOLD_VAR: &str = "PISTON_OFFLOAD_DOT_K_THRESHOLD";

const DEFAULT_MODE: Mode = Mode::Fast;

/// Tunable limits consulted by the classifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heuristics {
    /// Longest contraction a fused dot may have in [`Mode::Fast`].
    pub dot_k_threshold: usize,
    /// Square kernels whose extent this divides stay on the default path in [`Mode::Fast`].
    pub conv_kernel_divisor: usize,
    /// Operations a pointwise feeding an offload call may not contain.
    pub input_fusion_excluded: Vec<String>,
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            dot_k_threshold: 1024,
            conv_kernel_divisor: 3,
            input_fusion_excluded: Vec::new(),
        }
    }
}

/// The inclusion/exclusion list, e.g. `fused,attention,!dot`.
///
/// Entries prefixed with `!` or `~` are exclusions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecificOps {
    requested: Vec<String>,
    rejected: Vec<String>,
}

impl SpecificOps {
    pub fn parse(list: &str) -> Self {
        let mut ops = Self::default();
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.strip_prefix(&['!', '~'][..]) {
                Some(rejected) => ops.rejected.push(rejected.to_string()),
                None => ops.requested.push(entry.to_string()),
            }
        }
        ops
    }

    pub fn requested(&self, option: &str) -> bool {
        Self::lookup(&self.requested, option)
    }

    pub fn rejected(&self, option: &str) -> bool {
        Self::lookup(&self.rejected, option)
    }

    // `fused` stands for every option containing it.
    fn lookup(list: &[String], option: &str) -> bool {
        if list.is_empty() {
            return false;
        }
        if option.contains("fused") && list.iter().any(|o| o == "fused") {
            return true;
        }
        list.iter().any(|o| o == option)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuseConfig {
    pub disabled: bool,
    pub attention: bool,
    pub reduce_fusion: bool,
    pub input_fusion: bool,
    pub specific_ops: SpecificOps,
    pub device_name: String,
    pub heuristics: Heuristics,
}

impl FuseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the `PISTON_OFFLOAD_*` variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let flag = |key: &str| lookup(key).is_some_and(|v| parse_bool(&v));
        let specific_ops = SpecificOps::parse(&lookup(OPS_VAR).unwrap_or_default());
        let mut heuristics = Heuristics::default();
        if let Some(k) = lookup(DOT_K_THRESHOLD_VAR) {
            heuristics.dot_k_threshold = k
                .trim()
                .parse()
                .with_context(|| format!("{DOT_K_THRESHOLD_VAR}={k:?} is not a number"))?;
        }
        Ok(Self {
            disabled: flag(DISABLE_VAR),
            attention: specific_ops.requested("attention"),
            reduce_fusion: flag(REDUCE_FUSION_VAR),
            input_fusion: flag(INPUT_FUSION_VAR),
            specific_ops,
            device_name: String::new(),
            heuristics,
        })
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn with_attention(mut self, attention: bool) -> Self {
        self.attention = attention;
        self
    }

    pub fn with_reduce_fusion(mut self, enabled: bool) -> Self {
        self.reduce_fusion = enabled;
        self
    }

    pub fn with_input_fusion(mut self, enabled: bool) -> Self {
        self.input_fusion = enabled;
        self
    }

    /// Also re-derives `attention` from the list.
    pub fn with_specific_ops(mut self, list: &str) -> Self {
        self.specific_ops = SpecificOps::parse(list);
        self.attention = self.specific_ops.requested("attention");
        self
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_heuristics(mut self, heuristics: Heuristics) -> Self {
        self.heuristics = heuristics;
        self
    }

    pub fn attention_enabled(&self) -> bool {
        !self.disabled && self.attention
    }

    /// Mode for one option: `fused_convolution`, `fused_dot`, `convolution` or `dot`.
    pub fn mode(&self, option: &str) -> Mode {
        if self.specific_ops.rejected(option) {
            Mode::None
        } else if self.specific_ops.requested(option) || self.device_name.starts_with("gfx11") {
            Mode::All
        } else {
            DEFAULT_MODE.most_restrictive(Mode::Fast)
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes" | "enable" | "enabled"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn fused_umbrella() {
        let ops = SpecificOps::parse("fused, ~dot");
        assert!(ops.requested("fused_dot"));
        assert!(ops.requested("fused_convolution"));
        assert!(!ops.requested("dot"));
        assert!(ops.rejected("dot"));
        assert!(!ops.rejected("fused_dot"));
        assert!(!SpecificOps::default().requested("fused"));
    }

    #[test]
    fn mode_resolution() {
        let cfg = FuseConfig::default().with_specific_ops("convolution,!fused_dot");
        assert_eq!(cfg.mode("convolution"), Mode::All);
        assert_eq!(cfg.mode("fused_dot"), Mode::None);
        assert_eq!(cfg.mode("dot"), Mode::Fast);
        let gfx = cfg.clone().with_device_name("gfx1100");
        assert_eq!(gfx.mode("dot"), Mode::All);
        assert_eq!(gfx.mode("fused_dot"), Mode::None);
    }

    #[test]
    fn reads_environment() -> anyhow::Result<()> {
        let cfg = FuseConfig::from_lookup(env(&[
            (OPS_VAR, "attention,fused"),
            (REDUCE_FUSION_VAR, "ON"),
            (INPUT_FUSION_VAR, "0"),
            (DOT_K_THRESHOLD_VAR, "2048"),
        ]))?;
        assert!(cfg.attention_enabled());
        assert!(cfg.reduce_fusion);
        assert!(!cfg.input_fusion);
        assert_eq!(cfg.heuristics.dot_k_threshold, 2048);
        assert!(!cfg.with_disabled(true).attention_enabled());

        let bad = FuseConfig::from_lookup(env(&[(DOT_K_THRESHOLD_VAR, "lots")]));
        assert!(bad.is_err());
        Ok(())
    }
}
