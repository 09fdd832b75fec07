//! Immutable runtime contract.
//!
//! A [`Contract`] fixes the clamp ranges, channel budgets and prohibited
//! behaviors for one runtime instance. It is created once, validated at
//! construction, and never mutated afterwards.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use thiserror::Error;

/// Behavior tag every contract must prohibit.
///
/// The drift engine's bounded retry loop is the enforcement mechanism; the
/// tag's presence is checked at construction so a mis-assembled contract
/// fails before any evaluation runs.
pub const RECURSION_GUARD_TAG: &str = "drift-recursion";

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("prohibited behaviors must include `{RECURSION_GUARD_TAG}`")]
    MissingRecursionGuard,
    #[error("invalid {signal} range: min {min} is not below max {max}")]
    InvalidRange {
        signal: &'static str,
        min: f32,
        max: f32,
    },
    #[error("bias clamp must be a positive finite value, got {0}")]
    InvalidBiasClamp(f32),
}

/// Plain configuration value for [`Contract::new`].
///
/// Defaults cover the reference setup; override with the `with_*` methods.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct ContractConfig {
    pub drift_min: f32,
    pub drift_max: f32,
    /// Unclamped-minus-clamped delta above which a drift projection counts
    /// as a spike and triggers overshoot correction.
    pub drift_spike_threshold: f32,
    pub bloom_min: f32,
    pub bloom_max: f32,
    pub emotion_min: f32,
    pub emotion_max: f32,
    /// Hard cap on glyph suggestions, whatever limit the caller requests.
    pub glyph_limit_max: usize,
    /// Channel budgets: at most this many simultaneously active plugin
    /// contributions per signal. `None` = unlimited.
    pub max_active_drift: Option<usize>,
    pub max_active_emotion: Option<usize>,
    /// Bound for plugin-supplied bias values (clamped to `±bias_clamp`).
    pub bias_clamp: f32,
    /// Sparsity policy name resolved by the runtime (`topk` | `threshold`
    /// | `block`); unrecognized names fall back to a near-zero threshold.
    pub sparsity_policy: String,
    /// Prohibited behavior tags. Must include [`RECURSION_GUARD_TAG`].
    pub prohibited: Vec<String>,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            drift_min: -1.0,
            drift_max: 1.0,
            drift_spike_threshold: 0.75,
            bloom_min: 0.0,
            bloom_max: 0.97,
            emotion_min: -1.0,
            emotion_max: 1.0,
            glyph_limit_max: 12,
            max_active_drift: Some(4),
            max_active_emotion: Some(4),
            bias_clamp: 0.5,
            sparsity_policy: "threshold".to_string(),
            prohibited: vec![RECURSION_GUARD_TAG.to_string()],
        }
    }
}

impl ContractConfig {
    pub fn with_drift_range(mut self, min: f32, max: f32) -> Self {
        self.drift_min = min;
        self.drift_max = max;
        self
    }

    pub fn with_bloom_range(mut self, min: f32, max: f32) -> Self {
        self.bloom_min = min;
        self.bloom_max = max;
        self
    }

    pub fn with_emotion_range(mut self, min: f32, max: f32) -> Self {
        self.emotion_min = min;
        self.emotion_max = max;
        self
    }

    pub fn with_spike_threshold(mut self, threshold: f32) -> Self {
        self.drift_spike_threshold = threshold;
        self
    }

    pub fn with_glyph_limit_max(mut self, limit: usize) -> Self {
        self.glyph_limit_max = limit;
        self
    }

    pub fn with_drift_budget(mut self, budget: Option<usize>) -> Self {
        self.max_active_drift = budget;
        self
    }

    pub fn with_emotion_budget(mut self, budget: Option<usize>) -> Self {
        self.max_active_emotion = budget;
        self
    }

    pub fn with_bias_clamp(mut self, clamp: f32) -> Self {
        self.bias_clamp = clamp;
        self
    }

    pub fn with_sparsity_policy(mut self, name: &str) -> Self {
        self.sparsity_policy = name.to_string();
        self
    }
}

/// Validated, immutable contract record.
///
/// Deserialization round-trips through [`ContractConfig`] so a serialized
/// contract cannot smuggle in state that [`Contract::new`] would reject.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(rename_all = "camelCase", try_from = "ContractConfig")
)]
pub struct Contract {
    pub drift_min: f32,
    pub drift_max: f32,
    pub drift_spike_threshold: f32,
    pub bloom_min: f32,
    pub bloom_max: f32,
    pub emotion_min: f32,
    pub emotion_max: f32,
    pub glyph_limit_max: usize,
    pub max_active_drift: Option<usize>,
    pub max_active_emotion: Option<usize>,
    pub bias_clamp: f32,
    pub sparsity_policy: String,
    pub prohibited: Vec<String>,
}

impl Contract {
    /// Validate `cfg` and freeze it into a contract.
    ///
    /// Fails fast if the recursion-guard tag is absent, any clamp range is
    /// degenerate, or the bias clamp is unusable.
    pub fn new(cfg: ContractConfig) -> Result<Self, ContractError> {
        if !cfg.prohibited.iter().any(|t| t == RECURSION_GUARD_TAG) {
            return Err(ContractError::MissingRecursionGuard);
        }
        for (signal, min, max) in [
            ("drift", cfg.drift_min, cfg.drift_max),
            ("bloom", cfg.bloom_min, cfg.bloom_max),
            ("emotion", cfg.emotion_min, cfg.emotion_max),
        ] {
            if !(min < max) || !min.is_finite() || !max.is_finite() {
                return Err(ContractError::InvalidRange { signal, min, max });
            }
        }
        if !(cfg.bias_clamp > 0.0) || !cfg.bias_clamp.is_finite() {
            return Err(ContractError::InvalidBiasClamp(cfg.bias_clamp));
        }
        Ok(Self {
            drift_min: cfg.drift_min,
            drift_max: cfg.drift_max,
            drift_spike_threshold: cfg.drift_spike_threshold,
            bloom_min: cfg.bloom_min,
            bloom_max: cfg.bloom_max,
            emotion_min: cfg.emotion_min,
            emotion_max: cfg.emotion_max,
            glyph_limit_max: cfg.glyph_limit_max,
            max_active_drift: cfg.max_active_drift,
            max_active_emotion: cfg.max_active_emotion,
            bias_clamp: cfg.bias_clamp,
            sparsity_policy: cfg.sparsity_policy,
            prohibited: cfg.prohibited,
        })
    }

    #[inline]
    pub fn clamp_drift(&self, value: f32) -> f32 {
        value.clamp(self.drift_min, self.drift_max)
    }

    #[inline]
    pub fn clamp_bloom(&self, value: f32) -> f32 {
        value.clamp(self.bloom_min, self.bloom_max)
    }

    #[inline]
    pub fn clamp_emotion(&self, value: f32) -> f32 {
        value.clamp(self.emotion_min, self.emotion_max)
    }

    #[inline]
    pub fn clamp_bias(&self, value: f32) -> f32 {
        value.clamp(-self.bias_clamp, self.bias_clamp)
    }
}

impl TryFrom<ContractConfig> for Contract {
    type Error = ContractError;

    fn try_from(cfg: ContractConfig) -> Result<Self, Self::Error> {
        Self::new(cfg)
    }
}
