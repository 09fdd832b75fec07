//! Sparsity engine: generic value-vector gating.
//!
//! Turns a flat `Vec<f32>` of channel values into an activity mask plus a
//! materialized vector (zeros elsewhere), under one of three gating modes,
//! then enforces optional min/max active-fraction bounds as a second pass.
//! Also derives per-vector telemetry, including deviation against an
//! externally supplied baseline activity pattern.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::baseline::DreamBaselineSample;
use crate::prng::index_key;

/// Mode-specific gate selection.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum GateMode {
    /// Keep the `k` highest-magnitude entries. Ties are broken by a seeded
    /// per-index key, never by array order.
    TopK(usize),
    /// Keep every entry with `|value| >= threshold`.
    Threshold(f32),
    /// Partition into fixed-size blocks; keep a whole block iff its mean
    /// magnitude meets the threshold.
    Block { size: usize, threshold: f32 },
}

/// Read-only gating policy for one evaluation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct SparsityPolicy {
    pub mode: GateMode,
    /// Lower bound on the active fraction; highest-ranked inactive entries
    /// are re-added until `ceil(frac * len)` are active.
    pub min_active_fraction: Option<f32>,
    /// Upper bound on the active fraction; active entries are trimmed to
    /// `floor(frac * len)` by the same magnitude ranking.
    pub max_active_fraction: Option<f32>,
    /// Seed for deterministic tie-breaking.
    pub seed: u64,
    /// When false, kept entries are materialized as their sign (±1/0)
    /// instead of the raw value. Used when only activation matters.
    pub keep_magnitude: bool,
}

impl Default for SparsityPolicy {
    fn default() -> Self {
        Self {
            // Near-zero threshold: "active" means materially non-zero.
            mode: GateMode::Threshold(1e-6),
            min_active_fraction: None,
            max_active_fraction: None,
            seed: 0,
            keep_magnitude: true,
        }
    }
}

impl SparsityPolicy {
    pub fn top_k(k: usize) -> Self {
        Self {
            mode: GateMode::TopK(k),
            ..Self::default()
        }
    }

    pub fn threshold(threshold: f32) -> Self {
        Self {
            mode: GateMode::Threshold(threshold),
            ..Self::default()
        }
    }

    pub fn block(size: usize, threshold: f32) -> Self {
        Self {
            mode: GateMode::Block { size, threshold },
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_fraction_bounds(mut self, min: Option<f32>, max: Option<f32>) -> Self {
        self.min_active_fraction = min;
        self.max_active_fraction = max;
        self
    }

    pub fn sign_only(mut self) -> Self {
        self.keep_magnitude = false;
        self
    }

    /// Resolve a contract policy name into a policy. Unrecognized names get
    /// the default near-zero threshold gate.
    pub fn from_name(name: &str, seed: u64) -> Self {
        let base = match name {
            "topk" => Self::top_k(4),
            "block" => Self::block(4, 0.25),
            "threshold" => Self::threshold(1e-6),
            _ => Self::default(),
        };
        base.with_seed(seed)
    }
}

/// Per-vector gating telemetry.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SparsityTelemetry {
    /// Active entries / vector length (0 for an empty vector).
    pub density: f32,
    pub active_count: usize,
    /// Entries active in the baseline but not live this tick.
    pub baseline_missing: usize,
    /// Entries live this tick but absent from the baseline's active set.
    pub baseline_extra: usize,
    /// Live density minus baseline density, when a baseline was supplied.
    pub density_delta: Option<f32>,
}

/// Gating outcome: mask, materialized values and telemetry.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct GateResult {
    pub mask: Vec<bool>,
    pub values: Vec<f32>,
    pub telemetry: SparsityTelemetry,
}

/// Rank vector indices by descending magnitude, seeded keys breaking ties.
fn ranked_indices(values: &[f32], seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        let ma = values[a].abs();
        let mb = values[b].abs();
        mb.partial_cmp(&ma)
            .unwrap_or(core::cmp::Ordering::Equal)
            .then_with(|| index_key(seed, a).cmp(&index_key(seed, b)))
    });
    order
}

fn mode_mask(values: &[f32], mode: GateMode, seed: u64) -> Vec<bool> {
    let len = values.len();
    match mode {
        GateMode::TopK(k) => {
            let mut mask = vec![false; len];
            for &idx in ranked_indices(values, seed).iter().take(k) {
                mask[idx] = true;
            }
            mask
        }
        GateMode::Threshold(threshold) => {
            values.iter().map(|v| v.abs() >= threshold).collect()
        }
        GateMode::Block { size, threshold } => {
            let mut mask = vec![false; len];
            if size == 0 {
                return mask;
            }
            for (block, chunk) in values.chunks(size).enumerate() {
                let mean =
                    chunk.iter().map(|v| v.abs()).sum::<f32>() / chunk.len() as f32;
                if mean >= threshold {
                    let start = block * size;
                    for slot in mask.iter_mut().skip(start).take(chunk.len()) {
                        *slot = true;
                    }
                }
            }
            mask
        }
    }
}

/// Enforce min/max active-fraction bounds on `mask` using the shared
/// magnitude ranking.
fn enforce_fraction_bounds(mask: &mut [bool], values: &[f32], policy: &SparsityPolicy) {
    let len = mask.len();
    if len == 0 {
        return;
    }
    let order = ranked_indices(values, policy.seed);

    if let Some(max_frac) = policy.max_active_fraction {
        let limit = ((max_frac.clamp(0.0, 1.0) * len as f32).floor()) as usize;
        let mut active = mask.iter().filter(|&&m| m).count();
        // Walk from the weakest ranked entry upward, dropping extras.
        for &idx in order.iter().rev() {
            if active <= limit {
                break;
            }
            if mask[idx] {
                mask[idx] = false;
                active -= 1;
            }
        }
    }

    if let Some(min_frac) = policy.min_active_fraction {
        let floor = ((min_frac.clamp(0.0, 1.0) * len as f32).ceil() as usize).min(len);
        let mut active = mask.iter().filter(|&&m| m).count();
        for &idx in order.iter() {
            if active >= floor {
                break;
            }
            if !mask[idx] {
                mask[idx] = true;
                active += 1;
            }
        }
    }
}

/// Gate `values` under `policy`, reporting deviation from `baseline` if one
/// was supplied for this tick.
pub fn gate(
    values: &[f32],
    policy: &SparsityPolicy,
    baseline: Option<&DreamBaselineSample>,
) -> GateResult {
    gate_budgeted(values, policy, None, baseline)
}

/// [`gate`] with a hard channel budget on the final active count.
///
/// The budget is enforced after the fraction bounds, so a generous
/// `min_active_fraction` can never re-activate more channels than the
/// signal's budget allows. The lowest-ranked active entries are dropped
/// first, by the shared magnitude ranking.
pub fn gate_budgeted(
    values: &[f32],
    policy: &SparsityPolicy,
    budget: Option<usize>,
    baseline: Option<&DreamBaselineSample>,
) -> GateResult {
    let mut mask = mode_mask(values, policy.mode, policy.seed);
    enforce_fraction_bounds(&mut mask, values, policy);

    if let Some(limit) = budget {
        let order = ranked_indices(values, policy.seed);
        let mut active = mask.iter().filter(|&&m| m).count();
        for &idx in order.iter().rev() {
            if active <= limit {
                break;
            }
            if mask[idx] {
                mask[idx] = false;
                active -= 1;
            }
        }
    }

    let materialized: Vec<f32> = values
        .iter()
        .zip(mask.iter())
        .map(|(&v, &keep)| {
            if !keep {
                0.0
            } else if policy.keep_magnitude {
                v
            } else {
                v.signum() * if v == 0.0 { 0.0 } else { 1.0 }
            }
        })
        .collect();

    let telemetry = telemetry_for(&mask, baseline);
    GateResult {
        mask,
        values: materialized,
        telemetry,
    }
}

fn telemetry_for(mask: &[bool], baseline: Option<&DreamBaselineSample>) -> SparsityTelemetry {
    let len = mask.len();
    let active_count = mask.iter().filter(|&&m| m).count();
    let density = if len == 0 {
        0.0
    } else {
        active_count as f32 / len as f32
    };

    let mut telemetry = SparsityTelemetry {
        density,
        active_count,
        ..SparsityTelemetry::default()
    };

    if let Some(sample) = baseline {
        let live: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect();
        telemetry.baseline_missing = sample
            .active_indices
            .iter()
            .filter(|idx| !live.contains(idx))
            .count();
        telemetry.baseline_extra = live
            .iter()
            .filter(|idx| !sample.active_indices.contains(idx))
            .count();
        telemetry.density_delta = Some(density - sample.density);
    }

    telemetry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topk_keeps_highest_magnitudes() {
        let policy = SparsityPolicy::top_k(2);
        let result = gate(&[0.1, -0.9, 0.5, 0.05], &policy, None);
        assert_eq!(result.mask, vec![false, true, true, false]);
        assert_eq!(result.values, vec![0.0, -0.9, 0.5, 0.0]);
        assert_eq!(result.telemetry.active_count, 2);
    }

    #[test]
    fn topk_tie_break_is_seeded_not_positional() {
        // All magnitudes equal: selection must be reproducible per seed and
        // differ for at least one of a handful of seeds (i.e. not always the
        // array prefix).
        let values = [0.5, 0.5, 0.5, 0.5, 0.5, 0.5];
        let pick = |seed: u64| {
            gate(&values, &SparsityPolicy::top_k(2).with_seed(seed), None).mask
        };
        for seed in 0..6 {
            assert_eq!(pick(seed), pick(seed), "same seed must reproduce");
        }
        let prefix = vec![true, true, false, false, false, false];
        let any_non_prefix = (0..6).any(|seed| pick(seed) != prefix);
        assert!(any_non_prefix, "ties must not default to array order");
    }

    #[test]
    fn threshold_gate_uses_magnitude() {
        let policy = SparsityPolicy::threshold(0.3);
        let result = gate(&[0.2, -0.4, 0.31, 0.0], &policy, None);
        assert_eq!(result.mask, vec![false, true, true, false]);
    }

    #[test]
    fn block_gate_keeps_whole_blocks() {
        let policy = SparsityPolicy::block(2, 0.3);
        // Block 0 mean |v| = 0.35 (kept), block 1 mean = 0.1 (dropped).
        let result = gate(&[0.5, 0.2, 0.1, 0.1], &policy, None);
        assert_eq!(result.mask, vec![true, true, false, false]);
    }

    #[test]
    fn block_gate_handles_short_tail_block() {
        let policy = SparsityPolicy::block(2, 0.3);
        let result = gate(&[0.0, 0.0, 0.9], &policy, None);
        assert_eq!(result.mask, vec![false, false, true]);
    }

    #[test]
    fn max_fraction_trims_by_magnitude() {
        let policy = SparsityPolicy::threshold(0.0).with_fraction_bounds(None, Some(0.5));
        let result = gate(&[0.9, 0.1, 0.8, 0.2], &policy, None);
        assert_eq!(result.mask, vec![true, false, true, false]);
        assert_eq!(result.telemetry.active_count, 2);
    }

    #[test]
    fn min_fraction_re_adds_highest_ranked() {
        let policy = SparsityPolicy::threshold(0.5).with_fraction_bounds(Some(0.75), None);
        let result = gate(&[0.9, 0.1, 0.4, 0.05], &policy, None);
        // Threshold keeps only 0.9; the floor of ceil(0.75*4)=3 re-adds the
        // next strongest entries (0.4 then 0.1).
        assert_eq!(result.mask, vec![true, true, true, false]);
    }

    #[test]
    fn full_length_minimum_activates_everything() {
        let policy = SparsityPolicy::threshold(10.0).with_fraction_bounds(Some(1.0), None);
        let result = gate(&[0.0, 0.1, 0.2], &policy, None);
        assert_eq!(result.mask, vec![true, true, true]);
        assert_eq!(result.telemetry.density, 1.0);
    }

    #[test]
    fn sign_only_materializes_signum() {
        let policy = SparsityPolicy::threshold(0.1).sign_only();
        let result = gate(&[0.5, -0.5, 0.0], &policy, None);
        assert_eq!(result.values, vec![1.0, -1.0, 0.0]);
    }

    #[test]
    fn baseline_deviation_counts_both_directions() {
        let sample = DreamBaselineSample {
            tick: 0,
            density: 0.5,
            active_indices: vec![0, 1],
            scene_tags: vec![],
            glyph: None,
        };
        let policy = SparsityPolicy::threshold(0.1);
        // Live active set = {1, 2}: index 0 is missing, index 2 is extra.
        let result = gate(&[0.0, 0.5, 0.5, 0.0], &policy, Some(&sample));
        assert_eq!(result.telemetry.baseline_missing, 1);
        assert_eq!(result.telemetry.baseline_extra, 1);
        assert_eq!(result.telemetry.density_delta, Some(0.0));
    }

    #[test]
    fn empty_vector_yields_empty_result() {
        let result = gate(&[], &SparsityPolicy::default(), None);
        assert!(result.mask.is_empty());
        assert_eq!(result.telemetry.density, 0.0);
    }

    #[test]
    fn budget_caps_min_fraction_re_adds() {
        let policy = SparsityPolicy::threshold(0.0).with_fraction_bounds(Some(1.0), None);
        let result = gate_budgeted(&[0.9, 0.2, 0.5, 0.1], &policy, Some(2), None);
        assert_eq!(result.telemetry.active_count, 2, "budget is authoritative");
        assert_eq!(result.mask, vec![true, false, true, false]);
    }

    #[test]
    fn policy_names_resolve() {
        assert_eq!(
            SparsityPolicy::from_name("topk", 9).mode,
            GateMode::TopK(4)
        );
        assert!(matches!(
            SparsityPolicy::from_name("unheard-of", 9).mode,
            GateMode::Threshold(_)
        ));
    }
}
