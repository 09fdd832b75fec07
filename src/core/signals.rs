//! Signal engines: drift, bloom, emotion, glyph selection.
//!
//! Every transformation here is a closed-form or bounded-iterative formula;
//! nothing is learned or opaque. All outputs are clamped into the contract's
//! ranges before they leave an engine.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::contract::Contract;

/// Hard cap on drift stabilization iterations.
///
/// The loop always terminates within this cap; this is the mechanism behind
/// the contract's `drift-recursion` prohibition.
pub const DRIFT_MAX_ITERATIONS: u32 = 8;

/// Overshoot correction factor applied to a spiking delta.
const DRIFT_CURL_FACTOR: f32 = 0.25;

/// Momentum weight in the drift projection.
const DRIFT_MOMENTUM_WEIGHT: f32 = 0.05;

/// Chaos damping exponent for the bloom oscillation term.
const BLOOM_ALPHA: f32 = 0.45;

/// Bloom oscillation frequency (cycles across the unit density interval).
const BLOOM_WAVE_FREQUENCY: f32 = 0.85;

/// Seed-count saturation constant: `s / (s + BLOOM_SEED_SCALE)`.
const BLOOM_SEED_SCALE: f32 = 100.0;

/// Contextuality weight a glyph candidate must reach to be accepted on its
/// own (without being an explicit tag or a plugin suggestion).
const GLYPH_ACCEPT_WEIGHT: f32 = 0.2;

/// Per-position weight falloff across the built-in glyph pool.
const GLYPH_POOL_FALLOFF: f32 = 0.03;

/// Built-in glyph tokens, ordered by descending base contextuality.
pub const GLYPH_POOL: [&str; 8] = [
    "GLYPH_EMBER",
    "GLYPH_TIDE",
    "GLYPH_HOLLOW",
    "GLYPH_LANTERN",
    "GLYPH_THORN",
    "GLYPH_VEIL",
    "GLYPH_ROOT",
    "GLYPH_RITUAL_SILENCE",
];

#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct DriftInput {
    pub intensity: f32,
    pub momentum: f32,
    pub anchor: f32,
    pub bias: f32,
}

#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct BloomInput {
    pub seeds: f32,
    pub density: f32,
    pub variance: f32,
}

#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct EmotionInput {
    pub baseline: f32,
    pub target: f32,
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct GlyphInput {
    pub contextuality: f32,
    pub limit: f32,
    pub context: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DriftResult {
    pub value: f32,
    pub spikes_filtered: bool,
    pub overshoot_applied: bool,
    pub curl: f32,
    pub iterations: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct BloomResult {
    pub probability: f32,
    pub floor: f32,
    pub ceiling: f32,
    pub rationale: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum EmotionResolution {
    Stabilized,
    Muted,
    Amplified,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct EmotionResult {
    pub delta: f32,
    pub resolution: EmotionResolution,
    pub labels: Vec<String>,
    pub clamp_applied: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct GlyphResult {
    pub suggestions: Vec<String>,
}

/// Stabilize one drift projection.
///
/// Projects `intensity·(1−anchor) + momentum·0.05 + bias`, then clamps.
/// When the unclamped-minus-clamped delta exceeds the contract's spike
/// threshold, a corrective curl of `−delta·0.25` is applied to the clamped
/// value (re-clamped) and the loop retries with the corrected candidate.
/// The loop never runs more than [`DRIFT_MAX_ITERATIONS`] passes and the
/// returned value is always inside the drift range.
pub fn run_drift(input: DriftInput, bias_extra: f32, contract: &Contract) -> DriftResult {
    let mut candidate =
        input.intensity * (1.0 - input.anchor) + input.momentum * DRIFT_MOMENTUM_WEIGHT
            + input.bias
            + bias_extra;

    let mut spikes_filtered = false;
    let mut overshoot_applied = false;
    let mut curl = 0.0;
    let mut value = contract.clamp_drift(candidate);
    let mut iterations = 0;

    while iterations < DRIFT_MAX_ITERATIONS {
        iterations += 1;
        let clamped = contract.clamp_drift(candidate);
        let delta = candidate - clamped;
        if delta.abs() > contract.drift_spike_threshold {
            spikes_filtered = true;
            curl = -delta * DRIFT_CURL_FACTOR;
            candidate = contract.clamp_drift(clamped + curl);
            overshoot_applied = true;
            value = candidate;
        } else {
            value = clamped;
            break;
        }
    }

    DriftResult {
        value: contract.clamp_drift(value),
        spikes_filtered,
        overshoot_applied,
        curl,
        iterations,
    }
}

fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Compute the bloom probability and envelope.
///
/// The raw probability is a weighted blend of saturating seed count,
/// density, square-root-scaled variance, a tanh-bounded drift influence,
/// and a drift-damped cosine oscillation over the density interval, plus
/// the (already gated) plugin delta sum. Plugin floors and ceilings are
/// reduced to max-of-floors / min-of-ceilings, re-clamped into the
/// contract's absolute bloom range, and swapped if inverted, so the
/// envelope is always well-formed and a plugin can never exceed the hard
/// ceiling.
pub fn run_bloom(
    input: BloomInput,
    drift_value: f32,
    plugin_delta_sum: f32,
    plugin_floors: &[f32],
    plugin_ceilings: &[f32],
    contract: &Contract,
) -> BloomResult {
    let seeds = input.seeds.max(0.0);
    let seed_norm = seeds / (seeds + BLOOM_SEED_SCALE);
    let density_c = clamp01(input.density);
    let var_term = input.variance.max(0.0).sqrt().min(1.0);
    let drift_term = (drift_value.tanh() + 1.0) / 2.0;

    let damping = (-BLOOM_ALPHA * drift_value * drift_value).exp();
    let oscillation =
        (BLOOM_WAVE_FREQUENCY * core::f32::consts::TAU * density_c).cos();
    let wave = (damping * oscillation + 1.0) / 2.0;

    let raw = 0.30 * seed_norm
        + 0.20 * density_c
        + 0.15 * var_term
        + 0.15 * drift_term
        + 0.20 * wave
        + plugin_delta_sum;

    let mut rationale = Vec::new();

    let mut floor = contract.bloom_min;
    let mut ceiling = contract.bloom_max;
    let mut narrowed = false;
    for &f in plugin_floors {
        let f = contract.clamp_bloom(f);
        if f > floor {
            floor = f;
            narrowed = true;
        }
    }
    for &c in plugin_ceilings {
        let c = contract.clamp_bloom(c);
        if c < ceiling {
            ceiling = c;
            narrowed = true;
        }
    }
    if floor > ceiling {
        core::mem::swap(&mut floor, &mut ceiling);
    }
    if narrowed {
        rationale.push("plugin-envelope".to_string());
    }

    let probability = raw.clamp(floor, ceiling);
    if probability != raw || probability == floor || probability == ceiling {
        rationale.push("clamp-enforced".to_string());
    }

    BloomResult {
        probability,
        floor,
        ceiling,
        rationale,
    }
}

/// Resolve the emotion delta and classify its magnitude.
pub fn run_emotion(
    input: EmotionInput,
    adjustment_sum: f32,
    labels: Vec<String>,
    contract: &Contract,
) -> EmotionResult {
    let raw = input.target - input.baseline + adjustment_sum;
    let delta = contract.clamp_emotion(raw);
    let magnitude = delta.abs();
    let resolution = if magnitude < 0.12 {
        EmotionResolution::Stabilized
    } else if magnitude < 0.45 {
        EmotionResolution::Muted
    } else {
        EmotionResolution::Amplified
    };
    EmotionResult {
        delta,
        resolution,
        labels,
        clamp_applied: delta != raw,
    }
}

/// Select up to the contract-clamped limit of glyph suggestions.
///
/// Candidates are considered in order: plugin suggestions first, then the
/// caller's context tags, then the built-in pool. Duplicates are skipped.
/// A candidate is accepted if it is an explicit context tag, a plugin
/// suggestion, or its contextuality weight meets the acceptance threshold.
pub fn run_glyph(
    input: &GlyphInput,
    plugin_suggestions: &[String],
    contract: &Contract,
) -> GlyphResult {
    let requested = if input.limit.is_finite() {
        input.limit.round().max(0.0) as usize
    } else {
        0
    };
    let limit = requested.min(contract.glyph_limit_max);

    let contextuality = clamp01(input.contextuality);
    let mut suggestions: Vec<String> = Vec::new();

    let mut push_unique = |name: &str, suggestions: &mut Vec<String>| {
        if suggestions.len() < limit && !suggestions.iter().any(|s| s == name) {
            suggestions.push(name.to_string());
        }
    };

    for name in plugin_suggestions {
        push_unique(name, &mut suggestions);
    }
    for tag in &input.context {
        push_unique(tag, &mut suggestions);
    }
    for (idx, name) in GLYPH_POOL.iter().enumerate() {
        let weight = contextuality - GLYPH_POOL_FALLOFF * idx as f32;
        if weight >= GLYPH_ACCEPT_WEIGHT {
            push_unique(name, &mut suggestions);
        }
    }

    GlyphResult { suggestions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ContractConfig;

    fn contract() -> Contract {
        Contract::new(ContractConfig::default()).unwrap()
    }

    #[test]
    fn calm_drift_terminates_in_one_iteration() {
        let result = run_drift(
            DriftInput {
                intensity: 0.3,
                momentum: 0.5,
                anchor: 0.2,
                bias: 0.0,
            },
            0.0,
            &contract(),
        );
        assert_eq!(result.iterations, 1);
        assert!(!result.spikes_filtered);
        assert!(!result.overshoot_applied);
        let expected = 0.3 * (1.0 - 0.2) + 0.5 * 0.05;
        assert!((result.value - expected).abs() < 1e-6);
    }

    #[test]
    fn spiking_drift_applies_curl_and_stays_in_range() {
        let c = contract();
        let result = run_drift(
            DriftInput {
                intensity: 9.0,
                momentum: 18.0,
                anchor: -5.0,
                bias: 2.0,
            },
            0.0,
            &c,
        );
        assert!(result.spikes_filtered);
        assert!(result.overshoot_applied);
        assert!(result.curl < 0.0, "positive overshoot pulls downward");
        assert!(result.iterations <= DRIFT_MAX_ITERATIONS);
        assert!(result.value >= c.drift_min && result.value <= c.drift_max);
    }

    #[test]
    fn drift_never_exceeds_iteration_cap() {
        let c = contract();
        for intensity in [-1e9f32, -100.0, 0.0, 100.0, 1e9] {
            let result = run_drift(
                DriftInput {
                    intensity,
                    momentum: intensity,
                    anchor: -intensity,
                    bias: 0.0,
                },
                0.0,
                &c,
            );
            assert!(result.iterations <= DRIFT_MAX_ITERATIONS);
            assert!(result.value.is_finite());
            assert!(result.value >= c.drift_min && result.value <= c.drift_max);
        }
    }

    #[test]
    fn bloom_probability_stays_in_contract_range() {
        let c = contract();
        for seeds in [0.0f32, 1.0, 999.0] {
            for density in [-1.0f32, 0.5, 5.0] {
                let result = run_bloom(
                    BloomInput {
                        seeds,
                        density,
                        variance: 5.0,
                    },
                    0.4,
                    0.0,
                    &[],
                    &[],
                    &c,
                );
                assert!(result.probability >= c.bloom_min);
                assert!(result.probability <= c.bloom_max);
                assert!(result.probability.is_finite());
            }
        }
    }

    #[test]
    fn bloom_plugin_ceiling_cannot_exceed_contract_max() {
        let c = contract();
        let result = run_bloom(
            BloomInput {
                seeds: 999.0,
                density: 1.0,
                variance: 1.0,
            },
            0.0,
            5.0, // oversized plugin delta pushes raw far above range
            &[0.95],
            &[1.5],
            &c,
        );
        assert!(result.probability <= c.bloom_max);
        assert_eq!(result.ceiling, c.bloom_max, "hard ceiling wins");
        assert!(result.rationale.iter().any(|t| t == "clamp-enforced"));
        let clamp_tags = result
            .rationale
            .iter()
            .filter(|t| *t == "clamp-enforced")
            .count();
        assert_eq!(clamp_tags, 1, "clamp tag appears exactly once");
    }

    #[test]
    fn bloom_inverted_envelope_is_swapped() {
        let c = contract();
        let result = run_bloom(
            BloomInput::default(),
            0.0,
            0.0,
            &[0.8],
            &[0.2],
            &c,
        );
        assert!(result.floor <= result.ceiling, "envelope must be well-formed");
        assert_eq!((result.floor, result.ceiling), (0.2, 0.8));
    }

    #[test]
    fn bloom_boundary_landing_is_tagged() {
        let c = contract();
        // Degenerate envelope: floor == ceiling forces a boundary landing.
        let result = run_bloom(BloomInput::default(), 0.0, 0.0, &[0.5], &[0.5], &c);
        assert_eq!(result.probability, 0.5);
        assert!(result.rationale.iter().any(|t| t == "clamp-enforced"));
    }

    #[test]
    fn emotion_resolution_classes() {
        let c = contract();
        let stabilized = run_emotion(
            EmotionInput {
                baseline: 0.0,
                target: 0.05,
            },
            0.0,
            vec![],
            &c,
        );
        assert_eq!(stabilized.resolution, EmotionResolution::Stabilized);

        let muted = run_emotion(
            EmotionInput {
                baseline: 0.0,
                target: 0.3,
            },
            0.0,
            vec![],
            &c,
        );
        assert_eq!(muted.resolution, EmotionResolution::Muted);

        let amplified = run_emotion(
            EmotionInput {
                baseline: -9.0,
                target: 4.0,
            },
            0.0,
            vec![],
            &c,
        );
        assert_eq!(amplified.resolution, EmotionResolution::Amplified);
        assert!(amplified.clamp_applied);
        assert_eq!(amplified.delta, 1.0);
    }

    #[test]
    fn emotion_carries_labels_verbatim(){
        let c = contract();
        let result = run_emotion(
            EmotionInput::default(),
            0.0,
            vec!["Grief-Tinged".to_string(), "🔥".to_string()],
            &c,
        );
        assert_eq!(result.labels, vec!["Grief-Tinged", "🔥"]);
    }

    #[test]
    fn glyph_limit_is_contract_clamped_and_rounded() {
        let c = contract();
        let input = GlyphInput {
            contextuality: 7.0,
            limit: 32.0,
            context: vec!["ghost".to_string()],
        };
        let result = run_glyph(&input, &[], &c);
        assert!(result.suggestions.len() <= c.glyph_limit_max);
        assert_eq!(result.suggestions[0], "ghost", "context tags lead the pool");
    }

    #[test]
    fn glyph_plugin_suggestions_come_first_and_dedup() {
        let c = contract();
        let input = GlyphInput {
            contextuality: 0.9,
            limit: 4.0,
            context: vec!["GLYPH_EMBER".to_string()],
        };
        let plugin = vec!["GLYPH_EMBER".to_string(), "GLYPH_COMET".to_string()];
        let result = run_glyph(&input, &plugin, &c);
        assert_eq!(result.suggestions[0], "GLYPH_EMBER");
        assert_eq!(result.suggestions[1], "GLYPH_COMET");
        assert_eq!(
            result
                .suggestions
                .iter()
                .filter(|s| *s == "GLYPH_EMBER")
                .count(),
            1
        );
        assert_eq!(result.suggestions.len(), 4);
    }

    #[test]
    fn low_contextuality_blocks_pool_candidates() {
        let c = contract();
        let input = GlyphInput {
            contextuality: 0.1,
            limit: 8.0,
            context: vec!["ghost".to_string()],
        };
        let result = run_glyph(&input, &[], &c);
        // Pool weight 0.1 < 0.2: only the explicit tag is accepted.
        assert_eq!(result.suggestions, vec!["ghost"]);
    }

    #[test]
    fn zero_limit_yields_no_suggestions() {
        let c = contract();
        let input = GlyphInput {
            contextuality: 1.0,
            limit: 0.0,
            context: vec!["ghost".to_string()],
        };
        assert!(run_glyph(&input, &[], &c).suggestions.is_empty());
    }
}
