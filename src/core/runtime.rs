//! Runtime orchestrator.
//!
//! Wires the signal engines, plugin host, channel budgeting and sparsity
//! gating into one `evaluate` call per input tick, threads the cross-call
//! state (cooldown banks, snapshot history) needed by the next call, and
//! publishes a snapshot consumable by plugins running inside the next
//! evaluation.

use std::sync::{Arc, Mutex};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::baseline::BaselineFrame;
use crate::budget::{apply_budget, CooldownBank};
use crate::contract::Contract;
use crate::host::{
    BloomContext, EmotionContext, GlyphContext, HookDiagnostic, PluginHost,
};
use crate::signals::{
    run_bloom, run_drift, run_emotion, run_glyph, BloomInput, BloomResult, DriftInput,
    DriftResult, EmotionInput, EmotionResult, GlyphInput, GlyphResult, GLYPH_POOL,
};
use crate::sparsity::{gate_budgeted, GateResult, SparsityPolicy};

/// One full evaluation input: four required signal sub-records.
///
/// No field has to be in range already: everything is clamped, never
/// rejected, and non-finite values are treated as the minimum of their range.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct EvaluateInput {
    pub drift: DriftInput,
    pub bloom: BloomInput,
    pub emotion: EmotionInput,
    pub glyph: GlyphInput,
}

/// Published result of one evaluation tick's sparsity computation.
///
/// Plugins invoked during the *next* evaluation read this through their
/// hook context; it is never visible in a half-built state.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SparseRuntimeSnapshot {
    pub tick: u64,
    pub drift: GateResult,
    pub emotion: GateResult,
    pub bloom: GateResult,
    /// The externally supplied baseline reference for this tick, if any.
    pub baseline: Option<BaselineFrame>,
}

/// Full output record for one tick. Stable field names; suitable for
/// external JSON-schema validation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Output {
    pub drift: DriftResult,
    pub bloom: BloomResult,
    pub emotion: EmotionResult,
    pub glyphs: GlyphResult,
    pub sparsity: SparseRuntimeSnapshot,
    pub diagnostics: Vec<HookDiagnostic>,
}

#[derive(Debug, Default)]
struct HubState {
    latest: Option<Arc<SparseRuntimeSnapshot>>,
    /// Scoped stack of visible snapshots, one frame per nested evaluation.
    active: Vec<Option<Arc<SparseRuntimeSnapshot>>>,
}

/// Shared snapshot slot: one "latest" value plus a re-entrancy-aware
/// active stack.
///
/// Explicitly injected into the runtime rather than living in a process
/// global; plugins reach it through their hook contexts.
#[derive(Debug, Default)]
pub struct SnapshotHub {
    inner: Mutex<HubState>,
}

impl SnapshotHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HubState> {
        // A poisoned lock only means a hook thread panicked mid-read; the
        // data itself is a plain snapshot and stays usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot visible right now: the innermost active scope's view, or
    /// the latest published snapshot when no evaluation is in progress.
    pub fn current(&self) -> Option<Arc<SparseRuntimeSnapshot>> {
        let state = self.state();
        match state.active.last() {
            Some(view) => view.clone(),
            None => state.latest.clone(),
        }
    }

    pub fn latest(&self) -> Option<Arc<SparseRuntimeSnapshot>> {
        self.state().latest.clone()
    }

    /// Enter an evaluation scope. The returned guard pins the currently
    /// visible snapshot for the duration of the scope and restores the
    /// previous view on drop, unconditionally, panics included.
    pub fn enter(self: &Arc<Self>) -> SnapshotScope {
        let mut state = self.state();
        let view = match state.active.last() {
            Some(view) => view.clone(),
            None => state.latest.clone(),
        };
        state.active.push(view);
        drop(state);
        SnapshotScope {
            hub: Arc::clone(self),
        }
    }

    /// Publish `snapshot` as the latest completed tick.
    ///
    /// Only a top-level evaluation (empty scope stack) may replace the
    /// latest slot; nested evaluations leave it untouched.
    pub fn publish(&self, snapshot: Arc<SparseRuntimeSnapshot>) {
        let mut state = self.state();
        if state.active.is_empty() {
            state.latest = Some(snapshot);
        }
    }
}

/// Scoped acquire/release guard for the snapshot hub's active stack.
pub struct SnapshotScope {
    hub: Arc<SnapshotHub>,
}

impl Drop for SnapshotScope {
    fn drop(&mut self) {
        self.hub.state().active.pop();
    }
}

/// The engine runtime: one instance owns the cross-call state for a
/// sequence of evaluations.
#[derive(Debug)]
pub struct Runtime {
    contract: Contract,
    policy: SparsityPolicy,
    host: PluginHost,
    hub: Arc<SnapshotHub>,
    drift_cooldowns: CooldownBank,
    emotion_cooldowns: CooldownBank,
    tick: u64,
}

impl Runtime {
    /// Build a runtime over a validated contract.
    ///
    /// `policy` overrides the contract's named sparsity policy when given;
    /// otherwise the name is resolved with the policy seed defaulted to
    /// the tick counter origin (zero).
    pub fn new(
        contract: Contract,
        policy: Option<SparsityPolicy>,
        host: PluginHost,
        hub: Arc<SnapshotHub>,
    ) -> Self {
        let policy = policy
            .unwrap_or_else(|| SparsityPolicy::from_name(&contract.sparsity_policy, 0));
        Self {
            contract,
            policy,
            host,
            hub,
            drift_cooldowns: CooldownBank::new(),
            emotion_cooldowns: CooldownBank::new(),
            tick: 0,
        }
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn hub(&self) -> &Arc<SnapshotHub> {
        &self.hub
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Run one full evaluation.
    ///
    /// Infallible by design: plugin misbehavior is downgraded to
    /// diagnostics, out-of-range numbers are clamped, and every output
    /// field is finite and inside its contract range on return.
    pub fn evaluate(
        &mut self,
        input: &EvaluateInput,
        baseline: Option<&BaselineFrame>,
    ) -> Output {
        let input = sanitize(input, &self.contract);

        // Pass 1: no plugin bias.
        let drift_pass1 = run_drift(input.drift, 0.0, &self.contract);
        let bloom_pass1 = run_bloom(
            input.bloom,
            drift_pass1.value,
            0.0,
            &[],
            &[],
            &self.contract,
        );

        // Hooks see the previous completed tick through the scope guard;
        // a nested evaluation inherits this view instead of a partial one.
        let scope = self.hub.enter();
        let prior = self.hub.current().map(|arc| (*arc).clone());

        let mut diagnostics: Vec<HookDiagnostic> = Vec::new();

        let requested_limit = input.glyph.limit.round().max(0.0) as usize;
        let glyph_ctx = GlyphContext {
            candidates: GLYPH_POOL.iter().map(|g| g.to_string()).collect(),
            context_tags: input.glyph.context.clone(),
            limit: requested_limit.min(self.contract.glyph_limit_max),
            prior: prior.clone(),
        };
        let glyph_contrib = self.host.run_glyph(&glyph_ctx, &mut diagnostics);

        let emotion_ctx = EmotionContext {
            baseline: input.emotion.baseline,
            delta: input.emotion.target - input.emotion.baseline,
            prior: prior.clone(),
        };
        let emotion_contrib = self.host.run_emotion(&emotion_ctx, &mut diagnostics);

        let bloom_ctx = BloomContext {
            probability: bloom_pass1.probability,
            seeds: input.bloom.seeds,
            density: input.bloom.density,
            variance: input.bloom.variance,
            prior,
        };
        let bloom_contrib = self.host.run_bloom(&bloom_ctx, &mut diagnostics);

        // Gate the drift contribution channel (glyph-hook biases): budget,
        // cooldown, then sparsity.
        let drift_budget = apply_budget(&glyph_contrib.biases, self.contract.max_active_drift);
        let mut drift_values = drift_budget.values;
        self.drift_cooldowns
            .apply(&mut drift_values, &drift_budget.kept, drift_pass1.value);
        let drift_gate = gate_budgeted(
            &drift_values,
            &self.policy,
            self.contract.max_active_drift,
            baseline.and_then(|b| b.drift.as_ref()),
        );
        let drift_bias_sum: f32 = drift_gate.values.iter().sum();

        // Gate the emotion contribution channel.
        let emotion_budget =
            apply_budget(&emotion_contrib.deltas, self.contract.max_active_emotion);
        let mut emotion_values = emotion_budget.values;
        self.emotion_cooldowns
            .apply(&mut emotion_values, &emotion_budget.kept, drift_pass1.value);
        let emotion_gate = gate_budgeted(
            &emotion_values,
            &self.policy,
            self.contract.max_active_emotion,
            baseline.and_then(|b| b.emotion.as_ref()),
        );
        let emotion_sum: f32 = emotion_gate.values.iter().sum();

        // Bloom deltas carry no channel budget; the sparsity policy alone
        // decides what stays active.
        let bloom_gate = gate_budgeted(
            &bloom_contrib.deltas,
            &self.policy,
            None,
            baseline.and_then(|b| b.bloom.as_ref()),
        );
        let bloom_delta_sum: f32 = bloom_gate.values.iter().sum();

        // Envelope bounds are honored only for plugins whose delta slot
        // survived gating, or who supplied no delta at all; a gated-out
        // contribution cannot narrow the envelope.
        let bound_live = |slot: usize| {
            bloom_gate.mask.get(slot).copied().unwrap_or(false)
                || bloom_contrib.deltas.get(slot).copied().unwrap_or(0.0) == 0.0
        };
        let floors: Vec<f32> = bloom_contrib
            .floors
            .iter()
            .filter(|(slot, _)| bound_live(*slot))
            .map(|&(_, v)| v)
            .collect();
        let ceilings: Vec<f32> = bloom_contrib
            .ceilings
            .iter()
            .filter(|(slot, _)| bound_live(*slot))
            .map(|&(_, v)| v)
            .collect();

        // Pass 2: bias-aware re-run.
        let drift = run_drift(input.drift, drift_bias_sum, &self.contract);
        let bloom = run_bloom(
            input.bloom,
            drift.value,
            bloom_delta_sum,
            &floors,
            &ceilings,
            &self.contract,
        );
        let emotion = run_emotion(
            input.emotion,
            emotion_sum,
            emotion_contrib.labels,
            &self.contract,
        );
        let glyphs = run_glyph(&input.glyph, &glyph_contrib.suggestions, &self.contract);

        let snapshot = SparseRuntimeSnapshot {
            tick: self.tick,
            drift: drift_gate,
            emotion: emotion_gate,
            bloom: bloom_gate,
            baseline: baseline.cloned(),
        };
        self.tick += 1;

        // Release the scope before publishing: only a top-level call may
        // replace the latest slot.
        drop(scope);
        self.hub.publish(Arc::new(snapshot.clone()));

        debug!(
            tick = snapshot.tick,
            drift = drift.value,
            bloom = bloom.probability,
            emotion = emotion.delta,
            "evaluation tick complete"
        );

        Output {
            drift,
            bloom,
            emotion,
            glyphs,
            sparsity: snapshot,
            diagnostics,
        }
    }
}

/// Replace non-finite input fields with the minimum of their range.
fn sanitize(input: &EvaluateInput, contract: &Contract) -> EvaluateInput {
    let or_min = |v: f32, min: f32| if v.is_finite() { v } else { min };
    EvaluateInput {
        drift: DriftInput {
            intensity: or_min(input.drift.intensity, contract.drift_min),
            momentum: or_min(input.drift.momentum, contract.drift_min),
            anchor: or_min(input.drift.anchor, contract.drift_min),
            bias: or_min(input.drift.bias, contract.drift_min),
        },
        bloom: BloomInput {
            seeds: or_min(input.bloom.seeds, contract.bloom_min),
            density: or_min(input.bloom.density, contract.bloom_min),
            variance: or_min(input.bloom.variance, contract.bloom_min),
        },
        emotion: EmotionInput {
            baseline: or_min(input.emotion.baseline, contract.emotion_min),
            target: or_min(input.emotion.target, contract.emotion_min),
        },
        glyph: GlyphInput {
            contextuality: or_min(input.glyph.contextuality, 0.0),
            limit: or_min(input.glyph.limit, 0.0),
            context: input.glyph.context.clone(),
        },
    }
}
