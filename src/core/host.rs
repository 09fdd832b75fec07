//! Plugin host: sandboxed, time-bounded hook execution.
//!
//! Plugins expose up to three optional hook surfaces (glyph, emotion,
//! bloom). Each hook receives a value-semantics context clone, so plugin
//! code can never reach the caller's input objects, and runs on a detached
//! worker thread under a wall-clock timeout. A hook that panics or spins is
//! downgraded to a per-hook `Error` diagnostic; no single plugin failure
//! ever aborts the batch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::runtime::SparseRuntimeSnapshot;

/// Default wall-clock budget for one hook invocation.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum HostError {
    /// A source-text plugin was loaded with no sandbox evaluator registered.
    /// Fatal: there is no safe execution path for raw source.
    #[error("no sandbox evaluator available for source plugin `{name}`")]
    SandboxUnavailable { name: String },
    #[error("sandbox rejected plugin `{name}`: {reason}")]
    Compile { name: String, reason: String },
}

/// Context handed to glyph hooks.
#[derive(Debug, Clone, Default)]
pub struct GlyphContext {
    pub candidates: Vec<String>,
    pub context_tags: Vec<String>,
    pub limit: usize,
    /// Previous tick's published sparsity snapshot, if any.
    pub prior: Option<SparseRuntimeSnapshot>,
}

/// Context handed to emotion hooks.
#[derive(Debug, Clone, Default)]
pub struct EmotionContext {
    pub baseline: f32,
    pub delta: f32,
    pub prior: Option<SparseRuntimeSnapshot>,
}

/// Context handed to bloom hooks.
#[derive(Debug, Clone, Default)]
pub struct BloomContext {
    pub probability: f32,
    pub seeds: f32,
    pub density: f32,
    pub variance: f32,
    pub prior: Option<SparseRuntimeSnapshot>,
}

/// Glyph hook return: an optional drift bias plus glyph suggestions.
#[derive(Debug, Clone, Default)]
pub struct GlyphAdjustment {
    pub bias: Option<f32>,
    pub suggestions: Vec<String>,
}

/// Emotion hook return: an optional delta plus free-form labels.
#[derive(Debug, Clone, Default)]
pub struct EmotionAdjustment {
    pub delta: Option<f32>,
    pub labels: Vec<String>,
}

/// Bloom hook return: an optional delta plus envelope bounds.
#[derive(Debug, Clone, Default)]
pub struct BloomAdjustment {
    pub delta: Option<f32>,
    pub floor: Option<f32>,
    pub ceiling: Option<f32>,
}

pub type GlyphHook = Arc<dyn Fn(GlyphContext) -> GlyphAdjustment + Send + Sync>;
pub type EmotionHook = Arc<dyn Fn(EmotionContext) -> EmotionAdjustment + Send + Sync>;
pub type BloomHook = Arc<dyn Fn(BloomContext) -> BloomAdjustment + Send + Sync>;

/// One plugin: a name plus up to three optional hooks.
///
/// Plugins are stateless from the engine's point of view; any state they
/// keep internally is their own concern and is not isolated across calls.
#[derive(Clone, Default)]
pub struct PluginEntry {
    pub name: Option<String>,
    pub glyph: Option<GlyphHook>,
    pub emotion: Option<EmotionHook>,
    pub bloom: Option<BloomHook>,
}

impl PluginEntry {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn with_glyph<F>(mut self, hook: F) -> Self
    where
        F: Fn(GlyphContext) -> GlyphAdjustment + Send + Sync + 'static,
    {
        self.glyph = Some(Arc::new(hook));
        self
    }

    pub fn with_emotion<F>(mut self, hook: F) -> Self
    where
        F: Fn(EmotionContext) -> EmotionAdjustment + Send + Sync + 'static,
    {
        self.emotion = Some(Arc::new(hook));
        self
    }

    pub fn with_bloom<F>(mut self, hook: F) -> Self
    where
        F: Fn(BloomContext) -> BloomAdjustment + Send + Sync + 'static,
    {
        self.bloom = Some(Arc::new(hook));
        self
    }
}

impl core::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.name)
            .field("glyph", &self.glyph.is_some())
            .field("emotion", &self.emotion.is_some())
            .field("bloom", &self.bloom.is_some())
            .finish()
    }
}

/// A plugin definition as accepted by [`PluginHost::load`].
pub enum PluginDef {
    /// Already-constructed hook set.
    Inline(PluginEntry),
    /// Raw source text; only usable through a [`SandboxEvaluator`].
    Source { name: Option<String>, text: String },
}

/// Capability interface for compiling source-text plugins.
///
/// The engine defines the interface only; the sandbox technology (WASM,
/// subprocess, restricted interpreter) is the collaborator's choice. The
/// returned hooks are still subject to the host's wall-clock timeout.
pub trait SandboxEvaluator: Send + Sync {
    fn compile(&self, name: &str, source: &str) -> Result<PluginEntry, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum HookKind {
    Glyph,
    Emotion,
    Bloom,
}

impl HookKind {
    fn label(self) -> &'static str {
        match self {
            HookKind::Glyph => "glyph",
            HookKind::Emotion => "emotion",
            HookKind::Bloom => "bloom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum HookStatus {
    Applied,
    Skipped,
    Error,
}

/// Outcome of one hook invocation for one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct HookDiagnostic {
    pub plugin: String,
    pub hook: HookKind,
    pub status: HookStatus,
    pub detail: Option<String>,
}

/// Accepted glyph-hook contributions, one bias slot per contributing
/// plugin in registration order.
#[derive(Debug, Clone, Default)]
pub struct GlyphContributions {
    pub biases: Vec<f32>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EmotionContributions {
    pub deltas: Vec<f32>,
    pub labels: Vec<String>,
}

/// Accepted bloom-hook contributions. `slots[i]` is the delta-vector index
/// of the i-th accepted hook, so envelope bounds can be traced back to the
/// plugin whose delta slot they belong to.
#[derive(Debug, Clone, Default)]
pub struct BloomContributions {
    pub deltas: Vec<f32>,
    pub floors: Vec<(usize, f32)>,
    pub ceilings: Vec<(usize, f32)>,
}

struct LoadedPlugin {
    name: String,
    entry: PluginEntry,
}

/// Registry of loaded plugins plus the host-side execution policy.
pub struct PluginHost {
    plugins: Vec<LoadedPlugin>,
    bias_clamp: f32,
    hook_timeout: Duration,
}

impl PluginHost {
    pub fn new(bias_clamp: f32) -> Self {
        Self {
            plugins: Vec::new(),
            bias_clamp,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name.as_str()).collect()
    }

    /// Register plugin definitions in order.
    ///
    /// Inline entries register directly. Source definitions require a
    /// sandbox evaluator; loading one without it is fatal.
    pub fn load(
        &mut self,
        defs: Vec<PluginDef>,
        evaluator: Option<&dyn SandboxEvaluator>,
    ) -> Result<(), HostError> {
        for def in defs {
            let index = self.plugins.len();
            let fallback = format!("plugin-{index}");
            match def {
                PluginDef::Inline(entry) => {
                    let name = entry.name.clone().unwrap_or(fallback);
                    self.plugins.push(LoadedPlugin { name, entry });
                }
                PluginDef::Source { name, text } => {
                    let name = name.unwrap_or(fallback);
                    let Some(evaluator) = evaluator else {
                        return Err(HostError::SandboxUnavailable { name });
                    };
                    let entry = evaluator.compile(&name, &text).map_err(|reason| {
                        HostError::Compile {
                            name: name.clone(),
                            reason,
                        }
                    })?;
                    self.plugins.push(LoadedPlugin { name, entry });
                }
            }
        }
        debug!(plugins = self.plugins.len(), "plugin registry loaded");
        Ok(())
    }

    /// Invoke every glyph hook and collect the accepted contributions.
    pub fn run_glyph(
        &self,
        ctx: &GlyphContext,
        diagnostics: &mut Vec<HookDiagnostic>,
    ) -> GlyphContributions {
        let mut out = GlyphContributions::default();
        for plugin in &self.plugins {
            let Some(hook) = plugin.entry.glyph.clone() else {
                diagnostics.push(skipped(&plugin.name, HookKind::Glyph));
                continue;
            };
            let ctx = ctx.clone();
            match self.call_bounded(move || hook(ctx)) {
                Ok(adj) => {
                    if let Some(bias) = accept_numeric(adj.bias) {
                        out.biases.push(bias.clamp(-self.bias_clamp, self.bias_clamp));
                    }
                    out.suggestions.extend(adj.suggestions);
                    diagnostics.push(applied(&plugin.name, HookKind::Glyph));
                }
                Err(fault) => diagnostics.push(self.faulted(plugin, HookKind::Glyph, fault)),
            }
        }
        out
    }

    /// Invoke every emotion hook and collect the accepted contributions.
    pub fn run_emotion(
        &self,
        ctx: &EmotionContext,
        diagnostics: &mut Vec<HookDiagnostic>,
    ) -> EmotionContributions {
        let mut out = EmotionContributions::default();
        for plugin in &self.plugins {
            let Some(hook) = plugin.entry.emotion.clone() else {
                diagnostics.push(skipped(&plugin.name, HookKind::Emotion));
                continue;
            };
            let ctx = ctx.clone();
            match self.call_bounded(move || hook(ctx)) {
                Ok(adj) => {
                    if let Some(delta) = accept_numeric(adj.delta) {
                        out.deltas.push(delta.clamp(-1.0, 1.0));
                    }
                    out.labels.extend(adj.labels);
                    diagnostics.push(applied(&plugin.name, HookKind::Emotion));
                }
                Err(fault) => diagnostics.push(self.faulted(plugin, HookKind::Emotion, fault)),
            }
        }
        out
    }

    /// Invoke every bloom hook and collect the accepted contributions.
    ///
    /// A hook that supplies only envelope bounds (no delta) still occupies
    /// a delta slot with zero, so floors/ceilings stay traceable to their
    /// plugin through the gating pass.
    pub fn run_bloom(
        &self,
        ctx: &BloomContext,
        diagnostics: &mut Vec<HookDiagnostic>,
    ) -> BloomContributions {
        let mut out = BloomContributions::default();
        for plugin in &self.plugins {
            let Some(hook) = plugin.entry.bloom.clone() else {
                diagnostics.push(skipped(&plugin.name, HookKind::Bloom));
                continue;
            };
            let ctx = ctx.clone();
            match self.call_bounded(move || hook(ctx)) {
                Ok(adj) => {
                    let delta = accept_numeric(adj.delta);
                    let floor = accept_numeric(adj.floor);
                    let ceiling = accept_numeric(adj.ceiling);
                    if delta.is_some() || floor.is_some() || ceiling.is_some() {
                        let slot = out.deltas.len();
                        out.deltas.push(delta.map_or(0.0, |d| d.clamp(-1.0, 1.0)));
                        if let Some(floor) = floor {
                            out.floors.push((slot, floor));
                        }
                        if let Some(ceiling) = ceiling {
                            out.ceilings.push((slot, ceiling));
                        }
                    }
                    diagnostics.push(applied(&plugin.name, HookKind::Bloom));
                }
                Err(fault) => diagnostics.push(self.faulted(plugin, HookKind::Bloom, fault)),
            }
        }
        out
    }

    /// Run `work` on a detached worker thread under the hook timeout.
    ///
    /// On timeout the worker is abandoned, never joined; the host must not
    /// block on a spinning hook. A panic inside the hook is caught and
    /// surfaced as a fault message.
    fn call_bounded<R, F>(&self, work: F) -> Result<R, String>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("sinlite-hook".to_string())
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(work));
                let _ = tx.send(outcome);
            })
            .map_err(|e| format!("hook worker spawn failed: {e}"))?;

        match rx.recv_timeout(self.hook_timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => Err(panic_message(panic)),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(format!(
                "hook exceeded {}ms wall-clock budget",
                self.hook_timeout.as_millis()
            )),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err("hook worker disconnected".to_string())
            }
        }
    }

    fn faulted(&self, plugin: &LoadedPlugin, hook: HookKind, fault: String) -> HookDiagnostic {
        warn!(
            plugin = plugin.name.as_str(),
            hook = hook.label(),
            fault = fault.as_str(),
            "plugin hook fault isolated"
        );
        HookDiagnostic {
            plugin: plugin.name.clone(),
            hook,
            status: HookStatus::Error,
            detail: Some(fault),
        }
    }
}

impl core::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugins", &self.plugin_names())
            .field("bias_clamp", &self.bias_clamp)
            .field("hook_timeout", &self.hook_timeout)
            .finish()
    }
}

fn skipped(name: &str, hook: HookKind) -> HookDiagnostic {
    HookDiagnostic {
        plugin: name.to_string(),
        hook,
        status: HookStatus::Skipped,
        detail: None,
    }
}

fn applied(name: &str, hook: HookKind) -> HookDiagnostic {
    HookDiagnostic {
        plugin: name.to_string(),
        hook,
        status: HookStatus::Applied,
        detail: None,
    }
}

/// Keep a returned numeric field only if it is present and finite.
/// Anything else is dropped silently.
fn accept_numeric(value: Option<f32>) -> Option<f32> {
    value.filter(|v| v.is_finite())
}

fn panic_message(panic: Box<dyn core::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("hook panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("hook panicked: {s}")
    } else {
        "hook panicked".to_string()
    }
}
