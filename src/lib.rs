#[path = "core/baseline.rs"]
pub mod baseline;

#[path = "core/budget.rs"]
pub mod budget;

#[path = "core/contract.rs"]
pub mod contract;

#[path = "core/host.rs"]
pub mod host;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/runtime.rs"]
pub mod runtime;

#[path = "core/signals.rs"]
pub mod signals;

#[path = "core/sparsity.rs"]
pub mod sparsity;

/// Common imports for embedding the engine.
pub mod prelude {
    pub use crate::baseline::{BaselineFrame, DreamBaseline, DreamBaselineSample};
    pub use crate::contract::{Contract, ContractConfig, ContractError};
    pub use crate::host::{
        BloomAdjustment, BloomContext, EmotionAdjustment, EmotionContext, GlyphAdjustment,
        GlyphContext, HookDiagnostic, HookStatus, HostError, PluginDef, PluginEntry,
        PluginHost, SandboxEvaluator,
    };
    pub use crate::runtime::{EvaluateInput, Output, Runtime, SnapshotHub, SparseRuntimeSnapshot};
    pub use crate::signals::{
        BloomInput, BloomResult, DriftInput, DriftResult, EmotionInput, EmotionResult,
        GlyphInput, GlyphResult,
    };
    pub use crate::sparsity::{GateMode, GateResult, SparsityPolicy};
}
