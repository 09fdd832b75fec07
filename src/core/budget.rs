//! Channel budgeting and cooldown dynamics.
//!
//! A budget caps how many plugin contributions may be simultaneously active
//! for one signal type; the cooldown bank then penalizes channels that fire
//! on successive ticks, favoring turnover over repetition.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Result of applying a channel budget to a contribution vector.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct BudgetOutcome {
    /// Input vector with all non-surviving entries zeroed.
    pub values: Vec<f32>,
    /// Original indices of the surviving channels, ascending.
    pub kept: Vec<usize>,
}

/// Keep at most `budget` entries of `values` by descending magnitude.
///
/// Ties are broken by ascending index (stable sort). This is deliberately
/// different from the sparsity engine's seeded tie-break: budgeting ranks
/// concrete plugin contributions, where registration order is meaningful.
/// `None` applies no limit; a budget of zero zeroes everything.
pub fn apply_budget(values: &[f32], budget: Option<usize>) -> BudgetOutcome {
    let Some(limit) = budget else {
        return BudgetOutcome {
            values: values.to_vec(),
            kept: (0..values.len()).collect(),
        };
    };
    if limit == 0 {
        return BudgetOutcome {
            values: vec![0.0; values.len()],
            kept: Vec::new(),
        };
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .abs()
            .partial_cmp(&values[a].abs())
            .unwrap_or(core::cmp::Ordering::Equal)
    });

    let mut kept: Vec<usize> = order.into_iter().take(limit).collect();
    kept.sort_unstable();

    let mut gated = vec![0.0; values.len()];
    for &idx in &kept {
        gated[idx] = values[idx];
    }
    BudgetOutcome {
        values: gated,
        kept,
    }
}

/// Per-runtime cooldown levels, one `[0, 1]` scalar per channel index.
///
/// Owned by the runtime orchestrator and persisted across evaluations. The
/// vector grows with zero padding when plugin counts grow across ticks.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CooldownBank {
    levels: Vec<f32>,
}

impl CooldownBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    /// Run one cooldown tick over a budgeted contribution vector.
    ///
    /// With `m = min(1, |drift|)`:
    /// 1. every level decays by `0.05 + 0.15·m`, floored at zero;
    /// 2. each surviving channel's value is scaled by `1 − level`;
    /// 3. each surviving channel's level is bumped by `0.25 + 0.5·m`,
    ///    capped at one.
    ///
    /// The penalty is applied before the bump, so a channel's first firing
    /// is attenuated only by what it accumulated on earlier ticks.
    pub fn apply(&mut self, values: &mut [f32], kept: &[usize], drift_magnitude: f32) {
        if self.levels.len() < values.len() {
            self.levels.resize(values.len(), 0.0);
        }

        let m = drift_magnitude.abs().min(1.0);
        let decay = 0.05 + 0.15 * m;
        let bump = 0.25 + 0.5 * m;

        for level in &mut self.levels {
            *level = (*level - decay).max(0.0);
        }
        for &idx in kept {
            if idx < values.len() {
                values[idx] *= 1.0 - self.levels[idx];
                self.levels[idx] = (self.levels[idx] + bump).min(1.0);
            }
        }
    }
}
