//! Dream-export sparsity baseline ingestion.
//!
//! A dream export ships one sparsity observation per tick: a density, the
//! set of active channel indices, and the scene tags covering that tick.
//! The engine consumes these strictly read-only, as the reference pattern
//! for deviation telemetry.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
#[cfg(feature = "serde")]
use std::io::Read;
#[cfg(feature = "serde")]
use std::path::Path;

#[cfg(feature = "serde")]
use tracing::info;

/// Single dream-pack sparsity observation.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct DreamBaselineSample {
    pub tick: u64,
    /// Observed channel density, clamped to `[0, 1]` at load time.
    pub density: f32,
    /// Sorted, deduplicated active channel indices.
    pub active_indices: Vec<usize>,
    pub scene_tags: Vec<String>,
    pub glyph: Option<String>,
}

impl DreamBaselineSample {
    /// Normalize a raw record: clamp the density, sort and dedup indices
    /// and tags. Called on every ingested sample.
    fn normalized(mut self) -> Self {
        self.density = self.density.clamp(0.0, 1.0);
        if !self.density.is_finite() {
            self.density = 0.0;
        }
        self.active_indices.sort_unstable();
        self.active_indices.dedup();
        self.scene_tags.sort();
        self.scene_tags.dedup();
        self
    }
}

/// Per-signal baseline references for one evaluation tick.
///
/// The baseline collaborator keys samples by signal type; a frame carries
/// whichever signals it observed. Consumed read-only.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct BaselineFrame {
    pub drift: Option<DreamBaselineSample>,
    pub emotion: Option<DreamBaselineSample>,
    pub bloom: Option<DreamBaselineSample>,
}

impl BaselineFrame {
    /// Apply one observation to every signal type.
    pub fn uniform(sample: DreamBaselineSample) -> Self {
        Self {
            drift: Some(sample.clone()),
            emotion: Some(sample.clone()),
            bloom: Some(sample),
        }
    }
}

/// In-memory index of dream-pack sparsity samples, keyed by tick and scene.
#[derive(Debug, Clone, Default)]
pub struct DreamBaseline {
    by_tick: BTreeMap<u64, DreamBaselineSample>,
}

impl DreamBaseline {
    pub fn new(samples: Vec<DreamBaselineSample>) -> Self {
        let mut by_tick = BTreeMap::new();
        for sample in samples {
            let sample = sample.normalized();
            by_tick.insert(sample.tick, sample);
        }
        Self { by_tick }
    }

    pub fn is_empty(&self) -> bool {
        self.by_tick.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_tick.len()
    }

    pub fn ticks(&self) -> Vec<u64> {
        self.by_tick.keys().copied().collect()
    }

    pub fn scenes(&self) -> Vec<String> {
        let mut scenes: Vec<String> = self
            .by_tick
            .values()
            .flat_map(|s| s.scene_tags.iter().cloned())
            .collect();
        scenes.sort();
        scenes.dedup();
        scenes
    }

    pub fn get(&self, tick: u64) -> Option<&DreamBaselineSample> {
        self.by_tick.get(&tick)
    }

    pub fn by_scene(&self, scene_tag: &str) -> Vec<&DreamBaselineSample> {
        self.by_tick
            .values()
            .filter(|s| s.scene_tags.iter().any(|t| t == scene_tag))
            .collect()
    }

    /// Read a baseline from a JSON array of sample records.
    ///
    /// Records that fail to deserialize as a whole array are fatal (the file
    /// is not a baseline); individual out-of-range values are normalized,
    /// never rejected.
    #[cfg(feature = "serde")]
    pub fn from_reader<R: Read>(reader: R) -> std::io::Result<Self> {
        let samples: Vec<DreamBaselineSample> = serde_json::from_reader(reader)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::new(samples))
    }

    #[cfg(feature = "serde")]
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let baseline = Self::from_reader(std::io::BufReader::new(file))?;
        info!(
            path = %path.display(),
            ticks = baseline.len(),
            "loaded dream baseline"
        );
        Ok(baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tick: u64, density: f32, indices: &[usize], tags: &[&str]) -> DreamBaselineSample {
        DreamBaselineSample {
            tick,
            density,
            active_indices: indices.to_vec(),
            scene_tags: tags.iter().map(|t| t.to_string()).collect(),
            glyph: None,
        }
    }

    #[test]
    fn samples_index_by_tick() {
        let baseline = DreamBaseline::new(vec![
            sample(3, 0.5, &[1, 2], &["ghost"]),
            sample(1, 0.25, &[0], &[]),
        ]);
        assert_eq!(baseline.ticks(), vec![1, 3]);
        assert_eq!(baseline.get(3).unwrap().active_indices, vec![1, 2]);
        assert!(baseline.get(7).is_none());
    }

    #[test]
    fn densities_are_clamped_and_indices_deduped() {
        let baseline = DreamBaseline::new(vec![sample(0, 4.2, &[5, 5, 2], &[])]);
        let s = baseline.get(0).unwrap();
        assert_eq!(s.density, 1.0);
        assert_eq!(s.active_indices, vec![2, 5]);
    }

    #[test]
    fn scene_index_finds_samples() {
        let baseline = DreamBaseline::new(vec![
            sample(0, 0.1, &[], &["ghost", "hallway"]),
            sample(1, 0.2, &[], &["hallway"]),
        ]);
        assert_eq!(baseline.by_scene("hallway").len(), 2);
        assert_eq!(baseline.by_scene("ghost").len(), 1);
        assert_eq!(baseline.scenes(), vec!["ghost", "hallway"]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn reads_camel_case_json_records() {
        let json = r#"[
            {"tick": 2, "density": 0.4, "activeIndices": [3, 1], "sceneTags": ["ghost"]},
            {"tick": 5, "density": 0.9, "activeIndices": [], "sceneTags": [], "glyph": "GLYPH_EMBER"}
        ]"#;
        let baseline = DreamBaseline::from_reader(json.as_bytes()).expect("valid baseline");
        assert_eq!(baseline.len(), 2);
        assert_eq!(baseline.get(2).unwrap().active_indices, vec![1, 3]);
        assert_eq!(baseline.get(5).unwrap().glyph.as_deref(), Some("GLYPH_EMBER"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn non_array_payload_is_rejected() {
        assert!(DreamBaseline::from_reader(r#"{"not": "a baseline"}"#.as_bytes()).is_err());
    }

    #[test]
    fn uniform_frame_mirrors_one_sample() {
        let frame = BaselineFrame::uniform(sample(0, 0.5, &[1], &[]));
        assert!(frame.drift.is_some() && frame.emotion.is_some() && frame.bloom.is_some());
    }
}
