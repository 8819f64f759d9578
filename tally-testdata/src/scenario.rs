// Tally Testdata - Scene presets
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Preset scenes producing track scripts for each metric family.

use crate::dataset::{RawLog, TestdataError};
use crate::generator::{generate_log, GeneratorConfig, TrackConfig};
use crate::patterns::{FacePattern, Path, ViolationPattern};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A scene filled with randomly placed people.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scenario {
    /// People walking across a vertical doorway line at `x = 0.5`, half of
    /// them in each direction.
    Doorway { people: usize },
    /// A queue where everyone stands too close for a while.
    Queue { people: usize },
    /// People passing a face-mask checkpoint.
    MaskCheckpoint { masked: usize, unmasked: usize },
    /// Visitors lingering in an area for random durations.
    Lounge { visitors: usize, max_stay_samples: usize },
}

impl Scenario {
    /// Track scripts of the scene, using the config's seed for placement.
    pub fn tracks(&self, config: &GeneratorConfig) -> Vec<TrackConfig> {
        let mut rng = config.rng();
        let span = config.num_samples.max(1);
        match self {
            Scenario::Doorway { people } => (0..*people)
                .map(|i| {
                    let y = rng.gen_range(0.2..0.8);
                    // At least four samples on each side of the line.
                    let duration = rng.gen_range(8..=16).min(span);
                    let enter = rng.gen_range(0..=span - duration);
                    let (from, to) = if i % 2 == 0 { (0.2, 0.8) } else { (0.8, 0.2) };
                    TrackConfig::new(i as u64 + 1, enter, duration).with_path(Path {
                        from: (from, y),
                        to: (to, y),
                    })
                })
                .collect(),
            Scenario::Queue { people } => (0..*people)
                .map(|i| {
                    let duration = rng.gen_range(10..=30).min(span);
                    let enter = rng.gen_range(0..=span - duration);
                    let x = 0.1 + 0.8 * (i as f64 + 0.5) / (*people).max(1) as f64;
                    TrackConfig::new(i as u64 + 1, enter, duration)
                        .with_path(Path::fixed((x, 0.5)))
                        .with_violation(ViolationPattern::Runs { on: 6, off: 6 })
                })
                .collect(),
            Scenario::MaskCheckpoint { masked, unmasked } => (0..masked + unmasked)
                .map(|i| {
                    let duration = rng.gen_range(6..=15).min(span);
                    let enter = rng.gen_range(0..=span - duration);
                    let label = if i < *masked { 0 } else { 1 };
                    TrackConfig::new(i as u64 + 1, enter, duration)
                        .with_path(Path::fixed((rng.gen_range(0.3..0.7), 0.4)))
                        .with_face(FacePattern::Constant { label })
                })
                .collect(),
            Scenario::Lounge {
                visitors,
                max_stay_samples,
            } => (0..*visitors)
                .map(|i| {
                    let duration = rng.gen_range(1..=(*max_stay_samples).max(1)).min(span);
                    let enter = rng.gen_range(0..=span - duration);
                    let at = (rng.gen_range(0.1..0.9), rng.gen_range(0.1..0.9));
                    TrackConfig::new(i as u64 + 1, enter, duration).with_path(Path::fixed(at))
                })
                .collect(),
        }
    }

    /// Generate the scene's raw log.
    pub fn generate(&self, config: &GeneratorConfig) -> Result<RawLog, TestdataError> {
        generate_log(config, &self.tracks(config))
    }
}
