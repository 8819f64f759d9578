// Tally Testdata - Per-track signal patterns
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-frame signal patterns of one track.
//!
//! Patterns are evaluated on the sample index relative to the track's first
//! frame, so the same script can be replayed at any time of day.

use serde::{Deserialize, Serialize};

/// Violation flag over the life of a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ViolationPattern {
    /// Never flagged.
    Never,
    /// Flagged on every frame.
    Always,
    /// Alternating runs, starting with `on` flagged frames.
    Runs { on: usize, off: usize },
    /// Flagged from `start` on.
    After { start: usize },
}

impl ViolationPattern {
    pub fn evaluate(&self, index: usize) -> bool {
        match self {
            ViolationPattern::Never => false,
            ViolationPattern::Always => true,
            ViolationPattern::Runs { on, off } => {
                let period = on + off;
                period > 0 && index % period < *on
            }
            ViolationPattern::After { start } => index >= *start,
        }
    }
}

/// Face classifier label over the life of a track.
///
/// Labels follow the detector: 0 = mask, 1 = no mask, -1 = face not visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FacePattern {
    /// No face label at all.
    Absent,
    /// Constant label.
    Constant { label: i32 },
    /// `first` until `switch_at`, then `then`.
    Switch { first: i32, then: i32, switch_at: usize },
}

impl FacePattern {
    pub fn evaluate(&self, index: usize) -> Option<i32> {
        match self {
            FacePattern::Absent => None,
            FacePattern::Constant { label } => Some(*label),
            FacePattern::Switch {
                first,
                then,
                switch_at,
            } => Some(if index < *switch_at { *first } else { *then }),
        }
    }
}

/// Straight-line movement of a bounding box centre, in normalized frame
/// coordinates `(x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub from: (f64, f64),
    pub to: (f64, f64),
}

impl Path {
    /// Stationary object.
    pub fn fixed(at: (f64, f64)) -> Self {
        Self { from: at, to: at }
    }

    /// Centre at `progress` in [0, 1].
    pub fn position(&self, progress: f64) -> (f64, f64) {
        let t = progress.clamp(0.0, 1.0);
        (
            self.from.0 + (self.to.0 - self.from.0) * t,
            self.from.1 + (self.to.1 - self.from.1) * t,
        )
    }
}
