// Tally Testdata - Core generator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Core raw log generation.
//!
//! A log is built from track scripts: each track enters at a sample index,
//! stays for a number of samples, moves along a path and carries violation
//! and face patterns. Optional flicker flips single frames of those signals
//! the way a per-frame classifier does.

use crate::dataset::{DetectionRow, RawLog, RawLogRow, TestdataError};
use crate::patterns::{FacePattern, Path, ViolationPattern};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

/// Generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Day of the log.
    pub date: NaiveDate,
    /// Hour of the first sample.
    pub start_hour: u32,
    /// Seconds between samples.
    pub sample_interval_secs: u32,
    /// Number of samples.
    pub num_samples: usize,
    /// Random seed for reproducibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Probability that one frame of a signal is flipped.
    pub flicker_probability: f64,
    /// Standard deviation of the bbox centre jitter.
    pub jitter_std: f64,
    /// Half-size of generated bounding boxes.
    pub box_half_size: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            date: NaiveDate::from_ymd_opt(2020, 9, 19).unwrap_or(NaiveDate::MIN),
            start_hour: 0,
            sample_interval_secs: 5,
            num_samples: 720, // 1 hour
            seed: None,
            flicker_probability: 0.0,
            jitter_std: 0.0,
            box_half_size: 0.05,
        }
    }
}

impl GeneratorConfig {
    /// Create a config for `date`.
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            ..Self::default()
        }
    }

    /// Set the hour of the first sample.
    pub fn with_start_hour(mut self, hour: u32) -> Self {
        self.start_hour = hour;
        self
    }

    /// Set sample interval in seconds.
    pub fn with_sample_interval_secs(mut self, secs: u32) -> Self {
        self.sample_interval_secs = secs;
        self
    }

    /// Set number of samples.
    pub fn with_num_samples(mut self, n: usize) -> Self {
        self.num_samples = n;
        self
    }

    /// Set duration in hours (calculates num_samples from interval).
    pub fn with_duration_hours(mut self, hours: f64) -> Self {
        let secs = hours * 3600.0;
        self.num_samples = (secs / self.sample_interval_secs.max(1) as f64).ceil() as usize;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Flip single frames of violation and face signals.
    pub fn with_flicker(mut self, probability: f64) -> Self {
        self.flicker_probability = probability;
        self
    }

    /// Add gaussian jitter to bbox centres.
    pub fn with_jitter(mut self, std: f64) -> Self {
        self.jitter_std = std;
        self
    }

    /// Timestamp of sample `index`.
    pub fn timestamp(&self, index: usize) -> NaiveDateTime {
        let start = self
            .date
            .and_time(NaiveTime::from_hms_opt(self.start_hour, 0, 0).unwrap_or(NaiveTime::MIN));
        start + Duration::seconds(index as i64 * self.sample_interval_secs as i64)
    }

    /// Check the settings before generating.
    pub fn validate(&self) -> Result<(), TestdataError> {
        if self.start_hour > 23 {
            return Err(TestdataError::InvalidConfig(format!(
                "start_hour {} out of range",
                self.start_hour
            )));
        }
        if self.sample_interval_secs == 0 {
            return Err(TestdataError::InvalidConfig(
                "sample_interval_secs must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.flicker_probability) {
            return Err(TestdataError::InvalidConfig(format!(
                "flicker_probability {} not in [0, 1]",
                self.flicker_probability
            )));
        }
        if self.jitter_std < 0.0 || !self.jitter_std.is_finite() {
            return Err(TestdataError::InvalidConfig(format!(
                "jitter_std {} must be finite and non-negative",
                self.jitter_std
            )));
        }
        Ok(())
    }

    pub(crate) fn rng(&self) -> StdRng {
        match self.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        }
    }
}

/// Script of one tracked object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConfig {
    pub tracking_id: u64,
    /// Sample index of the first frame.
    pub enter_sample: usize,
    /// Number of frames the track is visible.
    pub duration_samples: usize,
    pub path: Path,
    pub violation: ViolationPattern,
    pub face: FacePattern,
}

impl TrackConfig {
    /// A stationary, compliant track without a face.
    pub fn new(tracking_id: u64, enter_sample: usize, duration_samples: usize) -> Self {
        Self {
            tracking_id,
            enter_sample,
            duration_samples,
            path: Path::fixed((0.5, 0.5)),
            violation: ViolationPattern::Never,
            face: FacePattern::Absent,
        }
    }

    pub fn with_path(mut self, path: Path) -> Self {
        self.path = path;
        self
    }

    pub fn with_violation(mut self, violation: ViolationPattern) -> Self {
        self.violation = violation;
        self
    }

    pub fn with_face(mut self, face: FacePattern) -> Self {
        self.face = face;
        self
    }

    /// Frame index of the track at `sample`, when visible.
    pub fn frame(&self, sample: usize) -> Option<usize> {
        let frame = sample.checked_sub(self.enter_sample)?;
        (frame < self.duration_samples).then_some(frame)
    }

    fn progress(&self, frame: usize) -> f64 {
        if self.duration_samples <= 1 {
            0.0
        } else {
            frame as f64 / (self.duration_samples - 1) as f64
        }
    }
}

/// Generate a raw log from track scripts.
///
/// Every sample produces a row, including samples with nobody in view.
pub fn generate_log(config: &GeneratorConfig, tracks: &[TrackConfig]) -> Result<RawLog, TestdataError> {
    config.validate()?;
    let mut rng = config.rng();
    let jitter = if config.jitter_std > 0.0 {
        Some(
            Normal::new(0.0, config.jitter_std)
                .map_err(|e| TestdataError::InvalidConfig(e.to_string()))?,
        )
    } else {
        None
    };

    let mut log = RawLog::new(config.date);
    for sample in 0..config.num_samples {
        let mut detections = Vec::new();
        let mut violations = Vec::new();

        for track in tracks {
            let Some(frame) = track.frame(sample) else {
                continue;
            };
            let (mut x, mut y) = track.path.position(track.progress(frame));
            if let Some(noise) = &jitter {
                x = (x + noise.sample(&mut rng)).clamp(0.0, 1.0);
                y = (y + noise.sample(&mut rng)).clamp(0.0, 1.0);
            }
            let h = config.box_half_size;
            let bbox = [
                (y - h).clamp(0.0, 1.0),
                (x - h).clamp(0.0, 1.0),
                (y + h).clamp(0.0, 1.0),
                (x + h).clamp(0.0, 1.0),
            ];

            let mut violating = track.violation.evaluate(frame);
            let mut face_label = track.face.evaluate(frame);
            if config.flicker_probability > 0.0 && rng.gen_bool(config.flicker_probability) {
                violating = !violating;
                face_label = face_label.map(|label| match label {
                    0 => 1,
                    1 => 0,
                    other => other,
                });
            }

            if violating {
                violations.push(detections.len());
            }
            detections.push(DetectionRow {
                tracking_id: track.tracking_id,
                bbox,
                face_label,
            });
        }

        log.rows.push(RawLogRow {
            timestamp: config.timestamp(sample),
            occupancy_count: detections.len() as u32,
            detections,
            violations,
        });
    }
    Ok(log)
}
