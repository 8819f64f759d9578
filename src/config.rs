// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Aggregation configuration.
//!
//! A [`MetricConfig`] value is passed into every aggregator call; nothing in
//! the crate reads thresholds from module state.

use crate::error::{Result, TallyError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Master configuration for the aggregation engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Hysteresis filter settings.
    pub debounce: DebounceConfig,

    /// Dwell-time tracking settings.
    pub dwell: DwellConfig,

    /// Live snapshot and trend settings.
    pub live: LiveConfig,

    /// Heatmap grid settings.
    pub heatmap: HeatmapConfig,

    /// Face-mask classifier availability.
    pub face_mask: FaceMaskConfig,
}

/// Hysteresis filter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Consecutive same-state samples required before a state change counts.
    pub processing_count_threshold: usize,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            processing_count_threshold: 3,
        }
    }
}

/// Dwell-time tracking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    /// A track seen this close (seconds) to a bucket end is still active.
    pub active_track_interval_secs: i64,

    /// Upper bounds (seconds, exclusive) of levels L1..L4; L5 is open-ended.
    pub level_thresholds_secs: [i64; 4],
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            active_track_interval_secs: 10,
            level_thresholds_secs: [60, 180, 300, 600],
        }
    }
}

/// Live snapshot and trend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Span covered by one live snapshot.
    pub live_interval_secs: u64,

    /// Cadence at which raw rows are logged by the ingestion process.
    pub logging_interval_secs: u64,

    /// Number of most recent snapshots used for the trend fit.
    pub trend_window: usize,

    /// Rows kept in a live file after compaction.
    pub max_rows: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            live_interval_secs: 600,
            logging_interval_secs: 5,
            trend_window: 10,
            max_rows: 1000,
        }
    }
}

impl LiveConfig {
    /// Number of raw rows a live snapshot covers.
    pub fn entries_in_interval(&self) -> usize {
        (self.live_interval_secs / self.logging_interval_secs.max(1)).max(1) as usize
    }
}

/// Heatmap grid settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Grid rows (x axis of the accumulator).
    pub resolution_x: usize,
    /// Grid columns (y axis of the accumulator).
    pub resolution_y: usize,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            resolution_x: 150,
            resolution_y: 150,
        }
    }
}

/// Face-mask classifier availability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceMaskConfig {
    /// Whether the pipeline runs a face-mask classifier at all.
    pub classifier_enabled: bool,
}

impl MetricConfig {
    /// Parse a configuration from JSON. Missing sections take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MetricConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Reject values the aggregators cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.debounce.processing_count_threshold == 0 {
            return Err(TallyError::InvalidConfig(
                "debounce.processing_count_threshold must be at least 1".to_string(),
            ));
        }
        if self.live.logging_interval_secs == 0 {
            return Err(TallyError::InvalidConfig(
                "live.logging_interval_secs must be positive".to_string(),
            ));
        }
        if self.live.trend_window < 2 {
            return Err(TallyError::InvalidConfig(
                "live.trend_window needs at least two points".to_string(),
            ));
        }
        if self.heatmap.resolution_x == 0 || self.heatmap.resolution_y == 0 {
            return Err(TallyError::InvalidConfig(
                "heatmap resolution must be non-zero".to_string(),
            ));
        }
        let levels = &self.dwell.level_thresholds_secs;
        if levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TallyError::InvalidConfig(
                "dwell.level_thresholds_secs must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }
}
