// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Tally - Metrics aggregation for edge video analytics
//!
//! Turns per-frame, per-tracked-object detection logs into stable hourly,
//! daily, weekly and live reports, plus spatial heatmaps.
//!
//! ## Key Features
//!
//! - **Debounced counting**: per-frame classifier flicker is filtered by a
//!   hysteresis state machine before transitions are counted
//! - **Resumable rollups**: the hourly file's row count is the checkpoint, so
//!   every job can be re-run safely
//! - **Typed combinators**: counts add up, peaks take the max, averages
//!   average, both over time and across entities
//! - **Dwell carry-over**: tracks spanning an hour boundary are counted once
//!
//! ## Quick Start
//!
//! ```rust
//! use tally::debounce::debounce;
//!
//! // Two confirmed violations out of three confirmed states.
//! let counts = debounce([true, true, true, false, false, false, true, true, true], 3);
//! assert_eq!((counts.detections, counts.positives), (3, 2));
//! ```
//!
//! ## Modules
//!
//! - [`debounce`]: Hysteresis filter
//! - [`raw`]: Raw detection log reader and hourly bucketing
//! - [`hourly`], [`daily`], [`weekly`], [`live`]: Aggregators and readers
//! - [`heatmap`]: Spatial accumulators
//! - [`store`]: Report storage
//! - [`engine`]: High-level API
//! - [`jobs`]: Scheduled job runner

// Modules
pub mod config;
pub mod daily;
pub mod debounce;
pub mod engine;
pub mod entity;
pub mod error;
pub mod family;
pub mod fold;
pub mod heatmap;
pub mod hourly;
pub mod jobs;
pub mod live;
pub mod raw;
pub mod report;
pub mod store;
pub mod weekly;

// Re-exports for convenient access
pub use config::{DebounceConfig, DwellConfig, FaceMaskConfig, HeatmapConfig, LiveConfig, MetricConfig};
pub use daily::DailyOutcome;
pub use debounce::{DebounceCounts, Debouncer, FaceState, SignalState};
pub use engine::MetricsEngine;
pub use entity::{Boundary, Entity, EntityKind, EntityRegistry, ALL_ENTITIES};
pub use error::{Result, TallyError};
pub use family::{Combinator, FieldSpec, MetricFamily};
pub use heatmap::{HeatmapGrid, HeatmapKind};
pub use hourly::HourlyOutcome;
pub use jobs::{JobFailure, JobKind, JobRunner, JobSummary};
pub use raw::{RawEvent, TrackedObjectObservation};
pub use report::{DailyReport, HeatmapReport, HourlyReport, LiveReport, WeeklyReport};
pub use store::{FileStore, ReportStore};
pub use weekly::{WeekSpan, WeeklyRange};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
