// Tally Testdata - Synthetic detection log generator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Tally Testdata
//!
//! Deterministic synthetic detection logs for the Tally metrics engine.
//!
//! - **Track scripts**: entry time, stay, movement path, violation and
//!   face-mask patterns per tracked object
//! - **Classifier flicker**: single-frame signal flips and bbox jitter
//! - **Scenes**: doorway, queue, mask checkpoint and lounge presets
//!
//! ## Quick Start
//!
//! ```rust
//! use tally_testdata::{generate_log, GeneratorConfig, TrackConfig, ViolationPattern};
//! use chrono::NaiveDate;
//!
//! let config = GeneratorConfig::new(NaiveDate::from_ymd_opt(2020, 9, 19).unwrap())
//!     .with_start_hour(10)
//!     .with_num_samples(60)
//!     .with_seed(42);
//!
//! let tracks = vec![TrackConfig::new(1, 0, 30).with_violation(ViolationPattern::Always)];
//! let log = generate_log(&config, &tracks).unwrap();
//! assert_eq!(log.len(), 60);
//! ```

pub mod dataset;
pub mod generator;
pub mod patterns;
pub mod scenario;

// Re-exports for convenience
pub use dataset::{DetectionRow, RawLog, RawLogRow, TestdataError};
pub use generator::{generate_log, GeneratorConfig, TrackConfig};
pub use patterns::{FacePattern, Path, ViolationPattern};
pub use scenario::Scenario;
