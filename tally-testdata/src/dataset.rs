// Tally Testdata - Raw log structures
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Generated raw logs and their CSV export.
//!
//! The CSV matches what the detector writes to `objects_log/<date>.csv`:
//! `Timestamp,OccupancyCount,Detections,ViolationsIndexes`, with the two
//! last columns holding JSON arrays.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp layout of the raw log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Header of the raw log.
pub const HEADERS: [&str; 4] = ["Timestamp", "OccupancyCount", "Detections", "ViolationsIndexes"];

/// Raw log error types.
#[derive(Debug, Error)]
pub enum TestdataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid generator setting: {0}")]
    InvalidConfig(String),
}

/// One detection in the `Detections` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRow {
    pub tracking_id: u64,
    /// `[y1, x1, y2, x2]`, normalized.
    pub bbox: [f64; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_label: Option<i32>,
}

/// One processing tick.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLogRow {
    pub timestamp: NaiveDateTime,
    pub occupancy_count: u32,
    pub detections: Vec<DetectionRow>,
    /// Indexes into `detections` of the objects in violation.
    pub violations: Vec<usize>,
}

impl RawLogRow {
    fn to_record(&self) -> Result<[String; 4], TestdataError> {
        Ok([
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.occupancy_count.to_string(),
            serde_json::to_string(&self.detections)?,
            serde_json::to_string(&self.violations)?,
        ])
    }
}

/// One day of raw log for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLog {
    pub date: NaiveDate,
    pub rows: Vec<RawLogRow>,
}

impl RawLog {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct tracking ids in the log.
    pub fn track_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .rows
            .iter()
            .flat_map(|r| r.detections.iter().map(|d| d.tracking_id))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Append the rows of `other`, keeping timestamp order.
    pub fn merge(&mut self, other: RawLog) {
        self.rows.extend(other.rows);
        self.rows.sort_by_key(|r| r.timestamp);
    }

    /// Write the CSV, header included.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), TestdataError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(HEADERS)?;
        for row in &self.rows {
            csv_writer.write_record(row.to_record()?)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Export to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<(), TestdataError> {
        let file = File::create(path)?;
        self.write_csv(file)
    }

    /// Write into a store layout: `<root>/<kind_dir>/<id>/objects_log/<date>.csv`.
    pub fn install(&self, root: &Path, kind_dir: &str, id: &str) -> Result<PathBuf, TestdataError> {
        let dir = root.join(kind_dir).join(id).join("objects_log");
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.csv", self.date.format("%Y-%m-%d")));
        self.to_csv(&path)?;
        Ok(path)
    }
}
