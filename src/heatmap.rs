// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Spatial heatmaps of detections and violations.
//!
//! Each hit adds `1 / (1 + cell)` to its cell: strictly increasing, but every
//! further hit on the same cell weighs less than the previous one, so a single
//! hot spot cannot dwarf the rest of the frame over a long window.

use crate::config::HeatmapConfig;
use crate::entity::Entity;
use crate::error::{Result, TallyError};
use crate::raw::{bbox_center, BBox, RawEvent};
use crate::report::HeatmapReport;
use crate::store::ReportStore;
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which detections a grid accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeatmapKind {
    Detections,
    Violations,
}

impl HeatmapKind {
    pub const ALL: [HeatmapKind; 2] = [HeatmapKind::Detections, HeatmapKind::Violations];

    pub fn as_str(self) -> &'static str {
        match self {
            HeatmapKind::Detections => "detections",
            HeatmapKind::Violations => "violations",
        }
    }
}

impl fmt::Display for HeatmapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-resolution 2D accumulator, indexed `[x][y]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapGrid {
    cells: Vec<Vec<f64>>,
}

impl HeatmapGrid {
    pub fn new(resolution_x: usize, resolution_y: usize) -> Self {
        Self {
            cells: vec![vec![0.0; resolution_y]; resolution_x],
        }
    }

    pub fn from_config(config: &HeatmapConfig) -> Self {
        Self::new(config.resolution_x, config.resolution_y)
    }

    pub fn from_cells(cells: Vec<Vec<f64>>) -> Self {
        Self { cells }
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.cells.len(), self.cells.first().map_or(0, Vec::len))
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.cells[x][y]
    }

    pub fn cells(&self) -> &[Vec<f64>] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<Vec<f64>> {
        self.cells
    }

    /// Register one hit on a cell.
    pub fn accumulate(&mut self, x: usize, y: usize) {
        let cell = &mut self.cells[x][y];
        *cell += 1.0 / (1.0 + *cell);
    }

    /// Register one hit at the centre of a normalized bounding box.
    pub fn accumulate_bbox(&mut self, bbox: &BBox) {
        let (rx, ry) = self.resolution();
        if rx == 0 || ry == 0 {
            return;
        }
        let (cx, cy) = bbox_center(bbox);
        let x = cell_index(cx, rx);
        let y = cell_index(cy, ry);
        self.accumulate(x, y);
    }

    /// Elementwise addition.
    pub fn merge(&mut self, other: &HeatmapGrid) -> Result<()> {
        if self.resolution() != other.resolution() {
            return Err(TallyError::InvalidConfig(format!(
                "heatmap resolution mismatch: {:?} vs {:?}",
                self.resolution(),
                other.resolution()
            )));
        }
        for (row, other_row) in self.cells.iter_mut().zip(&other.cells) {
            for (cell, other_cell) in row.iter_mut().zip(other_row) {
                *cell += other_cell;
            }
        }
        Ok(())
    }

    pub fn total(&self) -> f64 {
        self.cells.iter().flatten().sum()
    }
}

fn cell_index(coordinate: f64, resolution: usize) -> usize {
    let scaled = (coordinate * resolution as f64).floor();
    if scaled.is_nan() || scaled < 0.0 {
        0
    } else {
        (scaled as usize).min(resolution - 1)
    }
}

/// Fold one day of raw events into the detections and violations grids.
pub fn build_daily_grids(events: &[RawEvent], config: &HeatmapConfig) -> (HeatmapGrid, HeatmapGrid) {
    let mut detections = HeatmapGrid::from_config(config);
    let mut violations = HeatmapGrid::from_config(config);
    for event in events {
        for observation in &event.observations {
            detections.accumulate_bbox(&observation.bbox);
            if observation.violating {
                violations.accumulate_bbox(&observation.bbox);
            }
        }
    }
    (detections, violations)
}

/// Sum the persisted grids of `[from, to]`, listing the days without a grid.
///
/// A grid that cannot be parsed or has another resolution is listed like a
/// missing one.
pub fn heatmap(
    store: &dyn ReportStore,
    config: &HeatmapConfig,
    entity: &Entity,
    kind: HeatmapKind,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<HeatmapReport> {
    if from > to {
        return Err(TallyError::InvalidRange { from, to });
    }

    let mut merged = HeatmapGrid::from_config(config);
    let mut not_found_dates = Vec::new();
    for date in from.iter_days().take_while(|d| *d <= to) {
        match store.load_heatmap(entity, kind, date) {
            Ok(Some(grid)) => {
                if let Err(e) = merged.merge(&grid) {
                    warn!("Skipping {} heatmap of {} on {}: {}", kind, entity.id, date, e);
                    not_found_dates.push(date);
                }
            }
            Ok(None) => not_found_dates.push(date),
            Err(TallyError::Json(e)) => {
                warn!("Unreadable {} heatmap of {} on {}: {}", kind, entity.id, date, e);
                not_found_dates.push(date);
            }
            Err(e) => return Err(e),
        }
    }
    debug!(
        "Heatmap {} for {} from {} to {}: {} missing days",
        kind,
        entity.id,
        from,
        to,
        not_found_dates.len()
    );

    Ok(HeatmapReport {
        heatmap: merged.into_cells(),
        not_found_dates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_is_sublinear_and_monotone() {
        let mut grid = HeatmapGrid::new(2, 2);
        let mut previous = 0.0;
        let mut previous_step = f64::INFINITY;
        for _ in 0..20 {
            grid.accumulate(1, 0);
            let value = grid.get(1, 0);
            let step = value - previous;
            assert!(step > 0.0);
            assert!(step < previous_step);
            previous = value;
            previous_step = step;
        }
        assert_eq!(grid.get(0, 0), 0.0);
    }

    #[test]
    fn test_first_hits() {
        let mut grid = HeatmapGrid::new(1, 1);
        grid.accumulate(0, 0);
        assert_eq!(grid.get(0, 0), 1.0);
        grid.accumulate(0, 0);
        assert_eq!(grid.get(0, 0), 1.5);
    }

    #[test]
    fn test_bbox_mapping_clamps() {
        let mut grid = HeatmapGrid::new(4, 4);
        grid.accumulate_bbox(&[0.0, 0.0, 0.25, 0.25]);
        assert_eq!(grid.get(0, 0), 1.0);
        grid.accumulate_bbox(&[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(grid.get(3, 3), 1.0);
        grid.accumulate_bbox(&[0.0, 0.5, 0.5, 1.0]);
        assert_eq!(grid.get(3, 1), 1.0);
    }

    #[test]
    fn test_merge() {
        let mut a = HeatmapGrid::new(2, 2);
        let mut b = HeatmapGrid::new(2, 2);
        a.accumulate(0, 1);
        b.accumulate(0, 1);
        b.accumulate(1, 1);
        a.merge(&b).unwrap();
        assert_eq!(a.get(0, 1), 2.0);
        assert_eq!(a.get(1, 1), 1.0);
        assert!(a.merge(&HeatmapGrid::new(3, 2)).is_err());
    }

    #[test]
    fn test_unusable_grids_count_as_missing() {
        use crate::store::FileStore;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let camera = Entity::camera("1");
        let config = HeatmapConfig {
            resolution_x: 2,
            resolution_y: 2,
        };
        let day = |d: u32| NaiveDate::from_ymd_opt(2020, 9, d).unwrap();
        let kind = HeatmapKind::Detections;

        let mut good = HeatmapGrid::from_config(&config);
        good.accumulate(1, 0);
        store.save_heatmap(&camera, kind, day(19), &good).unwrap();
        // Written before a resolution change.
        store.save_heatmap(&camera, kind, day(20), &HeatmapGrid::new(3, 3)).unwrap();
        store.save_heatmap(&camera, kind, day(21), &good).unwrap();
        std::fs::write(store.heatmap_path(&camera, kind, day(21)), "{\"cells\": [[1.0,").unwrap();

        let report = heatmap(&store, &config, &camera, kind, day(19), day(22)).unwrap();
        assert_eq!(report.not_found_dates, vec![day(20), day(21), day(22)]);
        assert_eq!(report.heatmap, vec![vec![0.0, 0.0], vec![1.0, 0.0]]);
    }
}
