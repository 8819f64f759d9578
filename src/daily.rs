// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Daily rollup of yesterday's hourly rows, and the daily report reader.

use crate::config::MetricConfig;
use crate::entity::Entity;
use crate::error::{Result, TallyError};
use crate::family::{combine_over_entities, combine_over_time, MetricFamily};
use crate::heatmap::{build_daily_grids, HeatmapKind};
use crate::report::DailyReport;
use crate::store::{DailyRow, ReportStore, SummaryRow};
use chrono::{Duration, NaiveDate};
use log::{debug, warn};
use std::collections::HashMap;

/// Result of one daily run for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyOutcome {
    /// Day that was rolled up.
    pub date: NaiveDate,
    pub row_written: bool,
    /// Yesterday's hourly file was missing.
    pub hourly_missing: bool,
    pub heatmaps_written: usize,
}

/// Fold a day of hourly rows into one daily row.
pub fn fold_hourly(family: MetricFamily, rows: &[SummaryRow]) -> Vec<f64> {
    combine_over_time(family, rows.iter().map(|row| row.values.as_slice()))
}

/// Append yesterday's daily row of `entity`.
///
/// A date already present in the daily file is left alone. Social-distancing
/// heatmaps for yesterday are built from the raw log when not yet persisted.
pub fn compute_daily(
    store: &dyn ReportStore,
    config: &MetricConfig,
    family: MetricFamily,
    entity: &Entity,
    today: NaiveDate,
) -> Result<DailyOutcome> {
    let date = today - Duration::days(1);
    let mut outcome = DailyOutcome {
        date,
        row_written: false,
        hourly_missing: false,
        heatmaps_written: 0,
    };

    match store.hourly_rows(entity, family, date)? {
        None => {
            warn!(
                "No hourly report for {} {} on {}, skipping daily {}",
                entity.kind, entity.id, date, family
            );
            outcome.hourly_missing = true;
        }
        Some(rows) => {
            let existing = store.daily_rows(entity, family)?;
            if existing.iter().any(|row| row.date == date) {
                debug!("Daily {} for {} {} already has {}", family, entity.kind, entity.id, date);
            } else {
                let row = DailyRow {
                    date,
                    values: fold_hourly(family, &rows),
                };
                store.append_daily_row(entity, family, &row)?;
                outcome.row_written = true;
                debug!(
                    "Daily {} for {} {}: {} from {} hourly rows",
                    family,
                    entity.kind,
                    entity.id,
                    date,
                    rows.len()
                );
            }
        }
    }

    if family.has_heatmaps() {
        outcome.heatmaps_written = write_heatmaps(store, config, entity, date)?;
    }
    Ok(outcome)
}

fn write_heatmaps(
    store: &dyn ReportStore,
    config: &MetricConfig,
    entity: &Entity,
    date: NaiveDate,
) -> Result<usize> {
    let mut pending = Vec::new();
    for kind in HeatmapKind::ALL {
        if store.load_heatmap(entity, kind, date)?.is_none() {
            pending.push(kind);
        }
    }
    if pending.is_empty() {
        return Ok(0);
    }

    let Some(events) = store.read_raw_events(entity, date)? else {
        warn!("No raw log for {} {} on {}, no heatmaps", entity.kind, entity.id, date);
        return Ok(0);
    };
    let (detections, violations) = build_daily_grids(&events, &config.heatmap);

    let mut written = 0;
    for kind in pending {
        let grid = match kind {
            HeatmapKind::Detections => &detections,
            HeatmapKind::Violations => &violations,
        };
        if store.save_heatmap(entity, kind, date, grid)? {
            written += 1;
        }
    }
    Ok(written)
}

/// Per-date values of `[from, to]` merged across `entities`.
///
/// Dates without a daily row contribute zeros.
pub fn merged_daily_values(
    store: &dyn ReportStore,
    family: MetricFamily,
    entities: &[&Entity],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<(NaiveDate, Vec<f64>)>> {
    if from > to {
        return Err(TallyError::InvalidRange { from, to });
    }

    let mut per_entity: Vec<HashMap<NaiveDate, Vec<f64>>> = Vec::with_capacity(entities.len());
    for entity in entities {
        per_entity.push(
            store
                .daily_rows(entity, family)?
                .into_iter()
                .filter(|row| row.date >= from && row.date <= to)
                .map(|row| (row.date, row.values))
                .collect(),
        );
    }

    let zeros = family.zero_values();
    Ok(from
        .iter_days()
        .take_while(|date| *date <= to)
        .map(|date| {
            let values = combine_over_entities(
                family,
                per_entity.iter().map(|rows| {
                    rows.get(&date).map_or(zeros.as_slice(), Vec::as_slice)
                }),
            );
            (date, values)
        })
        .collect())
}

/// One bucket per date of `[from, to]`, merged across `entities`.
pub fn daily_report(
    store: &dyn ReportStore,
    family: MetricFamily,
    entities: &[&Entity],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<DailyReport> {
    let (dates, rows) = merged_daily_values(store, family, entities, from, to)?
        .into_iter()
        .unzip();
    Ok(DailyReport::new(family, rows, dates))
}
