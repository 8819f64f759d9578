// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Live snapshots and their trend.
//!
//! The write side folds the last few raw rows of today's log with the same
//! per-family folds as the hourly aggregator and appends one row to the
//! entity's live file. The read side merges the latest row of each entity and
//! fits a line through the recent values of the family's trend field.

use crate::config::MetricConfig;
use crate::entity::Entity;
use crate::error::Result;
use crate::family::{combine_over_entities, MetricFamily};
use crate::fold::{fold_bucket, DwellMode};
use crate::raw::Bucket;
use crate::report::LiveReport;
use crate::store::{LiveRow, ReportStore};
use chrono::NaiveDateTime;
use log::debug;
use nalgebra::{DMatrix, DVector};

/// Append a live snapshot of `entity` taken at `now`.
///
/// Returns `false` when the family does not apply to the entity or today's
/// raw log does not exist yet.
pub fn compute_live(
    store: &dyn ReportStore,
    config: &MetricConfig,
    family: MetricFamily,
    entity: &Entity,
    now: NaiveDateTime,
) -> Result<bool> {
    if !family.can_execute(config, entity) {
        debug!("Live {} not applicable to {} {}", family, entity.kind, entity.id);
        return Ok(false);
    }

    let count = config.live.entries_in_interval();
    let Some(events) = store.read_recent_raw_events(entity, now.date(), count)? else {
        debug!("No raw log yet for {} {} on {}", entity.kind, entity.id, now.date());
        return Ok(false);
    };

    // An idle log still produces a (zero) snapshot.
    let bucket = Bucket::from_events(&events).unwrap_or_else(|| Bucket::new(now, now));
    let row = fold_bucket(family, config, entity, &bucket, DwellMode::Snapshot);
    store.append_live_row(
        entity,
        family,
        &LiveRow {
            time: now,
            values: row.values,
        },
        config.live.max_rows,
    )?;
    debug!(
        "Live {} for {} {} from {} rows",
        family,
        entity.kind,
        entity.id,
        events.len()
    );
    Ok(true)
}

/// Latest snapshot of `entities` merged into one report.
pub fn live_report(
    store: &dyn ReportStore,
    config: &MetricConfig,
    family: MetricFamily,
    entities: &[&Entity],
) -> Result<LiveReport> {
    let trend_index = family.field_index(family.trend_field()).unwrap_or(0);
    let trend_combinator = family.fields()[trend_index].over_entities;
    let mut latest: Vec<Vec<f64>> = Vec::new();
    let mut time: Option<NaiveDateTime> = None;
    // Trend field values per position, oldest first, one per entity.
    let mut trend_columns: Vec<Vec<f64>> = Vec::new();

    for entity in entities {
        let rows = store.live_rows(entity, family, config.live.trend_window)?;
        let Some(last) = rows.last() else {
            continue;
        };
        time = Some(time.map_or(last.time, |t| t.min(last.time)));
        latest.push(last.values.clone());

        for (position, row) in rows.iter().enumerate() {
            let value = row.values.get(trend_index).copied().unwrap_or(0.0);
            match trend_columns.get_mut(position) {
                Some(column) => column.push(value),
                None => trend_columns.push(vec![value]),
            }
        }
    }
    let trend_values: Vec<f64> = trend_columns
        .into_iter()
        .map(|column| trend_combinator.fold(column))
        .collect();

    let values = if latest.is_empty() {
        family.zero_values()
    } else {
        combine_over_entities(family, latest.iter().map(Vec::as_slice))
    };

    Ok(LiveReport {
        family,
        values,
        time,
        trend: trend(&trend_values),
    })
}

/// Slope of the least-squares line through `(index, value)`, rounded to
/// two decimals. Fewer than two points have no trend.
pub fn trend(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    match polyfit(&xs, values, 1) {
        Some(coefficients) => (coefficients[1] * 100.0).round() / 100.0,
        None => 0.0,
    }
}

/// Least-squares polynomial fit, coefficients from the constant term up.
pub fn polyfit(xs: &[f64], ys: &[f64], degree: usize) -> Option<Vec<f64>> {
    if xs.len() != ys.len() || xs.len() <= degree {
        return None;
    }
    let vandermonde = DMatrix::<f64>::from_fn(xs.len(), degree + 1, |i, j| xs[i].powi(j as i32));
    let targets = DVector::<f64>::from_column_slice(ys);
    let coefficients = vandermonde.svd(true, true).solve(&targets, 1e-12).ok()?;
    Some(coefficients.iter().copied().collect())
}
