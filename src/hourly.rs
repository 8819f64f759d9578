// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Hourly aggregator.
//!
//! Each run appends one summary row per hour completed since the last run.
//! The row count of the day's hourly file is the checkpoint, so re-running
//! within the same hour is a no-op and a crashed run resumes where it left
//! off. Hours without raw events still get a zero row.

use crate::config::MetricConfig;
use crate::entity::Entity;
use crate::error::Result;
use crate::family::{combine_over_entities, MetricFamily};
use crate::fold::{fold_bucket, DwellMode};
use crate::raw::bucket_by_hour;
use crate::report::HourlyReport;
use crate::store::{ActiveTracks, ReportStore, SummaryRow};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use log::{debug, warn};

/// Hours per hourly file.
pub const HOURS_PER_DAY: usize = 24;

/// Result of one hourly run for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourlyOutcome {
    /// Day whose hourly file was extended.
    pub report_date: NaiveDate,
    /// Rows appended by this run.
    pub hours_written: usize,
    /// The day's raw log was missing.
    pub raw_missing: bool,
}

/// Day the hourly run at `now` reports on: yesterday during hour 0.
pub fn report_date(now: NaiveDateTime) -> NaiveDate {
    if now.hour() == 0 {
        now.date() - Duration::days(1)
    } else {
        now.date()
    }
}

/// Extend the hourly file of `entity` with every hour completed before `now`.
pub fn compute_hourly(
    store: &dyn ReportStore,
    config: &MetricConfig,
    family: MetricFamily,
    entity: &Entity,
    now: NaiveDateTime,
) -> Result<HourlyOutcome> {
    let report_date = report_date(now);
    let time_until = now
        .date()
        .and_time(NaiveTime::from_hms_opt(now.hour(), 0, 0).unwrap_or(NaiveTime::MIN));

    let existing = match store.hourly_rows(entity, family, report_date)? {
        Some(rows) => rows,
        None => {
            store.append_hourly_rows(entity, family, report_date, &[])?;
            Vec::new()
        }
    };
    let processed = existing.len();
    let time_from = report_date.and_time(NaiveTime::MIN) + Duration::hours(processed as i64);

    let mut outcome = HourlyOutcome {
        report_date,
        hours_written: 0,
        raw_missing: false,
    };
    if time_from >= time_until {
        return Ok(outcome);
    }

    let Some(events) = store.read_raw_events(entity, report_date)? else {
        warn!(
            "No raw log for {} {} on {}, skipping {}",
            entity.kind, entity.id, report_date, family
        );
        outcome.raw_missing = true;
        return Ok(outcome);
    };

    let mut carry = if !family.carries_active_tracks() {
        ActiveTracks::new()
    } else if let Some(last) = existing.last() {
        last.active.clone()
    } else {
        previous_day_carry(store, family, entity, report_date)?
    };

    let buckets = bucket_by_hour(&events, time_from, time_until);
    let mut rows = Vec::with_capacity(buckets.len());
    for bucket in &buckets {
        let row = fold_bucket(family, config, entity, bucket, DwellMode::Carry { carry: &carry });
        carry = row.active.clone();
        rows.push(row);
    }

    store.append_hourly_rows(entity, family, report_date, &rows)?;
    outcome.hours_written = rows.len();
    debug!(
        "Hourly {} for {} {}: hours {}..{} of {}",
        family,
        entity.kind,
        entity.id,
        processed,
        processed + rows.len(),
        report_date
    );
    Ok(outcome)
}

/// Carry map left at the end of the previous day, when that day is complete.
fn previous_day_carry(
    store: &dyn ReportStore,
    family: MetricFamily,
    entity: &Entity,
    report_date: NaiveDate,
) -> Result<ActiveTracks> {
    let previous = report_date - Duration::days(1);
    Ok(store
        .hourly_rows(entity, family, previous)?
        .filter(|rows| rows.len() == HOURS_PER_DAY)
        .and_then(|rows| rows.last().map(|row| row.active.clone()))
        .unwrap_or_default())
}

/// 24 hourly buckets of `date`, merged across `entities`.
///
/// Missing files and hours not yet written are zero.
pub fn hourly_report(
    store: &dyn ReportStore,
    family: MetricFamily,
    entities: &[&Entity],
    date: NaiveDate,
) -> Result<HourlyReport> {
    let mut per_entity: Vec<Vec<SummaryRow>> = Vec::with_capacity(entities.len());
    for entity in entities {
        per_entity.push(store.hourly_rows(entity, family, date)?.unwrap_or_default());
    }

    let zeros = family.zero_values();
    let rows = (0..HOURS_PER_DAY)
        .map(|hour| {
            combine_over_entities(
                family,
                per_entity.iter().map(|rows| {
                    rows.get(hour)
                        .map_or(zeros.as_slice(), |row| row.values.as_slice())
                }),
            )
        })
        .collect();

    Ok(HourlyReport::new(family, rows))
}
