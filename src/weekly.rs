// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Weekly rollup over daily rows.
//!
//! Two windowing conventions coexist and are kept distinct:
//!
//! * rolling: `N` weeks of 7 days ending yesterday, not calendar aligned;
//! * calendar: an explicit date range cut at Sunday boundaries, so the first
//!   and last spans may be partial weeks.

use crate::daily::merged_daily_values;
use crate::entity::Entity;
use crate::error::{Result, TallyError};
use crate::family::{combine_over_time, MetricFamily};
use crate::report::WeeklyReport;
use crate::store::ReportStore;
use chrono::{Datelike, Duration, NaiveDate};
use std::fmt;

/// Rolling requests larger than this grow the span list on demand.
const MAX_PREALLOCATED_WEEKS: u32 = 520;

/// Window selection of a weekly report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeeklyRange {
    /// `number_of_weeks` 7-day chunks ending yesterday, oldest first.
    Rolling { number_of_weeks: u32 },
    /// Sunday-terminated chunks covering `[from, to]`.
    Calendar { from: NaiveDate, to: NaiveDate },
}

impl WeeklyRange {
    /// Request-style constructor: a non-zero week count wins over dates.
    pub fn from_args(
        number_of_weeks: u32,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Self> {
        if number_of_weeks > 0 {
            return Ok(WeeklyRange::Rolling { number_of_weeks });
        }
        match (from, to) {
            (Some(from), Some(to)) if from > to => Err(TallyError::InvalidRange { from, to }),
            (Some(from), Some(to)) => Ok(WeeklyRange::Calendar { from, to }),
            _ => Err(TallyError::InvalidArgument(
                "weekly report needs number_of_weeks > 0 or both from and to".to_string(),
            )),
        }
    }
}

/// Inclusive date span of one weekly bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl WeekSpan {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for WeekSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.start, self.end)
    }
}

/// Buckets of `range`, oldest first.
pub fn week_spans(range: WeeklyRange, today: NaiveDate) -> Result<Vec<WeekSpan>> {
    match range {
        WeeklyRange::Rolling { number_of_weeks } => {
            let out_of_range = || {
                TallyError::InvalidArgument(format!(
                    "{number_of_weeks} weeks before {today} is outside the calendar"
                ))
            };
            let end = today.pred_opt().ok_or_else(out_of_range)?;
            let mut start = end
                .checked_sub_signed(Duration::days(7 * i64::from(number_of_weeks) - 1))
                .ok_or_else(out_of_range)?;
            let capacity = number_of_weeks.min(MAX_PREALLOCATED_WEEKS) as usize;
            let mut spans = Vec::with_capacity(capacity);
            for _ in 0..number_of_weeks {
                spans.push(WeekSpan {
                    start,
                    end: start + Duration::days(6),
                });
                start += Duration::days(7);
            }
            Ok(spans)
        }
        WeeklyRange::Calendar { from, to } => {
            if from > to {
                return Err(TallyError::InvalidRange { from, to });
            }
            let mut spans = Vec::new();
            let mut start = from;
            while start <= to {
                let to_sunday = (7 - start.weekday().num_days_from_sunday() as i64) % 7;
                let end = (start + Duration::days(to_sunday)).min(to);
                spans.push(WeekSpan { start, end });
                start = end + Duration::days(1);
            }
            Ok(spans)
        }
    }
}

/// One bucket per week span, merged across `entities` day by day first.
pub fn weekly_report(
    store: &dyn ReportStore,
    family: MetricFamily,
    entities: &[&Entity],
    range: WeeklyRange,
    today: NaiveDate,
) -> Result<WeeklyReport> {
    let spans = week_spans(range, today)?;
    let (Some(first), Some(last)) = (spans.first(), spans.last()) else {
        return Ok(WeeklyReport::new(family, Vec::new(), spans));
    };

    let days = merged_daily_values(store, family, entities, first.start, last.end)?;
    let rows = spans
        .iter()
        .map(|span| {
            combine_over_time(
                family,
                days.iter()
                    .filter(|(date, _)| span.contains(*date))
                    .map(|(_, values)| values.as_slice()),
            )
        })
        .collect();
    Ok(WeeklyReport::new(family, rows, spans))
}
