// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Scheduled job runner.
//!
//! A job runs one aggregation for every (family, entity) unit. Units are
//! independent: a unit that fails, or panics, is logged and reported in the
//! [`JobSummary`] while its siblings keep going.

use crate::engine::MetricsEngine;
use crate::family::MetricFamily;
use crate::store::ReportStore;
use chrono::NaiveDateTime;
use log::{error, info};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Kind of scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Every hour, shortly after the hour.
    Hourly,
    /// Once a day, after midnight.
    Daily,
    /// Every live interval.
    Live,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Hourly => f.write_str("hourly"),
            JobKind::Daily => f.write_str("daily"),
            JobKind::Live => f.write_str("live"),
        }
    }
}

/// A unit that did not complete.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub family: MetricFamily,
    pub entity_id: String,
    pub message: String,
}

/// Outcome of one job run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub kind: JobKind,
    /// Units that wrote (or had nothing left to write).
    pub succeeded: usize,
    /// Units skipped for missing input or not applicable.
    pub skipped: usize,
    pub failures: Vec<JobFailure>,
}

impl JobSummary {
    fn new(kind: JobKind) -> Self {
        Self {
            kind,
            succeeded: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

enum UnitOutcome {
    Done,
    Skipped,
    Failed(String),
}

/// Runs jobs over a bounded pool of scoped worker threads.
#[derive(Debug, Clone)]
pub struct JobRunner {
    workers: usize,
}

impl Default for JobRunner {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

impl JobRunner {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `kind` for every family over every entity of its kind.
    pub fn run<S: ReportStore>(
        &self,
        engine: &MetricsEngine<S>,
        kind: JobKind,
        now: NaiveDateTime,
    ) -> JobSummary {
        self.run_families(engine, kind, &MetricFamily::ALL, now)
    }

    /// Run `kind` for the given families only.
    pub fn run_families<S: ReportStore>(
        &self,
        engine: &MetricsEngine<S>,
        kind: JobKind,
        families: &[MetricFamily],
        now: NaiveDateTime,
    ) -> JobSummary {
        let units: Vec<(MetricFamily, &str)> = families
            .iter()
            .flat_map(|family| engine.entities(*family).map(move |e| (*family, e.id.as_str())))
            .collect();

        let next = AtomicUsize::new(0);
        let workers = self.workers.min(units.len()).max(1);
        let results: Vec<(MetricFamily, &str, UnitOutcome)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let index = next.fetch_add(1, Ordering::Relaxed);
                            let Some(&(family, entity_id)) = units.get(index) else {
                                break;
                            };
                            let outcome = run_unit(engine, kind, family, entity_id, now);
                            done.push((family, entity_id, outcome));
                        }
                        done
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap_or_default())
                .collect()
        });

        let mut summary = JobSummary::new(kind);
        for (family, entity_id, outcome) in results {
            match outcome {
                UnitOutcome::Done => summary.succeeded += 1,
                UnitOutcome::Skipped => summary.skipped += 1,
                UnitOutcome::Failed(message) => {
                    error!("{} {} job failed for {}: {}", kind, family, entity_id, message);
                    summary.failures.push(JobFailure {
                        family,
                        entity_id: entity_id.to_string(),
                        message,
                    });
                }
            }
        }
        info!(
            "{} job at {}: {} done, {} skipped, {} failed",
            kind,
            now,
            summary.succeeded,
            summary.skipped,
            summary.failures.len()
        );
        summary
    }
}

fn run_unit<S: ReportStore>(
    engine: &MetricsEngine<S>,
    kind: JobKind,
    family: MetricFamily,
    entity_id: &str,
    now: NaiveDateTime,
) -> UnitOutcome {
    let result = panic::catch_unwind(AssertUnwindSafe(|| match kind {
        JobKind::Hourly => engine
            .compute_hourly(family, entity_id, now)
            .map(|outcome| !outcome.raw_missing),
        JobKind::Daily => engine
            .compute_daily(family, entity_id, now.date())
            .map(|outcome| !outcome.hourly_missing),
        JobKind::Live => engine.compute_live(family, entity_id, now),
    }));

    match result {
        Ok(Ok(true)) => UnitOutcome::Done,
        Ok(Ok(false)) => UnitOutcome::Skipped,
        Ok(Err(e)) => UnitOutcome::Failed(e.to_string()),
        Err(payload) => UnitOutcome::Failed(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
