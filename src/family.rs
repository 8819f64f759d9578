// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metric families and their per-field combinators.
//!
//! The set of families is closed. Each family owns a static field table; every
//! field declares how it folds over time (hours into a day, days into a week)
//! and how it merges across entities. Aggregators never special-case a field
//! name, they look the combinator up here.

use crate::config::MetricConfig;
use crate::entity::{Entity, EntityKind};
use crate::error::TallyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a list of bucket values collapses into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// Additive metrics (counts).
    Sum,
    /// Peak metrics.
    Max,
    /// Averages. Only buckets carrying data (non-zero) take part.
    Mean,
}

impl Combinator {
    /// Fold values. An empty input folds to 0.
    pub fn fold<I>(self, values: I) -> f64
    where
        I: IntoIterator<Item = f64>,
    {
        match self {
            Combinator::Sum => values.into_iter().sum(),
            Combinator::Max => values.into_iter().fold(0.0, f64::max),
            Combinator::Mean => {
                let (sum, n) = values
                    .into_iter()
                    .filter(|v| *v != 0.0)
                    .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
                if n == 0 {
                    0.0
                } else {
                    sum / n as f64
                }
            }
        }
    }
}

/// One column of a family's summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub over_time: Combinator,
    pub over_entities: Combinator,
}

const fn count(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        over_time: Combinator::Sum,
        over_entities: Combinator::Sum,
    }
}

const OCCUPANCY_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "AverageOccupancy",
        over_time: Combinator::Mean,
        over_entities: Combinator::Sum,
    },
    FieldSpec {
        name: "MaxOccupancy",
        over_time: Combinator::Max,
        over_entities: Combinator::Sum,
    },
    FieldSpec {
        name: "OccupancyThreshold",
        over_time: Combinator::Max,
        over_entities: Combinator::Sum,
    },
];

const SOCIAL_DISTANCING_FIELDS: &[FieldSpec] =
    &[count("DetectedObjects"), count("ViolatingObjects")];

const FACE_MASK_FIELDS: &[FieldSpec] = &[count("DetectedFaces"), count("UsingFacemask")];

const DWELL_TIME_FIELDS: &[FieldSpec] = &[
    count("DetectedObjects"),
    FieldSpec {
        name: "AvgDwellTime",
        over_time: Combinator::Mean,
        over_entities: Combinator::Mean,
    },
    FieldSpec {
        name: "MaxDwellTime",
        over_time: Combinator::Max,
        over_entities: Combinator::Max,
    },
    count("L1"),
    count("L2"),
    count("L3"),
    count("L4"),
    count("L5"),
];

const IN_OUT_FIELDS: &[FieldSpec] = &[count("In"), count("Out")];

/// Closed set of metric families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricFamily {
    Occupancy,
    SocialDistancing,
    FaceMask,
    DwellTime,
    InOut,
}

impl MetricFamily {
    /// Every family, in scheduling order.
    pub const ALL: [MetricFamily; 5] = [
        MetricFamily::Occupancy,
        MetricFamily::SocialDistancing,
        MetricFamily::FaceMask,
        MetricFamily::DwellTime,
        MetricFamily::InOut,
    ];

    /// Field table, in file column order.
    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            MetricFamily::Occupancy => OCCUPANCY_FIELDS,
            MetricFamily::SocialDistancing => SOCIAL_DISTANCING_FIELDS,
            MetricFamily::FaceMask => FACE_MASK_FIELDS,
            MetricFamily::DwellTime => DWELL_TIME_FIELDS,
            MetricFamily::InOut => IN_OUT_FIELDS,
        }
    }

    pub fn field_names(self) -> Vec<&'static str> {
        self.fields().iter().map(|f| f.name).collect()
    }

    pub fn field_index(self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }

    /// Directory under `reports/` holding this family's files.
    pub fn reports_folder(self) -> &'static str {
        match self {
            MetricFamily::Occupancy => "occupancy",
            MetricFamily::SocialDistancing => "social-distancing",
            MetricFamily::FaceMask => "face-mask-usage",
            MetricFamily::DwellTime => "dwell-time",
            MetricFamily::InOut => "in-out",
        }
    }

    /// Kind of entity this family is computed for.
    pub fn entity_kind(self) -> EntityKind {
        match self {
            MetricFamily::Occupancy => EntityKind::Area,
            _ => EntityKind::Camera,
        }
    }

    /// Live column the trend is fitted on.
    pub fn trend_field(self) -> &'static str {
        match self {
            MetricFamily::Occupancy => "AverageOccupancy",
            MetricFamily::SocialDistancing => "ViolatingObjects",
            MetricFamily::FaceMask => "UsingFacemask",
            MetricFamily::DwellTime => "AvgDwellTime",
            MetricFamily::InOut => "In",
        }
    }

    /// Hourly rows carry the `Active` track map.
    pub fn carries_active_tracks(self) -> bool {
        matches!(self, MetricFamily::DwellTime)
    }

    /// Daily rollup also produces heatmap grids.
    pub fn has_heatmaps(self) -> bool {
        matches!(self, MetricFamily::SocialDistancing)
    }

    /// Readiness predicate for live computation on one entity.
    pub fn can_execute(self, config: &MetricConfig, entity: &Entity) -> bool {
        match self {
            MetricFamily::FaceMask => config.face_mask.classifier_enabled,
            MetricFamily::InOut => !entity.boundaries.is_empty(),
            MetricFamily::Occupancy => entity.occupancy_threshold.is_some(),
            MetricFamily::SocialDistancing | MetricFamily::DwellTime => true,
        }
    }

    /// All-zero value row.
    pub fn zero_values(self) -> Vec<f64> {
        vec![0.0; self.fields().len()]
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reports_folder())
    }
}

impl FromStr for MetricFamily {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match key.as_str() {
            "occupancy" => Ok(MetricFamily::Occupancy),
            "social-distancing" => Ok(MetricFamily::SocialDistancing),
            "face-mask" | "face-mask-usage" => Ok(MetricFamily::FaceMask),
            "dwell-time" => Ok(MetricFamily::DwellTime),
            "in-out" => Ok(MetricFamily::InOut),
            _ => Err(TallyError::UnknownMetric(s.to_string())),
        }
    }
}

/// Fold value rows column by column, picking the combinator per field.
///
/// Rows shorter than the field table contribute zeros for the missing columns.
pub fn combine_rows<'a, I, P>(family: MetricFamily, rows: I, pick: P) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
    P: Fn(&FieldSpec) -> Combinator,
{
    let rows: Vec<&[f64]> = rows.into_iter().collect();
    family
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| {
            pick(field).fold(rows.iter().map(|r| r.get(i).copied().unwrap_or(0.0)))
        })
        .collect()
}

/// Fold time buckets (hours into a day, days into a week).
pub fn combine_over_time<'a, I>(family: MetricFamily, rows: I) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    combine_rows(family, rows, |f| f.over_time)
}

/// Merge the same bucket of several entities.
pub fn combine_over_entities<'a, I>(family: MetricFamily, rows: I) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    combine_rows(family, rows, |f| f.over_entities)
}
