// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Report outputs.
//!
//! Table reports serialize column-wise: one key per metric field holding one
//! value per bucket, plus the bucket labels (`Hours`, `Dates` or `Weeks`).

use crate::error::Result;
use crate::family::MetricFamily;
use crate::raw::TIMESTAMP_FORMAT;
use crate::weekly::WeekSpan;
use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Values of one family, one row per bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTable {
    pub family: MetricFamily,
    /// Rows aligned with the family's field table.
    pub rows: Vec<Vec<f64>>,
}

impl MetricTable {
    pub fn new(family: MetricFamily, rows: Vec<Vec<f64>>) -> Self {
        Self { family, rows }
    }

    /// Column of one field across all buckets.
    pub fn metric(&self, name: &str) -> Option<Vec<f64>> {
        let index = self.family.field_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).copied().unwrap_or(0.0))
                .collect(),
        )
    }

    fn serialize_columns<M: SerializeMap>(&self, map: &mut M) -> std::result::Result<(), M::Error> {
        for (index, name) in self.family.field_names().into_iter().enumerate() {
            let column: Vec<f64> = self
                .rows
                .iter()
                .map(|row| row.get(index).copied().unwrap_or(0.0))
                .collect();
            map.serialize_entry(name, &column)?;
        }
        Ok(())
    }
}

/// Shared accessors of the table reports.
macro_rules! table_report {
    ($name:ident) => {
        impl $name {
            /// Column of one field, `None` for a field the family lacks.
            pub fn metric(&self, name: &str) -> Option<Vec<f64>> {
                self.table.metric(name)
            }

            pub fn family(&self) -> MetricFamily {
                self.table.family
            }

            pub fn rows(&self) -> &[Vec<f64>] {
                &self.table.rows
            }

            pub fn to_json(&self) -> Result<serde_json::Value> {
                Ok(serde_json::to_value(self)?)
            }
        }
    };
}

/// 24 hourly buckets of one day.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyReport {
    table: MetricTable,
    pub hours: Vec<u32>,
}

impl HourlyReport {
    pub fn new(family: MetricFamily, rows: Vec<Vec<f64>>) -> Self {
        let hours = (0..rows.len() as u32).collect();
        Self {
            table: MetricTable::new(family, rows),
            hours,
        }
    }
}

table_report!(HourlyReport);

impl Serialize for HourlyReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        self.table.serialize_columns(&mut map)?;
        map.serialize_entry("Hours", &self.hours)?;
        map.end()
    }
}

/// One bucket per date.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyReport {
    table: MetricTable,
    pub dates: Vec<NaiveDate>,
}

impl DailyReport {
    pub fn new(family: MetricFamily, rows: Vec<Vec<f64>>, dates: Vec<NaiveDate>) -> Self {
        Self {
            table: MetricTable::new(family, rows),
            dates,
        }
    }
}

table_report!(DailyReport);

impl Serialize for DailyReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        self.table.serialize_columns(&mut map)?;
        map.serialize_entry("Dates", &self.dates)?;
        map.end()
    }
}

/// One bucket per week span.
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyReport {
    table: MetricTable,
    pub weeks: Vec<WeekSpan>,
}

impl WeeklyReport {
    pub fn new(family: MetricFamily, rows: Vec<Vec<f64>>, weeks: Vec<WeekSpan>) -> Self {
        Self {
            table: MetricTable::new(family, rows),
            weeks,
        }
    }
}

table_report!(WeeklyReport);

impl Serialize for WeeklyReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        self.table.serialize_columns(&mut map)?;
        let weeks: Vec<String> = self.weeks.iter().map(ToString::to_string).collect();
        map.serialize_entry("Weeks", &weeks)?;
        map.end()
    }
}

/// Latest snapshot merged across entities.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveReport {
    pub family: MetricFamily,
    /// Values aligned with the family's field table.
    pub values: Vec<f64>,
    /// Earliest contributing snapshot, `None` when nothing contributed.
    pub time: Option<NaiveDateTime>,
    pub trend: f64,
}

impl LiveReport {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.family
            .field_index(name)
            .map(|index| self.values.get(index).copied().unwrap_or(0.0))
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl Serialize for LiveReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, value) in self.family.field_names().into_iter().zip(&self.values) {
            map.serialize_entry(name, value)?;
        }
        let time = self
            .time
            .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default();
        map.serialize_entry("Time", &time)?;
        map.serialize_entry("Trend", &self.trend)?;
        map.end()
    }
}

/// Summed heatmap of a date range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapReport {
    pub heatmap: Vec<Vec<f64>>,
    pub not_found_dates: Vec<NaiveDate>,
}
