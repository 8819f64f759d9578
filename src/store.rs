// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Report storage.
//!
//! Aggregators only talk to [`ReportStore`]. [`FileStore`] keeps everything in
//! flat per-entity files where the number of rows in a day's hourly file is
//! the resume checkpoint:
//!
//! ```text
//! <root>/<cameras|areas>/<id>/objects_log/<date>.csv
//! <root>/<cameras|areas>/<id>/reports/<metric>/report_<date>.csv   hourly
//! <root>/<cameras|areas>/<id>/reports/<metric>/report.csv          daily
//! <root>/<cameras|areas>/<id>/reports/<metric>/live.csv
//! <root>/<cameras|areas>/<id>/reports/<metric>/heatmaps/<kind>_<date>.json
//! ```
//!
//! Rows are appended whole with a single write so readers never observe a
//! partial row.

use crate::entity::Entity;
use crate::error::{Result, TallyError};
use crate::family::MetricFamily;
use crate::heatmap::{HeatmapGrid, HeatmapKind};
use crate::raw::{read_events, RawEvent, TrackId, DATE_FORMAT, TIMESTAMP_FORMAT};
use chrono::{NaiveDate, NaiveDateTime};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Column holding the dwell-time carry map.
pub const ACTIVE_COLUMN: &str = "Active";

/// A dwell-time track still in progress at a bucket end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTrack {
    pub start_time: NaiveDateTime,
    pub elapsed_seconds: i64,
}

/// Carry map: track id to its in-progress dwell.
pub type ActiveTracks = BTreeMap<TrackId, ActiveTrack>;

/// One hourly summary row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryRow {
    /// Values aligned with the family's field table.
    pub values: Vec<f64>,
    /// Dwell-time carry map (empty for other families).
    pub active: ActiveTracks,
}

impl SummaryRow {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            active: ActiveTracks::new(),
        }
    }
}

/// One daily summary row.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub values: Vec<f64>,
}

/// One live snapshot row.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveRow {
    pub time: NaiveDateTime,
    pub values: Vec<f64>,
}

/// Storage interface of the aggregation engine.
///
/// `Ok(None)` means "no such file": callers treat it as missing data, never as
/// an error.
pub trait ReportStore: Send + Sync {
    /// Raw events of one day.
    fn read_raw_events(&self, entity: &Entity, date: NaiveDate) -> Result<Option<Vec<RawEvent>>>;

    /// The last `count` raw events of one day.
    fn read_recent_raw_events(
        &self,
        entity: &Entity,
        date: NaiveDate,
        count: usize,
    ) -> Result<Option<Vec<RawEvent>>> {
        Ok(self.read_raw_events(entity, date)?.map(|events| {
            let skip = events.len().saturating_sub(count);
            events.into_iter().skip(skip).collect()
        }))
    }

    /// Hourly rows of one day, in hour order.
    fn hourly_rows(
        &self,
        entity: &Entity,
        family: MetricFamily,
        date: NaiveDate,
    ) -> Result<Option<Vec<SummaryRow>>>;

    /// Append hourly rows, creating the file (header only) when absent.
    fn append_hourly_rows(
        &self,
        entity: &Entity,
        family: MetricFamily,
        date: NaiveDate,
        rows: &[SummaryRow],
    ) -> Result<()>;

    /// Every daily row, in append order.
    fn daily_rows(&self, entity: &Entity, family: MetricFamily) -> Result<Vec<DailyRow>>;

    fn append_daily_row(&self, entity: &Entity, family: MetricFamily, row: &DailyRow) -> Result<()>;

    /// The last `count` live rows, oldest first.
    fn live_rows(&self, entity: &Entity, family: MetricFamily, count: usize) -> Result<Vec<LiveRow>>;

    /// Append a live row, keeping at most about `max_rows` rows.
    fn append_live_row(
        &self,
        entity: &Entity,
        family: MetricFamily,
        row: &LiveRow,
        max_rows: usize,
    ) -> Result<()>;

    fn load_heatmap(
        &self,
        entity: &Entity,
        kind: HeatmapKind,
        date: NaiveDate,
    ) -> Result<Option<HeatmapGrid>>;

    /// Persist a grid once. Returns `false` when one already exists.
    fn save_heatmap(
        &self,
        entity: &Entity,
        kind: HeatmapKind,
        date: NaiveDate,
        grid: &HeatmapGrid,
    ) -> Result<bool>;
}

/// Flat-file store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entity_dir(&self, entity: &Entity) -> PathBuf {
        self.root.join(entity.kind.dir_name()).join(&entity.id)
    }

    pub fn raw_log_path(&self, entity: &Entity, date: NaiveDate) -> PathBuf {
        self.entity_dir(entity)
            .join("objects_log")
            .join(format!("{}.csv", date.format(DATE_FORMAT)))
    }

    pub fn reports_dir(&self, entity: &Entity, family: MetricFamily) -> PathBuf {
        self.entity_dir(entity)
            .join("reports")
            .join(family.reports_folder())
    }

    pub fn hourly_path(&self, entity: &Entity, family: MetricFamily, date: NaiveDate) -> PathBuf {
        self.reports_dir(entity, family)
            .join(format!("report_{}.csv", date.format(DATE_FORMAT)))
    }

    pub fn daily_path(&self, entity: &Entity, family: MetricFamily) -> PathBuf {
        self.reports_dir(entity, family).join("report.csv")
    }

    pub fn live_path(&self, entity: &Entity, family: MetricFamily) -> PathBuf {
        self.reports_dir(entity, family).join("live.csv")
    }

    pub fn heatmap_path(&self, entity: &Entity, kind: HeatmapKind, date: NaiveDate) -> PathBuf {
        self.reports_dir(entity, MetricFamily::SocialDistancing)
            .join("heatmaps")
            .join(format!("{}_{}.json", kind, date.format(DATE_FORMAT)))
    }
}

/// `Ok(None)` when the file does not exist.
fn open_if_exists(path: &Path) -> Result<Option<File>> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Encode records into one buffer so the append is a single write.
fn encode_records<I, R>(records: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for record in records {
        writer.write_record(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| TallyError::Io(e.into_error()))
}

/// Append rows, writing `header` first when the file is new or empty.
fn append_with_header(path: &Path, header: &[String], rows: Vec<Vec<String>>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let needs_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let mut records = Vec::with_capacity(rows.len() + 1);
    if needs_header {
        records.push(header.to_vec());
    }
    records.extend(rows);

    let bytes = encode_records(records)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&bytes)?;
    Ok(())
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Parse numeric columns by header name. Unparsable cells read as 0 so a bad
/// cell never shifts the hour positions.
fn parse_values(
    family: MetricFamily,
    headers: &csv::StringRecord,
    record: &csv::StringRecord,
    line: u64,
) -> Vec<f64> {
    family
        .fields()
        .iter()
        .map(|field| {
            let cell = headers
                .iter()
                .position(|h| h == field.name)
                .and_then(|i| record.get(i))
                .unwrap_or("");
            match cell.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => v,
                _ => {
                    warn!(
                        "Unreadable {} value {:?} at line {}, using 0",
                        field.name, cell, line
                    );
                    0.0
                }
            }
        })
        .collect()
}

fn column<'a>(headers: &csv::StringRecord, record: &'a csv::StringRecord, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .position(|h| h == name)
        .and_then(|i| record.get(i))
}

fn summary_header(family: MetricFamily) -> Vec<String> {
    let mut header: Vec<String> = family.field_names().iter().map(|s| s.to_string()).collect();
    if family.carries_active_tracks() {
        header.push(ACTIVE_COLUMN.to_string());
    }
    header
}

fn keyed_header(key: &str, family: MetricFamily) -> Vec<String> {
    std::iter::once(key.to_string())
        .chain(family.field_names().iter().map(|s| s.to_string()))
        .collect()
}

fn line_of(record: &csv::StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

impl ReportStore for FileStore {
    fn read_raw_events(&self, entity: &Entity, date: NaiveDate) -> Result<Option<Vec<RawEvent>>> {
        match open_if_exists(&self.raw_log_path(entity, date))? {
            Some(file) => Ok(Some(read_events(BufReader::new(file))?)),
            None => Ok(None),
        }
    }

    fn read_recent_raw_events(
        &self,
        entity: &Entity,
        date: NaiveDate,
        count: usize,
    ) -> Result<Option<Vec<RawEvent>>> {
        let Some(events) = self.read_raw_events(entity, date)? else {
            return Ok(None);
        };
        let mut recent: VecDeque<RawEvent> = VecDeque::with_capacity(count);
        for event in events {
            if recent.len() == count {
                recent.pop_front();
            }
            if count > 0 {
                recent.push_back(event);
            }
        }
        Ok(Some(recent.into()))
    }

    fn hourly_rows(
        &self,
        entity: &Entity,
        family: MetricFamily,
        date: NaiveDate,
    ) -> Result<Option<Vec<SummaryRow>>> {
        let Some(file) = open_if_exists(&self.hourly_path(entity, family, date))? else {
            return Ok(None);
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(BufReader::new(file));
        let headers = reader.headers()?.clone();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let line = line_of(&record);
            let values = parse_values(family, &headers, &record, line);
            let active = match column(&headers, &record, ACTIVE_COLUMN) {
                Some(cell) if !cell.trim().is_empty() => serde_json::from_str(cell)
                    .unwrap_or_else(|e| {
                        warn!("Unreadable active tracks at line {}: {}", line, e);
                        ActiveTracks::new()
                    }),
                _ => ActiveTracks::new(),
            };
            rows.push(SummaryRow { values, active });
        }
        Ok(Some(rows))
    }

    fn append_hourly_rows(
        &self,
        entity: &Entity,
        family: MetricFamily,
        date: NaiveDate,
        rows: &[SummaryRow],
    ) -> Result<()> {
        let mut encoded = Vec::with_capacity(rows.len());
        for row in rows {
            let mut record: Vec<String> = row.values.iter().map(|v| format_value(*v)).collect();
            if family.carries_active_tracks() {
                record.push(serde_json::to_string(&row.active)?);
            }
            encoded.push(record);
        }
        append_with_header(
            &self.hourly_path(entity, family, date),
            &summary_header(family),
            encoded,
        )
    }

    fn daily_rows(&self, entity: &Entity, family: MetricFamily) -> Result<Vec<DailyRow>> {
        let Some(file) = open_if_exists(&self.daily_path(entity, family))? else {
            return Ok(Vec::new());
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(BufReader::new(file));
        let headers = reader.headers()?.clone();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let line = line_of(&record);
            let cell = column(&headers, &record, "Date").unwrap_or("");
            match NaiveDate::parse_from_str(cell.trim(), DATE_FORMAT) {
                Ok(date) => rows.push(DailyRow {
                    date,
                    values: parse_values(family, &headers, &record, line),
                }),
                Err(e) => warn!("Skipping daily row at line {}: bad date {:?}: {}", line, cell, e),
            }
        }
        Ok(rows)
    }

    fn append_daily_row(&self, entity: &Entity, family: MetricFamily, row: &DailyRow) -> Result<()> {
        let record = std::iter::once(row.date.format(DATE_FORMAT).to_string())
            .chain(row.values.iter().map(|v| format_value(*v)))
            .collect();
        append_with_header(
            &self.daily_path(entity, family),
            &keyed_header("Date", family),
            vec![record],
        )
    }

    fn live_rows(&self, entity: &Entity, family: MetricFamily, count: usize) -> Result<Vec<LiveRow>> {
        let Some(file) = open_if_exists(&self.live_path(entity, family))? else {
            return Ok(Vec::new());
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(BufReader::new(file));
        let headers = reader.headers()?.clone();

        let mut rows: VecDeque<LiveRow> = VecDeque::new();
        for record in reader.records() {
            let record = record?;
            let line = line_of(&record);
            let cell = column(&headers, &record, "Time").unwrap_or("");
            let time = match NaiveDateTime::parse_from_str(cell.trim(), TIMESTAMP_FORMAT) {
                Ok(time) => time,
                Err(e) => {
                    warn!("Skipping live row at line {}: bad time {:?}: {}", line, cell, e);
                    continue;
                }
            };
            rows.push_back(LiveRow {
                time,
                values: parse_values(family, &headers, &record, line),
            });
            if rows.len() > count {
                rows.pop_front();
            }
        }
        Ok(rows.into())
    }

    fn append_live_row(
        &self,
        entity: &Entity,
        family: MetricFamily,
        row: &LiveRow,
        max_rows: usize,
    ) -> Result<()> {
        let path = self.live_path(entity, family);
        let header = keyed_header("Time", family);
        let encode = |row: &LiveRow| -> Vec<String> {
            std::iter::once(row.time.format(TIMESTAMP_FORMAT).to_string())
                .chain(row.values.iter().map(|v| format_value(*v)))
                .collect()
        };
        append_with_header(&path, &header, vec![encode(row)])?;

        // Compact once the file holds twice the bound: rewrite the newest rows
        // to a sibling file and rename it over the live file.
        let bound = max_rows.max(1);
        let rows = self.live_rows(entity, family, usize::MAX)?;
        if rows.len() > bound * 2 {
            let keep = &rows[rows.len() - bound..];
            let mut records = vec![header];
            records.extend(keep.iter().map(encode));
            let tmp = path.with_extension("csv.tmp");
            fs::write(&tmp, encode_records(records)?)?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    fn load_heatmap(
        &self,
        entity: &Entity,
        kind: HeatmapKind,
        date: NaiveDate,
    ) -> Result<Option<HeatmapGrid>> {
        match open_if_exists(&self.heatmap_path(entity, kind, date))? {
            Some(file) => Ok(Some(serde_json::from_reader(BufReader::new(file))?)),
            None => Ok(None),
        }
    }

    fn save_heatmap(
        &self,
        entity: &Entity,
        kind: HeatmapKind,
        date: NaiveDate,
        grid: &HeatmapGrid,
    ) -> Result<bool> {
        let path = self.heatmap_path(entity, kind, date);
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(grid)?)?;
        fs::rename(&tmp, &path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 9, d).unwrap()
    }

    #[test]
    fn test_missing_files_are_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let camera = Entity::camera("cam");
        assert!(store.read_raw_events(&camera, date(1)).unwrap().is_none());
        assert!(store
            .hourly_rows(&camera, MetricFamily::FaceMask, date(1))
            .unwrap()
            .is_none());
        assert!(store.daily_rows(&camera, MetricFamily::FaceMask).unwrap().is_empty());
        assert!(store
            .load_heatmap(&camera, HeatmapKind::Detections, date(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_hourly_rows_with_active_column() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let camera = Entity::camera("cam");
        let family = MetricFamily::DwellTime;

        store.append_hourly_rows(&camera, family, date(2), &[]).unwrap();
        assert_eq!(store.hourly_rows(&camera, family, date(2)).unwrap(), Some(vec![]));

        let mut row = SummaryRow::new(vec![1.0, 30.5, 30.5, 1.0, 0.0, 0.0, 0.0, 0.0]);
        row.active.insert(
            7,
            ActiveTrack {
                start_time: date(2).and_hms_opt(0, 50, 0).unwrap(),
                elapsed_seconds: 595,
            },
        );
        store
            .append_hourly_rows(&camera, family, date(2), &[SummaryRow::new(family.zero_values()), row.clone()])
            .unwrap();

        let rows = store.hourly_rows(&camera, family, date(2)).unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], row);

        let text = fs::read_to_string(store.hourly_path(&camera, family, date(2))).unwrap();
        assert!(text.starts_with("DetectedObjects,AvgDwellTime,MaxDwellTime,L1,L2,L3,L4,L5,Active"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_daily_rows_append_order() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let area = Entity::area("5");
        let family = MetricFamily::Occupancy;
        for d in [3, 4] {
            store
                .append_daily_row(
                    &area,
                    family,
                    &DailyRow {
                        date: date(d),
                        values: vec![d as f64, 9.0, 20.0],
                    },
                )
                .unwrap();
        }
        let rows = store.daily_rows(&area, family).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, date(3));
        assert_eq!(rows[1].values, vec![4.0, 9.0, 20.0]);
    }

    #[test]
    fn test_live_file_is_compacted() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let camera = Entity::camera("cam");
        let family = MetricFamily::SocialDistancing;
        let start = date(5).and_hms_opt(8, 0, 0).unwrap();
        for i in 0..7 {
            let row = LiveRow {
                time: start + chrono::Duration::minutes(i),
                values: vec![i as f64, 0.0],
            };
            store.append_live_row(&camera, family, &row, 3).unwrap();
        }
        let rows = store.live_rows(&camera, family, usize::MAX).unwrap();
        // Compaction at the 7th row keeps the newest 3.
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].values[0], 6.0);

        let last_two = store.live_rows(&camera, family, 2).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].values[0], 5.0);
    }

    #[test]
    fn test_heatmap_written_once() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let camera = Entity::camera("cam");
        let mut grid = HeatmapGrid::new(2, 3);
        grid.accumulate(1, 2);
        assert!(store.save_heatmap(&camera, HeatmapKind::Violations, date(9), &grid).unwrap());
        assert!(!store
            .save_heatmap(&camera, HeatmapKind::Violations, date(9), &HeatmapGrid::new(2, 3))
            .unwrap());
        let loaded = store
            .load_heatmap(&camera, HeatmapKind::Violations, date(9))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, grid);
    }
}
