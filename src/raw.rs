// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Raw per-frame event log and its reader.
//!
//! One CSV file per entity and day, appended by the ingestion pipeline:
//!
//! ```text
//! Timestamp,OccupancyCount,Detections,ViolationsIndexes
//! 2020-09-19 10:00:00,2,"[{""tracking_id"": 1, ""bbox"": [0.1, 0.2, 0.4, 0.3]}]",[0]
//! ```
//!
//! `Detections` and `ViolationsIndexes` are JSON documents. Malformed rows are
//! skipped with a warning rather than failing the whole day.

use crate::error::{Result, TallyError};
use chrono::{Duration, NaiveDateTime, Timelike};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;

/// Timestamp layout used by every flat file.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date layout used in file names and reports.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Tracker identifier.
pub type TrackId = u64;

/// Bounding box `[y1, x1, y2, x2]` in normalized frame coordinates.
pub type BBox = [f64; 4];

/// Centre `(x, y)` of a bounding box.
pub fn bbox_center(bbox: &BBox) -> (f64, f64) {
    ((bbox[1] + bbox[3]) / 2.0, (bbox[0] + bbox[2]) / 2.0)
}

/// One detection as logged in the `Detections` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DetectionRecord {
    tracking_id: TrackId,
    bbox: BBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    face_label: Option<i32>,
}

/// One row of the raw CSV.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "OccupancyCount", default)]
    occupancy_count: Option<u32>,
    #[serde(rename = "Detections", default)]
    detections: String,
    #[serde(rename = "ViolationsIndexes", default)]
    violations: String,
}

/// A tracked object in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObjectObservation {
    pub tracking_id: TrackId,
    pub bbox: BBox,
    pub face_label: Option<i32>,
    pub violating: bool,
}

/// One processing tick of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub timestamp: NaiveDateTime,
    pub occupancy_count: u32,
    pub observations: Vec<TrackedObjectObservation>,
}

impl RawEvent {
    fn from_record(record: RawRecord, line: u64) -> Result<Self> {
        let corrupt = |message: String| TallyError::CorruptRow { line, message };
        let timestamp = NaiveDateTime::parse_from_str(record.timestamp.trim(), TIMESTAMP_FORMAT)
            .map_err(|e| corrupt(format!("bad timestamp {:?}: {}", record.timestamp, e)))?;

        let detections: Vec<DetectionRecord> = parse_json_column(&record.detections)
            .map_err(|e| corrupt(format!("bad Detections column: {}", e)))?;
        let violations: Vec<usize> = parse_json_column(&record.violations)
            .map_err(|e| corrupt(format!("bad ViolationsIndexes column: {}", e)))?;
        let violations: HashSet<usize> = violations.into_iter().collect();

        let observations = detections
            .into_iter()
            .enumerate()
            .map(|(index, d)| TrackedObjectObservation {
                tracking_id: d.tracking_id,
                bbox: d.bbox,
                face_label: d.face_label,
                violating: violations.contains(&index),
            })
            .collect::<Vec<_>>();

        Ok(Self {
            timestamp,
            occupancy_count: record
                .occupancy_count
                .unwrap_or(observations.len() as u32),
            observations,
        })
    }

    /// Serialize into the raw CSV columns.
    pub fn to_record(&self) -> Result<[String; 4]> {
        let detections: Vec<DetectionRecord> = self
            .observations
            .iter()
            .map(|o| DetectionRecord {
                tracking_id: o.tracking_id,
                bbox: o.bbox,
                face_label: o.face_label,
            })
            .collect();
        let violations: Vec<usize> = self
            .observations
            .iter()
            .enumerate()
            .filter(|(_, o)| o.violating)
            .map(|(i, _)| i)
            .collect();
        Ok([
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.occupancy_count.to_string(),
            serde_json::to_string(&detections)?,
            serde_json::to_string(&violations)?,
        ])
    }
}

/// Empty cells read as empty lists.
fn parse_json_column<T: for<'de> Deserialize<'de> + Default>(
    cell: &str,
) -> serde_json::Result<T> {
    if cell.trim().is_empty() {
        Ok(T::default())
    } else {
        serde_json::from_str(cell)
    }
}

/// Column header of the raw CSV.
pub const RAW_HEADERS: [&str; 4] = ["Timestamp", "OccupancyCount", "Detections", "ViolationsIndexes"];

/// Parse a raw log, skipping malformed rows.
pub fn read_events<R: Read>(reader: R) -> Result<Vec<RawEvent>> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut events = Vec::new();

    for (index, record) in csv_reader.deserialize::<RawRecord>().enumerate() {
        // Header is line 1.
        let line = index as u64 + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping corrupt raw row at line {}: {}", line, e);
                continue;
            }
        };
        match RawEvent::from_record(record, line) {
            Ok(event) => events.push(event),
            Err(e) => warn!("Skipping raw row: {}", e),
        }
    }

    Ok(events)
}

/// One frame of one tracked object.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSample {
    pub time: NaiveDateTime,
    pub bbox: BBox,
    pub face_label: Option<i32>,
    pub violating: bool,
}

/// Raw events of one aggregation window, grouped per track.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Occupancy count of every row in the window.
    pub occupancy: Vec<u32>,
    /// Samples per track, in time order.
    pub tracks: BTreeMap<TrackId, Vec<TrackSample>>,
}

impl Bucket {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self {
            start,
            end,
            occupancy: Vec::new(),
            tracks: BTreeMap::new(),
        }
    }

    /// Bucket spanning a run of events (used by live snapshots).
    pub fn from_events(events: &[RawEvent]) -> Option<Self> {
        let start = events.first()?.timestamp;
        let end = events.last()?.timestamp;
        let mut bucket = Self::new(start, end);
        for event in events {
            bucket.push(event);
        }
        Some(bucket)
    }

    pub fn push(&mut self, event: &RawEvent) {
        self.occupancy.push(event.occupancy_count);
        for o in &event.observations {
            self.tracks.entry(o.tracking_id).or_default().push(TrackSample {
                time: event.timestamp,
                bbox: o.bbox,
                face_label: o.face_label,
                violating: o.violating,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty()
    }

    /// Hour of day the bucket starts in.
    pub fn hour(&self) -> u32 {
        self.start.hour()
    }
}

/// Group events into one bucket per hour of `[from, until)`.
///
/// Every hour of the window gets a bucket, even when no event falls in it.
/// `from` is expected on an hour boundary.
pub fn bucket_by_hour(events: &[RawEvent], from: NaiveDateTime, until: NaiveDateTime) -> Vec<Bucket> {
    let mut buckets = Vec::new();
    let mut start = from;
    while start < until {
        let end = (start + Duration::hours(1)).min(until);
        buckets.push(Bucket::new(start, end));
        start += Duration::hours(1);
    }

    for event in events {
        if event.timestamp < from || event.timestamp >= until {
            continue;
        }
        let index = ((event.timestamp - from).num_seconds() / 3600) as usize;
        if let Some(bucket) = buckets.get_mut(index) {
            bucket.push(event);
        }
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 9, 19)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    const LOG: &str = "Timestamp,OccupancyCount,Detections,ViolationsIndexes\n\
2020-09-19 10:00:00,2,\"[{\"\"tracking_id\"\": 1, \"\"bbox\"\": [0.1, 0.2, 0.3, 0.4]}, {\"\"tracking_id\"\": 2, \"\"bbox\"\": [0.5, 0.5, 0.7, 0.6], \"\"face_label\"\": 0}]\",[1]\n\
not-a-date,1,[],[]\n\
2020-09-19 10:00:05,1,\"[{\"\"tracking_id\"\": 1, \"\"bbox\"\": [0.1, 0.2, 0.3, 0.4]}]\",[]\n\
2020-09-19 11:30:00,0,[],[]\n\
2020-09-19 11:30:05,1,{broken,[]\n";

    #[test]
    fn test_read_events_skips_corrupt_rows() {
        let events = read_events(LOG.as_bytes()).unwrap();
        assert_eq!(events.len(), 3);

        let first = &events[0];
        assert_eq!(first.timestamp, at(10, 0, 0));
        assert_eq!(first.occupancy_count, 2);
        assert_eq!(first.observations.len(), 2);
        assert!(!first.observations[0].violating);
        assert!(first.observations[1].violating);
        assert_eq!(first.observations[1].face_label, Some(0));
    }

    #[test]
    fn test_record_roundtrip_through_reader() {
        let event = RawEvent {
            timestamp: at(8, 15, 0),
            occupancy_count: 1,
            observations: vec![TrackedObjectObservation {
                tracking_id: 42,
                bbox: [0.0, 0.0, 0.5, 0.5],
                face_label: Some(1),
                violating: true,
            }],
        };
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(RAW_HEADERS).unwrap();
        writer.write_record(event.to_record().unwrap()).unwrap();
        let bytes = writer.into_inner().unwrap();

        let events = read_events(bytes.as_slice()).unwrap();
        assert_eq!(events, vec![event]);
    }

    #[test]
    fn test_bucket_by_hour() {
        let events = read_events(LOG.as_bytes()).unwrap();
        let buckets = bucket_by_hour(&events, at(9, 0, 0), at(12, 0, 0));
        assert_eq!(buckets.len(), 3);
        assert!(buckets[0].is_empty());
        assert_eq!(buckets[1].hour(), 10);
        assert_eq!(buckets[1].occupancy, vec![2, 1]);
        assert_eq!(buckets[1].tracks[&1].len(), 2);
        assert_eq!(buckets[1].tracks[&2].len(), 1);
        assert_eq!(buckets[2].occupancy, vec![0]);
        assert_eq!(buckets[2].end, at(12, 0, 0));
    }

    #[test]
    fn test_window_excludes_out_of_range() {
        let events = read_events(LOG.as_bytes()).unwrap();
        let buckets = bucket_by_hour(&events, at(11, 0, 0), at(11, 0, 0));
        assert!(buckets.is_empty());
        let buckets = bucket_by_hour(&events, at(11, 0, 0), at(12, 0, 0));
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].occupancy.len(), 1);
    }

    #[test]
    fn test_bbox_center() {
        assert_eq!(bbox_center(&[0.0, 0.25, 1.0, 0.75]), (0.5, 0.5));
        assert_eq!(bbox_center(&[0.5, 0.0, 1.0, 0.5]), (0.25, 0.75));
    }
}
