// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-family folds of one bucket of raw events into a summary row.
//!
//! Shared by the hourly aggregator (one bucket per hour, dwell carry-over
//! enabled) and the live snapshot (one bucket over the last rows, every track
//! treated as finished).

use crate::config::MetricConfig;
use crate::debounce::{debounce, DebounceCounts, Debouncer, FaceState};
use crate::entity::{Boundary, Entity};
use crate::family::MetricFamily;
use crate::raw::{bbox_center, Bucket, TrackSample};
use crate::store::{ActiveTrack, ActiveTracks, SummaryRow};
use chrono::Duration;

/// How dwell tracks near the bucket end are handled.
#[derive(Debug, Clone, Copy)]
pub enum DwellMode<'a> {
    /// Tracks seen after the cutoff stay active and are carried forward;
    /// `carry` holds the tracks active at the end of the previous bucket.
    Carry { carry: &'a ActiveTracks },
    /// Every track in the bucket is complete.
    Snapshot,
}

/// Fold one bucket into a summary row of `family`.
pub fn fold_bucket(
    family: MetricFamily,
    config: &MetricConfig,
    entity: &Entity,
    bucket: &Bucket,
    dwell: DwellMode<'_>,
) -> SummaryRow {
    match family {
        MetricFamily::Occupancy => SummaryRow::new(fold_occupancy(entity, bucket)),
        MetricFamily::SocialDistancing => {
            let threshold = config.debounce.processing_count_threshold;
            let counts = sum_tracks(bucket, |samples| {
                debounce(samples.iter().map(|s| s.violating), threshold)
            });
            SummaryRow::new(vec![counts.detections as f64, counts.positives as f64])
        }
        MetricFamily::FaceMask => {
            let threshold = config.debounce.processing_count_threshold;
            let counts = sum_tracks(bucket, |samples| {
                debounce(
                    samples.iter().map(|s| FaceState::from_label(s.face_label)),
                    threshold,
                )
            });
            // Positives are faces without a mask.
            SummaryRow::new(vec![counts.detections as f64, counts.negatives() as f64])
        }
        MetricFamily::DwellTime => fold_dwell(config, bucket, dwell),
        MetricFamily::InOut => {
            let threshold = config.debounce.processing_count_threshold;
            let (ins, outs) = count_crossings(&entity.boundaries, bucket, threshold);
            SummaryRow::new(vec![ins as f64, outs as f64])
        }
    }
}

fn sum_tracks<F>(bucket: &Bucket, per_track: F) -> DebounceCounts
where
    F: Fn(&[TrackSample]) -> DebounceCounts,
{
    let mut total = DebounceCounts::default();
    for samples in bucket.tracks.values() {
        total += per_track(samples);
    }
    total
}

fn fold_occupancy(entity: &Entity, bucket: &Bucket) -> Vec<f64> {
    let threshold = entity.occupancy_threshold.unwrap_or(0.0);
    if bucket.occupancy.is_empty() {
        return vec![0.0, 0.0, threshold];
    }
    let sum: u64 = bucket.occupancy.iter().map(|&c| c as u64).sum();
    let average = sum as f64 / bucket.occupancy.len() as f64;
    let max = bucket.occupancy.iter().copied().max().unwrap_or(0) as f64;
    vec![average, max, threshold]
}

fn fold_dwell(config: &MetricConfig, bucket: &Bucket, mode: DwellMode<'_>) -> SummaryRow {
    let empty = ActiveTracks::new();
    let (carry, cutoff) = match mode {
        DwellMode::Carry { carry } => (
            carry,
            Some(bucket.end - Duration::seconds(config.dwell.active_track_interval_secs)),
        ),
        DwellMode::Snapshot => (&empty, None),
    };

    let mut finished: Vec<i64> = Vec::new();
    let mut active = ActiveTracks::new();

    for (id, samples) in &bucket.tracks {
        let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
            continue;
        };
        let start_time = carry.get(id).map_or(first.time, |a| a.start_time);
        let elapsed_seconds = (last.time - start_time).num_seconds();
        if cutoff.map_or(false, |c| last.time >= c) {
            active.insert(
                *id,
                ActiveTrack {
                    start_time,
                    elapsed_seconds,
                },
            );
        } else {
            finished.push(elapsed_seconds);
        }
    }

    // Carried tracks with no further sample ended during the previous bucket.
    for (id, track) in carry {
        if !bucket.tracks.contains_key(id) {
            finished.push(track.elapsed_seconds);
        }
    }

    let mut values = vec![0.0; MetricFamily::DwellTime.fields().len()];
    if !finished.is_empty() {
        let total: i64 = finished.iter().sum();
        values[0] = finished.len() as f64;
        values[1] = total as f64 / finished.len() as f64;
        values[2] = finished.iter().copied().max().unwrap_or(0) as f64;
        for elapsed in &finished {
            values[3 + dwell_level(config, *elapsed)] += 1.0;
        }
    }

    SummaryRow { values, active }
}

/// Level index 0..=4 (L1..L5) of a dwell time.
pub fn dwell_level(config: &MetricConfig, elapsed_seconds: i64) -> usize {
    config
        .dwell
        .level_thresholds_secs
        .iter()
        .position(|&bound| elapsed_seconds < bound)
        .unwrap_or(4)
}

/// Twice the signed area of (a, b, p): positive when `p` lies left of a→b.
fn orientation(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> f64 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

/// Direction of the step p→q across the boundary, if it crosses it.
///
/// Returns `Some(true)` for left-to-right ("in"), `Some(false)` for
/// right-to-left ("out"). A point exactly on the line counts as right of it,
/// so touching the line and stepping back is never counted.
pub fn crossing(boundary: &Boundary, p: (f64, f64), q: (f64, f64)) -> Option<bool> {
    let (a, b) = (boundary.start, boundary.end);
    let left_p = orientation(a, b, p) > 0.0;
    let left_q = orientation(a, b, q) > 0.0;
    if left_p == left_q {
        return None;
    }
    // The step must also pass between the segment's endpoints.
    if orientation(p, q, a) * orientation(p, q, b) > 0.0 {
        return None;
    }
    Some(left_p)
}

fn count_crossings(boundaries: &[Boundary], bucket: &Bucket, threshold: usize) -> (u32, u32) {
    let mut ins = 0;
    let mut outs = 0;
    for samples in bucket.tracks.values() {
        let path: Vec<(f64, f64)> = samples.iter().map(|s| bbox_center(&s.bbox)).collect();
        for boundary in boundaries {
            let (track_ins, track_outs) = track_crossings(boundary, &path, threshold);
            ins += track_ins;
            outs += track_outs;
        }
    }
    (ins, outs)
}

/// Confirmed crossings of one track path over one boundary, as `(in, out)`.
///
/// The side of the line is a per-frame signal like any other and goes through
/// the same hysteresis filter: a track has to hold a side for `threshold`
/// samples before it is on that side. A confirmed side change counts when the
/// step from the last point on the old side to the confirming point passes
/// through the segment.
pub fn track_crossings(boundary: &Boundary, path: &[(f64, f64)], threshold: usize) -> (u32, u32) {
    let (a, b) = (boundary.start, boundary.end);
    let mut filter = Debouncer::new(threshold);
    let mut anchor: Option<(f64, f64)> = None;
    let mut ins = 0;
    let mut outs = 0;
    for &point in path {
        let left = orientation(a, b, point) > 0.0;
        let confirmed = filter.push(left);
        if let (Some(_), Some(from)) = (confirmed, anchor) {
            match crossing(boundary, from, point) {
                Some(true) => ins += 1,
                Some(false) => outs += 1,
                None => {}
            }
        }
        if filter.current_status() == Some(left) {
            anchor = Some(point);
        }
    }
    (ins, outs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{RawEvent, TrackedObjectObservation};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 9, 19)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn observation(id: u64, bbox: [f64; 4], violating: bool) -> TrackedObjectObservation {
        TrackedObjectObservation {
            tracking_id: id,
            bbox,
            face_label: None,
            violating,
        }
    }

    fn event(time: NaiveDateTime, observations: Vec<TrackedObjectObservation>) -> RawEvent {
        RawEvent {
            timestamp: time,
            occupancy_count: observations.len() as u32,
            observations,
        }
    }

    #[test]
    fn test_social_distancing_fold() {
        let mut bucket = Bucket::new(at(10, 0, 0), at(11, 0, 0));
        let pattern = [true, true, true, false, false, false, true, true, true];
        for (i, violating) in pattern.iter().enumerate() {
            bucket.push(&event(
                at(10, 0, i as u32),
                vec![
                    observation(1, [0.1; 4], *violating),
                    observation(2, [0.2; 4], false),
                ],
            ));
        }
        let row = fold_bucket(
            MetricFamily::SocialDistancing,
            &MetricConfig::default(),
            &Entity::camera("c"),
            &bucket,
            DwellMode::Snapshot,
        );
        // Track 1: 3 detections, 2 violations. Track 2: one clean detection.
        assert_eq!(row.values, vec![4.0, 2.0]);
    }

    #[test]
    fn test_occupancy_fold() {
        let mut bucket = Bucket::new(at(10, 0, 0), at(11, 0, 0));
        for count in [1u32, 3, 5] {
            let observations = (0..count).map(|i| observation(i as u64, [0.5; 4], false)).collect();
            bucket.push(&event(at(10, 0, count), observations));
        }
        let area = Entity::area("a").with_occupancy_threshold(10.0);
        let row = fold_bucket(
            MetricFamily::Occupancy,
            &MetricConfig::default(),
            &area,
            &bucket,
            DwellMode::Snapshot,
        );
        assert_eq!(row.values, vec![3.0, 5.0, 10.0]);

        let empty = Bucket::new(at(11, 0, 0), at(12, 0, 0));
        let row = fold_bucket(
            MetricFamily::Occupancy,
            &MetricConfig::default(),
            &area,
            &empty,
            DwellMode::Snapshot,
        );
        assert_eq!(row.values, vec![0.0, 0.0, 10.0]);
    }

    #[test]
    fn test_dwell_levels() {
        let config = MetricConfig::default();
        assert_eq!(dwell_level(&config, 0), 0);
        assert_eq!(dwell_level(&config, 59), 0);
        assert_eq!(dwell_level(&config, 60), 1);
        assert_eq!(dwell_level(&config, 299), 2);
        assert_eq!(dwell_level(&config, 599), 3);
        assert_eq!(dwell_level(&config, 3600), 4);
    }

    #[test]
    fn test_dwell_carry_across_boundary() {
        let config = MetricConfig::default();
        // Track 1 walks in at 10:50 and leaves at 11:05.
        let mut hour_10 = Bucket::new(at(10, 0, 0), at(11, 0, 0));
        let mut hour_11 = Bucket::new(at(11, 0, 0), at(12, 0, 0));
        let mut t = at(10, 50, 0);
        while t <= at(11, 5, 0) {
            let e = event(t, vec![observation(1, [0.5; 4], false)]);
            if t < at(11, 0, 0) {
                hour_10.push(&e);
            } else {
                hour_11.push(&e);
            }
            t += Duration::seconds(5);
        }

        let no_carry = ActiveTracks::new();
        let first = fold_dwell(&config, &hour_10, DwellMode::Carry { carry: &no_carry });
        assert_eq!(first.values[0], 0.0);
        assert_eq!(first.active[&1].start_time, at(10, 50, 0));
        assert_eq!(first.active[&1].elapsed_seconds, 595);

        let second = fold_dwell(&config, &hour_11, DwellMode::Carry { carry: &first.active });
        assert!(second.active.is_empty());
        assert_eq!(second.values[0], 1.0);
        assert_eq!(second.values[1], 900.0);
        assert_eq!(second.values[2], 900.0);
        // 15 minutes is L5.
        assert_eq!(second.values[7], 1.0);
    }

    #[test]
    fn test_dwell_carried_track_ending_at_boundary() {
        let config = MetricConfig::default();
        let mut carry = ActiveTracks::new();
        carry.insert(
            3,
            ActiveTrack {
                start_time: at(9, 58, 0),
                elapsed_seconds: 115,
            },
        );
        let empty = Bucket::new(at(10, 0, 0), at(11, 0, 0));
        let row = fold_dwell(&config, &empty, DwellMode::Carry { carry: &carry });
        assert_eq!(row.values[0], 1.0);
        assert_eq!(row.values[1], 115.0);
        assert_eq!(row.values[4], 1.0);
        assert!(row.active.is_empty());
    }

    #[test]
    fn test_crossing_direction() {
        let line = Boundary::new("door", (0.5, 0.0), (0.5, 1.0));
        // Left of an upward line is x < 0.5.
        assert_eq!(crossing(&line, (0.4, 0.5), (0.6, 0.5)), Some(true));
        assert_eq!(crossing(&line, (0.6, 0.5), (0.4, 0.5)), Some(false));
        assert_eq!(crossing(&line, (0.4, 0.5), (0.45, 0.5)), None);
        // Landing on the line and moving on counts once.
        assert_eq!(crossing(&line, (0.4, 0.5), (0.5, 0.5)), Some(true));
        assert_eq!(crossing(&line, (0.5, 0.5), (0.6, 0.5)), None);
        // Passes beyond the end of the segment.
        let short = Boundary::new("gate", (0.5, 0.0), (0.5, 0.2));
        assert_eq!(crossing(&short, (0.4, 0.5), (0.6, 0.5)), None);
    }

    #[test]
    fn test_in_out_fold() {
        let camera = Entity::camera("c").with_boundary(Boundary::new("door", (0.5, 0.0), (0.5, 1.0)));
        let mut bucket = Bucket::new(at(10, 0, 0), at(11, 0, 0));
        // bbox [y1, x1, y2, x2]: track 1 moves right to left, track 2 left to right.
        let xs = [0.8, 0.7, 0.6, 0.4, 0.3, 0.2];
        for (i, x) in xs.iter().enumerate() {
            bucket.push(&event(
                at(10, 0, i as u32),
                vec![
                    observation(1, [0.5, *x, 0.5, *x], false),
                    observation(2, [0.5, 1.0 - x, 0.5, 1.0 - x], false),
                ],
            ));
        }
        let row = fold_bucket(
            MetricFamily::InOut,
            &MetricConfig::default(),
            &camera,
            &bucket,
            DwellMode::Snapshot,
        );
        assert_eq!(row.values, vec![1.0, 1.0]);
    }

    #[test]
    fn test_jitter_on_the_line_is_not_a_crossing() {
        let camera = Entity::camera("c").with_boundary(Boundary::new("door", (0.5, 0.0), (0.5, 1.0)));
        let mut bucket = Bucket::new(at(10, 0, 0), at(11, 0, 0));
        for i in 0..10u32 {
            let x = if i % 2 == 0 { 0.49 } else { 0.51 };
            bucket.push(&event(at(10, 0, i), vec![observation(1, [0.5, x, 0.5, x], false)]));
        }
        let row = fold_bucket(
            MetricFamily::InOut,
            &MetricConfig::default(),
            &camera,
            &bucket,
            DwellMode::Snapshot,
        );
        assert_eq!(row.values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_track_crossings_with_hesitation() {
        let door = Boundary::new("door", (0.5, 0.0), (0.5, 1.0));
        let point = |x: f64| (x, 0.5);

        // Wavers on the line, then walks through: one entry.
        let hesitant: Vec<_> = [0.2, 0.3, 0.4, 0.49, 0.51, 0.49, 0.51, 0.6, 0.7, 0.8]
            .into_iter()
            .map(point)
            .collect();
        assert_eq!(track_crossings(&door, &hesitant, 3), (1, 0));

        // Steps through and comes back out: one of each.
        let back_out: Vec<_> = [0.2, 0.3, 0.4, 0.6, 0.7, 0.8, 0.4, 0.3, 0.2]
            .into_iter()
            .map(point)
            .collect();
        assert_eq!(track_crossings(&door, &back_out, 3), (1, 1));

        // Too brief on the far side to confirm it.
        let peek: Vec<_> = [0.2, 0.3, 0.4, 0.6, 0.7, 0.4, 0.3, 0.2]
            .into_iter()
            .map(point)
            .collect();
        assert_eq!(track_crossings(&door, &peek, 3), (0, 0));

        // Without hysteresis every step over the line counts.
        let jitter: Vec<_> = [0.49, 0.51, 0.49, 0.51].into_iter().map(point).collect();
        assert_eq!(track_crossings(&door, &jitter, 1), (2, 1));

        // Passing beyond the end of a short segment.
        let gate = Boundary::new("gate", (0.5, 0.0), (0.5, 0.2));
        assert_eq!(track_crossings(&gate, &back_out, 3), (0, 0));
    }
}
