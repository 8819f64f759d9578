// Tally - Metrics aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Hysteresis filter over per-frame signals of one tracked object.
//!
//! Per-frame classifier output flickers. A state only counts once it has been
//! observed on `threshold` consecutive samples and differs from the last
//! confirmed state. Shorter runs are dropped as noise, and nothing is flushed
//! when the sequence ends: the terminal state is whatever was last confirmed.

/// A per-frame signal value the filter can confirm.
pub trait SignalState: Copy + PartialEq {
    /// Confirming this state increments the positive count.
    fn is_positive(&self) -> bool;

    /// Confirming this state counts as a detection. "No data" states are
    /// confirmed silently.
    fn is_countable(&self) -> bool {
        true
    }
}

/// Violation-style signals: `true` is a violation.
impl SignalState for bool {
    fn is_positive(&self) -> bool {
        *self
    }
}

/// Face classifier output for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceState {
    /// No face visible (label -1 or absent).
    NoData,
    /// Face with mask (label 0).
    Mask,
    /// Face without mask (label 1).
    NoMask,
}

impl FaceState {
    /// Map a raw classifier label. Anything outside {0, 1} is "no data".
    pub fn from_label(label: Option<i32>) -> Self {
        match label {
            Some(0) => FaceState::Mask,
            Some(1) => FaceState::NoMask,
            _ => FaceState::NoData,
        }
    }
}

impl SignalState for FaceState {
    fn is_positive(&self) -> bool {
        matches!(self, FaceState::NoMask)
    }

    fn is_countable(&self) -> bool {
        !matches!(self, FaceState::NoData)
    }
}

/// Confirmed transitions of one signal sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceCounts {
    pub detections: u32,
    pub positives: u32,
}

impl DebounceCounts {
    /// Detections that were not positive.
    pub fn negatives(&self) -> u32 {
        self.detections - self.positives
    }
}

impl std::ops::AddAssign for DebounceCounts {
    fn add_assign(&mut self, other: Self) {
        self.detections += other.detections;
        self.positives += other.positives;
    }
}

/// Moore-style hysteresis state machine.
#[derive(Debug, Clone)]
pub struct Debouncer<S> {
    threshold: usize,
    current_status: Option<S>,
    processing_status: Option<S>,
    processing_count: usize,
    counts: DebounceCounts,
}

impl<S: SignalState> Debouncer<S> {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            current_status: None,
            processing_status: None,
            processing_count: 0,
            counts: DebounceCounts::default(),
        }
    }

    /// Feed one sample. Returns the state if this sample confirmed it.
    pub fn push(&mut self, sample: S) -> Option<S> {
        if self.processing_status != Some(sample) {
            self.processing_status = Some(sample);
            self.processing_count = 0;
        }
        self.processing_count += 1;

        if self.processing_count >= self.threshold && self.current_status != Some(sample) {
            self.current_status = Some(sample);
            if sample.is_countable() {
                self.counts.detections += 1;
                if sample.is_positive() {
                    self.counts.positives += 1;
                }
            }
            return Some(sample);
        }
        None
    }

    /// Last confirmed state.
    pub fn current_status(&self) -> Option<S> {
        self.current_status
    }

    pub fn counts(&self) -> DebounceCounts {
        self.counts
    }
}

/// Run a whole sequence through a fresh filter.
pub fn debounce<S, I>(samples: I, threshold: usize) -> DebounceCounts
where
    S: SignalState,
    I: IntoIterator<Item = S>,
{
    let mut filter = Debouncer::new(threshold);
    for sample in samples {
        filter.push(sample);
    }
    filter.counts()
}
