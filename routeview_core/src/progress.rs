//! Route progress bookkeeping.
//!
//! Tracks, in route meters, how far the server has processed, which
//! stretches have their images buffered, which stretches have no imagery,
//! and where playback is. Presenters turn a [`ProgressSnapshot`] into a
//! progress bar.

use crate::record::{Record, RecordKind};
use std::collections::BTreeMap;

/// A stretch of route in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub start: f64,
    pub end: f64,
}

impl Span {
    /// The stretch a record covers: from the previous record up to itself.
    pub fn of(record: &Record) -> Self {
        Self {
            start: (record.at_distance - record.distance_from_previous).max(0.0),
            end: record.at_distance,
        }
    }
}

/// Point-in-time view of playback progress.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressSnapshot {
    /// Total route length, when known
    pub route_distance: Option<f64>,

    /// Distance covered by received records
    pub processed: f64,

    /// Merged stretches whose images are ready
    pub buffered: Vec<Span>,

    /// Merged stretches without imagery
    pub gaps: Vec<Span>,

    /// Distance of the record on screen
    pub play: Option<f64>,
}

impl ProgressSnapshot {
    /// Converts a distance to a fraction of the route (0 when the length
    /// is unknown).
    pub fn fraction(&self, distance: f64) -> f64 {
        match self.route_distance {
            Some(total) if total > 0.0 => (distance / total).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

/// Accumulates progress as records arrive and load.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    route_distance: Option<f64>,
    processed: f64,
    buffered: BTreeMap<usize, Span>,
    gaps: BTreeMap<usize, Span>,
    play: Option<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_route_distance(&mut self, distance: f64) {
        self.route_distance = Some(distance);
    }

    pub fn route_distance(&self) -> Option<f64> {
        self.route_distance
    }

    /// Records newly appended at `first..`.
    pub fn records_appended(&mut self, first: usize, records: &[Record]) {
        for (offset, record) in records.iter().enumerate() {
            if record.kind == RecordKind::NoImages {
                self.gaps.insert(first + offset, Span::of(record));
            }
            self.processed = self.processed.max(record.at_distance);
        }
    }

    /// A record's image became ready.
    pub fn mark_buffered(&mut self, index: usize, record: &Record) {
        self.buffered.insert(index, Span::of(record));
    }

    pub fn set_play(&mut self, distance: Option<f64>) {
        self.play = distance;
    }

    /// Drops everything recorded for indices past `index`. `retained_end` is
    /// the distance of the last retained record.
    pub fn truncate_after(&mut self, index: i64, retained_end: Option<f64>) {
        let keep = (index + 1).max(0) as usize;
        self.buffered.retain(|&i, _| i < keep);
        self.gaps.retain(|&i, _| i < keep);
        self.processed = retained_end.unwrap_or(0.0);
        if let (Some(play), Some(end)) = (self.play, retained_end) {
            self.play = Some(play.min(end));
        } else if retained_end.is_none() {
            self.play = None;
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            route_distance: self.route_distance,
            processed: self.processed,
            buffered: merge(self.buffered.values()),
            gaps: merge(self.gaps.values()),
            play: self.play,
        }
    }
}

/// Merges overlapping or touching spans.
fn merge<'a>(spans: impl Iterator<Item = &'a Span>) -> Vec<Span> {
    let mut sorted: Vec<Span> = spans.copied().collect();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<Span> = Vec::with_capacity(sorted.len());
    for span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}
