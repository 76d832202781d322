//! The distance-keyed record sequence.
//!
//! Append-only, ordered by `at_distance`, with an explicit truncation used
//! when the server recomputes a suffix of the route.

use crate::error::PlaybackError;
use crate::record::{AssetState, Record};
use std::ops::Range;
use tracing::debug;

/// Ordered list of playback records.
///
/// Invariant: `at_distance` is non-decreasing across the sequence.
#[derive(Debug, Default, Clone)]
pub struct Sequence {
    records: Vec<Record>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn last(&self) -> Option<&Record> {
        self.records.last()
    }

    /// Route index where the last record ends (0 when empty).
    pub fn last_route_index(&self) -> usize {
        self.records.last().map_or(0, |r| r.route_index_range.end)
    }

    /// True once the terminal record has arrived.
    pub fn is_complete(&self) -> bool {
        self.records.last().is_some_and(|r| r.is_last)
    }

    pub(crate) fn set_asset(&mut self, index: usize, asset: AssetState) {
        if let Some(record) = self.records.get_mut(index) {
            record.asset = asset;
        }
    }

    /// Appends a batch in arrival order.
    ///
    /// The batch is validated as a whole before anything is appended: every
    /// distance must be finite and the batch must continue the ordering of
    /// the retained records. Returns the index range of the new records.
    pub fn append(&mut self, batch: Vec<Record>) -> Result<Range<usize>, PlaybackError> {
        let mut previous = self.records.last().map(|r| r.at_distance);
        for (offset, record) in batch.iter().enumerate() {
            if !record.at_distance.is_finite() || !record.distance_from_previous.is_finite() {
                return Err(PlaybackError::desync(format!(
                    "record {} has a non-finite distance",
                    self.records.len() + offset
                )));
            }
            if let Some(prev) = previous {
                if record.at_distance < prev {
                    return Err(PlaybackError::desync(format!(
                        "record {} at {:.1}m precedes previous record at {:.1}m",
                        self.records.len() + offset,
                        record.at_distance,
                        prev
                    )));
                }
            }
            previous = Some(record.at_distance);
        }

        let start = self.records.len();
        if !batch.is_empty() {
            if let Some(tail) = self.records.last_mut() {
                if tail.is_last {
                    debug!("Records appended after terminal record {}; stream continues", start - 1);
                    tail.is_last = false;
                }
            }
        }
        self.records.extend(batch);
        Ok(start..self.records.len())
    }

    /// Keeps records `0..=index` and drops the rest. `-1` clears the sequence.
    ///
    /// Returns the number of records removed.
    pub fn truncate_after(&mut self, index: i64) -> Result<usize, PlaybackError> {
        if index < -1 {
            return Err(PlaybackError::desync(format!("reset index {} is negative", index)));
        }
        let keep = (index + 1) as usize;
        if keep > self.records.len() {
            return Err(PlaybackError::desync(format!(
                "reset index {} beyond sequence of {} records",
                index,
                self.records.len()
            )));
        }
        let removed = self.records.len() - keep;
        self.records.truncate(keep);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LatLng;

    fn pano(at: f64) -> Record {
        Record::pano(format!("p{}", at), 0.0, LatLng::new(0.0, 0.0), at, 5.0)
    }

    fn distances(seq: &Sequence) -> Vec<f64> {
        seq.records().iter().map(|r| r.at_distance).collect()
    }

    #[test]
    fn test_append_returns_new_range() {
        let mut seq = Sequence::new();
        assert_eq!(seq.append(vec![pano(0.0), pano(10.0)]).unwrap(), 0..2);
        assert_eq!(seq.append(vec![pano(10.0), pano(25.0)]).unwrap(), 2..4);
        assert_eq!(distances(&seq), vec![0.0, 10.0, 10.0, 25.0]);
    }

    #[test]
    fn test_append_rejects_out_of_order_batch_atomically() {
        let mut seq = Sequence::new();
        seq.append(vec![pano(0.0), pano(10.0)]).unwrap();

        let err = seq.append(vec![pano(12.0), pano(11.0)]).unwrap_err();
        assert!(matches!(err, PlaybackError::StreamDesync { .. }));
        assert_eq!(seq.len(), 2);

        let err = seq.append(vec![pano(9.0)]).unwrap_err();
        assert!(matches!(err, PlaybackError::StreamDesync { .. }));
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_append_rejects_nan() {
        let mut seq = Sequence::new();
        assert!(seq.append(vec![pano(f64::NAN)]).is_err());
        assert!(seq.is_empty());
    }

    #[test]
    fn test_truncate_then_append_keeps_order() {
        let mut seq = Sequence::new();
        seq.append((0..5).map(|i| pano(i as f64 * 10.0)).collect()).unwrap();

        assert_eq!(seq.truncate_after(1).unwrap(), 3);
        assert_eq!(distances(&seq), vec![0.0, 10.0]);

        seq.append(vec![pano(10.0), pano(18.0)]).unwrap();
        assert_eq!(distances(&seq), vec![0.0, 10.0, 10.0, 18.0]);
        assert!(seq.append(vec![pano(5.0)]).is_err());
    }

    #[test]
    fn test_truncate_bounds() {
        let mut seq = Sequence::new();
        seq.append(vec![pano(0.0), pano(1.0)]).unwrap();
        assert!(seq.truncate_after(2).is_err());
        assert!(seq.truncate_after(-2).is_err());
        assert_eq!(seq.truncate_after(1).unwrap(), 0);
        assert_eq!(seq.truncate_after(-1).unwrap(), 2);
        assert!(seq.is_empty());
    }

    #[test]
    fn test_append_after_terminal_clears_flag() {
        let mut seq = Sequence::new();
        seq.append(vec![pano(0.0).with_last(true)]).unwrap();
        assert!(seq.is_complete());
        seq.append(vec![pano(4.0)]).unwrap();
        assert!(!seq.is_complete());
        assert!(!seq.records()[0].is_last);
    }
}
