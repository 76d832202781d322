//! Buffer-depth estimation.
//!
//! Answers "how many seconds of playback starting at index `i` can be shown
//! without waiting for an image?". The scheduler calls this every frame, so
//! it is a pure walk over the records with no side effects.

use crate::record::Record;

/// Computes buffered playback time ahead of a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferEstimator {
    /// Nominal speed used to turn distance into time (m/s)
    pub desired_speed: f64,

    /// Buffer depth beyond which the walk stops (seconds)
    pub horizon: f64,
}

impl BufferEstimator {
    pub fn new(desired_speed: f64, horizon: f64) -> Self {
        Self {
            desired_speed,
            horizon,
        }
    }

    /// Seconds of ready playback starting at `start`, capped at the horizon.
    ///
    /// Walks forward summing `distance_from_previous / desired_speed` over
    /// ready records (no-imagery records always count as ready). The walk
    /// stops at the first pano that is not ready. Reaching the terminal
    /// record means nothing further can block, so the horizon is returned.
    pub fn buffer_seconds(&self, records: &[Record], start: usize) -> f64 {
        let mut total = 0.0;
        for record in records.iter().skip(start) {
            if total >= self.horizon {
                break;
            }
            if !record.is_ready() {
                break;
            }
            total += record.distance_from_previous / self.desired_speed;
            if record.is_last {
                return self.horizon;
            }
        }
        total.min(self.horizon)
    }
}
