//! Adaptive playback scheduler.
//!
//! Owns the playback cursor and the single frame timer. The engine asks it
//! for a [`FramePlan`] whenever playback might continue; the plan's delay
//! shrinks as more playback time is buffered ahead of the cursor.
//!
//! The timer is never a real timer here. Arming it hands out a
//! [`TimerToken`]; the driver schedules a wake carrying that token, and only
//! the current token is honored when it fires. Cancelling or re-arming
//! therefore takes effect immediately even if an old wake is already queued.

use crate::buffer::BufferEstimator;
use crate::error::PlaybackError;
use crate::record::Record;
use std::time::Duration;

/// Longest wait between two frames. A record further from its predecessor
/// than this covers at the current speed is still shown after this delay.
pub const MAX_FRAME_DELAY: Duration = Duration::from_secs(3600);

/// Identity of one armed frame timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(u64);

/// Externally visible playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Nothing started yet
    Idle,
    /// Advancing, or waiting at the end of the data for more records
    Playing,
    /// Stopped by the user
    Paused,
    /// The record under the cursor is waiting for its image
    Delayed,
    /// The session failed and accepts no further stream input
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Idle,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArmedTimer {
    token: TimerToken,
    index: usize,
}

/// Next frame transition computed by [`Scheduler::plan_next`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlan {
    /// Record to show when the timer fires
    pub index: usize,

    /// Buffered playback ahead of `index` (seconds)
    pub buffer_secs: f64,

    /// Effective playback speed (m/s)
    pub speed: f64,

    pub delay: Duration,
}

/// Playback speed for a given buffer depth.
///
/// `desired * log10(min(b, saturation) + 2)`: strictly positive at an empty
/// buffer and increasing with depth until `saturation` seconds.
pub fn adaptive_speed(desired: f64, buffer_secs: f64, saturation: f64) -> f64 {
    desired * (buffer_secs.clamp(0.0, saturation) + 2.0).log10()
}

/// Cursor and frame-timer state machine.
#[derive(Debug)]
pub struct Scheduler {
    intent: Intent,
    delayed: bool,
    faulted: bool,
    cursor: Option<usize>,
    timer: Option<ArmedTimer>,
    next_token: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            intent: Intent::Idle,
            delayed: false,
            faulted: false,
            cursor: None,
            timer: None,
            next_token: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        if self.faulted {
            PlaybackState::Faulted
        } else if self.intent == Intent::Paused {
            PlaybackState::Paused
        } else if self.delayed {
            PlaybackState::Delayed
        } else if self.intent == Intent::Playing {
            PlaybackState::Playing
        } else {
            PlaybackState::Idle
        }
    }

    pub fn is_playing(&self) -> bool {
        self.intent == Intent::Playing && !self.faulted
    }

    pub fn is_delayed(&self) -> bool {
        self.delayed
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Cursor as an index, `-1` before anything was shown.
    pub fn cursor_index(&self) -> i64 {
        self.cursor.map_or(-1, |c| c as i64)
    }

    /// Index the armed timer will show, if any.
    #[cfg(test)]
    pub fn pending_index(&self) -> Option<usize> {
        self.timer.map(|t| t.index)
    }

    pub fn play(&mut self) -> Result<(), PlaybackError> {
        if self.faulted {
            return Err(PlaybackError::SessionFaulted);
        }
        self.intent = Intent::Playing;
        Ok(())
    }

    pub fn pause(&mut self) {
        self.cancel();
        if !self.faulted {
            self.intent = Intent::Paused;
        }
    }

    /// Moves the cursor. Clears the delayed flag; the caller sets it again
    /// if the record cannot be shown yet.
    pub fn set_cursor(&mut self, index: usize) {
        self.cursor = Some(index);
        self.delayed = false;
    }

    pub fn set_delayed(&mut self) {
        self.delayed = true;
    }

    /// Arms the frame timer for `index`, replacing any armed timer.
    pub fn arm(&mut self, index: usize) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        self.timer = Some(ArmedTimer { token, index });
        token
    }

    pub fn cancel(&mut self) {
        self.timer = None;
    }

    /// Consumes a fired timer. Returns the index to show, or `None` if the
    /// token was cancelled or replaced in the meantime.
    pub fn take_fired(&mut self, token: TimerToken) -> Option<usize> {
        match self.timer {
            Some(armed) if armed.token == token => {
                self.timer = None;
                Some(armed.index)
            }
            _ => None,
        }
    }

    /// Computes the next frame transition, or `None` if playback should not
    /// advance right now (not playing, timer armed, delayed, faulted, or no
    /// next record).
    pub fn plan_next(&self, records: &[Record], estimator: &BufferEstimator, saturation: f64) -> Option<FramePlan> {
        if !self.is_playing() || self.is_armed() || self.delayed {
            return None;
        }
        let index = self.cursor.map_or(0, |c| c + 1);
        let next = records.get(index)?;

        let buffer_secs = estimator.buffer_seconds(records, index);
        let speed = adaptive_speed(estimator.desired_speed, buffer_secs, saturation);
        let secs = (next.distance_from_previous / speed).max(0.0);
        let delay = Duration::try_from_secs_f64(secs).map_or(MAX_FRAME_DELAY, |d| d.min(MAX_FRAME_DELAY));
        Some(FramePlan {
            index,
            buffer_secs,
            speed,
            delay,
        })
    }

    /// Stops everything. Only a new session recovers from this.
    pub fn fault(&mut self) {
        self.faulted = true;
        self.timer = None;
    }

    /// Adjusts for a sequence truncated to `len` records.
    ///
    /// A cursor past the end is clamped to the last retained record, and a
    /// timer aimed at a discarded record is cancelled.
    pub fn truncate(&mut self, len: usize) {
        if let Some(cursor) = self.cursor {
            if cursor >= len {
                self.cursor = len.checked_sub(1);
                self.delayed = false;
            }
        }
        if self.timer.is_some_and(|t| t.index >= len) {
            self.timer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LatLng;
    use crate::record::{AssetState, ResolvedAsset};
    use approx::assert_relative_eq;

    fn ready(dist: f64) -> Record {
        let mut r = Record::pano("p", 0.0, LatLng::new(0.0, 0.0), 0.0, dist);
        r.asset = AssetState::Ready(ResolvedAsset::Image("img".into()));
        r
    }

    #[test]
    fn test_speed_law() {
        assert_relative_eq!(adaptive_speed(10.0, 0.0, 8.0), 10.0 * 2f64.log10());
        assert_relative_eq!(adaptive_speed(10.0, 8.0, 8.0), 10.0);
        assert_relative_eq!(adaptive_speed(10.0, 9.0, 8.0), 10.0);
        assert!(adaptive_speed(10.0, 3.0, 8.0) > adaptive_speed(10.0, 2.0, 8.0));
        assert!(adaptive_speed(10.0, 0.0, 8.0) > 0.0);
    }

    #[test]
    fn test_initial_state() {
        let s = Scheduler::new();
        assert_eq!(s.state(), PlaybackState::Idle);
        assert_eq!(s.cursor_index(), -1);
        assert!(!s.is_armed());
    }

    #[test]
    fn test_stale_token_is_ignored() {
        let mut s = Scheduler::new();
        let first = s.arm(1);
        let second = s.arm(2);
        assert_eq!(s.take_fired(first), None);
        assert_eq!(s.take_fired(second), Some(2));
        assert_eq!(s.take_fired(second), None);

        let third = s.arm(3);
        s.cancel();
        assert_eq!(s.take_fired(third), None);
    }

    #[test]
    fn test_pause_cancels_timer() {
        let mut s = Scheduler::new();
        s.play().unwrap();
        let token = s.arm(0);
        s.pause();
        assert_eq!(s.state(), PlaybackState::Paused);
        assert_eq!(s.take_fired(token), None);
    }

    #[test]
    fn test_plan_requires_playing_and_no_timer() {
        let est = BufferEstimator::new(5.0, 9.0);
        let records = vec![ready(0.0), ready(10.0)];
        let mut s = Scheduler::new();
        assert!(s.plan_next(&records, &est, 8.0).is_none());

        s.play().unwrap();
        let plan = s.plan_next(&records, &est, 8.0).unwrap();
        assert_eq!(plan.index, 0);
        assert_eq!(plan.delay, Duration::ZERO);

        s.arm(plan.index);
        assert_eq!(s.pending_index(), Some(0));
        assert!(s.plan_next(&records, &est, 8.0).is_none());
    }

    #[test]
    fn test_plan_delay_uses_buffer_ahead() {
        let est = BufferEstimator::new(5.0, 9.0);
        let records = vec![ready(0.0), ready(10.0), Record::pano("x", 0.0, LatLng::new(0.0, 0.0), 20.0, 10.0)];
        let mut s = Scheduler::new();
        s.play().unwrap();
        s.set_cursor(0);

        let plan = s.plan_next(&records, &est, 8.0).unwrap();
        assert_eq!(plan.index, 1);
        assert_relative_eq!(plan.buffer_secs, 2.0);
        assert_relative_eq!(plan.speed, 5.0 * 4f64.log10());
        assert_relative_eq!(plan.delay.as_secs_f64(), 10.0 / plan.speed, epsilon = 1e-6);
    }

    #[test]
    fn test_huge_gap_delay_is_clamped() {
        let est = BufferEstimator::new(5.0, 9.0);
        let records = vec![ready(0.0), ready(1e22), ready(f64::MAX)];
        let mut s = Scheduler::new();
        s.play().unwrap();
        s.set_cursor(0);
        assert_eq!(s.plan_next(&records, &est, 8.0).unwrap().delay, MAX_FRAME_DELAY);

        s.set_cursor(1);
        assert_eq!(s.plan_next(&records, &est, 8.0).unwrap().delay, MAX_FRAME_DELAY);
    }

    #[test]
    fn test_no_plan_at_end_or_when_delayed() {
        let est = BufferEstimator::new(5.0, 9.0);
        let records = vec![ready(0.0)];
        let mut s = Scheduler::new();
        s.play().unwrap();
        s.set_cursor(0);
        assert!(s.plan_next(&records, &est, 8.0).is_none());

        let records = vec![ready(0.0), ready(1.0)];
        s.set_delayed();
        assert_eq!(s.state(), PlaybackState::Delayed);
        assert!(s.plan_next(&records, &est, 8.0).is_none());
    }

    #[test]
    fn test_fault_blocks_play() {
        let mut s = Scheduler::new();
        s.arm(0);
        s.fault();
        assert_eq!(s.state(), PlaybackState::Faulted);
        assert!(!s.is_armed());
        assert_eq!(s.play(), Err(PlaybackError::SessionFaulted));
    }

    #[test]
    fn test_truncate_clamps_cursor_and_timer() {
        let mut s = Scheduler::new();
        s.set_cursor(4);
        s.set_delayed();
        s.arm(5);
        s.truncate(2);
        assert_eq!(s.cursor(), Some(1));
        assert!(!s.is_delayed());
        assert!(!s.is_armed());
        assert_eq!(s.pending_index(), None);

        s.truncate(0);
        assert_eq!(s.cursor(), None);
    }
}
