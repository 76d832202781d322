//! Bounded-concurrency image prefetcher.
//!
//! Keeps up to `max_in_flight` loads running, always taking the lowest index
//! past the frontier that has not been requested yet. Completions are the
//! refill trigger; there is no polling loop.
//!
//! # Frontier
//!
//! The frontier is the highest index the fill loop has walked past. It only
//! moves forward, except on a seek (set just before the seek target) and on
//! a reset (clamped to the retained records). The fill loop stops at
//! `cursor + lookahead`.
//!
//! # Yielding
//!
//! A single pass advances the frontier at most `batch` times. If more work
//! remains, a [`Wake::PrefetchResume`] is scheduled and the pass ends; only
//! one resume is pending at a time.
//!
//! # Failures
//!
//! A failed load waits out an exponential backoff and is retried. After
//! `max_attempts` the record is resolved to a placeholder so playback never
//! waits on a broken image forever.

use crate::command::{Command, Wake};
use crate::config::{AssetUrlConfig, PlayerConfig, RetryPolicy};
use crate::record::{AssetState, LoadTicket, RecordKind, ResolvedAsset};
use crate::sequence::Sequence;
use routeview_env::{EnvError, FetchedAsset};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of applying one load completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// The ticket no longer matches the record; nothing changed
    Stale,
    /// The record now holds its image
    Ready,
    /// The load failed and a retry is scheduled
    Retrying { attempt: u32, backoff: Duration },
    /// Every attempt failed; the record holds a placeholder
    GaveUp,
}

impl Completion {
    /// True if the record became showable.
    pub fn resolved(&self) -> bool {
        matches!(self, Self::Ready | Self::GaveUp)
    }
}

/// Image load pipeline state.
#[derive(Debug)]
pub struct Prefetcher {
    max_in_flight: usize,
    lookahead: usize,
    batch: usize,
    yield_delay: Duration,
    retry: RetryPolicy,
    urls: AssetUrlConfig,
    api_key: Option<String>,

    in_flight: usize,
    max_in_flight_observed: usize,
    frontier: i64,
    next_ticket: u64,

    /// Record under the cursor waiting for a free slot
    urgent: Option<usize>,

    /// Records whose backoff elapsed while every slot was busy
    retry_queue: VecDeque<usize>,

    resume_pending: bool,
}

impl Prefetcher {
    pub fn new(config: &PlayerConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight,
            lookahead: config.lookahead,
            batch: config.prefetch_batch,
            yield_delay: config.prefetch_yield(),
            retry: config.retry_policy(),
            urls: config.asset.clone(),
            api_key: None,
            in_flight: 0,
            max_in_flight_observed: 0,
            frontier: -1,
            next_ticket: 0,
            urgent: None,
            retry_queue: VecDeque::new(),
            resume_pending: false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn frontier(&self) -> i64 {
        self.frontier
    }

    /// Highest number of concurrent loads seen over the session.
    pub fn max_in_flight_observed(&self) -> usize {
        self.max_in_flight_observed
    }

    pub fn set_api_key(&mut self, key: Option<String>) {
        self.api_key = key;
    }

    fn has_slot(&self) -> bool {
        self.in_flight < self.max_in_flight
    }

    /// Starts loads until the slots are full, the data runs out, or the
    /// lookahead cap is reached. `cursor` is `-1` before playback starts.
    pub fn fill(&mut self, seq: &mut Sequence, cursor: i64, out: &mut Vec<Command>) {
        if let Some(index) = self.urgent {
            if self.has_slot() {
                self.urgent = None;
                self.start_urgent(seq, index, out);
            }
        }
        let cap = cursor + self.lookahead as i64;
        while self.has_slot() {
            let Some(index) = self.retry_queue.pop_front() else {
                break;
            };
            if let Some(AssetState::Retrying { attempt, .. }) = seq.get(index).map(|r| r.asset().clone()) {
                if index as i64 > cap {
                    seq.set_asset(index, AssetState::Unrequested);
                    self.frontier = self.frontier.min(index as i64 - 1);
                } else {
                    self.issue(seq, index, attempt + 1, out);
                }
            }
        }

        let len = seq.len() as i64;
        let mut advanced = 0;
        while self.has_slot() && self.frontier < len - 1 && self.frontier < cap {
            if advanced == self.batch {
                if !self.resume_pending {
                    self.resume_pending = true;
                    out.push(Command::Schedule {
                        delay: self.yield_delay,
                        wake: Wake::PrefetchResume,
                    });
                    debug!("Prefetch yielding at frontier {}", self.frontier);
                }
                break;
            }
            self.frontier += 1;
            advanced += 1;
            let index = self.frontier as usize;
            if seq.get(index).is_some_and(|r| r.is_unrequested()) {
                self.issue(seq, index, 1, out);
            }
        }
    }

    /// Continues a yielded fill pass.
    pub fn resume(&mut self, seq: &mut Sequence, cursor: i64, out: &mut Vec<Command>) {
        self.resume_pending = false;
        self.fill(seq, cursor, out);
    }

    /// Requests the record under the cursor ahead of everything else.
    ///
    /// Starts the load at once if a slot is free; otherwise it takes the
    /// urgent slot and starts on the next completion.
    pub fn request_urgent(&mut self, seq: &mut Sequence, index: usize, out: &mut Vec<Command>) {
        self.frontier = self.frontier.max(index as i64);
        if self.has_slot() {
            self.start_urgent(seq, index, out);
        } else {
            debug!("All {} slots busy, record {} waits for the next one", self.max_in_flight, index);
            self.urgent = Some(index);
        }
    }

    fn start_urgent(&mut self, seq: &mut Sequence, index: usize, out: &mut Vec<Command>) {
        let attempt = match seq.get(index) {
            Some(record) if record.is_unrequested() => 1,
            Some(record) => match record.asset() {
                AssetState::Retrying { attempt, .. } => *attempt + 1,
                _ => return,
            },
            None => return,
        };
        self.retry_queue.retain(|&i| i != index);
        self.issue(seq, index, attempt, out);
    }

    /// A retry backoff elapsed.
    ///
    /// A record that fell outside the lookahead window meanwhile (the user
    /// seeked back) goes back to unrequested; the frontier picks it up again.
    pub fn on_retry_due(
        &mut self,
        seq: &mut Sequence,
        index: usize,
        ticket: LoadTicket,
        cursor: i64,
        out: &mut Vec<Command>,
    ) {
        let attempt = match seq.get(index).map(|r| r.asset()) {
            Some(AssetState::Retrying { ticket: t, attempt }) if *t == ticket => *attempt,
            _ => return,
        };
        if index as i64 > cursor + self.lookahead as i64 {
            seq.set_asset(index, AssetState::Unrequested);
            self.frontier = self.frontier.min(index as i64 - 1);
            return;
        }
        if self.has_slot() {
            self.issue(seq, index, attempt + 1, out);
        } else if !self.retry_queue.contains(&index) {
            self.retry_queue.push_back(index);
        }
    }

    fn issue(&mut self, seq: &mut Sequence, index: usize, attempt: u32, out: &mut Vec<Command>) {
        let Some(record) = seq.get(index) else {
            return;
        };
        let url = match &record.kind {
            RecordKind::Pano { id, heading } => self.urls.url_for(id, *heading, self.api_key.as_deref()),
            RecordKind::NoImages => return,
        };
        self.next_ticket += 1;
        let ticket = LoadTicket(self.next_ticket);
        seq.set_asset(index, AssetState::Loading { ticket, attempt });

        self.in_flight += 1;
        self.max_in_flight_observed = self.max_in_flight_observed.max(self.in_flight);
        out.push(Command::Fetch { index, ticket, url });
    }

    /// Applies a load result. Always frees the slot the load occupied.
    ///
    /// The caller refills afterwards with [`fill`](Self::fill).
    pub fn complete(
        &mut self,
        seq: &mut Sequence,
        index: usize,
        ticket: LoadTicket,
        result: Result<FetchedAsset, EnvError>,
        out: &mut Vec<Command>,
    ) -> Completion {
        self.in_flight = self.in_flight.saturating_sub(1);

        let attempt = match seq.get(index).map(|r| r.asset()) {
            Some(AssetState::Loading { ticket: t, attempt }) if *t == ticket => *attempt,
            _ => {
                debug!("Dropping stale load {} for record {}", ticket, index);
                return Completion::Stale;
            }
        };

        match result {
            Ok(asset) => {
                seq.set_asset(index, AssetState::Ready(ResolvedAsset::Image(asset.uri)));
                Completion::Ready
            }
            Err(err) if !err.is_transient() => {
                warn!("Giving up on record {}: {}", index, err);
                seq.set_asset(index, AssetState::Ready(ResolvedAsset::Placeholder));
                Completion::GaveUp
            }
            Err(err) if attempt >= self.retry.max_attempts => {
                warn!("Giving up on record {} after {} attempts: {}", index, attempt, err);
                seq.set_asset(index, AssetState::Ready(ResolvedAsset::Placeholder));
                Completion::GaveUp
            }
            Err(err) => {
                let backoff = self.retry.backoff(attempt);
                debug!("Load of record {} failed (attempt {}): {}, retrying in {:?}", index, attempt, err, backoff);
                seq.set_asset(index, AssetState::Retrying { ticket, attempt });
                out.push(Command::Schedule {
                    delay: backoff,
                    wake: Wake::Retry { index, ticket },
                });
                Completion::Retrying { attempt, backoff }
            }
        }
    }

    /// Positions the frontier just before a seek target.
    pub fn reset_frontier(&mut self, frontier: i64) {
        self.frontier = frontier.max(-1);
        self.urgent = None;
    }

    /// Keeps the frontier at or past the cursor.
    pub fn advance_past(&mut self, cursor: usize) {
        self.frontier = self.frontier.max(cursor as i64);
    }

    /// Forgets work for records beyond a truncated sequence of `len`.
    ///
    /// Loads still in flight for dropped records keep their slot until they
    /// complete; their tickets no longer match and the results are dropped.
    pub fn truncate(&mut self, len: usize) {
        self.frontier = self.frontier.min(len as i64 - 1);
        if self.urgent.is_some_and(|i| i >= len) {
            self.urgent = None;
        }
        self.retry_queue.retain(|&i| i < len);
    }
}
