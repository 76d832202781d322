//! The playback engine.
//!
//! `PlaybackEngine` ties the sequence, prefetcher, estimator and scheduler
//! together behind one `&mut self` API. It is Sans-IO: effects go to an
//! outbox of [`Command`]s that the driver executes, and results come back
//! through [`on_asset_loaded`](PlaybackEngine::on_asset_loaded) and
//! [`wake`](PlaybackEngine::wake).
//!
//! # Event flow
//!
//! ```text
//! ingest ──> Sequence ──> Prefetcher ──> Command::Fetch ──> driver
//!    │                                                       │
//!    └──> continue_playback <── on_asset_loaded <────────────┘
//!               │
//!               └──> Command::Schedule(Frame) ──> wake ──> show_record
//! ```

use crate::buffer::BufferEstimator;
use crate::command::{Command, Wake};
use crate::config::PlayerConfig;
use crate::error::PlaybackError;
use crate::geometry::RouteGeometry;
use crate::prefetch::{Completion, Prefetcher};
use crate::presenter::{Frame, Presenter, StatusView};
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::protocol::OutboundMessage;
use crate::record::LoadTicket;
use crate::scheduler::{PlaybackState, Scheduler};
use crate::seek;
use crate::sequence::Sequence;
use routeview_env::{EnvError, FetchedAsset};
use tracing::{debug, info, warn};

/// Incremental playback of one pano stream.
pub struct PlaybackEngine<P: Presenter> {
    pub(crate) config: PlayerConfig,
    pub(crate) sequence: Sequence,
    pub(crate) prefetcher: Prefetcher,
    pub(crate) scheduler: Scheduler,
    pub(crate) estimator: BufferEstimator,
    pub(crate) progress: ProgressTracker,
    pub(crate) route: Option<RouteGeometry>,
    pub(crate) status: StatusView,
    pub(crate) title: Option<String>,
    pub(crate) transport_up: bool,
    pub(crate) presenter: P,
    pub(crate) outbox: Vec<Command>,
}

impl<P: Presenter> PlaybackEngine<P> {
    /// Creates an idle engine.
    ///
    /// # Errors
    /// `InvalidConfig` if a config value is out of range.
    pub fn new(config: PlayerConfig, presenter: P) -> Result<Self, PlaybackError> {
        config.validate()?;
        Ok(Self {
            prefetcher: Prefetcher::new(&config),
            estimator: BufferEstimator::new(config.desired_speed, config.buffer_horizon_secs),
            config,
            sequence: Sequence::new(),
            scheduler: Scheduler::new(),
            progress: ProgressTracker::new(),
            route: None,
            status: StatusView::default(),
            title: None,
            transport_up: true,
            presenter,
            outbox: Vec::new(),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn state(&self) -> PlaybackState {
        self.scheduler.state()
    }

    /// Index of the record on screen, `-1` before playback starts.
    pub fn cursor(&self) -> i64 {
        self.scheduler.cursor_index()
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    pub fn prefetcher(&self) -> &Prefetcher {
        &self.prefetcher
    }

    pub fn route(&self) -> Option<&RouteGeometry> {
        self.route.as_ref()
    }

    pub fn status(&self) -> &StatusView {
        &self.status
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Seconds of ready playback ahead of the cursor.
    pub fn buffer_seconds(&self) -> f64 {
        let start = self.scheduler.cursor().map_or(0, |c| c + 1);
        self.estimator.buffer_seconds(self.sequence.records(), start)
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn into_presenter(self) -> P {
        self.presenter
    }

    /// Takes every command queued since the last call.
    pub fn drain_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.outbox)
    }

    // ------------------------------------------------------------------
    // User controls
    // ------------------------------------------------------------------

    /// Starts or resumes playback.
    pub fn play(&mut self) -> Result<(), PlaybackError> {
        self.scheduler.play()?;
        info!("Playback started at record {}", self.cursor());
        self.continue_playback();
        Ok(())
    }

    /// Stops playback and cancels the frame timer.
    pub fn pause(&mut self) {
        self.scheduler.pause();
        info!("Playback paused at record {}", self.cursor());
    }

    /// Jumps to the record at `distance` meters along the route.
    ///
    /// Returns the new cursor, or `-1` if there is nothing to seek in yet.
    pub fn seek(&mut self, distance: f64) -> Result<i64, PlaybackError> {
        if self.scheduler.is_faulted() {
            return Err(PlaybackError::SessionFaulted);
        }
        let index = seek::resolve(self.sequence.records(), distance);
        if index < 0 {
            debug!("Seek to {:.1}m ignored, {} records", distance, self.sequence.len());
            return Ok(index);
        }
        debug!("Seek to {:.1}m resolved to record {}", distance, index);
        self.scheduler.cancel();
        self.prefetcher.reset_frontier(index - 1);
        self.show_record(index as usize);
        Ok(index)
    }

    /// Seeks to a fraction (0..=1) of the route, as a progress bar click does.
    ///
    /// Uses the route length when known and the processed length otherwise.
    pub fn seek_fraction(&mut self, fraction: f64) -> Result<i64, PlaybackError> {
        let total = self
            .progress
            .route_distance()
            .or_else(|| self.sequence.last().map(|r| r.at_distance));
        match total {
            Some(total) => self.seek(fraction.clamp(0.0, 1.0) * total),
            None => Ok(-1),
        }
    }

    // ------------------------------------------------------------------
    // Driver callbacks
    // ------------------------------------------------------------------

    /// Applies the result of a `Command::Fetch`.
    ///
    /// Must be called exactly once per issued fetch, including for records
    /// that have since been discarded.
    pub fn on_asset_loaded(
        &mut self,
        index: usize,
        ticket: LoadTicket,
        result: Result<FetchedAsset, EnvError>,
    ) -> Completion {
        let completion = self
            .prefetcher
            .complete(&mut self.sequence, index, ticket, result, &mut self.outbox);
        if self.scheduler.is_faulted() {
            return completion;
        }

        self.fill();
        if completion.resolved() {
            if let Some(record) = self.sequence.get(index) {
                self.progress.mark_buffered(index, record);
            }
            if self.scheduler.is_delayed() && self.scheduler.cursor() == Some(index) {
                debug!("Record {} loaded, completing delayed transition", index);
                self.show_record(index);
            } else {
                self.continue_playback();
            }
            self.publish_progress();
        }
        completion
    }

    /// Handles a scheduled callback.
    pub fn wake(&mut self, wake: Wake) {
        if self.scheduler.is_faulted() {
            return;
        }
        let cursor = self.scheduler.cursor_index();
        match wake {
            Wake::Frame(token) => {
                if let Some(index) = self.scheduler.take_fired(token) {
                    self.show_record(index);
                }
            }
            Wake::PrefetchResume => self.prefetcher.resume(&mut self.sequence, cursor, &mut self.outbox),
            Wake::Retry { index, ticket } => {
                self.prefetcher
                    .on_retry_due(&mut self.sequence, index, ticket, cursor, &mut self.outbox)
            }
        }
    }

    /// The stream connection dropped. Buffered records keep playing.
    pub fn transport_lost(&mut self) {
        if !self.transport_up {
            return;
        }
        warn!("Stream connection lost at record {}", self.cursor());
        self.transport_up = false;
        self.status.connection_lost = true;
        self.presenter.set_status(&self.status);
    }

    pub fn transport_restored(&mut self) {
        if self.transport_up {
            return;
        }
        info!("Stream connection restored");
        self.transport_up = true;
        self.status.connection_lost = false;
        self.presenter.set_status(&self.status);
    }

    // ------------------------------------------------------------------
    // Outbound actions
    // ------------------------------------------------------------------

    /// Asks the server to stop processing.
    pub fn request_cancel(&mut self) -> Result<(), PlaybackError> {
        if !self.status.cancelable {
            return Err(PlaybackError::ActionUnavailable("cancel"));
        }
        self.send(OutboundMessage::Cancel)
    }

    /// Asks the server to restart processing.
    pub fn request_resume(&mut self) -> Result<(), PlaybackError> {
        if !self.status.resumable {
            return Err(PlaybackError::ActionUnavailable("resume"));
        }
        self.send(OutboundMessage::Resume)
    }

    /// Asks the server to treat `dst` as the successor of `src`.
    pub fn link_panos(&mut self, src: impl Into<String>, dst: impl Into<String>) -> Result<(), PlaybackError> {
        self.send(OutboundMessage::AddPanoChainItem(src.into(), dst.into()))
    }

    fn send(&mut self, message: OutboundMessage) -> Result<(), PlaybackError> {
        if !self.transport_up {
            return Err(PlaybackError::TransportDown);
        }
        debug!("Sending {:?}", message);
        self.outbox.push(Command::Send(message));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Moves the cursor to `index` and shows it, or waits for its image.
    pub fn show_record(&mut self, index: usize) {
        let Some(record) = self.sequence.get(index) else {
            return;
        };
        self.scheduler.cancel();
        self.scheduler.set_cursor(index);

        if !record.is_ready() {
            debug!("Record {} not loaded yet, delaying", index);
            self.scheduler.set_delayed();
            self.presenter.frame_delayed(index);
            self.prefetcher
                .request_urgent(&mut self.sequence, index, &mut self.outbox);
            return;
        }

        let frame = Frame {
            index,
            record,
            asset: record.resolved(),
            playing: self.scheduler.is_playing(),
        };
        self.presenter.show_frame(&frame);
        self.progress.set_play(Some(record.at_distance));
        self.prefetcher.advance_past(index);

        self.continue_playback();
        self.fill();
        self.publish_progress();
    }

    /// Arms the frame timer for the next record if playback can advance.
    ///
    /// A no-op while a timer is already armed, so calling it repeatedly is
    /// harmless.
    pub fn continue_playback(&mut self) {
        let Some(plan) = self.scheduler.plan_next(
            self.sequence.records(),
            &self.estimator,
            self.config.speed_saturation_secs,
        ) else {
            return;
        };
        let token = self.scheduler.arm(plan.index);
        debug!(
            "Next frame {} in {:?} (buffer {:.1}s, {:.1} m/s)",
            plan.index, plan.delay, plan.buffer_secs, plan.speed
        );
        self.outbox.push(Command::Schedule {
            delay: plan.delay,
            wake: Wake::Frame(token),
        });
    }

    pub(crate) fn fill(&mut self) {
        let cursor = self.scheduler.cursor_index();
        self.prefetcher.fill(&mut self.sequence, cursor, &mut self.outbox);
    }

    pub(crate) fn publish_progress(&mut self) {
        let snapshot = self.progress.snapshot();
        self.presenter.progress_changed(&snapshot);
    }

    /// Puts the session into `Faulted` and reports the error.
    pub(crate) fn fault(&mut self, err: PlaybackError) -> PlaybackError {
        warn!("Session faulted: {}", err);
        self.scheduler.fault();
        self.presenter.session_error(&err);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LatLng;
    use crate::presenter::RecordingPresenter;
    use crate::protocol::{InboundMessage, ProcessingStatus, WireKind, WireRecord};

    fn engine(desired_speed: f64) -> PlaybackEngine<RecordingPresenter> {
        let config = PlayerConfig {
            desired_speed,
            ..PlayerConfig::default()
        };
        PlaybackEngine::new(config, RecordingPresenter::new()).unwrap()
    }

    fn wire(kind: WireKind, at: f64, dist: f64) -> WireRecord {
        WireRecord {
            kind,
            point: LatLng::new(51.5, -0.1),
            original_point: None,
            at_dist: at,
            dist_from_last: dist,
            prev_route_index: 0,
            start_route_index: None,
            last: false,
        }
    }

    fn pano(id: &str, at: f64, dist: f64) -> WireRecord {
        wire(
            WireKind::Pano {
                id: id.to_string(),
                heading: 0.0,
            },
            at,
            dist,
        )
    }

    fn asset(name: &str) -> Result<FetchedAsset, EnvError> {
        Ok(FetchedAsset::new(name, 1024))
    }

    /// Splits the outbox into fetches and frame wakes.
    fn drain(engine: &mut PlaybackEngine<RecordingPresenter>) -> (Vec<(usize, LoadTicket)>, Vec<Wake>) {
        let mut fetches = Vec::new();
        let mut frames = Vec::new();
        for command in engine.drain_commands() {
            match command {
                Command::Fetch { index, ticket, .. } => fetches.push((index, ticket)),
                Command::Schedule {
                    wake: wake @ Wake::Frame(_),
                    ..
                } => frames.push(wake),
                _ => {}
            }
        }
        (fetches, frames)
    }

    /// Fires frame timers until playback stops scheduling them.
    fn run_frames(engine: &mut PlaybackEngine<RecordingPresenter>) {
        loop {
            let (_, frames) = drain(engine);
            let Some(wake) = frames.last().copied() else {
                break;
            };
            engine.wake(wake);
        }
    }

    #[test]
    fn test_seek_then_delayed_until_loaded() {
        let mut engine = engine(5.0);
        engine
            .ingest(InboundMessage::panos(vec![
                pano("a", 0.0, 0.0),
                pano("b", 10.0, 10.0),
                pano("c", 25.0, 15.0),
            ]))
            .unwrap();
        let (loads, _) = drain(&mut engine);
        assert_eq!(loads.len(), 3);
        engine.on_asset_loaded(0, loads[0].1, asset("a"));
        engine.on_asset_loaded(1, loads[1].1, asset("b"));

        engine.play().unwrap();
        let (_, frames) = drain(&mut engine);
        let stale = frames[0];

        assert_eq!(engine.seek(12.0).unwrap(), 1);
        assert_eq!(engine.cursor(), 1);
        let (_, frames) = drain(&mut engine);
        let next = frames[0];

        engine.wake(stale);
        assert_eq!(engine.cursor(), 1);

        engine.wake(next);
        assert_eq!(engine.cursor(), 2);
        assert_eq!(engine.state(), PlaybackState::Delayed);
        let (reloads, _) = drain(&mut engine);
        assert!(reloads.is_empty());

        engine.on_asset_loaded(2, loads[2].1, asset("c"));
        assert_eq!(engine.state(), PlaybackState::Playing);
        assert_eq!(engine.presenter().shown_indices(), vec![1, 2]);
        assert_eq!(engine.presenter().delayed_indices(), vec![2]);
    }

    #[test]
    fn test_continue_playback_is_idempotent() {
        let mut engine = engine(10.0);
        engine
            .ingest(InboundMessage::panos(vec![pano("a", 0.0, 0.0), pano("b", 10.0, 10.0)]))
            .unwrap();
        let (loads, _) = drain(&mut engine);
        for (index, ticket) in loads {
            engine.on_asset_loaded(index, ticket, asset("x"));
        }
        engine.play().unwrap();
        engine.continue_playback();
        engine.continue_playback();
        let (_, frames) = drain(&mut engine);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_gap_record_never_blocks() {
        let mut engine = engine(10.0);
        engine
            .ingest(InboundMessage::panos(vec![
                pano("a", 0.0, 0.0),
                wire(WireKind::NoImages, 40.0, 40.0),
                pano("b", 50.0, 10.0),
            ]))
            .unwrap();
        let (loads, _) = drain(&mut engine);
        assert_eq!(loads.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 2]);
        for (index, ticket) in loads {
            engine.on_asset_loaded(index, ticket, asset("x"));
        }
        assert!(engine.buffer_seconds() >= 5.0);

        engine.play().unwrap();
        run_frames(&mut engine);
        assert_eq!(engine.presenter().shown_indices(), vec![0, 1, 2]);
        assert!(engine.presenter().delayed_indices().is_empty());
    }

    #[test]
    fn test_enormous_gap_waits_at_most_max_frame_delay() {
        let mut engine = engine(10.0);
        engine
            .ingest(InboundMessage::panos(vec![
                wire(WireKind::NoImages, 0.0, 0.0),
                wire(WireKind::NoImages, 1e22, 1e22),
            ]))
            .unwrap();
        engine.play().unwrap();

        let mut delays = Vec::new();
        for _ in 0..2 {
            for command in engine.drain_commands() {
                if let Command::Schedule { delay, wake: wake @ Wake::Frame(_) } = command {
                    delays.push(delay);
                    engine.wake(wake);
                }
            }
        }
        assert_eq!(delays, vec![std::time::Duration::ZERO, crate::scheduler::MAX_FRAME_DELAY]);
        assert_eq!(engine.presenter().shown_indices(), vec![0, 1]);
        assert!(engine.state() != PlaybackState::Faulted);
    }

    #[test]
    fn test_playback_resumes_when_records_arrive() {
        let mut engine = engine(10.0);
        engine.ingest(InboundMessage::panos(vec![pano("a", 0.0, 0.0)])).unwrap();
        let (loads, _) = drain(&mut engine);
        engine.on_asset_loaded(0, loads[0].1, asset("a"));
        engine.play().unwrap();
        run_frames(&mut engine);
        assert_eq!(engine.cursor(), 0);
        assert_eq!(engine.state(), PlaybackState::Playing);

        engine.ingest(InboundMessage::panos(vec![pano("b", 20.0, 20.0)])).unwrap();
        let (loads, frames) = drain(&mut engine);
        assert_eq!(frames.len(), 1);
        engine.on_asset_loaded(1, loads[0].1, asset("b"));
        engine.wake(frames[0]);
        assert_eq!(engine.presenter().shown_indices(), vec![0, 1]);
    }

    #[test]
    fn test_reset_truncates_and_accepts_later_records() {
        let mut engine = engine(10.0);
        let batch = (0..5).map(|i| pano(&format!("p{}", i), i as f64 * 10.0, 10.0)).collect();
        engine.ingest(InboundMessage::panos(batch)).unwrap();
        let (loads, _) = drain(&mut engine);
        for (index, ticket) in loads {
            engine.on_asset_loaded(index, ticket, asset("x"));
        }

        let summary = engine.ingest(InboundMessage::reset(1)).unwrap();
        assert_eq!(summary.removed, 3);
        assert_eq!(engine.sequence().len(), 2);
        let progress = engine.presenter().last_progress.clone().unwrap();
        assert_eq!(progress.processed, 10.0);
        assert!(progress.buffered.iter().all(|s| s.end <= 10.0));

        engine
            .ingest(InboundMessage::panos(vec![pano("q", 10.0, 0.0), pano("r", 18.0, 8.0)]))
            .unwrap();
        assert_eq!(engine.sequence().len(), 4);
    }

    #[test]
    fn test_reset_clamps_cursor_and_drops_stale_loads() {
        let mut engine = engine(10.0);
        let batch = (0..5).map(|i| pano(&format!("p{}", i), i as f64 * 10.0, 10.0)).collect();
        engine.ingest(InboundMessage::panos(batch)).unwrap();
        let (loads, _) = drain(&mut engine);
        for &(index, ticket) in &loads[..4] {
            engine.on_asset_loaded(index, ticket, asset("x"));
        }
        engine.seek(30.0).unwrap();
        assert_eq!(engine.cursor(), 3);

        engine.ingest(InboundMessage::reset(1)).unwrap();
        assert_eq!(engine.cursor(), 1);
        assert_eq!(engine.prefetcher().frontier(), 1);

        let in_flight = engine.prefetcher().in_flight();
        let (index, ticket) = loads[4];
        assert_eq!(engine.on_asset_loaded(index, ticket, asset("late")), Completion::Stale);
        assert_eq!(engine.prefetcher().in_flight(), in_flight - 1);
    }

    #[test]
    fn test_out_of_order_batch_faults_session() {
        let mut engine = engine(10.0);
        engine
            .ingest(InboundMessage::panos(vec![pano("a", 0.0, 0.0), pano("b", 10.0, 10.0)]))
            .unwrap();
        let err = engine.ingest(InboundMessage::panos(vec![pano("c", 5.0, 0.0)])).unwrap_err();
        assert!(matches!(err, PlaybackError::StreamDesync { .. }));
        assert_eq!(engine.state(), PlaybackState::Faulted);
        assert_eq!(engine.presenter().errors().len(), 1);
        assert_eq!(engine.sequence().len(), 2);

        let err = engine.ingest(InboundMessage::panos(vec![pano("d", 20.0, 10.0)])).unwrap_err();
        assert_eq!(err, PlaybackError::SessionFaulted);
        assert_eq!(engine.play(), Err(PlaybackError::SessionFaulted));
    }

    #[test]
    fn test_failed_image_shows_placeholder() {
        let config = PlayerConfig {
            max_fetch_attempts: 1,
            ..PlayerConfig::default()
        };
        let mut engine = PlaybackEngine::new(config, RecordingPresenter::new()).unwrap();
        engine.ingest(InboundMessage::panos(vec![pano("a", 0.0, 0.0)])).unwrap();
        engine.play().unwrap();
        let (loads, frames) = drain(&mut engine);
        engine.wake(frames[0]);
        assert_eq!(engine.state(), PlaybackState::Delayed);

        let done = engine.on_asset_loaded(0, loads[0].1, Err(EnvError::asset("u", "503")));
        assert_eq!(done, Completion::GaveUp);
        assert_eq!(
            engine.presenter().events.last(),
            Some(&crate::presenter::PresenterEvent::Frame {
                index: 0,
                at_distance: 0.0,
                placeholder: true
            })
        );
    }

    #[test]
    fn test_actions_follow_status() {
        let mut engine = engine(10.0);
        assert_eq!(engine.request_cancel(), Err(PlaybackError::ActionUnavailable("cancel")));

        engine
            .ingest(InboundMessage {
                status: Some(ProcessingStatus {
                    text: "Getting panos".into(),
                    cancelable: true,
                    resumable: false,
                }),
                ..InboundMessage::default()
            })
            .unwrap();
        engine.request_cancel().unwrap();
        assert_eq!(engine.request_resume(), Err(PlaybackError::ActionUnavailable("resume")));
        assert_eq!(engine.drain_commands(), vec![Command::Send(OutboundMessage::Cancel)]);

        engine.transport_lost();
        assert_eq!(engine.request_cancel(), Err(PlaybackError::TransportDown));
        assert_eq!(engine.link_panos("a", "b"), Err(PlaybackError::TransportDown));
        assert!(engine.presenter().last_status().unwrap().connection_lost);

        engine.transport_restored();
        engine.link_panos("a", "b").unwrap();
        assert_eq!(
            engine.drain_commands(),
            vec![Command::Send(OutboundMessage::AddPanoChainItem("a".into(), "b".into()))]
        );
    }

    #[test]
    fn test_seek_fraction_uses_route_distance() {
        let mut engine = engine(10.0);
        engine
            .ingest(InboundMessage {
                route_distance: Some(100.0),
                panos: Some(vec![pano("a", 0.0, 0.0), pano("b", 30.0, 30.0), pano("c", 60.0, 30.0)]),
                ..InboundMessage::default()
            })
            .unwrap();
        assert_eq!(engine.seek_fraction(0.5).unwrap(), 1);
        assert_eq!(engine.seek_fraction(2.0).unwrap(), 2);
    }
}
