//! SimWorld - The simulation harness container.
//!
//! The world drives a [`PlaybackEngine`] directly, without tokio. Everything
//! that would happen "later" in production (stream messages, image
//! responses, frame timers, user input) is an event on one virtual-time
//! queue. Each step pops the earliest event, applies it, executes the
//! engine's commands and checks the engine's invariants.

use crate::assets::{AssetModel, AssetProfile};
use crate::context::SimContext;
use crate::error::SimError;
use crate::route::{RouteProfile, SyntheticRoute};
use crate::runner::ScenarioMetrics;

use routeview_core::{
    Command, Completion, InboundMessage, LoadTicket, OutboundMessage, PlaybackEngine, PlayerConfig, PresenterEvent,
    RecordingPresenter, Wake,
};
use routeview_env::{EnvError, FetchedAsset};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

const ROUTE_SALT: u64 = 0x9e3779b97f4a7c15;
const ASSET_SALT: u64 = 0x3c6ef372fe94f82b;

/// Upper bound on events per run, in case a bug keeps re-arming timers.
const MAX_STEPS: u64 = 5_000_000;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    pub route: RouteProfile,
    pub assets: AssetProfile,

    /// Records per stream message
    pub batch_size: usize,

    /// Virtual time between stream messages
    pub batch_interval: Duration,

    /// Maximum simulated time
    pub max_duration: Duration,

    pub player: PlayerConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            route: RouteProfile::default(),
            assets: AssetProfile::default(),
            batch_size: 20,
            batch_interval: Duration::from_millis(200),
            max_duration: Duration::from_secs(600),
            player: PlayerConfig::default(),
        }
    }
}

/// Something that happens at a point in virtual time.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// A text frame from the server
    Stream(String),
    /// The stream connection drops; later frames are lost
    Disconnect,
    Reconnect,
    /// An image response arrives
    AssetDone {
        index: usize,
        ticket: LoadTicket,
        result: Result<FetchedAsset, EnvError>,
    },
    Wake(Wake),
    Seek(f64),
    Pause,
    Play,
}

#[derive(Debug)]
struct Scheduled {
    at: Duration,
    order: u64,
    event: SimEvent,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.order).cmp(&(other.at, other.order))
    }
}

/// The SimWorld - container for one simulated playback session.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// The route the simulated server streams
    pub route: SyntheticRoute,

    engine: PlaybackEngine<RecordingPresenter>,
    assets: AssetModel,
    queue: BinaryHeap<Reverse<Scheduled>>,
    next_order: u64,

    connected: bool,

    /// Issued fetches that have not reported back yet
    outstanding: HashMap<LoadTicket, usize>,

    metrics: ScenarioMetrics,
    violations: Vec<String>,
    sent: Vec<OutboundMessage>,

    /// Presenter events already checked
    events_seen: usize,
    last_shown: Option<usize>,
    steps: u64,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        let context = SimContext::shared(config.seed);

        let route = SyntheticRoute::generate(&mut context.rng_for(ROUTE_SALT), &config.route)?;
        let mut assets = AssetModel::new(context.rng_for(ASSET_SALT), &config.assets)?;
        let broken = assets.break_some(route.pano_ids(), config.assets.broken_rate);
        debug!("Route of {} records, {} broken panos", route.len(), broken);

        let engine = PlaybackEngine::new(config.player.clone(), RecordingPresenter::new())?;

        Ok(Self {
            config,
            context,
            route,
            engine,
            assets,
            queue: BinaryHeap::new(),
            next_order: 0,
            connected: true,
            outstanding: HashMap::new(),
            metrics: ScenarioMetrics::default(),
            violations: Vec::new(),
            sent: Vec::new(),
            events_seen: 0,
            last_shown: None,
            steps: 0,
        })
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Schedules an event at an absolute virtual time.
    pub fn schedule_at(&mut self, at: Duration, event: SimEvent) {
        self.next_order += 1;
        self.queue.push(Reverse(Scheduled {
            at,
            order: self.next_order,
            event,
        }));
    }

    /// Schedules an event `delay` from now.
    pub fn schedule(&mut self, delay: Duration, event: SimEvent) {
        let at = self.now() + delay;
        self.schedule_at(at, event);
    }

    /// Schedules a server message.
    pub fn send_at(&mut self, at: Duration, message: &InboundMessage) -> Result<(), SimError> {
        let text = message.to_json()?;
        self.schedule_at(at, SimEvent::Stream(text));
        Ok(())
    }

    /// Schedules the whole route: opening message at `start`, then one batch
    /// per interval, then the closing status. Returns when the last record
    /// goes out.
    pub fn stream_route(&mut self, start: Duration) -> Result<Duration, SimError> {
        let opening = self.route.opening_message();
        self.send_at(start, &opening)?;
        self.stream_records(0, start)
    }

    /// Schedules records `from..` in batches starting one interval after
    /// `start`, followed by the closing status.
    pub fn stream_records(&mut self, from: usize, start: Duration) -> Result<Duration, SimError> {
        let mut at = start;
        for batch in self.route.batches(from, self.config.batch_size) {
            at += self.config.batch_interval;
            self.send_at(at, &batch)?;
        }
        self.send_at(at + self.config.batch_interval, &SyntheticRoute::closing_message())?;
        Ok(at)
    }

    /// Time at which the batch holding record `index` goes out when the
    /// route is streamed from `start`.
    pub fn batch_time(&self, index: usize, start: Duration) -> Duration {
        let batch = index / self.config.batch_size.max(1);
        start + self.config.batch_interval * (batch as u32 + 1)
    }

    // ------------------------------------------------------------------
    // Running
    // ------------------------------------------------------------------

    /// Starts playback now.
    pub fn play(&mut self) -> Result<(), SimError> {
        self.engine.play()?;
        self.execute_commands();
        self.check_invariants(false);
        Ok(())
    }

    /// Applies the next event. Returns false once the queue is empty or the
    /// time limit is reached.
    pub fn step(&mut self) -> bool {
        let Some(Reverse(next)) = self.queue.pop() else {
            return false;
        };
        if next.at > self.config.max_duration || self.steps >= MAX_STEPS {
            self.queue.push(Reverse(next));
            return false;
        }
        self.context.set_time(next.at.as_nanos() as u64);
        self.steps += 1;

        let jump = self.apply(next.event);
        self.execute_commands();
        self.check_invariants(jump);
        true
    }

    /// Runs until nothing is left to happen or the time limit is reached.
    pub fn run(&mut self) {
        while self.step() {}
        self.metrics.max_in_flight = self.engine.prefetcher().max_in_flight_observed();
        debug!(
            "Run ended at {:.1}s after {} steps, cursor {}",
            self.time(),
            self.steps,
            self.engine.cursor()
        );
    }

    /// Runs every event scheduled up to and including `until`.
    pub fn run_until(&mut self, until: Duration) {
        while self.queue.peek().is_some_and(|Reverse(s)| s.at <= until) {
            if !self.step() {
                break;
            }
        }
        self.context.set_time(until.as_nanos() as u64);
    }

    /// Applies one event. Returns true if the event may legitimately move
    /// the cursor to a non-adjacent record.
    fn apply(&mut self, event: SimEvent) -> bool {
        match event {
            SimEvent::Stream(text) => {
                if !self.connected {
                    self.metrics.dropped_messages += 1;
                    return false;
                }
                match self.engine.ingest_json(&text) {
                    Ok(summary) => {
                        self.metrics.messages += 1;
                        self.metrics.records_discarded += summary.removed as u64;
                        if summary.appended > 0 {
                            self.check_ordering();
                        }
                        summary.removed > 0
                    }
                    Err(err) => {
                        debug!("Message rejected: {}", err);
                        self.metrics.rejected_messages += 1;
                        false
                    }
                }
            }
            SimEvent::Disconnect => {
                self.connected = false;
                self.engine.transport_lost();
                false
            }
            SimEvent::Reconnect => {
                self.connected = true;
                self.engine.transport_restored();
                false
            }
            SimEvent::AssetDone { index, ticket, result } => {
                if self.outstanding.remove(&ticket).is_none() {
                    self.violation(format!("completion for unknown load {}", ticket));
                }
                match self.engine.on_asset_loaded(index, ticket, result) {
                    Completion::Stale => self.metrics.stale_completions += 1,
                    Completion::Ready => {}
                    Completion::Retrying { .. } => self.metrics.retries += 1,
                    Completion::GaveUp => self.metrics.placeholders += 1,
                }
                false
            }
            SimEvent::Wake(wake) => {
                self.engine.wake(wake);
                false
            }
            SimEvent::Seek(distance) => match self.engine.seek(distance) {
                Ok(index) => {
                    trace!("Seek to {:.1}m -> {}", distance, index);
                    self.metrics.seeks += 1;
                    true
                }
                Err(err) => {
                    debug!("Seek rejected: {}", err);
                    false
                }
            },
            SimEvent::Pause => {
                self.engine.pause();
                false
            }
            SimEvent::Play => {
                if let Err(err) = self.engine.play() {
                    debug!("Play rejected: {}", err);
                }
                false
            }
        }
    }

    /// Executes everything in the engine's outbox.
    fn execute_commands(&mut self) {
        let cursor = self.engine.cursor();
        let lookahead = self.config.player.lookahead as i64;
        let timeout = self.config.player.asset_timeout();

        for command in self.engine.drain_commands() {
            match command {
                Command::Fetch { index, ticket, url } => {
                    if index as i64 > cursor + lookahead {
                        self.violation(format!(
                            "fetch of record {} beyond lookahead (cursor {})",
                            index, cursor
                        ));
                    }
                    self.metrics.fetches += 1;

                    let outcome = self.assets.sample(&url);
                    let (latency, result) = if outcome.latency > timeout {
                        self.metrics.timeouts += 1;
                        (timeout, Err(EnvError::Timeout(timeout.as_millis() as u64)))
                    } else {
                        (outcome.latency, outcome.result)
                    };
                    if result.is_err() {
                        self.metrics.fetch_failures += 1;
                    }
                    self.outstanding.insert(ticket, index);
                    self.schedule(latency, SimEvent::AssetDone { index, ticket, result });
                }
                Command::Schedule { delay, wake } => {
                    if wake == Wake::PrefetchResume {
                        self.metrics.prefetch_yields += 1;
                    }
                    self.schedule(delay, SimEvent::Wake(wake));
                }
                Command::Send(message) => {
                    if !self.connected {
                        self.violation(format!("{:?} sent while disconnected", message));
                    }
                    self.sent.push(message);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Invariants
    // ------------------------------------------------------------------

    fn check_invariants(&mut self, jump: bool) {
        let k = self.config.player.max_in_flight;
        let in_flight = self.engine.prefetcher().in_flight();
        if in_flight > k {
            self.violation(format!("{} loads in flight, limit {}", in_flight, k));
        }
        if in_flight != self.outstanding.len() {
            self.violation(format!(
                "prefetcher counts {} in flight, {} outstanding",
                in_flight,
                self.outstanding.len()
            ));
        }
        let cursor = self.engine.cursor();
        if cursor >= self.engine.sequence().len() as i64 {
            self.violation(format!(
                "cursor {} past the end of {} records",
                cursor,
                self.engine.sequence().len()
            ));
        }
        self.check_frames(jump);
    }

    /// Frames must advance one record at a time, except right after a seek
    /// or a reset.
    fn check_frames(&mut self, jump: bool) {
        if jump {
            self.last_shown = None;
        }
        let events = &self.engine.presenter().events;
        let mut problems = Vec::new();
        for event in &events[self.events_seen..] {
            match event {
                PresenterEvent::Frame { index, placeholder, .. } => {
                    self.metrics.frames_shown += 1;
                    if *placeholder {
                        self.metrics.placeholder_frames += 1;
                    }
                    if let Some(prev) = self.last_shown {
                        if *index != prev + 1 && !jump {
                            problems.push(format!("frame {} shown after frame {}", index, prev));
                        }
                    }
                    self.last_shown = Some(*index);
                }
                PresenterEvent::Delayed(_) => self.metrics.frames_delayed += 1,
                _ => {}
            }
        }
        self.events_seen = events.len();
        for problem in problems {
            self.violation(problem);
        }
    }

    fn check_ordering(&mut self) {
        let records = self.engine.sequence().records();
        if let Some(i) = records.windows(2).position(|w| w[0].at_distance > w[1].at_distance) {
            self.violation(format!("records {} and {} out of order", i, i + 1));
        }
    }

    fn violation(&mut self, message: String) {
        warn!("Invariant violated at {:.3}s: {}", self.time(), message);
        self.violations.push(message);
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.context.time_ns())
    }

    /// Returns the current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.now().as_secs_f64()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn engine(&self) -> &PlaybackEngine<RecordingPresenter> {
        &self.engine
    }

    /// Direct access for scenarios that poke the engine between steps.
    /// Commands it queues are executed on the next step.
    pub fn engine_mut(&mut self) -> &mut PlaybackEngine<RecordingPresenter> {
        &mut self.engine
    }

    pub fn metrics(&self) -> &ScenarioMetrics {
        &self.metrics
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Messages the engine sent upstream.
    pub fn sent(&self) -> &[OutboundMessage] {
        &self.sent
    }

    pub fn broken_panos(&self) -> usize {
        self.assets.broken_count()
    }

    /// True if no events are pending.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// True once the last record of the route is on screen.
    pub fn finished(&self) -> bool {
        let seq = self.engine.sequence();
        seq.is_complete()
            && seq.len() == self.route.len()
            && self.engine.cursor() == seq.len() as i64 - 1
            && self.last_shown == Some(seq.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeview_core::PlaybackState;

    fn small(seed: u64) -> SimConfig {
        SimConfig {
            seed,
            route: RouteProfile {
                records: 60,
                ..RouteProfile::default()
            },
            batch_size: 10,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_sim_world_plays_route_to_the_end() {
        let mut world = SimWorld::new(small(42)).unwrap();
        world.stream_route(Duration::ZERO).unwrap();
        world.play().unwrap();
        world.run();

        assert!(world.violations().is_empty(), "{:?}", world.violations());
        assert!(world.finished());
        assert!(world.is_idle());
        let shown = world.engine().presenter().shown_indices();
        assert_eq!(shown, (0..60).collect::<Vec<_>>());
        assert_eq!(world.metrics().frames_shown, 60);
    }

    #[test]
    fn test_sim_world_determinism() {
        let run = |seed| {
            let mut world = SimWorld::new(small(seed)).unwrap();
            world.stream_route(Duration::ZERO).unwrap();
            world.play().unwrap();
            world.run();
            (world.steps(), world.time(), world.metrics().fetches)
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_events_apply_in_time_order() {
        let mut world = SimWorld::new(small(1)).unwrap();
        world.schedule_at(Duration::from_secs(2), SimEvent::Pause);
        world.schedule_at(Duration::from_secs(1), SimEvent::Play);
        assert!(world.step());
        assert_eq!(world.now(), Duration::from_secs(1));
        assert_eq!(world.engine().state(), PlaybackState::Playing);
        assert!(world.step());
        assert_eq!(world.engine().state(), PlaybackState::Paused);
        assert!(!world.step());
    }

    #[test]
    fn test_messages_after_disconnect_are_dropped() {
        let mut world = SimWorld::new(small(3)).unwrap();
        world.stream_route(Duration::ZERO).unwrap();
        world.schedule_at(Duration::from_millis(450), SimEvent::Disconnect);
        world.play().unwrap();
        world.run();

        assert!(world.metrics().dropped_messages > 0);
        assert!(world.engine().status().connection_lost);
        assert_eq!(world.engine().sequence().len(), 20);
        assert_eq!(world.engine().cursor(), 19);
        assert!(world.violations().is_empty(), "{:?}", world.violations());
    }

    #[test]
    fn test_time_limit_stops_the_run() {
        let mut world = SimWorld::new(SimConfig {
            max_duration: Duration::from_secs(1),
            ..small(5)
        })
        .unwrap();
        world.schedule_at(Duration::from_secs(5), SimEvent::Play);
        world.run();
        assert!(!world.is_idle());
        assert!(world.time() <= 1.0);
    }
}
