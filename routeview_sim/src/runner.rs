//! Scenario runner - executes chaos scenarios against the playback engine.

use crate::assets::AssetProfile;
use crate::error::SimError;
use crate::route::RouteProfile;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimEvent, SimWorld};

use rand::Rng;
use routeview_core::{InboundMessage, PlaybackError, PlaybackState, PlayerConfig, PresenterEvent};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

const SEEK_SALT: u64 = 0x6a09e667f3bcc908;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Events processed
    pub total_steps: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Cursor at the end of the run
    pub final_cursor: i64,

    /// Records in the sequence at the end of the run
    pub final_records: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    /// Stream messages applied
    pub messages: u64,

    /// Stream messages the engine refused
    pub rejected_messages: u64,

    /// Stream messages lost to a dropped connection
    pub dropped_messages: u64,

    pub records_discarded: u64,

    /// Image requests issued
    pub fetches: u64,
    pub fetch_failures: u64,
    pub timeouts: u64,
    pub retries: u64,

    /// Completions for loads that no longer mattered
    pub stale_completions: u64,

    /// Records that gave up and show a placeholder
    pub placeholders: u64,

    /// Highest number of loads in flight at once
    pub max_in_flight: usize,

    /// Prefetch passes that yielded and resumed later
    pub prefetch_yields: u64,

    pub frames_shown: u64,
    pub placeholder_frames: u64,
    pub frames_delayed: u64,
    pub seeks: u64,
}

/// Runs chaos scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Records per generated route
    records: usize,

    /// Maximum simulated duration in seconds
    max_duration_secs: f64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, records: usize) -> Self {
        Self {
            seed,
            records: records.max(2),
            max_duration_secs: 1800.0,
        }
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let outcome = match scenario {
            ScenarioId::SteadyStream => self.run_steady_stream(),
            ScenarioId::SlowImages => self.run_slow_images(),
            ScenarioId::FlakyImages => self.run_flaky_images(),
            ScenarioId::ReplayAfterReset => self.run_replay_after_reset(),
            ScenarioId::SeekStorm => self.run_seek_storm(),
            ScenarioId::TransportLoss => self.run_transport_loss(),
            ScenarioId::BurstBatch => self.run_burst_batch(),
            ScenarioId::Desync => self.run_desync(),
        };

        outcome.unwrap_or_else(|err| ScenarioResult {
            scenario,
            seed: self.seed,
            passed: false,
            total_steps: 0,
            final_time_secs: 0.0,
            final_cursor: -1,
            final_records: 0,
            failure_reason: Some(format!("Setup failed: {}", err)),
            metrics: ScenarioMetrics::default(),
        })
    }

    fn config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            route: RouteProfile {
                records: self.records,
                ..RouteProfile::default()
            },
            max_duration: Duration::from_secs_f64(self.max_duration_secs.max(0.0)),
            ..SimConfig::default()
        }
    }

    /// Builds the result from the world's state and the scenario's own
    /// failed checks. Invariant violations always fail the run.
    fn conclude(&self, scenario: ScenarioId, world: &SimWorld, failures: Vec<String>) -> ScenarioResult {
        let violations = world.violations();
        let mut reasons: Vec<String> = violations.iter().take(3).cloned().collect();
        if violations.len() > 3 {
            reasons.push(format!("{} more violations", violations.len() - 3));
        }
        reasons.extend(failures);
        let passed = reasons.is_empty();

        let metrics = world.metrics().clone();
        debug!("{} metrics: {:?}", scenario.name(), metrics);
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_steps: world.steps(),
            final_time_secs: world.time(),
            final_cursor: world.engine().cursor(),
            final_records: world.engine().sequence().len(),
            failure_reason: (!passed).then(|| reasons.join("; ")),
            metrics,
        }
    }

    /// DST-001: SteadyStream - baseline.
    fn run_steady_stream(&self) -> Result<ScenarioResult, SimError> {
        info!("DST-001: SteadyStream - {} records, fast images", self.records);

        let mut world = SimWorld::new(self.config())?;
        world.stream_route(Duration::ZERO)?;
        world.play()?;
        world.run();

        let n = world.route.len();
        let mut failures = Vec::new();
        check_finished(&world, &mut failures);
        let shown = world.engine().presenter().shown_indices();
        check(&mut failures, shown == (0..n).collect::<Vec<_>>(), || {
            format!("{} frames shown for {} records", shown.len(), n)
        });
        check(&mut failures, world.metrics().placeholders == 0, || {
            format!("{} placeholders without failures", world.metrics().placeholders)
        });

        info!(
            "✓ SteadyStream: {} frames in {:.1}s, {} fetches",
            world.metrics().frames_shown,
            world.time(),
            world.metrics().fetches
        );
        Ok(self.conclude(ScenarioId::SteadyStream, &world, failures))
    }

    /// DST-002: SlowImages - images arrive slower than playback wants them.
    fn run_slow_images(&self) -> Result<ScenarioResult, SimError> {
        info!("DST-002: SlowImages - 2s median latency");

        let mut world = SimWorld::new(SimConfig {
            assets: AssetProfile {
                median_latency_ms: 2_000.0,
                latency_sigma: 0.3,
                ..AssetProfile::default()
            },
            ..self.config()
        })?;
        world.stream_route(Duration::ZERO)?;
        world.play()?;
        world.run();

        let n = world.route.len() as u64;
        let mut failures = Vec::new();
        check_finished(&world, &mut failures);
        check(&mut failures, world.metrics().frames_delayed > 0, || {
            "slow images never delayed playback".to_string()
        });
        check(&mut failures, world.metrics().frames_shown == n, || {
            format!("{} frames shown for {} records", world.metrics().frames_shown, n)
        });

        info!(
            "✓ SlowImages: {} delayed transitions, finished at {:.1}s",
            world.metrics().frames_delayed,
            world.time()
        );
        Ok(self.conclude(ScenarioId::SlowImages, &world, failures))
    }

    /// DST-003: FlakyImages - retries, then placeholders.
    fn run_flaky_images(&self) -> Result<ScenarioResult, SimError> {
        info!("DST-003: FlakyImages - 30% failures, 5% broken panos");

        let mut world = SimWorld::new(SimConfig {
            assets: AssetProfile {
                failure_rate: 0.3,
                broken_rate: 0.05,
                ..AssetProfile::default()
            },
            ..self.config()
        })?;
        world.stream_route(Duration::ZERO)?;
        world.play()?;
        world.run();

        let broken = world.broken_panos() as u64;
        let m = world.metrics();
        let mut failures = Vec::new();
        check_finished(&world, &mut failures);
        check(&mut failures, m.placeholders >= broken, || {
            format!("{} placeholders for {} broken panos", m.placeholders, broken)
        });
        check(&mut failures, m.placeholder_frames == m.placeholders, || {
            format!("{} placeholder frames for {} placeholders", m.placeholder_frames, m.placeholders)
        });
        check(&mut failures, m.fetch_failures == 0 || m.retries > 0, || {
            "failed loads were never retried".to_string()
        });

        info!(
            "✓ FlakyImages: {} failures, {} retries, {} placeholders",
            m.fetch_failures, m.retries, m.placeholders
        );
        Ok(self.conclude(ScenarioId::FlakyImages, &world, failures))
    }

    /// DST-004: ReplayAfterReset - the server recomputes the second half of
    /// what it sent after the player has already played it.
    fn run_replay_after_reset(&self) -> Result<ScenarioResult, SimError> {
        info!("DST-004: ReplayAfterReset");

        let mut world = SimWorld::new(self.config())?;
        let n = world.route.len();
        let batch_size = world.config.batch_size.max(1);
        let interval = world.config.batch_interval;

        // Phase 1: half the route, played to its end
        let opening = world.route.opening_message();
        world.send_at(Duration::ZERO, &opening)?;
        let batches = (n / 2).max(1).div_ceil(batch_size);
        let mut at = Duration::ZERO;
        for batch in world.route.batches(0, batch_size).into_iter().take(batches) {
            at += interval;
            world.send_at(at, &batch)?;
        }
        let sent = (batches * batch_size).min(n);
        world.play()?;
        world.run();
        let cursor_before = world.engine().cursor();

        // Phase 2: keep half of what was sent, stream the rest again
        let keep = (sent / 2).max(1);
        let reset_at = world.now() + Duration::from_secs(1);
        world.send_at(reset_at, &InboundMessage::reset(keep as i64 - 1))?;
        world.stream_records(keep, reset_at)?;
        world.run_until(reset_at);
        let cursor_after_reset = world.engine().cursor();
        world.run();

        let mut failures = Vec::new();
        check_finished(&world, &mut failures);
        check(&mut failures, cursor_before == sent as i64 - 1, || {
            format!("phase 1 stopped at {} of {} records", cursor_before, sent)
        });
        check(
            &mut failures,
            cursor_before < keep as i64 || cursor_after_reset == keep as i64 - 1,
            || format!("cursor {} not clamped to {} by the reset", cursor_after_reset, keep - 1),
        );
        check(&mut failures, world.metrics().records_discarded == (sent - keep) as u64, || {
            format!("{} records discarded, expected {}", world.metrics().records_discarded, sent - keep)
        });

        info!(
            "✓ ReplayAfterReset: reset {} -> {}, replayed {} records",
            cursor_before,
            cursor_after_reset,
            n - keep
        );
        Ok(self.conclude(ScenarioId::ReplayAfterReset, &world, failures))
    }

    /// DST-005: SeekStorm - random seeks while the stream is still arriving.
    fn run_seek_storm(&self) -> Result<ScenarioResult, SimError> {
        info!("DST-005: SeekStorm");

        let mut world = SimWorld::new(self.config())?;
        let last_batch = world.stream_route(Duration::ZERO)?;
        let mut rng = world.context.rng_for(SEEK_SALT);
        let max_distance = world.route.distance * 1.1;
        let mut at = Duration::from_secs(1);
        let mut scheduled = 0;
        while at < last_batch + Duration::from_secs(10) {
            let distance = rng.gen_range(0.0..=max_distance);
            world.schedule_at(at, SimEvent::Seek(distance));
            scheduled += 1;
            at += Duration::from_secs_f64(rng.gen_range(0.5..2.0));
        }
        world.play()?;
        world.run();

        let mut failures = Vec::new();
        check_finished(&world, &mut failures);
        check(&mut failures, world.metrics().seeks > 0, || "no seek was applied".to_string());

        info!(
            "✓ SeekStorm: {}/{} seeks applied, {} stale completions",
            world.metrics().seeks,
            scheduled,
            world.metrics().stale_completions
        );
        Ok(self.conclude(ScenarioId::SeekStorm, &world, failures))
    }

    /// DST-006: TransportLoss - the connection drops halfway.
    fn run_transport_loss(&self) -> Result<ScenarioResult, SimError> {
        info!("DST-006: TransportLoss");

        let mut world = SimWorld::new(self.config())?;
        let n = world.route.len();
        let batch_size = world.config.batch_size.max(1);
        world.stream_route(Duration::ZERO)?;
        let cut = world.batch_time(n / 2, Duration::ZERO) + world.config.batch_interval / 2;
        world.schedule_at(cut, SimEvent::Disconnect);
        world.play()?;
        world.run();

        let delivered = ((n / 2 / batch_size + 1) * batch_size).min(n);
        let mut failures = Vec::new();
        check(&mut failures, world.engine().sequence().len() == delivered, || {
            format!(
                "{} records after disconnect, expected {}",
                world.engine().sequence().len(),
                delivered
            )
        });
        check(&mut failures, world.engine().cursor() == delivered as i64 - 1, || {
            format!("buffered playback stopped at {} of {}", world.engine().cursor(), delivered)
        });
        check(&mut failures, world.engine().status().connection_lost, || {
            "connection loss not reported".to_string()
        });
        check(&mut failures, world.engine().state() != PlaybackState::Faulted, || {
            "transport loss faulted the session".to_string()
        });
        let cancel = world.engine_mut().request_cancel();
        check(&mut failures, cancel == Err(PlaybackError::TransportDown), || {
            format!("cancel while disconnected returned {:?}", cancel)
        });

        info!(
            "✓ TransportLoss: played {} buffered records, {} messages lost",
            delivered,
            world.metrics().dropped_messages
        );
        Ok(self.conclude(ScenarioId::TransportLoss, &world, failures))
    }

    /// DST-007: BurstBatch - the whole route in a single message.
    ///
    /// The pool is wider than one fill pass so the frontier runs into the
    /// per-pass advance limit before it runs out of slots.
    fn run_burst_batch(&self) -> Result<ScenarioResult, SimError> {
        info!("DST-007: BurstBatch - {} records in one message", self.records);

        let base = self.config();
        let batch = base.player.prefetch_batch;
        let mut world = SimWorld::new(SimConfig {
            batch_size: self.records,
            route: RouteProfile {
                gap_rate: 0.0,
                ..base.route.clone()
            },
            player: PlayerConfig {
                max_in_flight: batch + batch / 2,
                ..base.player.clone()
            },
            ..base
        })?;
        world.stream_route(Duration::ZERO)?;
        world.play()?;
        world.run();

        let n = world.route.len();
        let player = &world.config.player;
        let m = world.metrics();
        let mut failures = Vec::new();
        check_finished(&world, &mut failures);
        check(&mut failures, n <= player.prefetch_batch || m.prefetch_yields > 0, || {
            "prefetch never yielded on a large batch".to_string()
        });
        check(&mut failures, m.max_in_flight >= player.prefetch_batch.min(n), || {
            format!("only {} loads in flight on a large batch", m.max_in_flight)
        });
        check(&mut failures, m.max_in_flight <= player.max_in_flight, || {
            format!("{} loads in flight, limit {}", m.max_in_flight, player.max_in_flight)
        });

        info!(
            "✓ BurstBatch: {} yields, max {} in flight",
            m.prefetch_yields, m.max_in_flight
        );
        Ok(self.conclude(ScenarioId::BurstBatch, &world, failures))
    }

    /// DST-008: Desync - a batch goes backwards in distance.
    fn run_desync(&self) -> Result<ScenarioResult, SimError> {
        info!("DST-008: Desync");

        let mut world = SimWorld::new(self.config())?;
        let n = world.route.len();
        let batch_size = world.config.batch_size.max(1);
        world.stream_route(Duration::ZERO)?;
        let bad_at = world.batch_time(n / 2, Duration::ZERO) + world.config.batch_interval / 2;
        if let Some(first) = world.route.batches(0, batch_size).into_iter().next() {
            world.send_at(bad_at, &first)?;
        }
        world.play()?;
        world.run();

        let delivered = ((n / 2 / batch_size + 1) * batch_size).min(n);
        let events = &world.engine().presenter().events;
        let fault = events.iter().position(|e| matches!(e, PresenterEvent::Error(_)));
        let frames_after = fault.map_or(0, |i| {
            events[i..]
                .iter()
                .filter(|e| matches!(e, PresenterEvent::Frame { .. }))
                .count()
        });

        let mut failures = Vec::new();
        check(&mut failures, world.engine().state() == PlaybackState::Faulted, || {
            format!("session is {:?} after a desync", world.engine().state())
        });
        check(
            &mut failures,
            matches!(
                world.engine().presenter().errors().first(),
                Some(PlaybackError::StreamDesync { .. })
            ),
            || "desync not reported to the presenter".to_string(),
        );
        check(&mut failures, frames_after == 0, || {
            format!("{} frames shown after the fault", frames_after)
        });
        check(&mut failures, world.engine().sequence().len() == delivered, || {
            format!(
                "sequence changed after the fault: {} records, expected {}",
                world.engine().sequence().len(),
                delivered
            )
        });
        check(&mut failures, world.metrics().rejected_messages > 1, || {
            "messages after the fault were not rejected".to_string()
        });

        info!(
            "✓ Desync: faulted with {} records, {} messages rejected",
            delivered,
            world.metrics().rejected_messages
        );
        Ok(self.conclude(ScenarioId::Desync, &world, failures))
    }
}

fn check(failures: &mut Vec<String>, ok: bool, reason: impl FnOnce() -> String) {
    if !ok {
        failures.push(reason());
    }
}

fn check_finished(world: &SimWorld, failures: &mut Vec<String>) {
    check(failures, world.finished(), || {
        format!(
            "playback stalled at record {} of {} ({:?}, {:.1}s)",
            world.engine().cursor(),
            world.route.len(),
            world.engine().state(),
            world.time()
        )
    });
}
