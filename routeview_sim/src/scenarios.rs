//! Chaos scenarios for the playback engine.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// DST-001: Fast images, steady stream, baseline
    SteadyStream,

    /// DST-002: Image service slower than playback
    SlowImages,

    /// DST-003: Failing requests and panos that never load
    FlakyImages,

    /// DST-004: Server discards a suffix and streams it again
    ReplayAfterReset,

    /// DST-005: User seeks around while records still arrive
    SeekStorm,

    /// DST-006: Stream connection drops mid-route
    TransportLoss,

    /// DST-007: Whole route in one message
    BurstBatch,

    /// DST-008: Server sends records that contradict the sequence
    Desync,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyStream,
            ScenarioId::SlowImages,
            ScenarioId::FlakyImages,
            ScenarioId::ReplayAfterReset,
            ScenarioId::SeekStorm,
            ScenarioId::TransportLoss,
            ScenarioId::BurstBatch,
            ScenarioId::Desync,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyStream => "steady_stream",
            ScenarioId::SlowImages => "slow_images",
            ScenarioId::FlakyImages => "flaky_images",
            ScenarioId::ReplayAfterReset => "replay_after_reset",
            ScenarioId::SeekStorm => "seek_storm",
            ScenarioId::TransportLoss => "transport_loss",
            ScenarioId::BurstBatch => "burst_batch",
            ScenarioId::Desync => "desync",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyStream => "120ms images, 20-record batches; every record shown once, in order",
            ScenarioId::SlowImages => "2s median image latency; playback delays but never skips",
            ScenarioId::FlakyImages => "30% failed requests, 5% broken panos; placeholders instead of stalls",
            ScenarioId::ReplayAfterReset => "reset to the middle of the stream, then replay the suffix",
            ScenarioId::SeekStorm => "random seeks every 0.5-2s during streaming",
            ScenarioId::TransportLoss => "disconnect mid-route; buffered records still play",
            ScenarioId::BurstBatch => "entire route in one batch; prefetch yields and stays bounded",
            ScenarioId::Desync => "out-of-order batch faults the session",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady_stream" | "steadystream" | "dst-001" => Ok(ScenarioId::SteadyStream),
            "slow_images" | "slowimages" | "dst-002" => Ok(ScenarioId::SlowImages),
            "flaky_images" | "flakyimages" | "dst-003" => Ok(ScenarioId::FlakyImages),
            "replay_after_reset" | "replayafterreset" | "dst-004" => Ok(ScenarioId::ReplayAfterReset),
            "seek_storm" | "seekstorm" | "dst-005" => Ok(ScenarioId::SeekStorm),
            "transport_loss" | "transportloss" | "dst-006" => Ok(ScenarioId::TransportLoss),
            "burst_batch" | "burstbatch" | "dst-007" => Ok(ScenarioId::BurstBatch),
            "desync" | "dst-008" => Ok(ScenarioId::Desync),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
