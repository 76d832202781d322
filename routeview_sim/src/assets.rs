//! Simulated image service.
//!
//! [`AssetModel`] decides, from a seeded RNG, how long each image request
//! takes and whether it fails. Panos marked broken fail on every attempt,
//! which is how scenarios force the placeholder path.

use crate::error::SimError;
use async_trait::async_trait;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, LogNormal};
use routeview_env::{AssetFetcher, EnvError, FetchedAsset};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Latency and failure behaviour of the image service.
#[derive(Debug, Clone)]
pub struct AssetProfile {
    /// Median response time in milliseconds
    pub median_latency_ms: f64,

    /// Log-space standard deviation; 0.0 gives a constant latency
    pub latency_sigma: f64,

    /// Probability that a single request fails
    pub failure_rate: f64,

    /// Probability that a pano never loads
    pub broken_rate: f64,
}

impl Default for AssetProfile {
    fn default() -> Self {
        Self {
            median_latency_ms: 120.0,
            latency_sigma: 0.5,
            failure_rate: 0.0,
            broken_rate: 0.0,
        }
    }
}

/// Outcome of one simulated request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub latency: Duration,
    pub result: Result<FetchedAsset, EnvError>,
}

/// Seeded model of the image service.
#[derive(Debug)]
pub struct AssetModel {
    latency: LogNormal<f64>,
    failure_rate: f64,
    broken: HashSet<String>,
    rng: ChaCha8Rng,
}

impl AssetModel {
    pub fn new(rng: ChaCha8Rng, profile: &AssetProfile) -> Result<Self, SimError> {
        if profile.median_latency_ms.is_nan() || profile.median_latency_ms <= 0.0 {
            return Err(SimError::InvalidConfig(format!(
                "median latency must be positive, got {}",
                profile.median_latency_ms
            )));
        }
        let latency =
            LogNormal::new(profile.median_latency_ms.ln(), profile.latency_sigma).map_err(SimError::distribution)?;
        Ok(Self {
            latency,
            failure_rate: profile.failure_rate.clamp(0.0, 1.0),
            broken: HashSet::new(),
            rng,
        })
    }

    /// Makes every request for `pano_id` fail.
    pub fn mark_broken(&mut self, pano_id: impl Into<String>) {
        self.broken.insert(pano_id.into());
    }

    /// Picks broken panos from `ids` with probability `rate` each.
    pub fn break_some<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>, rate: f64) -> usize {
        let rate = rate.clamp(0.0, 1.0);
        let mut count = 0;
        for id in ids {
            if self.rng.gen_bool(rate) {
                self.mark_broken(id);
                count += 1;
            }
        }
        count
    }

    pub fn broken_count(&self) -> usize {
        self.broken.len()
    }

    /// Samples the response to a request for `url`.
    pub fn sample(&mut self, url: &str) -> FetchOutcome {
        let latency = Duration::from_secs_f64(self.latency.sample(&mut self.rng) / 1000.0);
        let broken = pano_id(url).is_some_and(|id| self.broken.contains(id));
        let failed = broken || self.rng.gen_bool(self.failure_rate);
        let result = if broken {
            Err(EnvError::unavailable(url, 404))
        } else if failed {
            Err(EnvError::asset(url, "503 Service Unavailable"))
        } else {
            Ok(FetchedAsset::new(url, 40_000 + self.rng.gen_range(0..20_000)))
        };
        FetchOutcome { latency, result }
    }
}

/// The `pano` query parameter of an image URL.
fn pano_id(url: &str) -> Option<&str> {
    let query = url.split_once('?').map_or(url, |(_, q)| q);
    query.split('&').find_map(|kv| kv.strip_prefix("pano="))
}

/// `AssetFetcher` over an [`AssetModel`], waiting out latency on tokio time.
///
/// Used to run the real `PlayerRuntime` against the simulated service under
/// a paused tokio clock.
pub struct SimFetcher {
    model: Mutex<AssetModel>,
    requests: AtomicU64,
}

impl SimFetcher {
    pub fn new(model: AssetModel) -> Self {
        Self {
            model: Mutex::new(model),
            requests: AtomicU64::new(0),
        }
    }

    /// Requests served so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AssetFetcher for SimFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, EnvError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let outcome = {
            let mut model = self
                .model
                .lock()
                .map_err(|_| EnvError::asset(url, "asset model poisoned"))?;
            model.sample(url)
        };
        tokio::time::sleep(outcome.latency).await;
        outcome.result
    }
}
