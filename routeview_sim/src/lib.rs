//! RouteView Deterministic Simulation Testing (DST) Harness
//!
//! This crate provides a controlled environment in which a RouteView
//! playback session runs deterministically: a synthetic route streamed by a
//! simulated server, an image service with seeded latency and failures, and
//! user input, all on one virtual clock.
//!
//! # Core Principle: The Reactor Pattern
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock advances only from event to event
//! - **Network**: Stream messages and image responses are scheduled events
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ Event queue (virtual clock, ordered by time)         │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                │                     ▲              │
//! │  ┌────▼──────┐   ┌─────▼──────┐        ┌─────┴──────┐       │
//! │  │ Synthetic │   │  Playback  │ Fetch  │ AssetModel │       │
//! │  │   route   │──►│   Engine   │───────►│ (latency,  │       │
//! │  │ (stream)  │   │            │        │  failures) │       │
//! │  └───────────┘   └─────┬──────┘        └────────────┘       │
//! │                        │                                    │
//! │                 ┌──────▼─────────┐                          │
//! │                 │ Invariant checks│                          │
//! │                 └────────────────┘                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use routeview_sim::{SimWorld, SimConfig};
//!
//! let mut world = SimWorld::new(SimConfig { seed: 42, ..Default::default() })?;
//! world.stream_route(Duration::ZERO)?;
//! world.play()?;
//! world.run();
//! assert!(world.violations().is_empty());
//! ```

mod assets;
mod context;
mod error;
mod route;
mod runner;
mod transport;
mod world;
pub mod scenarios;

pub use assets::{AssetModel, AssetProfile, FetchOutcome, SimFetcher};
pub use context::SimContext;
pub use error::SimError;
pub use route::{RouteProfile, SyntheticRoute};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use transport::{sim_link, SimServer, SimTransport};
pub use world::{SimConfig, SimEvent, SimWorld};
