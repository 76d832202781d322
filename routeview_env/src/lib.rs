//! RouteView Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seam that lets the RouteView playback
//! engine run both in **Production** (tokio, websocket, HTTP image service)
//! and in **Simulation** (virtual clock, seeded latency and failures).
//!
//! # Core Concept: The Reactor Pattern
//!
//! The engine never touches the outside world directly. Everything that
//! would introduce non-determinism goes through a trait:
//! - Time (`now()`, `sleep()`, `spawn()`) via [`PlaybackContext`]
//! - Image assets (`fetch()`) via [`AssetFetcher`]
//! - The pano stream (`recv()`, `send()`) via [`StreamTransport`]
//!
//! # Example
//!
//! ```ignore
//! use routeview_env::{PlaybackContext, StreamTransport};
//!
//! async fn pump<Ctx: PlaybackContext, T: StreamTransport>(ctx: &Ctx, transport: &T) {
//!     loop {
//!         tokio::select! {
//!             msg = transport.recv() => handle_message(msg),
//!             _ = ctx.sleep(Duration::from_millis(100)) => tick(),
//!         }
//!     }
//! }
//! ```

mod assets;
mod context;
mod error;
mod tokio_impl;
mod transport;
mod types;

pub use assets::{AssetFetcher, FetchedAsset};
pub use context::PlaybackContext;
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use transport::StreamTransport;
pub use types::SessionId;
