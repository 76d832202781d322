//! RouteView Core - Incremental playback of streamed panorama routes
//!
//! This library plays a route as a sequence of street-level panoramas that
//! arrives over a stream while the server is still computing it:
//! 1. **Ingestion**: distance-ordered records appended in batches, with suffix resets
//! 2. **Prefetching**: bounded-concurrency image loads ahead of the cursor
//! 3. **Adaptive playback**: frame delay driven by how much playback is buffered
//! 4. **Seeking**: binary search from route distance to record index
//!
//! The engine is Sans-IO; [`runtime::PlayerRuntime`] drives it on tokio
//! through the `routeview_env` traits.

pub mod buffer;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod ingest;
pub mod prefetch;
pub mod presenter;
pub mod progress;
pub mod protocol;
pub mod record;
pub mod runtime;
pub mod scheduler;
pub mod seek;
pub mod sequence;

// Re-export key types for convenience
pub use buffer::BufferEstimator;
pub use command::{Command, Wake};
pub use config::{AssetUrlConfig, PlayerConfig, RetryPolicy};
pub use engine::PlaybackEngine;
pub use error::PlaybackError;
pub use geometry::{LatLng, RouteBounds, RouteGeometry};
pub use ingest::IngestSummary;
pub use prefetch::{Completion, Prefetcher};
pub use presenter::{Frame, Presenter, PresenterEvent, RecordingPresenter, StatusView};
pub use progress::{ProgressSnapshot, Span};
pub use protocol::{InboundMessage, OutboundMessage, ProcessingStatus, WireKind, WireRecord};
pub use record::{AssetState, LoadTicket, Record, RecordKind, ResolvedAsset};
pub use runtime::{Control, PlayerRuntime};
pub use scheduler::{adaptive_speed, PlaybackState, TimerToken, MAX_FRAME_DELAY};
pub use sequence::Sequence;
