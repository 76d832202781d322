//! Side effects requested by the engine.
//!
//! The engine performs no IO and owns no timers. Everything it wants done is
//! pushed to an outbox as a [`Command`] and executed by whoever drives it
//! (the tokio runtime or the simulation world). Scheduled work comes back
//! through [`PlaybackEngine::wake`](crate::PlaybackEngine::wake).

use crate::protocol::OutboundMessage;
use crate::record::LoadTicket;
use crate::scheduler::TimerToken;
use std::time::Duration;

/// One effect for the driver to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Load the image for `index`; report the result with the same ticket
    Fetch {
        index: usize,
        ticket: LoadTicket,
        url: String,
    },

    /// Call back with `wake` after `delay`
    Schedule { delay: Duration, wake: Wake },

    /// Send a message upstream
    Send(OutboundMessage),
}

/// A scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wake {
    /// Frame timer fired
    Frame(TimerToken),

    /// A yielded prefetch pass may continue
    PrefetchResume,

    /// Backoff for a failed load elapsed
    Retry { index: usize, ticket: LoadTicket },
}
