//! Stream transport abstraction for the pano stream.

use crate::error::EnvError;
use async_trait::async_trait;

/// Abstraction for the duplex message stream between player and server.
///
/// Messages are JSON-encoded text in both directions. Framing and connection
/// management belong to the implementation.
///
/// # Message Flow
///
/// ```text
/// Server                     Transport                   Player
///   |-- {"panos": [...]} ------->|                          |
///   |                            |-- recv() -> text ------->|
///   |                            |<-------- send("cancel") -|
///   |<---------- "cancel" -------|                          |
/// ```
#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Receives the next inbound message.
    ///
    /// # Returns
    /// * `Some(text)` - A JSON message was received
    /// * `None` - The stream is closed (disconnect or shutdown)
    async fn recv(&self) -> Option<String>;

    /// Sends a JSON-encoded message upstream.
    ///
    /// # Returns
    /// * `Ok(())` - Message handed to the connection
    /// * `Err(EnvError::Closed)` - The connection is gone
    async fn send(&self, text: String) -> Result<(), EnvError>;
}
