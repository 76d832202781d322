//! In-memory pano stream.

use crate::error::SimError;
use async_trait::async_trait;
use routeview_core::InboundMessage;
use routeview_env::{EnvError, StreamTransport};
use tokio::sync::{mpsc, Mutex};

/// Player side of a simulated stream.
pub struct SimTransport {
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Server side of a simulated stream. Dropping it (or calling
/// [`close`](SimServer::close)) ends the player's `recv` stream.
pub struct SimServer {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Creates a connected transport/server pair.
pub fn sim_link() -> (SimTransport, SimServer) {
    let (to_player, inbound) = mpsc::unbounded_channel();
    let (outbound, from_player) = mpsc::unbounded_channel();
    (
        SimTransport {
            inbound: Mutex::new(inbound),
            outbound,
        },
        SimServer {
            tx: Some(to_player),
            rx: from_player,
        },
    )
}

impl SimServer {
    /// Encodes and sends a message to the player.
    pub fn push(&self, message: &InboundMessage) -> Result<(), SimError> {
        self.push_raw(message.to_json()?)
    }

    /// Sends a text frame as is.
    pub fn push_raw(&self, text: impl Into<String>) -> Result<(), SimError> {
        let tx = self.tx.as_ref().ok_or(SimError::LinkClosed)?;
        tx.send(text.into()).map_err(|_| SimError::LinkClosed)
    }

    /// Ends the stream. The player sees EOF once queued messages are read.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Messages the player sent so far.
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            sent.push(text);
        }
        sent
    }
}

#[async_trait]
impl StreamTransport for SimTransport {
    async fn recv(&self) -> Option<String> {
        self.inbound.lock().await.recv().await
    }

    async fn send(&self, text: String) -> Result<(), EnvError> {
        self.outbound.send(text).map_err(|_| EnvError::Closed)
    }
}
