//! Async driver for the playback engine.
//!
//! `PlayerRuntime` owns a [`PlaybackEngine`] and executes its commands
//! against the environment traits:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     PlayerRuntime                        │
//! │                                                          │
//! │  StreamTransport::recv ──> engine.ingest_json            │
//! │  fetch task results    ──> engine.on_asset_loaded        │
//! │  Control channel       ──> play / pause / seek / ...     │
//! │  earliest deadline     ──> engine.wake                   │
//! │                                                          │
//! │  engine.drain_commands ──> spawn fetch / push deadline / │
//! │                            StreamTransport::send         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on one task. Fetches run on spawned tasks and only report
//! back through a channel.

use crate::command::{Command, Wake};
use crate::config::PlayerConfig;
use crate::engine::PlaybackEngine;
use crate::error::PlaybackError;
use crate::presenter::Presenter;
use crate::record::LoadTicket;
use routeview_env::{AssetFetcher, EnvError, FetchedAsset, PlaybackContext, SessionId, StreamTransport};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// User input for a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Play,
    Pause,
    /// Seek to a distance in meters
    Seek(f64),
    /// Seek to a fraction of the route
    SeekFraction(f64),
    Cancel,
    Resume,
    LinkPanos(String, String),
    Shutdown,
}

#[derive(Debug)]
struct AssetCompletion {
    index: usize,
    ticket: LoadTicket,
    result: Result<FetchedAsset, EnvError>,
}

/// A wake waiting for its deadline. Ordered by deadline, then by the order
/// it was scheduled in.
#[derive(Debug)]
struct Pending {
    deadline: Duration,
    order: u64,
    wake: Wake,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.order).cmp(&(other.deadline, other.order))
    }
}

/// Runs one playback session.
pub struct PlayerRuntime<Ctx, F, T, P>
where
    Ctx: PlaybackContext,
    F: AssetFetcher,
    T: StreamTransport,
    P: Presenter,
{
    session: SessionId,
    ctx: Arc<Ctx>,
    fetcher: Arc<F>,
    transport: Arc<T>,
    engine: PlaybackEngine<P>,

    timers: BinaryHeap<Reverse<Pending>>,
    next_order: u64,

    completions_tx: mpsc::UnboundedSender<AssetCompletion>,
    completions_rx: mpsc::UnboundedReceiver<AssetCompletion>,

    transport_open: bool,
}

impl<Ctx, F, T, P> PlayerRuntime<Ctx, F, T, P>
where
    Ctx: PlaybackContext,
    F: AssetFetcher,
    T: StreamTransport,
    P: Presenter,
{
    pub fn new(
        ctx: Arc<Ctx>,
        fetcher: Arc<F>,
        transport: Arc<T>,
        config: PlayerConfig,
        presenter: P,
    ) -> Result<Self, PlaybackError> {
        let engine = PlaybackEngine::new(config, presenter)?;
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Ok(Self {
            session: SessionId::new(),
            ctx,
            fetcher,
            transport,
            engine,
            timers: BinaryHeap::new(),
            next_order: 0,
            completions_tx,
            completions_rx,
            transport_open: true,
        })
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn engine(&self) -> &PlaybackEngine<P> {
        &self.engine
    }

    /// Runs until `Control::Shutdown` or until the control channel closes.
    /// Returns the presenter.
    pub async fn run(mut self, mut controls: mpsc::Receiver<Control>) -> Result<P, PlaybackError> {
        info!("Session {} started", self.session);
        if self.engine.config().autoplay {
            self.engine.play()?;
        }
        self.flush().await;

        loop {
            let ctx = Arc::clone(&self.ctx);
            let transport = Arc::clone(&self.transport);
            let transport_open = self.transport_open;
            let sleep_for = self
                .timers
                .peek()
                .map(|Reverse(p)| p.deadline.saturating_sub(ctx.now()));

            tokio::select! {
                message = transport.recv(), if transport_open => match message {
                    Some(text) => {
                        if let Err(err) = self.engine.ingest_json(&text) {
                            warn!("Session {}: message rejected: {}", self.session, err);
                        }
                    }
                    None => {
                        self.transport_open = false;
                        self.engine.transport_lost();
                    }
                },
                Some(done) = self.completions_rx.recv() => {
                    self.engine.on_asset_loaded(done.index, done.ticket, done.result);
                }
                control = controls.recv() => match control {
                    None | Some(Control::Shutdown) => break,
                    Some(control) => self.apply_control(control),
                },
                _ = sleep_or_pending(ctx.as_ref(), sleep_for) => self.fire_due(),
            }

            self.flush().await;
        }

        info!("Session {} stopped at record {}", self.session, self.engine.cursor());
        Ok(self.engine.into_presenter())
    }

    fn apply_control(&mut self, control: Control) {
        debug!("Control: {:?}", control);
        let result = match control.clone() {
            Control::Play => self.engine.play(),
            Control::Pause => {
                self.engine.pause();
                Ok(())
            }
            Control::Seek(distance) => self.engine.seek(distance).map(|_| ()),
            Control::SeekFraction(fraction) => self.engine.seek_fraction(fraction).map(|_| ()),
            Control::Cancel => self.engine.request_cancel(),
            Control::Resume => self.engine.request_resume(),
            Control::LinkPanos(src, dst) => self.engine.link_panos(src, dst),
            Control::Shutdown => Ok(()),
        };
        if let Err(err) = result {
            warn!("{:?} rejected: {}", control, err);
        }
    }

    fn fire_due(&mut self) {
        let now = self.ctx.now();
        while self.timers.peek().is_some_and(|Reverse(p)| p.deadline <= now) {
            if let Some(Reverse(pending)) = self.timers.pop() {
                self.engine.wake(pending.wake);
            }
        }
    }

    /// Executes queued engine commands.
    async fn flush(&mut self) {
        loop {
            let commands = self.engine.drain_commands();
            if commands.is_empty() {
                return;
            }
            for command in commands {
                match command {
                    Command::Fetch { index, ticket, url } => self.spawn_fetch(index, ticket, url),
                    Command::Schedule { delay, wake } => {
                        self.next_order += 1;
                        self.timers.push(Reverse(Pending {
                            deadline: self.ctx.now() + delay,
                            order: self.next_order,
                            wake,
                        }));
                    }
                    Command::Send(message) => {
                        let text = match message.to_json() {
                            Ok(text) => text,
                            Err(err) => {
                                warn!("Could not encode {:?}: {}", message, err);
                                continue;
                            }
                        };
                        if let Err(err) = self.transport.send(text).await {
                            warn!("Send failed: {}", err);
                            self.engine.transport_lost();
                        }
                    }
                }
            }
        }
    }

    fn spawn_fetch(&self, index: usize, ticket: LoadTicket, url: String) {
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.completions_tx.clone();
        let timeout = self.engine.config().asset_timeout();
        self.ctx.spawn("asset-fetch", async move {
            let result = match tokio::time::timeout(timeout, fetcher.fetch(&url)).await {
                Ok(result) => result,
                Err(_) => Err(EnvError::Timeout(timeout.as_millis() as u64)),
            };
            // The runtime may have shut down; nobody is left to tell.
            let _ = tx.send(AssetCompletion { index, ticket, result });
        });
    }
}

async fn sleep_or_pending<Ctx: PlaybackContext>(ctx: &Ctx, delay: Option<Duration>) {
    match delay {
        Some(delay) => ctx.sleep(delay).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::RecordingPresenter;
    use async_trait::async_trait;
    use routeview_env::TokioContext;
    use tokio::sync::Mutex;

    struct ScriptedTransport {
        inbound: Mutex<mpsc::UnboundedReceiver<String>>,
        sent: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                inbound: Mutex::new(rx),
                sent: Mutex::new(Vec::new()),
            });
            (transport, tx)
        }
    }

    #[async_trait]
    impl StreamTransport for ScriptedTransport {
        async fn recv(&self) -> Option<String> {
            self.inbound.lock().await.recv().await
        }

        async fn send(&self, text: String) -> Result<(), EnvError> {
            self.sent.lock().await.push(text);
            Ok(())
        }
    }

    /// Resolves every image after a fixed delay; URLs containing "broken" fail.
    struct DelayFetcher {
        delay: Duration,
    }

    #[async_trait]
    impl AssetFetcher for DelayFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedAsset, EnvError> {
            tokio::time::sleep(self.delay).await;
            if url.contains("broken") {
                Err(EnvError::asset(url, "503"))
            } else {
                Ok(FetchedAsset::new(url, 2048))
            }
        }
    }

    const PANOS: &str = r#"{
        "route_distance": 60.0,
        "status": {"text": "Getting panos", "cancelable": true},
        "panos": [
            {"type": "pano", "id": "a", "heading": 0, "point": {"lat": 0, "lng": 0},
             "at_dist": 0, "dist_from_last": 0, "prev_route_index": 0},
            {"type": "pano", "id": "b", "heading": 0, "point": {"lat": 0, "lng": 0},
             "at_dist": 30, "dist_from_last": 30, "prev_route_index": 0},
            {"type": "no_images", "point": {"lat": 0, "lng": 0},
             "at_dist": 45, "dist_from_last": 15, "prev_route_index": 0},
            {"type": "pano", "id": "broken", "heading": 0, "point": {"lat": 0, "lng": 0},
             "at_dist": 60, "dist_from_last": 15, "prev_route_index": 0, "last": true}
        ]
    }"#;

    fn runtime(
        transport: Arc<ScriptedTransport>,
        fetch_delay: Duration,
    ) -> PlayerRuntime<TokioContext, DelayFetcher, ScriptedTransport, RecordingPresenter> {
        let config = PlayerConfig {
            desired_speed: 10.0,
            max_fetch_attempts: 2,
            ..PlayerConfig::default()
        };
        PlayerRuntime::new(
            TokioContext::shared(),
            Arc::new(DelayFetcher { delay: fetch_delay }),
            transport,
            config,
            RecordingPresenter::new(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_stream_to_the_end() {
        let (transport, inbound) = ScriptedTransport::new();
        let (controls, controls_rx) = mpsc::channel(8);
        let handle = tokio::spawn(runtime(transport, Duration::from_millis(200)).run(controls_rx));

        inbound.send(PANOS.to_string()).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        controls.send(Control::Shutdown).await.unwrap();

        let presenter = handle.await.unwrap().unwrap();
        assert_eq!(presenter.shown_indices(), vec![0, 1, 2, 3]);
        let last = presenter.events.iter().rev().find_map(|e| match e {
            crate::presenter::PresenterEvent::Frame { placeholder, .. } => Some(*placeholder),
            _ => None,
        });
        assert_eq!(last, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_loss_keeps_buffered_playback() {
        let (transport, inbound) = ScriptedTransport::new();
        let (controls, controls_rx) = mpsc::channel(8);
        let handle = tokio::spawn(runtime(transport, Duration::from_millis(50)).run(controls_rx));

        inbound.send(PANOS.to_string()).unwrap();
        drop(inbound);
        tokio::time::sleep(Duration::from_secs(30)).await;
        controls.send(Control::Shutdown).await.unwrap();

        let presenter = handle.await.unwrap().unwrap();
        assert_eq!(presenter.shown_indices(), vec![0, 1, 2, 3]);
        assert!(presenter.last_status().unwrap().connection_lost);
        assert!(presenter.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_control_reaches_server() {
        let (transport, inbound) = ScriptedTransport::new();
        let (controls, controls_rx) = mpsc::channel(8);
        let handle = tokio::spawn(runtime(Arc::clone(&transport), Duration::from_millis(50)).run(controls_rx));

        inbound.send(PANOS.to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        controls.send(Control::Pause).await.unwrap();
        controls.send(Control::Cancel).await.unwrap();
        controls.send(Control::LinkPanos("a".into(), "b".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        controls.send(Control::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();

        let sent = transport.sent.lock().await.clone();
        assert_eq!(sent, vec![r#""cancel""#.to_string(), r#"{"add_pano_chain_item":["a","b"]}"#.to_string()]);
    }
}
