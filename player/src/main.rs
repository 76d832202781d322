//! RouteView player
//!
//! Connects to a route socket, streams the pano sequence and plays it back,
//! logging every frame. Playback is controlled with commands on stdin
//! (`play`, `pause`, `seek 1200`, `seek 50%`, `cancel`, `resume`, `quit`).

mod config;
mod controls;
mod http;
mod presenter;
mod ws;

use anyhow::{Context, Result};
use clap::Parser;
use config::FileConfig;
use http::HttpFetcher;
use presenter::LogPresenter;
use routeview_core::{Control, PlayerRuntime};
use routeview_env::TokioContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ws::WsTransport;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Play a streamed street-level route
#[derive(Parser, Debug)]
#[command(name = "player")]
#[command(about = "Stream and play back a RouteView route", long_about = None)]
struct Args {
    /// Route socket, e.g. ws://localhost:8000/route_sock/42/
    #[arg(short, long)]
    url: Option<String>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Save downloaded images into this directory
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    /// Wait for `play` instead of starting right away
    #[arg(long)]
    no_autoplay: bool,

    /// Exit once the last record has been shown
    #[arg(long)]
    exit_at_end: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn merge_into(self, config: &mut FileConfig) {
        if let Some(url) = self.url {
            config.url = Some(url);
        }
        if let Some(dir) = self.frames_dir {
            config.frames_dir = Some(dir);
        }
        if self.no_autoplay {
            config.playback.autoplay = false;
        }
        if self.exit_at_end {
            config.exit_at_end = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    args.merge_into(&mut config);
    config.playback.validate()?;

    let url = config
        .url
        .clone()
        .context("no route socket given; pass --url or set `url` in the config file")?;
    if let Some(dir) = &config.frames_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let transport = Arc::new(WsTransport::connect(&url, CONNECT_TIMEOUT).await?);
    let fetcher = Arc::new(HttpFetcher::new(
        config.playback.asset_timeout(),
        config.frames_dir.clone(),
    )?);

    let (controls_tx, controls_rx) = mpsc::channel(32);
    let mut presenter = LogPresenter::new();
    if config.exit_at_end {
        presenter = presenter.stop_at_end(controls_tx.clone());
    }

    let runtime = PlayerRuntime::new(
        TokioContext::shared(),
        fetcher,
        Arc::clone(&transport),
        config.playback,
        presenter,
    )?;
    info!("Session {}", runtime.session());
    eprintln!("{}", controls::HELP);

    tokio::spawn(controls::forward_controls(
        BufReader::new(tokio::io::stdin()),
        controls_tx.clone(),
    ));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = controls_tx.send(Control::Shutdown).await;
        }
    });

    let presenter = runtime.run(controls_rx).await?;
    if let Err(err) = transport.close().await {
        warn!("Closing the route socket: {}", err);
    }

    info!(
        "Shown {} frames ({} placeholders, {} waits for images, {} off route)",
        presenter.frames_shown(),
        presenter.placeholders(),
        presenter.delays(),
        presenter.off_route()
    );
    if presenter.failed() {
        std::process::exit(1);
    }
    Ok(())
}
