//! Presenter that reports playback through the log.

use routeview_core::{Control, Frame, PlaybackError, Presenter, ResolvedAsset, RouteBounds, RouteGeometry, StatusView};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct LogPresenter {
    frames_shown: usize,
    placeholders: usize,
    delays: usize,
    off_route: usize,
    bounds: Option<RouteBounds>,
    status: StatusView,
    failed: bool,

    /// Receives `Shutdown` once the last record is on screen
    stop_at_end: Option<mpsc::Sender<Control>>,
}

impl LogPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_at_end(mut self, controls: mpsc::Sender<Control>) -> Self {
        self.stop_at_end = Some(controls);
        self
    }

    pub fn frames_shown(&self) -> usize {
        self.frames_shown
    }

    pub fn placeholders(&self) -> usize {
        self.placeholders
    }

    pub fn delays(&self) -> usize {
        self.delays
    }

    /// Frames whose position lies outside the route's bounding box.
    pub fn off_route(&self) -> usize {
        self.off_route
    }

    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl Presenter for LogPresenter {
    fn show_frame(&mut self, frame: &Frame<'_>) {
        self.frames_shown += 1;
        match frame.asset {
            Some(ResolvedAsset::Image(uri)) => {
                info!("[{:>5}] {:>9.1} m  {}", frame.index, frame.record.at_distance, uri)
            }
            Some(ResolvedAsset::Placeholder) => {
                self.placeholders += 1;
                warn!("[{:>5}] {:>9.1} m  (image unavailable)", frame.index, frame.record.at_distance)
            }
            None => info!("[{:>5}] {:>9.1} m  (no imagery)", frame.index, frame.record.at_distance),
        }
        if self.bounds.is_some_and(|b| !b.contains(frame.record.point)) {
            self.off_route += 1;
            debug!(
                "Record {} at ({:.5}, {:.5}) lies outside the route bounds",
                frame.index, frame.record.point.lat, frame.record.point.lng
            );
        }

        if frame.record.is_last {
            info!("Reached the end of the route");
            if let Some(controls) = self.stop_at_end.take() {
                let _ = controls.try_send(Control::Shutdown);
            }
        }
    }

    fn frame_delayed(&mut self, index: usize) {
        self.delays += 1;
        debug!("Waiting for image of record {}", index);
    }

    fn set_route(&mut self, route: &RouteGeometry) {
        self.bounds = route.bounds;
        match route.total_distance() {
            Some(distance) => info!("Route: {} points, {:.1} km", route.points.len(), distance / 1000.0),
            None => info!("Route: {} points", route.points.len()),
        }
    }

    fn set_status(&mut self, status: &StatusView) {
        if *status == self.status {
            return;
        }
        if status.connection_lost && !self.status.connection_lost {
            warn!("Connection to the route stream lost");
        }
        let mut actions = Vec::new();
        if status.cancelable {
            actions.push("cancel");
        }
        if status.resumable {
            actions.push("resume");
        }
        if actions.is_empty() {
            info!("Status: {}", status.text);
        } else {
            info!("Status: {} [{}]", status.text, actions.join(", "));
        }
        self.status = status.clone();
    }

    fn set_title(&mut self, title: &str) {
        info!("Playing \"{}\"", title);
    }

    fn session_error(&mut self, err: &PlaybackError) {
        self.failed = true;
        error!("Session failed: {}", err);
    }
}
