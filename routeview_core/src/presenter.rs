//! Rendering seam.
//!
//! The engine reports what should be on screen through [`Presenter`]. All
//! methods default to no-ops so a presenter only implements what it draws.

use crate::error::PlaybackError;
use crate::geometry::RouteGeometry;
use crate::progress::ProgressSnapshot;
use crate::record::{Record, ResolvedAsset};

/// The record now on screen.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub index: usize,
    pub record: &'a Record,

    /// `None` for no-imagery records
    pub asset: Option<&'a ResolvedAsset>,

    /// Whether playback will continue past this frame
    pub playing: bool,
}

/// Processing status as the user should see it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusView {
    pub text: String,

    /// Whether a cancel action should be offered
    pub cancelable: bool,

    /// Whether a resume action should be offered
    pub resumable: bool,

    /// The stream connection dropped
    pub connection_lost: bool,
}

/// Receives display updates from the engine.
pub trait Presenter: Send + 'static {
    /// A record became current and can be shown.
    fn show_frame(&mut self, _frame: &Frame<'_>) {}

    /// The cursor moved to a record whose image is still loading.
    fn frame_delayed(&mut self, _index: usize) {}

    fn set_route(&mut self, _route: &RouteGeometry) {}

    fn set_status(&mut self, _status: &StatusView) {}

    fn set_title(&mut self, _title: &str) {}

    fn progress_changed(&mut self, _progress: &ProgressSnapshot) {}

    /// The session failed and will not recover.
    fn session_error(&mut self, _error: &PlaybackError) {}
}

/// A presenter call captured by [`RecordingPresenter`].
#[derive(Debug, Clone, PartialEq)]
pub enum PresenterEvent {
    Frame {
        index: usize,
        at_distance: f64,
        placeholder: bool,
    },
    Delayed(usize),
    Route {
        distance: Option<f64>,
    },
    Status(StatusView),
    Title(String),
    Error(PlaybackError),
}

/// Presenter that records every call, for tests and the simulator.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    pub events: Vec<PresenterEvent>,

    /// Latest progress; progress updates are too frequent to log as events
    pub last_progress: Option<ProgressSnapshot>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indices passed to `show_frame`, in order.
    pub fn shown_indices(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PresenterEvent::Frame { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    /// Indices passed to `frame_delayed`, in order.
    pub fn delayed_indices(&self) -> Vec<usize> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PresenterEvent::Delayed(index) => Some(*index),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<&PlaybackError> {
        self.events
            .iter()
            .filter_map(|e| match e {
                PresenterEvent::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    pub fn last_status(&self) -> Option<&StatusView> {
        self.events.iter().rev().find_map(|e| match e {
            PresenterEvent::Status(status) => Some(status),
            _ => None,
        })
    }
}

impl Presenter for RecordingPresenter {
    fn show_frame(&mut self, frame: &Frame<'_>) {
        self.events.push(PresenterEvent::Frame {
            index: frame.index,
            at_distance: frame.record.at_distance,
            placeholder: frame.asset == Some(&ResolvedAsset::Placeholder),
        });
    }

    fn frame_delayed(&mut self, index: usize) {
        self.events.push(PresenterEvent::Delayed(index));
    }

    fn set_route(&mut self, route: &RouteGeometry) {
        self.events.push(PresenterEvent::Route {
            distance: route.total_distance(),
        });
    }

    fn set_status(&mut self, status: &StatusView) {
        self.events.push(PresenterEvent::Status(status.clone()));
    }

    fn set_title(&mut self, title: &str) {
        self.events.push(PresenterEvent::Title(title.to_string()));
    }

    fn progress_changed(&mut self, progress: &ProgressSnapshot) {
        self.last_progress = Some(progress.clone());
    }

    fn session_error(&mut self, error: &PlaybackError) {
        self.events.push(PresenterEvent::Error(error.clone()));
    }
}
