//! Stream ingestion.
//!
//! Applies inbound messages to the engine. Fields are handled in a fixed
//! order: error, name, status, api key, route, new records, reset. A batch
//! and a reset in the same message therefore append first and truncate
//! second.

use crate::engine::PlaybackEngine;
use crate::error::PlaybackError;
use crate::geometry::{LatLng, RouteBounds, RouteGeometry};
use crate::presenter::Presenter;
use crate::protocol::{InboundMessage, WireRecord};
use crate::record::Record;
use tracing::{debug, info};

/// What one message changed in the sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Records appended
    pub appended: usize,

    /// Records discarded by a reset
    pub removed: usize,
}

impl<P: Presenter> PlaybackEngine<P> {
    /// Decodes and applies one JSON text frame.
    ///
    /// A frame that does not decode faults the session.
    pub fn ingest_json(&mut self, text: &str) -> Result<IngestSummary, PlaybackError> {
        if self.scheduler.is_faulted() {
            return Err(PlaybackError::SessionFaulted);
        }
        match InboundMessage::from_json(text) {
            Ok(message) => self.ingest(message),
            Err(err) => Err(self.fault(err)),
        }
    }

    /// Applies one inbound message.
    ///
    /// # Errors
    /// * `SessionFaulted` - the session already failed
    /// * `Upstream` - the server reported an error (faults the session)
    /// * `StreamDesync` - the message contradicts the sequence (faults the session)
    pub fn ingest(&mut self, message: InboundMessage) -> Result<IngestSummary, PlaybackError> {
        if self.scheduler.is_faulted() {
            return Err(PlaybackError::SessionFaulted);
        }
        match self.apply(message) {
            Ok(summary) => Ok(summary),
            Err(err) if err.is_fatal() => Err(self.fault(err)),
            Err(err) => Err(err),
        }
    }

    fn apply(&mut self, message: InboundMessage) -> Result<IngestSummary, PlaybackError> {
        if let Some(error) = message.error {
            return Err(PlaybackError::Upstream(error));
        }

        if let Some(name) = message.name {
            info!("Route: {}", name);
            self.presenter.set_title(&name);
            self.title = Some(name);
        }

        if let Some(status) = message.status {
            debug!("Status: {}", status.text);
            self.status.text = status.text;
            self.status.cancelable = status.cancelable;
            self.status.resumable = status.resumable;
            self.presenter.set_status(&self.status);
        }

        if let Some(key) = message.api_key {
            self.prefetcher.set_api_key(Some(key));
        }

        if message.route_points.is_some() || message.route_bounds.is_some() || message.route_distance.is_some() {
            self.apply_route(message.route_points, message.route_bounds, message.route_distance);
        }

        let mut summary = IngestSummary::default();
        if let Some(batch) = message.panos {
            summary.appended = self.append_batch(batch)?;
        }
        if let Some(index) = message.reset_panos_index {
            summary.removed = self.reset(index)?;
        }
        Ok(summary)
    }

    fn apply_route(&mut self, points: Option<Vec<LatLng>>, bounds: Option<RouteBounds>, distance: Option<f64>) {
        let mut route = self.route.take().unwrap_or_default();
        if let Some(points) = points {
            route.points = points;
        }
        route.bounds = bounds.or(route.bounds).or_else(|| RouteBounds::from_points(&route.points));
        if distance.is_some() {
            route.distance = distance;
        }

        if let Some(total) = route.total_distance() {
            info!("Route of {} points, {:.0}m", route.points.len(), total);
            self.progress.set_route_distance(total);
        }
        self.presenter.set_route(&route);
        self.route = Some(route);
        self.publish_progress();
    }

    fn append_batch(&mut self, batch: Vec<WireRecord>) -> Result<usize, PlaybackError> {
        let route_len = self.route.as_ref().map_or(0, |r: &RouteGeometry| r.points.len());
        let mut prev_end = self.sequence.last_route_index();
        let mut records = Vec::with_capacity(batch.len());
        for wire in batch {
            if route_len > 0 && wire.prev_route_index >= route_len {
                return Err(PlaybackError::desync(format!(
                    "record references route point {} of {}",
                    wire.prev_route_index, route_len
                )));
            }
            let record = Record::from_wire(wire, prev_end);
            prev_end = record.route_index_range.end;
            records.push(record);
        }

        let range = self.sequence.append(records)?;
        if range.is_empty() {
            return Ok(0);
        }
        let appended = range.len();
        self.progress
            .records_appended(range.start, &self.sequence.records()[range.clone()]);
        debug!("Appended records {}..{}", range.start, range.end);

        self.fill();
        self.continue_playback();
        self.publish_progress();
        Ok(appended)
    }

    fn reset(&mut self, index: i64) -> Result<usize, PlaybackError> {
        let removed = self.sequence.truncate_after(index)?;
        let len = self.sequence.len();
        self.prefetcher.truncate(len);
        self.scheduler.truncate(len);
        let retained_end = self.sequence.last().map(|r| r.at_distance);
        self.progress.truncate_after(index, retained_end);
        info!("Reset after record {}: {} records discarded", index, removed);

        self.publish_progress();
        self.continue_playback();
        Ok(removed)
    }
}
