//! Playback records and their asset state.

use crate::geometry::LatLng;
use crate::protocol::{WireKind, WireRecord};

/// Handle for one asset load attempt.
///
/// Every issued fetch gets a fresh ticket; a completion is applied only if
/// the record still holds the same ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadTicket(pub u64);

impl std::fmt::Display for LoadTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a record shows.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordKind {
    /// A panorama image, requested by id and heading
    Pano { id: String, heading: f64 },
    /// A stretch of route without imagery
    NoImages,
}

/// Route-point indices spanned by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteIndexRange {
    pub start: usize,
    pub end: usize,
}

/// A loaded (or given-up-on) image.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedAsset {
    /// Location of the loaded image
    Image(String),
    /// Every attempt failed; show a placeholder and keep playing
    Placeholder,
}

/// Load state of a record's image. Only the prefetcher writes it.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetState {
    Unrequested,
    Loading { ticket: LoadTicket, attempt: u32 },
    /// Waiting out a backoff after a failed attempt
    Retrying { ticket: LoadTicket, attempt: u32 },
    Ready(ResolvedAsset),
}

/// One entry of the playback sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub kind: RecordKind,
    pub point: LatLng,
    pub original_point: LatLng,

    /// Cumulative route distance; the sequence's sort key
    pub at_distance: f64,
    pub distance_from_previous: f64,
    pub route_index_range: RouteIndexRange,

    /// Final record of a finished stream
    pub is_last: bool,

    pub(crate) asset: AssetState,
}

impl Record {
    /// Creates a pano record with an unrequested asset.
    pub fn pano(id: impl Into<String>, heading: f64, point: LatLng, at_distance: f64, distance_from_previous: f64) -> Self {
        Self {
            kind: RecordKind::Pano {
                id: id.into(),
                heading,
            },
            point,
            original_point: point,
            at_distance,
            distance_from_previous,
            route_index_range: RouteIndexRange { start: 0, end: 0 },
            is_last: false,
            asset: AssetState::Unrequested,
        }
    }

    /// Creates a no-imagery record.
    pub fn no_images(point: LatLng, at_distance: f64, distance_from_previous: f64) -> Self {
        Self {
            kind: RecordKind::NoImages,
            point,
            original_point: point,
            at_distance,
            distance_from_previous,
            route_index_range: RouteIndexRange { start: 0, end: 0 },
            is_last: false,
            asset: AssetState::Unrequested,
        }
    }

    /// Marks this record as the final one of the stream.
    pub fn with_last(mut self, is_last: bool) -> Self {
        self.is_last = is_last;
        self
    }

    /// Sets the asset state of a record that is not yet in a sequence.
    pub fn with_asset(mut self, asset: AssetState) -> Self {
        self.asset = asset;
        self
    }

    /// Converts a wire record. `prev_end` is the route index where the
    /// previous record ended and is used when the server omits a start index.
    pub fn from_wire(wire: WireRecord, prev_end: usize) -> Self {
        let kind = match wire.kind {
            WireKind::Pano { id, heading } => RecordKind::Pano { id, heading },
            WireKind::NoImages => RecordKind::NoImages,
        };
        let end = wire.prev_route_index;
        let start = wire.start_route_index.unwrap_or(prev_end).min(end);
        Self {
            kind,
            point: wire.point,
            original_point: wire.original_point.unwrap_or(wire.point),
            at_distance: wire.at_dist,
            distance_from_previous: wire.dist_from_last,
            route_index_range: RouteIndexRange { start, end },
            is_last: wire.last,
            asset: AssetState::Unrequested,
        }
    }

    pub fn is_pano(&self) -> bool {
        matches!(self.kind, RecordKind::Pano { .. })
    }

    pub fn asset(&self) -> &AssetState {
        &self.asset
    }

    /// The loaded asset, if any.
    pub fn resolved(&self) -> Option<&ResolvedAsset> {
        match &self.asset {
            AssetState::Ready(asset) => Some(asset),
            _ => None,
        }
    }

    /// True if the record can be shown without waiting. No-imagery records
    /// need no asset and never block.
    pub fn is_ready(&self) -> bool {
        match self.kind {
            RecordKind::NoImages => true,
            RecordKind::Pano { .. } => matches!(self.asset, AssetState::Ready(_)),
        }
    }

    /// True for a pano whose load has not been started yet.
    pub fn is_unrequested(&self) -> bool {
        self.is_pano() && matches!(self.asset, AssetState::Unrequested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(kind: WireKind, start: Option<usize>) -> WireRecord {
        WireRecord {
            kind,
            point: LatLng::new(1.0, 2.0),
            original_point: None,
            at_dist: 40.0,
            dist_from_last: 15.0,
            prev_route_index: 7,
            start_route_index: start,
            last: false,
        }
    }

    #[test]
    fn test_from_wire_uses_previous_end_as_start() {
        let rec = Record::from_wire(
            wire(
                WireKind::Pano {
                    id: "x".into(),
                    heading: 10.0,
                },
                None,
            ),
            4,
        );
        assert_eq!(rec.route_index_range, RouteIndexRange { start: 4, end: 7 });
        assert_eq!(rec.original_point, rec.point);
        assert!(rec.is_unrequested());
        assert!(!rec.is_ready());
    }

    #[test]
    fn test_no_images_is_always_ready() {
        let rec = Record::from_wire(wire(WireKind::NoImages, Some(5)), 2);
        assert_eq!(rec.route_index_range, RouteIndexRange { start: 5, end: 7 });
        assert!(rec.is_ready());
        assert!(!rec.is_unrequested());
        assert!(rec.resolved().is_none());
    }

    #[test]
    fn test_pano_ready_only_when_resolved() {
        let mut rec = Record::pano("p", 0.0, LatLng::new(0.0, 0.0), 0.0, 0.0);
        rec.asset = AssetState::Loading {
            ticket: LoadTicket(1),
            attempt: 1,
        };
        assert!(!rec.is_ready());
        rec.asset = AssetState::Ready(ResolvedAsset::Placeholder);
        assert!(rec.is_ready());
    }
}
