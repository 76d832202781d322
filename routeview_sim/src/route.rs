//! Synthetic routes and the stream messages that deliver them.
//!
//! A route is a seeded random walk. Every step becomes one route point and
//! one record, so `prev_route_index` of record `i` is `i`. Distances are
//! haversine lengths between consecutive points, which keeps `at_dist`
//! consistent with the geometry the player receives.

use crate::error::SimError;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use routeview_core::{InboundMessage, LatLng, ProcessingStatus, RouteBounds, WireKind, WireRecord};
use uuid::Uuid;

const METERS_PER_DEGREE: f64 = 111_320.0;

/// Shape of a generated route.
#[derive(Debug, Clone)]
pub struct RouteProfile {
    /// Number of records
    pub records: usize,

    /// Mean distance between records in meters
    pub mean_spacing_m: f64,

    /// Probability that a record is a no-imagery gap
    pub gap_rate: f64,

    /// First point of the route
    pub origin: LatLng,
}

impl Default for RouteProfile {
    fn default() -> Self {
        Self {
            records: 400,
            mean_spacing_m: 12.0,
            gap_rate: 0.05,
            origin: LatLng::new(51.5007, -0.1246),
        }
    }
}

/// A generated route and its records.
#[derive(Debug, Clone)]
pub struct SyntheticRoute {
    pub name: String,
    pub points: Vec<LatLng>,
    pub records: Vec<WireRecord>,
    pub distance: f64,
}

impl SyntheticRoute {
    /// Generates a route. The same RNG state always yields the same route.
    pub fn generate<R: Rng>(rng: &mut R, profile: &RouteProfile) -> Result<Self, SimError> {
        if !profile.mean_spacing_m.is_finite() {
            return Err(SimError::InvalidConfig(format!(
                "mean spacing must be finite, got {}",
                profile.mean_spacing_m
            )));
        }
        let spacing = profile.mean_spacing_m.max(1.0);
        let step = Normal::new(spacing, spacing * 0.3).map_err(SimError::distribution)?;
        let turn = Normal::new(0.0, 0.15).map_err(SimError::distribution)?;

        let mut heading: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
        let mut point = profile.origin;
        let mut at_dist = 0.0;
        let mut points = Vec::with_capacity(profile.records);
        let mut records = Vec::with_capacity(profile.records);

        for i in 0..profile.records {
            let dist_from_last = if i == 0 {
                0.0
            } else {
                heading += turn.sample(rng);
                let meters = step.sample(rng).max(1.0);
                let next = offset(point, heading, meters);
                let dist = point.distance_to(&next);
                point = next;
                dist
            };
            at_dist += dist_from_last;
            points.push(point);

            // Route starts and ends on imagery
            let gap = i > 0 && i + 1 < profile.records && rng.gen_bool(profile.gap_rate.clamp(0.0, 1.0));
            let kind = if gap {
                WireKind::NoImages
            } else {
                WireKind::Pano {
                    id: Uuid::from_u64_pair(rng.gen(), rng.gen()).simple().to_string(),
                    heading: heading.to_degrees().rem_euclid(360.0),
                }
            };
            records.push(WireRecord {
                kind,
                point,
                original_point: None,
                at_dist,
                dist_from_last,
                prev_route_index: i,
                start_route_index: gap.then(|| i - 1),
                last: i + 1 == profile.records,
            });
        }

        Ok(Self {
            name: format!("Synthetic route ({} records)", profile.records),
            points,
            records,
            distance: at_dist,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids of every pano on the route, in order.
    pub fn pano_ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().filter_map(|r| match &r.kind {
            WireKind::Pano { id, .. } => Some(id.as_str()),
            WireKind::NoImages => None,
        })
    }

    /// The opening message: title, status and route geometry.
    pub fn opening_message(&self) -> InboundMessage {
        InboundMessage {
            name: Some(self.name.clone()),
            status: Some(ProcessingStatus {
                text: "Finding panoramas".to_string(),
                cancelable: true,
                resumable: false,
            }),
            route_bounds: RouteBounds::from_points(&self.points),
            route_points: Some(self.points.clone()),
            route_distance: Some(self.distance),
            ..InboundMessage::default()
        }
    }

    /// Records `from..` split into messages of at most `size` records.
    pub fn batches(&self, from: usize, size: usize) -> Vec<InboundMessage> {
        let from = from.min(self.records.len());
        self.records[from..]
            .chunks(size.max(1))
            .map(|chunk| InboundMessage::panos(chunk.to_vec()))
            .collect()
    }

    /// Status sent once the server has streamed everything.
    pub fn closing_message() -> InboundMessage {
        InboundMessage {
            status: Some(ProcessingStatus {
                text: "Done".to_string(),
                cancelable: false,
                resumable: false,
            }),
            ..InboundMessage::default()
        }
    }
}

/// Moves `meters` from `from` along `heading` (radians, clockwise from north).
fn offset(from: LatLng, heading: f64, meters: f64) -> LatLng {
    let dlat = meters * heading.cos() / METERS_PER_DEGREE;
    let dlng = meters * heading.sin() / (METERS_PER_DEGREE * from.lat.to_radians().cos());
    LatLng::new(from.lat + dlat, from.lng + dlng)
}
