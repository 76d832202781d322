//! Geographic primitives shared by the stream protocol and the presenter.

use geo::{coord, HaversineDistance, Intersects, Point, Rect};
use serde::{Deserialize, Serialize};

/// A WGS84 coordinate as sent on the wire (`{"lat": .., "lng": ..}`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Converts to a `geo::Point` (x = longitude, y = latitude).
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.lng, self.lat)
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &LatLng) -> f64 {
        self.to_point().haversine_distance(&other.to_point())
    }
}

/// Bounding box of the route, as sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl RouteBounds {
    /// Computes the bounds of a set of points. Returns `None` for an empty set.
    pub fn from_points(points: &[LatLng]) -> Option<Self> {
        let first = points.first()?;
        let init = Self {
            north: first.lat,
            south: first.lat,
            east: first.lng,
            west: first.lng,
        };
        Some(points.iter().fold(init, |b, p| Self {
            north: b.north.max(p.lat),
            south: b.south.min(p.lat),
            east: b.east.max(p.lng),
            west: b.west.min(p.lng),
        }))
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.west, y: self.south },
            coord! { x: self.east, y: self.north },
        )
    }

    /// True if the point lies inside or on the edge of the bounds.
    pub fn contains(&self, point: LatLng) -> bool {
        self.to_rect().intersects(&coord! { x: point.lng, y: point.lat })
    }
}

/// Route geometry handed to the presenter.
///
/// `distance` is the normalization denominator for every progress fraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteGeometry {
    pub bounds: Option<RouteBounds>,
    pub points: Vec<LatLng>,
    pub distance: Option<f64>,
}

impl RouteGeometry {
    /// Total route distance: the server-provided value, or the haversine
    /// length of the route points when the server did not send one.
    pub fn total_distance(&self) -> Option<f64> {
        self.distance.or_else(|| {
            if self.points.len() < 2 {
                None
            } else {
                Some(path_length(&self.points))
            }
        })
    }
}

/// Haversine length of a polyline in meters.
pub fn path_length(points: &[LatLng]) -> f64 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}
