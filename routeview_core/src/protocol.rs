//! Wire format of the pano stream.
//!
//! Inbound messages are JSON objects whose fields are independently optional
//! and additive; one message may carry route geometry, a batch of records
//! and a status update at the same time. Outbound messages are the three
//! user actions the server understands.

use crate::error::PlaybackError;
use crate::geometry::{LatLng, RouteBounds};
use serde::{Deserialize, Serialize};

/// Processing status reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub text: String,

    #[serde(default)]
    pub cancelable: bool,

    #[serde(default)]
    pub resumable: bool,
}

/// One inbound stream message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Display name of the route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Processing status; older servers send it as `processing_status`
    #[serde(default, alias = "processing_status", skip_serializing_if = "Option::is_none")]
    pub status: Option<ProcessingStatus>,

    /// Credential appended to asset URLs
    #[serde(default, alias = "apiKey", skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, alias = "routeBounds", skip_serializing_if = "Option::is_none")]
    pub route_bounds: Option<RouteBounds>,

    #[serde(default, alias = "routePoints", skip_serializing_if = "Option::is_none")]
    pub route_points: Option<Vec<LatLng>>,

    #[serde(default, alias = "routeDistance", skip_serializing_if = "Option::is_none")]
    pub route_distance: Option<f64>,

    /// New records, in stream order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panos: Option<Vec<WireRecord>>,

    /// Keep records `0..=index`, discard the rest (`-1` discards everything)
    #[serde(default, alias = "resetPanosIndex", skip_serializing_if = "Option::is_none")]
    pub reset_panos_index: Option<i64>,

    /// Fatal error for this session (e.g. no permission)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InboundMessage {
    /// Decodes one JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, PlaybackError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, PlaybackError> {
        Ok(serde_json::to_string(self)?)
    }

    /// A message carrying only a batch of records.
    pub fn panos(records: Vec<WireRecord>) -> Self {
        Self {
            panos: Some(records),
            ..Self::default()
        }
    }

    /// A message carrying only a reset instruction.
    pub fn reset(index: i64) -> Self {
        Self {
            reset_panos_index: Some(index),
            ..Self::default()
        }
    }
}

/// Record discriminator (`"type"` on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireKind {
    Pano { id: String, heading: f64 },
    NoImages,
}

/// A record as sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    #[serde(flatten)]
    pub kind: WireKind,

    pub point: LatLng,

    /// Point sampled from the source route; defaults to `point`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_point: Option<LatLng>,

    /// Cumulative distance along the route (meters)
    pub at_dist: f64,

    /// Distance from the previous record (meters)
    pub dist_from_last: f64,

    /// Last route-point index this record spans
    pub prev_route_index: usize,

    /// First route-point index of a no-imagery gap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_route_index: Option<usize>,

    /// Marks the final record of a finished stream
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub last: bool,
}

/// Messages sent upstream.
///
/// Serializes to `"cancel"`, `"resume"` or `{"add_pano_chain_item": [src, dst]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Stop server-side processing
    Cancel,
    /// Restart server-side processing
    Resume,
    /// Manually link two panoramas when automatic continuity failed
    AddPanoChainItem(String, String),
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, PlaybackError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pano_and_gap_records() {
        let text = r#"{
            "panos": [
                {"type": "pano", "id": "abc", "heading": 91.5,
                 "point": {"lat": 1.0, "lng": 2.0},
                 "original_point": {"lat": 1.0001, "lng": 2.0},
                 "description": "Main Rd",
                 "at_dist": 10.0, "dist_from_last": 10.0, "prev_route_index": 3},
                {"type": "no_images", "point": {"lat": 1.1, "lng": 2.1},
                 "start_point": {"lat": 1.0, "lng": 2.0}, "start_route_index": 3,
                 "start_dist_from": 5.0,
                 "at_dist": 30.0, "dist_from_last": 20.0, "prev_route_index": 5,
                 "last": true}
            ]
        }"#;
        let msg = InboundMessage::from_json(text).unwrap();
        let panos = msg.panos.unwrap();
        assert_eq!(panos.len(), 2);
        assert_eq!(
            panos[0].kind,
            WireKind::Pano {
                id: "abc".into(),
                heading: 91.5
            }
        );
        assert!(!panos[0].last);
        assert_eq!(panos[1].kind, WireKind::NoImages);
        assert_eq!(panos[1].start_route_index, Some(3));
        assert!(panos[1].last);
    }

    #[test]
    fn test_processing_status_alias() {
        let msg = InboundMessage::from_json(
            r#"{"processing_status": {"text": "Downloading", "cancelable": true, "resumable": false, "processing": true}}"#,
        )
        .unwrap();
        let status = msg.status.unwrap();
        assert_eq!(status.text, "Downloading");
        assert!(status.cancelable);
        assert!(!status.resumable);
    }

    #[test]
    fn test_camel_case_field_names() {
        let msg = InboundMessage::from_json(
            r#"{"resetPanosIndex": 0, "apiKey": "k", "routeDistance": 12.5,
                "routePoints": [{"lat": 1, "lng": 2}],
                "routeBounds": {"north": 1, "south": 0, "east": 2, "west": 1}}"#,
        )
        .unwrap();
        assert_eq!(msg.reset_panos_index, Some(0));
        assert_eq!(msg.api_key.as_deref(), Some("k"));
        assert_eq!(msg.route_distance, Some(12.5));
        assert_eq!(msg.route_points, Some(vec![LatLng::new(1.0, 2.0)]));
        assert_eq!(msg.route_bounds.map(|b| b.east), Some(2.0));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let msg = InboundMessage::from_json(r#"{"processing_complete": true, "reset_panos_index": -1}"#)
            .unwrap();
        assert_eq!(msg.reset_panos_index, Some(-1));
    }

    #[test]
    fn test_outbound_encoding() {
        assert_eq!(OutboundMessage::Cancel.to_json().unwrap(), r#""cancel""#);
        assert_eq!(OutboundMessage::Resume.to_json().unwrap(), r#""resume""#);
        assert_eq!(
            OutboundMessage::AddPanoChainItem("a".into(), "b".into())
                .to_json()
                .unwrap(),
            r#"{"add_pano_chain_item":["a","b"]}"#
        );
    }

    #[test]
    fn test_malformed_message_is_protocol_error() {
        let err = InboundMessage::from_json(r#"{"panos": [{"type": "pano"}]}"#).unwrap_err();
        assert!(matches!(err, PlaybackError::Protocol(_)));
    }
}
