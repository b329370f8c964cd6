//! Great-circle distance and the worker-side sort modes over pending requests.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::{GeoPoint, ParseEnumError, ServiceRequest};

pub const EARTH_RADIUS_MILES: f64 = 3958.8;

pub fn haversine_miles(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_MILES * c
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    Recent,
    Nearest,
    Urgency,
}

impl FromStr for SortMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recent" => Ok(SortMode::Recent),
            "nearest" => Ok(SortMode::Nearest),
            "urgency" => Ok(SortMode::Urgency),
            other => Err(ParseEnumError {
                kind: "sort mode",
                value: other.to_string(),
            }),
        }
    }
}

/// A device position report. Fixes older than the configured maximum age are ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionFix {
    pub point: GeoPoint,
    pub captured_at: DateTime<Utc>,
}

impl PositionFix {
    pub fn usable(&self, now: DateTime<Utc>, max_age: Duration) -> Option<GeoPoint> {
        if !self.point.is_valid() {
            return None;
        }
        if now.signed_duration_since(self.captured_at) > max_age {
            return None;
        }
        Some(self.point)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRequest {
    #[serde(flatten)]
    pub request: ServiceRequest,
    pub distance_miles: Option<f64>,
}

/// Annotates and orders pending requests for a worker view.
///
/// `Nearest` leaves the recency order untouched when the reference point is unknown.
pub fn rank_requests(
    requests: &[ServiceRequest],
    mode: SortMode,
    reference: Option<GeoPoint>,
) -> Vec<RankedRequest> {
    let mut ranked: Vec<RankedRequest> = requests
        .iter()
        .map(|r| RankedRequest {
            distance_miles: reference.map(|p| haversine_miles(p, r.location.point())),
            request: r.clone(),
        })
        .collect();

    let by_recency = |a: &RankedRequest, b: &RankedRequest| b.request.created_at.cmp(&a.request.created_at);

    match mode {
        SortMode::Recent => ranked.sort_by(by_recency),
        SortMode::Nearest => {
            if reference.is_some() {
                ranked.sort_by(|a, b| {
                    let da = a.distance_miles.unwrap_or(f64::INFINITY);
                    let db = b.distance_miles.unwrap_or(f64::INFINITY);
                    da.partial_cmp(&db).unwrap_or(Ordering::Equal)
                });
            }
        }
        SortMode::Urgency => ranked.sort_by(|a, b| {
            a.request
                .urgency
                .rank()
                .cmp(&b.request.urgency.rank())
                .then_with(|| by_recency(a, b))
        }),
    }

    ranked
}
