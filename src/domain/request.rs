use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Battery,
    #[serde(alias = "tyre")]
    Tire,
    Fuel,
    Tow,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Car,
    Suv,
    Truck,
    Motorcycle,
    Van,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Normal,
    High,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    EnRoute,
    Arrived,
    Started,
    Completed,
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Wires `as_str`, `Display` and `FromStr` for the text-backed enums stored in postgres.
macro_rules! text_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text $(| $alias)* => Ok($ty::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub(crate) use text_enum;

text_enum!(ServiceType, "service type", {
    Battery => "battery",
    Tire => "tire" | "tyre",
    Fuel => "fuel",
    Tow => "tow",
    Other => "other",
});

text_enum!(VehicleType, "vehicle type", {
    Car => "car",
    Suv => "suv",
    Truck => "truck",
    Motorcycle => "motorcycle",
    Van => "van",
});

text_enum!(Urgency, "urgency", {
    Low => "low",
    Normal => "normal",
    High => "high",
    Emergency => "emergency",
});

text_enum!(RequestStatus, "request status", {
    Pending => "pending",
    Accepted => "accepted",
    EnRoute => "en_route",
    Arrived => "arrived",
    Started => "started",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl ServiceType {
    /// Payout range shown to workers and copied into the completed-job archive.
    pub fn estimated_pay(self) -> &'static str {
        match self {
            ServiceType::Battery => "$50 - $80",
            ServiceType::Tire => "$60 - $90",
            ServiceType::Fuel => "$40 - $60",
            ServiceType::Tow => "$75 - $125",
            ServiceType::Other => "$50 - $100",
        }
    }
}

impl Urgency {
    /// Sort rank: lower is more urgent.
    pub fn rank(self) -> u8 {
        match self {
            Urgency::Emergency => 0,
            Urgency::High => 1,
            Urgency::Normal => 2,
            Urgency::Low => 3,
        }
    }
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    /// The next state a worker can advance to, if any.
    pub fn next(self) -> Option<RequestStatus> {
        match self {
            RequestStatus::Accepted => Some(RequestStatus::EnRoute),
            RequestStatus::EnRoute => Some(RequestStatus::Arrived),
            RequestStatus::Arrived => Some(RequestStatus::Started),
            RequestStatus::Started => Some(RequestStatus::Completed),
            RequestStatus::Pending | RequestStatus::Completed | RequestStatus::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Fallback shown when no address could be resolved.
    pub fn display(&self) -> String {
        format!("{:.5}, {:.5}", self.lat, self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
}

impl Location {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    pub fn display(&self) -> String {
        self.address
            .clone()
            .unwrap_or_else(|| self.point().display())
    }
}

/// Who is attempting a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Requester(Uuid),
    Worker(Uuid),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("request is already {0}")]
    Terminal(RequestStatus),
    #[error("request is no longer pending (currently {0})")]
    AlreadyClaimed(RequestStatus),
    #[error("cannot move request from {from} to {to}")]
    Invalid {
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("only the assigned worker can update this request")]
    NotAssigned,
    #[error("only the requester or the assigned worker can cancel this request")]
    NotParticipant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub service_type: ServiceType,
    pub vehicle_type: VehicleType,
    pub description: Option<String>,
    pub urgency: Urgency,
    pub location: Location,
    pub photo_url: Option<String>,
    pub status: RequestStatus,
    pub assigned_to: Option<Uuid>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewServiceRequest {
    pub service_type: ServiceType,
    pub vehicle_type: VehicleType,
    pub description: Option<String>,
    pub urgency: Urgency,
    pub location: Location,
    pub photo_url: Option<String>,
}

impl ServiceRequest {
    pub fn new(user_id: Uuid, input: NewServiceRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            service_type: input.service_type,
            vehicle_type: input.vehicle_type,
            description: input
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            urgency: input.urgency,
            location: input.location,
            photo_url: input.photo_url,
            status: RequestStatus::Pending,
            assigned_to: None,
            accepted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.user_id == user_id || self.assigned_to == Some(user_id)
    }

    /// The party that should hear about an action taken by `actor_id`.
    pub fn counterparty(&self, actor_id: Uuid) -> Option<Uuid> {
        if actor_id == self.user_id {
            self.assigned_to
        } else if self.assigned_to == Some(actor_id) {
            Some(self.user_id)
        } else {
            None
        }
    }

    pub fn check_accept(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if self.status != RequestStatus::Pending {
            return Err(TransitionError::AlreadyClaimed(self.status));
        }
        Ok(())
    }

    pub fn check_advance(&self, worker_id: Uuid, to: RequestStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if self.assigned_to != Some(worker_id) {
            return Err(TransitionError::NotAssigned);
        }
        if self.status.next() != Some(to) {
            return Err(TransitionError::Invalid {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    pub fn check_cancel(&self, actor: Actor) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        let allowed = match actor {
            Actor::Requester(id) => id == self.user_id,
            Actor::Worker(id) => self.assigned_to == Some(id),
        };
        if !allowed {
            return Err(TransitionError::NotParticipant);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_request(status: RequestStatus, assigned_to: Option<Uuid>) -> ServiceRequest {
    let mut request = ServiceRequest::new(
        Uuid::new_v4(),
        NewServiceRequest {
            service_type: ServiceType::Battery,
            vehicle_type: VehicleType::Car,
            description: Some("  dead battery  ".to_string()),
            urgency: Urgency::High,
            location: Location {
                lat: 27.7172,
                lng: 85.3240,
                address: None,
            },
            photo_url: None,
        },
    );
    request.status = status;
    request.assigned_to = assigned_to;
    request
}
