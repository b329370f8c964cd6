use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::request::{ServiceRequest, ServiceType, VehicleType};

/// Archival snapshot of a request at the moment it was completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedJob {
    pub id: Uuid,
    pub request_id: Uuid,
    pub worker_id: Uuid,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub service_type: ServiceType,
    pub vehicle_type: VehicleType,
    pub location: String,
    pub lat: f64,
    pub lng: f64,
    pub estimated_pay: String,
    pub accepted_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl CompletedJob {
    pub fn from_request(
        request: &ServiceRequest,
        worker_id: Uuid,
        customer_name: String,
        customer_phone: Option<String>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: request.id,
            worker_id,
            customer_name,
            customer_phone,
            service_type: request.service_type,
            vehicle_type: request.vehicle_type,
            location: request.location.display(),
            lat: request.location.lat,
            lng: request.location.lng,
            estimated_pay: request.service_type.estimated_pay().to_string(),
            // only `pending` requests lack accepted_at, and those never complete
            accepted_at: request.accepted_at.unwrap_or(request.created_at),
            completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::{RequestStatus, sample_request};

    #[test]
    fn test_from_request_copies_fields() {
        let worker = Uuid::new_v4();
        let mut request = sample_request(RequestStatus::Started, Some(worker));
        let accepted_at = Utc::now();
        request.accepted_at = Some(accepted_at);
        request.location.address = Some("123 Main St".to_string());

        let completed_at = Utc::now();
        let job = CompletedJob::from_request(&request, worker, "Jane".to_string(), None, completed_at);

        assert_eq!(job.request_id, request.id);
        assert_eq!(job.worker_id, worker);
        assert_eq!(job.location, "123 Main St");
        assert_eq!(job.estimated_pay, "$50 - $80");
        assert_eq!(job.accepted_at, accepted_at);
        assert_eq!(job.completed_at, completed_at);
    }

    #[test]
    fn test_location_falls_back_to_coordinates() {
        let worker = Uuid::new_v4();
        let request = sample_request(RequestStatus::Started, Some(worker));
        let job = CompletedJob::from_request(&request, worker, "Jane".to_string(), None, Utc::now());
        assert_eq!(job.location, "27.71720, 85.32400");
    }
}
