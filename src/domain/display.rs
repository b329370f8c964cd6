//! Status and urgency presentation shared by every response.

use serde::Serialize;

use crate::domain::request::{RequestStatus, Urgency};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub label: &'static str,
    pub tone: &'static str,
}

const STATUS_BADGES: [(RequestStatus, Badge); 7] = [
    (RequestStatus::Pending, Badge { label: "Waiting for a Mechanic", tone: "gray" }),
    (RequestStatus::Accepted, Badge { label: "Job Accepted", tone: "blue" }),
    (RequestStatus::EnRoute, Badge { label: "On The Way", tone: "indigo" }),
    (RequestStatus::Arrived, Badge { label: "Arrived at Location", tone: "purple" }),
    (RequestStatus::Started, Badge { label: "Service in Progress", tone: "yellow" }),
    (RequestStatus::Completed, Badge { label: "Job Completed", tone: "green" }),
    (RequestStatus::Cancelled, Badge { label: "Cancelled", tone: "red" }),
];

const URGENCY_BADGES: [(Urgency, Badge); 4] = [
    (Urgency::Emergency, Badge { label: "Emergency", tone: "red" }),
    (Urgency::High, Badge { label: "High", tone: "yellow" }),
    (Urgency::Normal, Badge { label: "Normal", tone: "blue" }),
    (Urgency::Low, Badge { label: "Low", tone: "gray" }),
];

pub fn status_badge(status: RequestStatus) -> Badge {
    STATUS_BADGES
        .iter()
        .find(|(s, _)| *s == status)
        .map(|(_, b)| *b)
        .unwrap_or(Badge { label: "Unknown", tone: "gray" })
}

pub fn urgency_badge(urgency: Urgency) -> Badge {
    URGENCY_BADGES
        .iter()
        .find(|(u, _)| *u == urgency)
        .map(|(_, b)| *b)
        .unwrap_or(Badge { label: "Unknown", tone: "gray" })
}

#[derive(Debug, Serialize)]
pub struct LabelEntry {
    pub value: &'static str,
    #[serde(flatten)]
    pub badge: Badge,
}

#[derive(Debug, Serialize)]
pub struct LabelTable {
    pub statuses: Vec<LabelEntry>,
    pub urgencies: Vec<LabelEntry>,
}

pub fn label_table() -> LabelTable {
    LabelTable {
        statuses: STATUS_BADGES
            .iter()
            .map(|(s, b)| LabelEntry { value: s.as_str(), badge: *b })
            .collect(),
        urgencies: URGENCY_BADGES
            .iter()
            .map(|(u, b)| LabelEntry { value: u.as_str(), badge: *b })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_status_has_a_badge() {
        let table = label_table();
        assert_eq!(table.statuses.len(), 7);
        assert!(table.statuses.iter().all(|e| e.badge.label != "Unknown"));
        assert_eq!(status_badge(RequestStatus::EnRoute).label, "On The Way");
    }

    #[test]
    fn test_urgency_tones() {
        assert_eq!(urgency_badge(Urgency::Emergency).tone, "red");
        assert_eq!(urgency_badge(Urgency::Low).tone, "gray");
    }

    #[test]
    fn test_table_serializes_flat() {
        let json = serde_json::to_value(label_table()).unwrap();
        assert_eq!(json["statuses"][0]["value"], "pending");
        assert_eq!(json["statuses"][0]["tone"], "gray");
        assert_eq!(json["urgencies"][0]["label"], "Emergency");
    }
}
