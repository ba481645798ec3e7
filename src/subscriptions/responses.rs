//! Response DTOs for the subscription listing API.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{PlanType, SubscriptionRow};

/// Plan nested inside a subscription record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanResponse {
    pub id: i64,
    pub plan_type: PlanType,
    pub discount_percent: i32,
}

/// One subscription with its plan, client name and client email
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRecord {
    pub id: i64,
    pub plan_id: i64,
    pub plan: PlanResponse,
    pub price: i64,
    pub last_change_time: DateTime<Utc>,
    pub client_name: String,
    pub email: String,
}

impl From<SubscriptionRow> for SubscriptionRecord {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            id: row.id,
            plan_id: row.plan_id,
            plan: PlanResponse {
                id: row.plan_id,
                plan_type: row.plan_type,
                discount_percent: row.discount_percent,
            },
            price: row.price,
            last_change_time: row.last_change_time,
            client_name: row.client_name,
            email: row.email,
        }
    }
}

/// Response for `GET /api/subscriptions/`
///
/// `total_amount` is null only when the aggregate could not be read.
#[derive(Debug, Serialize)]
pub struct ListingResponse {
    pub result: Vec<SubscriptionRecord>,
    pub total_amount: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_nested_plan() {
        let row = SubscriptionRow {
            id: 1,
            plan_id: 4,
            plan_type: PlanType::Discount,
            discount_percent: 25,
            price: 150,
            last_change_time: "2025-03-01T12:00:00Z".parse().unwrap(),
            client_name: "Acme".to_string(),
            email: "ops@acme.test".to_string(),
        };

        let json = serde_json::to_value(SubscriptionRecord::from(row)).unwrap();

        assert_eq!(json["plan_id"], 4);
        assert_eq!(json["plan"]["id"], 4);
        assert_eq!(json["plan"]["plan_type"], "discount");
        assert_eq!(json["plan"]["discount_percent"], 25);
        assert_eq!(json["client_name"], "Acme");
        assert_eq!(json["last_change_time"], "2025-03-01T12:00:00Z");
    }

    #[test]
    fn test_degraded_total_serializes_as_null() {
        let body = ListingResponse {
            result: Vec::new(),
            total_amount: None,
        };
        let json = serde_json::to_value(body).unwrap();
        assert!(json["total_amount"].is_null());
        assert_eq!(json["result"], serde_json::json!([]));
    }
}
