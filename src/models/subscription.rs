//! Subscription models

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::PlanType;

/// Subscription from the `subscriptions` table.
///
/// `price` and `last_change_time` are derived and only written by the
/// background jobs.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub client_id: i64,
    pub service_id: i64,
    pub plan_id: i64,
    pub price: i64,
    pub last_change_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub client_id: i64,
    pub service_id: i64,
    pub plan_id: i64,
}

/// Subscription joined with its plan, client and user in one row
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SubscriptionRow {
    pub id: i64,
    pub plan_id: i64,
    pub plan_type: PlanType,
    pub discount_percent: i32,
    pub price: i64,
    pub last_change_time: DateTime<Utc>,
    pub client_name: String,
    pub email: String,
}
