//! Entity store for clients, services, plans and subscriptions.
//!
//! [`Store`] is the seam between the request path, the background jobs and
//! the persistence backend. [`PgStore`] is the production backend;
//! [`InMemoryStore`] keeps everything in process for tests and local runs.

mod memory;
mod postgres;
pub mod queries;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Client, NewClient, NewPlan, NewService, NewSubscription, Plan, Service, Subscription,
    SubscriptionRow, User,
};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Persistent records and the atomic operations the price pipeline needs.
///
/// Deleting a client, service or plan that is still referenced by a
/// subscription fails with [`AppError::Conflict`](crate::error::AppError::Conflict).
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, username: &str, email: &str) -> Result<User>;

    async fn insert_client(&self, client: &NewClient) -> Result<Client>;
    async fn delete_client(&self, id: i64) -> Result<()>;

    async fn insert_service(&self, service: &NewService) -> Result<Service>;
    async fn get_service(&self, id: i64) -> Result<Option<Service>>;
    async fn update_service(&self, service: &Service) -> Result<()>;
    async fn delete_service(&self, id: i64) -> Result<()>;

    async fn insert_plan(&self, plan: &NewPlan) -> Result<Plan>;
    async fn get_plan(&self, id: i64) -> Result<Option<Plan>>;
    async fn update_plan(&self, plan: &Plan) -> Result<()>;
    async fn delete_plan(&self, id: i64) -> Result<()>;

    async fn insert_subscription(&self, subscription: &NewSubscription) -> Result<Subscription>;
    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>>;
    /// Returns false when no such subscription existed
    async fn delete_subscription(&self, id: i64) -> Result<bool>;
    async fn subscription_ids_for_service(&self, service_id: i64) -> Result<Vec<i64>>;
    async fn subscription_ids_for_plan(&self, plan_id: i64) -> Result<Vec<i64>>;

    /// Recompute and persist the price of one subscription in a single
    /// transaction from the current service price and plan discount.
    ///
    /// Returns `None` when the subscription no longer exists.
    async fn recompute_price(&self, subscription_id: i64) -> Result<Option<i64>>;

    /// Stamp `last_change_time` in a single transaction.
    ///
    /// Returns `None` when the subscription no longer exists.
    async fn touch_last_change_time(
        &self,
        subscription_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Every subscription joined with plan, client and user, ordered by id
    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRow>>;
    async fn find_subscription_row(&self, id: i64) -> Result<Option<SubscriptionRow>>;

    /// Sum of all subscription prices, 0 when there are none
    async fn total_price(&self) -> Result<i64>;
}
