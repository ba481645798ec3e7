//! Postgres-backed store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{queries, Store};
use crate::error::Result;
use crate::models::{
    Client, NewClient, NewPlan, NewService, NewSubscription, Plan, Service, Subscription,
    SubscriptionRow, User,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, username: &str, email: &str) -> Result<User> {
        queries::insert_user(&self.pool, username, email).await
    }

    async fn insert_client(&self, client: &NewClient) -> Result<Client> {
        queries::insert_client(&self.pool, client).await
    }

    async fn delete_client(&self, id: i64) -> Result<()> {
        queries::delete_client(&self.pool, id).await
    }

    async fn insert_service(&self, service: &NewService) -> Result<Service> {
        queries::insert_service(&self.pool, service).await
    }

    async fn get_service(&self, id: i64) -> Result<Option<Service>> {
        queries::get_service(&self.pool, id).await
    }

    async fn update_service(&self, service: &Service) -> Result<()> {
        queries::update_service(&self.pool, service).await
    }

    async fn delete_service(&self, id: i64) -> Result<()> {
        queries::delete_service(&self.pool, id).await
    }

    async fn insert_plan(&self, plan: &NewPlan) -> Result<Plan> {
        queries::insert_plan(&self.pool, plan).await
    }

    async fn get_plan(&self, id: i64) -> Result<Option<Plan>> {
        queries::get_plan(&self.pool, id).await
    }

    async fn update_plan(&self, plan: &Plan) -> Result<()> {
        queries::update_plan(&self.pool, plan).await
    }

    async fn delete_plan(&self, id: i64) -> Result<()> {
        queries::delete_plan(&self.pool, id).await
    }

    async fn insert_subscription(&self, subscription: &NewSubscription) -> Result<Subscription> {
        queries::insert_subscription(&self.pool, subscription).await
    }

    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        queries::get_subscription(&self.pool, id).await
    }

    async fn delete_subscription(&self, id: i64) -> Result<bool> {
        queries::delete_subscription(&self.pool, id).await
    }

    async fn subscription_ids_for_service(&self, service_id: i64) -> Result<Vec<i64>> {
        queries::subscription_ids_for_service(&self.pool, service_id).await
    }

    async fn subscription_ids_for_plan(&self, plan_id: i64) -> Result<Vec<i64>> {
        queries::subscription_ids_for_plan(&self.pool, plan_id).await
    }

    async fn recompute_price(&self, subscription_id: i64) -> Result<Option<i64>> {
        queries::recompute_price(&self.pool, subscription_id).await
    }

    async fn touch_last_change_time(
        &self,
        subscription_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        queries::touch_last_change_time(&self.pool, subscription_id, at).await
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRow>> {
        queries::list_subscriptions(&self.pool).await
    }

    async fn find_subscription_row(&self, id: i64) -> Result<Option<SubscriptionRow>> {
        queries::find_subscription_row(&self.pool, id).await
    }

    async fn total_price(&self) -> Result<i64> {
        queries::total_price(&self.pool).await
    }
}
