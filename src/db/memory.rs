//! In-process store.
//!
//! Mirrors the Postgres schema constraints (foreign keys, restricted
//! deletes, check constraints, unique client per user). Every operation
//! holds the table lock for its whole duration, which makes each one atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::Store;
use crate::error::{AppError, Result};
use crate::models::{
    validate_discount_percent, validate_full_price, Client, NewClient, NewPlan, NewService,
    NewSubscription, Plan, Service, Subscription, SubscriptionRow, User,
};
use crate::subscriptions::subscription_price;

#[derive(Debug, Default)]
struct Sequence(i64);

impl Sequence {
    fn next(&mut self) -> i64 {
        self.0 += 1;
        self.0
    }
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    clients: BTreeMap<i64, Client>,
    services: BTreeMap<i64, Service>,
    plans: BTreeMap<i64, Plan>,
    subscriptions: BTreeMap<i64, Subscription>,
    user_seq: Sequence,
    client_seq: Sequence,
    service_seq: Sequence,
    plan_seq: Sequence,
    subscription_seq: Sequence,
}

impl Tables {
    fn is_referenced(&self, matches: impl Fn(&Subscription) -> bool) -> bool {
        self.subscriptions.values().any(matches)
    }

    fn row_for(&self, subscription: &Subscription) -> Option<SubscriptionRow> {
        let plan = self.plans.get(&subscription.plan_id)?;
        let client = self.clients.get(&subscription.client_id)?;
        let user = self.users.get(&client.user_id)?;

        Some(SubscriptionRow {
            id: subscription.id,
            plan_id: plan.id,
            plan_type: plan.plan_type,
            discount_percent: plan.discount_percent,
            price: subscription.price,
            last_change_time: subscription.last_change_time,
            client_name: client.company_name.clone(),
            email: user.email.clone(),
        })
    }
}

fn protected(entity: &str, id: i64) -> AppError {
    AppError::Conflict(format!(
        "{} {} is referenced by existing subscriptions",
        entity, id
    ))
}

fn missing_reference(entity: &str, id: i64) -> AppError {
    AppError::Validation(format!("referenced {} {} does not exist", entity, id))
}

/// Store backed by in-memory tables
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a discount without running validation, the way a raw SQL
    /// update would without the table's check constraint.
    #[cfg(test)]
    pub(crate) async fn force_discount(&self, plan_id: i64, discount_percent: i32) {
        let mut tables = self.tables.write().await;
        if let Some(plan) = tables.plans.get_mut(&plan_id) {
            plan.discount_percent = discount_percent;
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_user(&self, username: &str, email: &str) -> Result<User> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == username) {
            return Err(AppError::Conflict(format!(
                "username {} is already taken",
                username
            )));
        }

        let user = User {
            id: tables.user_seq.next(),
            username: username.to_string(),
            email: email.to_string(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn insert_client(&self, client: &NewClient) -> Result<Client> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&client.user_id) {
            return Err(missing_reference("user", client.user_id));
        }
        if tables.clients.values().any(|c| c.user_id == client.user_id) {
            return Err(AppError::Conflict(format!(
                "user {} already has a client",
                client.user_id
            )));
        }

        let client = Client {
            id: tables.client_seq.next(),
            user_id: client.user_id,
            company_name: client.company_name.clone(),
            company_full_address: client.company_full_address.clone(),
        };
        tables.clients.insert(client.id, client.clone());
        Ok(client)
    }

    async fn delete_client(&self, id: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.clients.contains_key(&id) {
            return Err(AppError::NotFound);
        }
        if tables.is_referenced(|s| s.client_id == id) {
            return Err(protected("client", id));
        }
        tables.clients.remove(&id);
        Ok(())
    }

    async fn insert_service(&self, service: &NewService) -> Result<Service> {
        validate_full_price(service.full_price)?;

        let mut tables = self.tables.write().await;
        let service = Service {
            id: tables.service_seq.next(),
            name: service.name.clone(),
            full_price: service.full_price,
        };
        tables.services.insert(service.id, service.clone());
        Ok(service)
    }

    async fn get_service(&self, id: i64) -> Result<Option<Service>> {
        let tables = self.tables.read().await;
        Ok(tables.services.get(&id).cloned())
    }

    async fn update_service(&self, service: &Service) -> Result<()> {
        validate_full_price(service.full_price)?;

        let mut tables = self.tables.write().await;
        let stored = tables
            .services
            .get_mut(&service.id)
            .ok_or(AppError::NotFound)?;
        *stored = service.clone();
        Ok(())
    }

    async fn delete_service(&self, id: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.services.contains_key(&id) {
            return Err(AppError::NotFound);
        }
        if tables.is_referenced(|s| s.service_id == id) {
            return Err(protected("service", id));
        }
        tables.services.remove(&id);
        Ok(())
    }

    async fn insert_plan(&self, plan: &NewPlan) -> Result<Plan> {
        validate_discount_percent(plan.discount_percent)?;

        let mut tables = self.tables.write().await;
        let plan = Plan {
            id: tables.plan_seq.next(),
            plan_type: plan.plan_type,
            discount_percent: plan.discount_percent,
        };
        tables.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, id: i64) -> Result<Option<Plan>> {
        let tables = self.tables.read().await;
        Ok(tables.plans.get(&id).cloned())
    }

    async fn update_plan(&self, plan: &Plan) -> Result<()> {
        validate_discount_percent(plan.discount_percent)?;

        let mut tables = self.tables.write().await;
        let stored = tables.plans.get_mut(&plan.id).ok_or(AppError::NotFound)?;
        *stored = plan.clone();
        Ok(())
    }

    async fn delete_plan(&self, id: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.plans.contains_key(&id) {
            return Err(AppError::NotFound);
        }
        if tables.is_referenced(|s| s.plan_id == id) {
            return Err(protected("plan", id));
        }
        tables.plans.remove(&id);
        Ok(())
    }

    async fn insert_subscription(&self, subscription: &NewSubscription) -> Result<Subscription> {
        let mut tables = self.tables.write().await;
        if !tables.clients.contains_key(&subscription.client_id) {
            return Err(missing_reference("client", subscription.client_id));
        }
        if !tables.services.contains_key(&subscription.service_id) {
            return Err(missing_reference("service", subscription.service_id));
        }
        if !tables.plans.contains_key(&subscription.plan_id) {
            return Err(missing_reference("plan", subscription.plan_id));
        }

        let subscription = Subscription {
            id: tables.subscription_seq.next(),
            client_id: subscription.client_id,
            service_id: subscription.service_id,
            plan_id: subscription.plan_id,
            price: 0,
            last_change_time: Utc::now(),
        };
        tables
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables.subscriptions.get(&id).cloned())
    }

    async fn delete_subscription(&self, id: i64) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(tables.subscriptions.remove(&id).is_some())
    }

    async fn subscription_ids_for_service(&self, service_id: i64) -> Result<Vec<i64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .filter(|s| s.service_id == service_id)
            .map(|s| s.id)
            .collect())
    }

    async fn subscription_ids_for_plan(&self, plan_id: i64) -> Result<Vec<i64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .filter(|s| s.plan_id == plan_id)
            .map(|s| s.id)
            .collect())
    }

    async fn recompute_price(&self, subscription_id: i64) -> Result<Option<i64>> {
        let mut tables = self.tables.write().await;

        let Some(subscription) = tables.subscriptions.get(&subscription_id) else {
            return Ok(None);
        };
        let full_price = tables
            .services
            .get(&subscription.service_id)
            .map(|s| s.full_price)
            .ok_or_else(|| missing_reference("service", subscription.service_id))?;
        let discount_percent = tables
            .plans
            .get(&subscription.plan_id)
            .map(|p| p.discount_percent)
            .ok_or_else(|| missing_reference("plan", subscription.plan_id))?;

        let price = subscription_price(full_price, discount_percent);
        if let Some(subscription) = tables.subscriptions.get_mut(&subscription_id) {
            subscription.price = price;
        }
        Ok(Some(price))
    }

    async fn touch_last_change_time(
        &self,
        subscription_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .subscriptions
            .get_mut(&subscription_id)
            .map(|subscription| {
                subscription.last_change_time = at;
                at
            }))
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .filter_map(|s| tables.row_for(s))
            .collect())
    }

    async fn find_subscription_row(&self, id: i64) -> Result<Option<SubscriptionRow>> {
        let tables = self.tables.read().await;
        Ok(tables.subscriptions.get(&id).and_then(|s| tables.row_for(s)))
    }

    async fn total_price(&self) -> Result<i64> {
        let tables = self.tables.read().await;
        tables
            .subscriptions
            .values()
            .try_fold(0_i64, |total, s| total.checked_add(s.price))
            .ok_or_else(|| AppError::Internal("total price overflows a 64-bit integer".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanType;

    async fn seeded() -> (InMemoryStore, Subscription) {
        let store = InMemoryStore::new();
        let user = store.insert_user("acme", "billing@acme.test").await.unwrap();
        let client = store
            .insert_client(&NewClient {
                user_id: user.id,
                company_name: "Acme".to_string(),
                company_full_address: "1 Main St".to_string(),
            })
            .await
            .unwrap();
        let service = store
            .insert_service(&NewService {
                name: "Hosting".to_string(),
                full_price: 200,
            })
            .await
            .unwrap();
        let plan = store
            .insert_plan(&NewPlan {
                plan_type: PlanType::Discount,
                discount_percent: 25,
            })
            .await
            .unwrap();
        let subscription = store
            .insert_subscription(&NewSubscription {
                client_id: client.id,
                service_id: service.id,
                plan_id: plan.id,
            })
            .await
            .unwrap();
        (store, subscription)
    }

    #[tokio::test]
    async fn test_new_subscription_starts_at_zero() {
        let (_store, subscription) = seeded().await;
        assert_eq!(subscription.price, 0);
    }

    #[tokio::test]
    async fn test_recompute_price() {
        let (store, subscription) = seeded().await;
        assert_eq!(store.recompute_price(subscription.id).await.unwrap(), Some(150));
        let stored = store.get_subscription(subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.price, 150);
    }

    #[tokio::test]
    async fn test_recompute_missing_subscription() {
        let store = InMemoryStore::new();
        assert_eq!(store.recompute_price(42).await.unwrap(), None);
        assert_eq!(store.touch_last_change_time(42, Utc::now()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recompute_clamps_unvalidated_discount() {
        let (store, subscription) = seeded().await;
        store.force_discount(subscription.plan_id, 140).await;
        assert_eq!(store.recompute_price(subscription.id).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_referenced_rows_are_protected() {
        let (store, subscription) = seeded().await;

        assert!(matches!(
            store.delete_service(subscription.service_id).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            store.delete_plan(subscription.plan_id).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            store.delete_client(subscription.client_id).await,
            Err(AppError::Conflict(_))
        ));

        assert!(store.delete_subscription(subscription.id).await.unwrap());
        store.delete_service(subscription.service_id).await.unwrap();
        store.delete_plan(subscription.plan_id).await.unwrap();
        store.delete_client(subscription.client_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_requires_existing_references() {
        let store = InMemoryStore::new();
        let result = store
            .insert_subscription(&NewSubscription {
                client_id: 1,
                service_id: 1,
                plan_id: 1,
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_one_client_per_user() {
        let store = InMemoryStore::new();
        let user = store.insert_user("solo", "solo@example.test").await.unwrap();
        let new_client = NewClient {
            user_id: user.id,
            company_name: "Solo".to_string(),
            company_full_address: String::new(),
        };
        store.insert_client(&new_client).await.unwrap();
        assert!(matches!(
            store.insert_client(&new_client).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_storage_rejects_out_of_range_discount() {
        let store = InMemoryStore::new();
        let result = store
            .insert_plan(&NewPlan {
                plan_type: PlanType::Discount,
                discount_percent: 101,
            })
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_listing_rows_and_total() {
        let (store, subscription) = seeded().await;
        store.recompute_price(subscription.id).await.unwrap();

        let rows = store.list_subscriptions().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].client_name, "Acme");
        assert_eq!(rows[0].email, "billing@acme.test");
        assert_eq!(rows[0].plan_type, PlanType::Discount);
        assert_eq!(rows[0].price, 150);

        assert_eq!(store.total_price().await.unwrap(), 150);
    }

    #[tokio::test]
    async fn test_total_of_empty_store_is_zero() {
        let store = InMemoryStore::new();
        assert_eq!(store.total_price().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_total_overflow_is_an_error() {
        let (store, first) = seeded().await;
        let service = store
            .insert_service(&NewService {
                name: "Mainframe".to_string(),
                full_price: i64::MAX,
            })
            .await
            .unwrap();
        let plan = store
            .insert_plan(&NewPlan {
                plan_type: PlanType::Full,
                discount_percent: 0,
            })
            .await
            .unwrap();
        let second = store
            .insert_subscription(&NewSubscription {
                client_id: first.client_id,
                service_id: service.id,
                plan_id: plan.id,
            })
            .await
            .unwrap();
        let third = store
            .insert_subscription(&NewSubscription {
                client_id: first.client_id,
                service_id: service.id,
                plan_id: plan.id,
            })
            .await
            .unwrap();
        store.recompute_price(second.id).await.unwrap();
        store.recompute_price(third.id).await.unwrap();

        assert!(matches!(
            store.total_price().await,
            Err(AppError::Internal(_))
        ));
    }
}
