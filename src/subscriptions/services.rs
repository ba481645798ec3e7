//! Request-path operations on clients, services, plans and subscriptions.
//!
//! Writes go to the [`Store`](crate::db::Store) first; recomputation jobs are
//! dispatched only after the row is persisted so a worker never reads the
//! pre-update value.

use tracing::{debug, info, warn};

use crate::cache::{invalidate_total, CachedTotal};
use crate::error::{AppError, Result};
use crate::models::{
    Client, NewClient, NewPlan, NewService, NewSubscription, Plan, Service, Subscription,
};
use crate::tracking::Loaded;
use crate::AppState;

use super::responses::{ListingResponse, SubscriptionRecord};

/// Login and company details for a new client
#[derive(Debug, Clone)]
pub struct ClientSignup {
    pub username: String,
    pub email: String,
    pub company_name: String,
    pub company_full_address: String,
}

/// Create the user account and its client record
pub async fn create_client(state: &AppState, signup: &ClientSignup) -> Result<Client> {
    let user = state
        .store
        .insert_user(&signup.username, &signup.email)
        .await?;

    state
        .store
        .insert_client(&NewClient {
            user_id: user.id,
            company_name: signup.company_name.clone(),
            company_full_address: signup.company_full_address.clone(),
        })
        .await
}

/// Fails with [`AppError::Conflict`] while the client has subscriptions
pub async fn delete_client(state: &AppState, id: i64) -> Result<()> {
    state.store.delete_client(id).await
}

/// Create a service. A new service has no subscriptions, so nothing is
/// recomputed.
pub async fn create_service(state: &AppState, service: &NewService) -> Result<Service> {
    service.validate()?;
    state.store.insert_service(service).await
}

pub async fn load_service(state: &AppState, id: i64) -> Result<Loaded<Service>> {
    let service = state
        .store
        .get_service(id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Loaded::new(service))
}

/// Persist a loaded service.
///
/// When `full_price` differs from the loaded value, every subscription of
/// the service gets one price job and one timestamp job. Returns the number
/// of subscriptions scheduled.
pub async fn save_service(state: &AppState, service: &mut Loaded<Service>) -> Result<usize> {
    service.validate()?;
    state.store.update_service(service).await?;

    let scheduled = if service.is_price_dirty() {
        let ids = state.store.subscription_ids_for_service(service.id).await?;
        info!(
            service_id = service.id,
            old_price = service.snapshot(),
            new_price = service.full_price,
            subscriptions = ids.len(),
            "Service price changed, recalculating subscriptions"
        );
        for id in &ids {
            state.dispatcher.schedule_recalculation(*id).await;
        }
        ids.len()
    } else {
        0
    };

    service.mark_saved();
    Ok(scheduled)
}

pub async fn delete_service(state: &AppState, id: i64) -> Result<()> {
    state.store.delete_service(id).await
}

pub async fn create_plan(state: &AppState, plan: &NewPlan) -> Result<Plan> {
    plan.validate()?;
    state.store.insert_plan(plan).await
}

pub async fn load_plan(state: &AppState, id: i64) -> Result<Loaded<Plan>> {
    let plan = state.store.get_plan(id).await?.ok_or(AppError::NotFound)?;
    Ok(Loaded::new(plan))
}

/// Persist a loaded plan, scheduling recalculation of its subscriptions
/// when `discount_percent` changed. A discount outside 0..=100 is rejected
/// before anything is written.
pub async fn save_plan(state: &AppState, plan: &mut Loaded<Plan>) -> Result<usize> {
    plan.validate()?;
    state.store.update_plan(plan).await?;

    let scheduled = if plan.is_price_dirty() {
        let ids = state.store.subscription_ids_for_plan(plan.id).await?;
        info!(
            plan_id = plan.id,
            old_discount = plan.snapshot(),
            new_discount = plan.discount_percent,
            subscriptions = ids.len(),
            "Plan discount changed, recalculating subscriptions"
        );
        for id in &ids {
            state.dispatcher.schedule_recalculation(*id).await;
        }
        ids.len()
    } else {
        0
    };

    plan.mark_saved();
    Ok(scheduled)
}

pub async fn delete_plan(state: &AppState, id: i64) -> Result<()> {
    state.store.delete_plan(id).await
}

/// Create a subscription and schedule its first price computation.
///
/// The returned record carries the placeholder price until the job runs.
pub async fn create_subscription(
    state: &AppState,
    subscription: &NewSubscription,
) -> Result<Subscription> {
    let created = state.store.insert_subscription(subscription).await?;
    debug!(subscription_id = created.id, "Subscription created");

    state.dispatcher.schedule_price(created.id).await;
    Ok(created)
}

/// Delete a subscription and drop the aggregate total
pub async fn delete_subscription(state: &AppState, id: i64) -> Result<()> {
    if !state.store.delete_subscription(id).await? {
        return Err(AppError::NotFound);
    }
    invalidate_total(state.cache.as_ref()).await;
    Ok(())
}

/// Every subscription plus the aggregate total
pub async fn list_subscriptions(state: &AppState) -> Result<ListingResponse> {
    let result = state
        .store
        .list_subscriptions()
        .await?
        .into_iter()
        .map(SubscriptionRecord::from)
        .collect();

    Ok(ListingResponse {
        result,
        total_amount: total_amount(state).await,
    })
}

pub async fn get_subscription(state: &AppState, id: i64) -> Result<SubscriptionRecord> {
    state
        .store
        .find_subscription_row(id)
        .await?
        .map(SubscriptionRecord::from)
        .ok_or(AppError::NotFound)
}

/// Sum of all subscription prices, served from the cache when possible.
///
/// A cache failure falls back to the store; `None` means the store could not
/// be read either.
pub async fn total_amount(state: &AppState) -> Option<i64> {
    let ticket = match state.cache.lookup().await {
        Ok(CachedTotal::Hit(total)) => return Some(total),
        Ok(CachedTotal::Miss(ticket)) => Some(ticket),
        Err(e) => {
            warn!(error = %e, "Total price cache unavailable");
            None
        }
    };

    let total = match state.store.total_price().await {
        Ok(total) => total,
        Err(e) => {
            warn!(error = %e, "Failed to compute total price");
            return None;
        }
    };

    if let Some(ticket) = ticket {
        match state.cache.fill(ticket, total).await {
            Ok(true) => {}
            Ok(false) => debug!("Total price changed during computation, not cached"),
            Err(e) => warn!(error = %e, "Failed to cache total price"),
        }
    }

    Some(total)
}
