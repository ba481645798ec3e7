#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use subscription_service::cache::AppCache;
use subscription_service::db::{InMemoryStore, Store};
use subscription_service::jobs::{InMemoryJobQueue, JobWorker};
use subscription_service::models::{NewPlan, NewService, NewSubscription, PlanType, Subscription};
use subscription_service::subscriptions::{services, ClientSignup};
use subscription_service::AppState;

/// Application wired to in-process backends with a worker that runs on demand
pub struct Harness {
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<AppCache>,
    pub queue: Arc<InMemoryJobQueue>,
    worker: JobWorker,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(AppCache::default());
        let queue = Arc::new(InMemoryJobQueue::new(3, 0));
        let state = AppState::new(store.clone(), cache.clone(), queue.clone());
        let worker = JobWorker::new(
            queue.clone(),
            state.clone(),
            "test-worker",
            Duration::from_millis(10),
        );

        Self {
            state,
            store,
            cache,
            queue,
            worker,
        }
    }

    /// Run every queued job to completion
    pub async fn drain(&self) -> usize {
        self.worker.drain().await.unwrap()
    }

    pub async fn client(&self, company_name: &str) -> i64 {
        let signup = ClientSignup {
            username: company_name.to_lowercase(),
            email: format!("billing@{}.test", company_name.to_lowercase()),
            company_name: company_name.to_string(),
            company_full_address: "1 Main Street".to_string(),
        };
        services::create_client(&self.state, &signup).await.unwrap().id
    }

    pub async fn service(&self, full_price: i64) -> i64 {
        let service = NewService {
            name: "Hosting".to_string(),
            full_price,
        };
        services::create_service(&self.state, &service)
            .await
            .unwrap()
            .id
    }

    pub async fn plan(&self, discount_percent: i32) -> i64 {
        let plan = NewPlan {
            plan_type: PlanType::Discount,
            discount_percent,
        };
        services::create_plan(&self.state, &plan).await.unwrap().id
    }

    pub async fn subscribe(&self, client_id: i64, service_id: i64, plan_id: i64) -> i64 {
        let subscription = NewSubscription {
            client_id,
            service_id,
            plan_id,
        };
        services::create_subscription(&self.state, &subscription)
            .await
            .unwrap()
            .id
    }

    pub async fn subscription(&self, id: i64) -> Subscription {
        self.state
            .store
            .get_subscription(id)
            .await
            .unwrap()
            .unwrap()
    }
}
