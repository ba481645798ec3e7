//! Client subscriptions with background price recalculation.
//!
//! Service and plan changes are detected on save and fanned out as
//! deduplicated jobs ([`jobs`]). Workers recompute subscription prices in
//! the [`db::Store`] and drop the cached aggregate total ([`cache`]), which
//! the listing API ([`subscriptions`]) recomputes on demand.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod subscriptions;
pub mod tracking;

use axum::{http::Method, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::cache::TotalCache;
use crate::db::Store;
use crate::jobs::{Dispatcher, JobQueue};

/// Shared state for request handlers and job workers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn TotalCache>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn TotalCache>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            store,
            cache,
            dispatcher: Dispatcher::new(queue),
        }
    }
}

/// Build the HTTP application
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET]);

    Router::new()
        .merge(subscriptions::router())
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
