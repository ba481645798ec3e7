//! HTTP routes for the subscription listing API

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::error::Result;
use crate::AppState;

use super::responses::{ListingResponse, SubscriptionRecord};
use super::services;

/// Read-only subscription routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/subscriptions/", get(list))
        .route("/api/subscriptions/:id/", get(detail))
}

/// List every subscription with the aggregate total
pub async fn list(State(state): State<AppState>) -> Result<Json<ListingResponse>> {
    Ok(Json(services::list_subscriptions(&state).await?))
}

/// Single subscription record
pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SubscriptionRecord>> {
    Ok(Json(services::get_subscription(&state, id).await?))
}
