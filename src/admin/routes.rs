//! REST endpoints for operators.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::error::DatabaseError;
use crate::store::UserStore;
use crate::weather::ApiUsage;

/// Shared state for admin routes.
#[derive(Clone)]
pub struct AdminRouteState {
    pub store: Arc<dyn UserStore>,
    pub usage: ApiUsage,
}

/// GET /api/health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/stats
///
/// Number of stored users, enrolled or not, and this month's weather API
/// requests against the quota.
async fn get_stats(State(state): State<AdminRouteState>) -> impl IntoResponse {
    let stats: Result<_, DatabaseError> = async {
        let users = state.store.count_users().await?;
        let usage = state.usage.current().await?;
        Ok(serde_json::json!({"users": users, "api_requests": usage}))
    }
    .await;

    match stats {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            tracing::error!("Failed to collect stats: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "store unavailable"})),
            )
                .into_response()
        }
    }
}

/// Build the admin REST routes.
pub fn admin_routes(state: AdminRouteState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(get_stats))
        .with_state(state)
}
