//! Admin Hooks
//!
//! HTTP hooks through which the exchange back office drives the gateway:
//! pair creation and deletion, and order update notifications.
//!
//! # Endpoints
//!
//! - `GET /admin/pairs` - Active pair configurations
//! - `POST /admin/pairs` - Activate a pair (`PairConfig` body)
//! - `DELETE /admin/pairs/{pair}` - Deactivate a pair
//! - `POST /admin/order-updates` - Push order updates to their owners (`[Order]` body)

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::application::services::{LifecycleError, PairLifecycleService};
use crate::domain::market::{Order, PairConfig};
use crate::infrastructure::broadcast::SharedSubscriptionHub;
use crate::infrastructure::protocol::ErrorReply;

/// Shared state of the admin routes.
pub struct AdminState {
    lifecycle: Arc<PairLifecycleService>,
    hub: SharedSubscriptionHub,
}

impl AdminState {
    /// Create admin state.
    #[must_use]
    pub const fn new(lifecycle: Arc<PairLifecycleService>, hub: SharedSubscriptionHub) -> Self {
        Self { lifecycle, hub }
    }
}

/// Admin routes, ready to merge into another router.
pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/admin/pairs", post(create_pair).get(list_pairs))
        .route("/admin/pairs/{pair}", delete(delete_pair))
        .route("/admin/order-updates", post(order_updates))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn list_pairs(State(state): State<Arc<AdminState>>) -> Json<Vec<PairConfig>> {
    Json(state.lifecycle.active_pairs())
}

async fn create_pair(
    State(state): State<Arc<AdminState>>,
    Json(config): Json<PairConfig>,
) -> Result<(StatusCode, Json<PairConfig>), ApiError> {
    state.lifecycle.on_pair_created(config.clone())?;
    Ok((StatusCode::CREATED, Json(config)))
}

async fn delete_pair(
    State(state): State<Arc<AdminState>>,
    Path(pair): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.lifecycle.delete_pair(&pair)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Response to an order update batch.
#[derive(Debug, Serialize)]
struct Dispatched {
    dispatched: usize,
}

async fn order_updates(
    State(state): State<Arc<AdminState>>,
    Json(orders): Json<Vec<Order>>,
) -> (StatusCode, Json<Dispatched>) {
    let dispatched = state.hub.notify_order_updates(&orders);
    tracing::debug!(orders = orders.len(), dispatched, "Order updates dispatched");
    (StatusCode::ACCEPTED, Json(Dispatched { dispatched }))
}

// =============================================================================
// Errors
// =============================================================================

/// Lifecycle error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(LifecycleError);

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LifecycleError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            LifecycleError::AlreadyActive(_) => StatusCode::CONFLICT,
            LifecycleError::UnknownPair(_) => StatusCode::NOT_FOUND,
            LifecycleError::StreamsUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(ErrorReply::new(&self.0))).into_response()
    }
}

// =============================================================================
// Tests
// =============================================================================
