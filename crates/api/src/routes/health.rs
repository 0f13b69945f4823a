//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use cart::StoreHealth;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub durable_store: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// GET /health: reports whether customer carts can be persisted.
///
/// Anonymous carts and reads keep working while the durable store is down,
/// so an outage reports `degraded` rather than failing the check.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    match state.durable.health().await {
        StoreHealth::Available => Json(HealthResponse {
            status: "ok",
            durable_store: "available",
            reason: None,
        }),
        StoreHealth::Unavailable(reason) => {
            tracing::warn!(%reason, "durable cart store unavailable");
            Json(HealthResponse {
                status: "degraded",
                durable_store: "unavailable",
                reason: Some(reason),
            })
        }
    }
}
