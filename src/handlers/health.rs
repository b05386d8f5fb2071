//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" when at least one tenant is currently connected
    pub status: &'static str,
    /// Number of tenants with a snapshot in the store
    pub tenants: usize,
    /// Number of tenants whose last collection reached the database
    pub connected: usize,
    /// Unix timestamp of this response
    pub timestamp: i64,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Health check handler
///
/// Always returns 200; the health verdict lives in the body so that load
/// balancers and dashboards read the same answer.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (tenants, connected) = state.store().connection_counts().await;
    let status = if connected > 0 { "healthy" } else { "unhealthy" };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status,
            tenants,
            connected,
            timestamp: unix_now(),
        }),
    )
}
