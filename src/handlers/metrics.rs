//! Prometheus scrape endpoint
//!
//! Renders the snapshot store in Prometheus text format. Snapshots are
//! copied out under the store's read lock and rendered after it is
//! released, so concurrent scrapes never serialize behind each other or
//! behind the collector.

use axum::{extract::State, http::StatusCode, http::header};

use crate::error::AppResult;
use crate::exporter::{ExpositionBuffer, render_all, required_capacity};
use crate::handlers::AppState;

/// Content type of the exposition format
const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metrics handler for Prometheus scraping
///
/// # Response
///
/// - `200 OK` with the exposition body, even when every tenant is
///   disconnected (failure is represented as `database_connected 0`
///   lines, not as a transport error)
/// - `500 Internal Server Error` only for render contract violations
///   (invalid tenant identifier, undersized buffer)
pub async fn handler(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, [(header::HeaderName, &'static str); 1], String)> {
    // Copy out under the read lock; format outside it.
    let entries = state.store().all().await;

    let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
    let mut buf = ExpositionBuffer::with_capacity(required_capacity(&ids));

    render_all(&entries, &mut buf).inspect_err(|e| {
        tracing::error!(
            error = %e,
            tenants = entries.len(),
            "Rendering the snapshot store failed"
        );
    })?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        buf.into_string(),
    ))
}
