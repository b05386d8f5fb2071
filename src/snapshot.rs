//! Tenant metric snapshots and the shared snapshot store
//!
//! A snapshot is the complete set of one tenant's most recently measured
//! values. It is built off to the side and published into the store as a
//! whole value, so readers never observe a half-updated record.

use crate::source::StatSample;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One tenant's most recent measurements.
///
/// `None` means "no valid measurement" rather than zero; the exporter omits
/// unset fields from its output entirely.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub total_connections: Option<i64>,
    pub active_connections: Option<i64>,
    pub idle_connections: Option<i64>,
    pub idle_in_transaction: Option<i64>,
    pub slow_queries: Option<i64>,
    pub avg_query_time_ms: Option<f64>,
    pub max_query_time_ms: Option<f64>,
    pub commits_total: Option<i64>,
    pub rollbacks_total: Option<i64>,
    pub database_size_bytes: Option<i64>,
    pub largest_table_size_bytes: Option<i64>,
    pub active_locks: Option<i64>,
    pub waiting_locks: Option<i64>,
    pub deadlocks_total: Option<i64>,
    pub is_primary: bool,
    pub replication_lag_bytes: Option<i64>,
    pub replication_lag_seconds: Option<f64>,
    pub cache_hit_ratio: Option<f64>,
    pub index_hit_ratio: Option<f64>,
    pub database_connected: bool,
    /// Unix timestamp of the collection attempt that produced this snapshot
    pub last_update: i64,
    /// False when the last collection attempt for the tenant failed
    pub valid: bool,
}

/// Keep a count only when the source reported a non-negative value.
fn checked_count(value: Option<i64>) -> Option<i64> {
    value.filter(|v| *v >= 0)
}

/// Keep a duration/lag only when finite and non-negative.
fn checked_seconds(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Percentages are clamped into [0, 100]; non-finite values are dropped.
fn checked_ratio(value: Option<f64>) -> Option<f64> {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 100.0))
}

impl MetricsSnapshot {
    /// Build a snapshot from one successful query round.
    ///
    /// Range checks happen here: negative counts and non-finite values
    /// become unset, ratio fields are clamped into [0, 100].
    pub fn from_sample(sample: &StatSample, last_update: i64) -> Self {
        Self {
            total_connections: checked_count(sample.total_connections),
            active_connections: checked_count(sample.active_connections),
            idle_connections: checked_count(sample.idle_connections),
            idle_in_transaction: checked_count(sample.idle_in_transaction),
            slow_queries: checked_count(sample.slow_queries),
            avg_query_time_ms: checked_seconds(sample.avg_query_time_ms),
            max_query_time_ms: checked_seconds(sample.max_query_time_ms),
            commits_total: checked_count(sample.commits_total),
            rollbacks_total: checked_count(sample.rollbacks_total),
            database_size_bytes: checked_count(sample.database_size_bytes),
            largest_table_size_bytes: checked_count(sample.largest_table_size_bytes),
            active_locks: checked_count(sample.active_locks),
            waiting_locks: checked_count(sample.waiting_locks),
            deadlocks_total: checked_count(sample.deadlocks_total),
            is_primary: sample.is_primary,
            replication_lag_bytes: checked_count(sample.replication_lag_bytes),
            replication_lag_seconds: checked_seconds(sample.replication_lag_seconds),
            cache_hit_ratio: checked_ratio(sample.cache_hit_ratio),
            index_hit_ratio: checked_ratio(sample.index_hit_ratio),
            database_connected: true,
            last_update,
            valid: true,
        }
    }

    /// Build the snapshot published when a tenant's collection attempt
    /// fails: previously known values are carried over, but the snapshot is
    /// flagged invalid and disconnected.
    ///
    /// Policy: last known good over blank. A dashboard keeps showing
    /// plausible sizes and ratios while `database_connected 0` makes the
    /// outage explicit.
    pub fn degraded_from(previous: Option<&MetricsSnapshot>, last_update: i64) -> Self {
        let mut snapshot = previous.cloned().unwrap_or_default();
        snapshot.database_connected = false;
        snapshot.valid = false;
        snapshot.last_update = last_update;
        snapshot
    }
}

/// The shared table mapping tenant id to its latest snapshot.
///
/// Single point of contention between the collector (writer) and scrape
/// handlers (readers). Writers hold the lock only for the whole-value
/// insert; readers hold it only while cloning values out. Neither side
/// formats text or performs I/O under the lock.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: RwLock<HashMap<String, MetricsSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the tenant's snapshot with a new one.
    pub async fn publish(&self, tenant_id: &str, snapshot: MetricsSnapshot) {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(tenant_id.to_string(), snapshot);
    }

    /// Copy out one tenant's snapshot. Unknown tenants yield `None`,
    /// never a fabricated zero-valued record.
    pub async fn get(&self, tenant_id: &str) -> Option<MetricsSnapshot> {
        let snapshots = self.snapshots.read().await;
        snapshots.get(tenant_id).cloned()
    }

    /// Copy out every snapshot, sorted by tenant id so that rendering the
    /// result is deterministic.
    pub async fn all(&self) -> Vec<(String, MetricsSnapshot)> {
        let mut entries: Vec<(String, MetricsSnapshot)> = {
            let snapshots = self.snapshots.read().await;
            snapshots
                .iter()
                .map(|(id, snapshot)| (id.clone(), snapshot.clone()))
                .collect()
        };
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Drop a tenant's snapshot (registry removal).
    pub async fn remove(&self, tenant_id: &str) {
        let mut snapshots = self.snapshots.write().await;
        snapshots.remove(tenant_id);
    }

    /// Count (total, connected) tenants for the health endpoint.
    pub async fn connection_counts(&self) -> (usize, usize) {
        let snapshots = self.snapshots.read().await;
        let total = snapshots.len();
        let connected = snapshots
            .values()
            .filter(|s| s.database_connected)
            .count();
        (total, connected)
    }
}
