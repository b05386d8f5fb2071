//! Periodic metric collection
//!
//! One long-lived task refreshes every enabled tenant's snapshot once per
//! interval. Each tenant has its own fixed-size connection pool; a tenant
//! whose pool is exhausted is skipped for the cycle, and a tenant whose
//! query fails gets a degraded snapshot without disturbing the others.

use crate::config::{CollectorConfig, TenantConfig};
use crate::pool::{ConnectionPool, PoolError};
use crate::registry::TenantRegistry;
use crate::snapshot::{MetricsSnapshot, SnapshotStore};
use crate::source::{ConnectionSettings, DataSource, SourceError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The collection loop and its per-tenant pools.
///
/// Pools are owned exclusively by the collector task; the snapshot store
/// is the only state it shares with request handlers.
pub struct Collector {
    config: CollectorConfig,
    registry: Arc<TenantRegistry>,
    store: Arc<SnapshotStore>,
    source: Arc<dyn DataSource>,
    pools: HashMap<String, ConnectionPool>,
}

impl Collector {
    pub fn new(
        config: CollectorConfig,
        registry: Arc<TenantRegistry>,
        store: Arc<SnapshotStore>,
        source: Arc<dyn DataSource>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            source,
            pools: HashMap::new(),
        }
    }

    /// Run collection cycles until the shutdown signal flips.
    ///
    /// A shutdown arriving mid-cycle finishes the tenant currently being
    /// collected (its connection returns to the pool through the guard)
    /// and then exits without starting the next one.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_seconds);
        tracing::info!(
            interval_seconds = self.config.interval_seconds,
            pool_size = self.config.pool_size,
            "Starting collector loop"
        );

        loop {
            self.run_cycle(&shutdown).await;

            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Collector loop stopped");
    }

    /// Refresh every enabled tenant once, in registry order.
    pub async fn run_cycle(&mut self, shutdown: &watch::Receiver<bool>) {
        let tenants = self.registry.enabled_tenants().await;
        self.prune_pools().await;

        for tenant in &tenants {
            if *shutdown.borrow() {
                tracing::debug!("Shutdown observed mid-cycle, stopping after current tenant");
                break;
            }
            self.collect_tenant(tenant).await;
        }
    }

    /// Drop pools for tenants the registry no longer knows at all.
    /// Disabled tenants in grace keep theirs.
    async fn prune_pools(&mut self) {
        let known = self.registry.known_ids().await;
        self.pools.retain(|id, _| known.iter().any(|k| k == id));
    }

    async fn collect_tenant(&mut self, tenant: &TenantConfig) {
        let id = tenant.id().to_string();

        if !self.pools.contains_key(&id) {
            let pool = ConnectionPool::connect(
                Arc::clone(&self.source),
                ConnectionSettings::from_tenant(tenant),
                self.config.pool_size,
            )
            .await;
            if pool.available() == 0 {
                tracing::warn!(tenant = %id, "Pool came up with no healthy connections");
            }
            self.pools.insert(id.clone(), pool);
        }
        let pool = &self.pools[&id];

        // Dead slots are only re-dialed here, at most once per cycle.
        if pool.dead_slots() > 0 {
            pool.recover().await;
        }

        let mut conn = match pool.acquire() {
            Ok(conn) => conn,
            Err(PoolError::Unavailable) => {
                tracing::debug!(tenant = %id, "No pooled connection free, skipping this cycle");
                // The previous snapshot stays current. A tenant that has
                // never produced one still needs a disconnected record so
                // scrapes and health reflect it.
                if self.store.get(&id).await.is_none() {
                    self.store
                        .publish(&id, MetricsSnapshot::degraded_from(None, unix_now()))
                        .await;
                }
                return;
            }
        };

        match conn.connection().sample().await {
            Ok(sample) => {
                let snapshot = MetricsSnapshot::from_sample(&sample, unix_now());
                self.store.publish(&id, snapshot).await;
                tracing::debug!(tenant = %id, "Snapshot refreshed");
            }
            Err(e) => {
                tracing::warn!(tenant = %id, error = %e, "Metric query failed, publishing degraded snapshot");
                let previous = self.store.get(&id).await;
                self.store
                    .publish(
                        &id,
                        MetricsSnapshot::degraded_from(previous.as_ref(), unix_now()),
                    )
                    .await;

                // After a timeout the connection may still be mid-query;
                // after a connect-level failure it is gone. Either way the
                // handle must not be served again.
                if matches!(e, SourceError::Timeout(_) | SourceError::Connect(_)) {
                    conn.discard();
                }
            }
        }
    }
}
