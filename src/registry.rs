//! Tenant registry
//!
//! Knows which tenants exist. Statically configured tenants are permanent;
//! when discovery is enabled, additional tenants are derived from the
//! control connection's database listing. A discovered tenant that stops
//! appearing is disabled for one grace refresh (its last snapshot stays
//! renderable) and removed on the next, so a flapping listing never
//! deletes data outright.

use crate::config::{Config, TenantConfig};
use crate::exporter::validate_tenant_id;
use crate::snapshot::SnapshotStore;
use crate::source::{ConnectionSettings, DataSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TenantOrigin {
    /// Listed in the configuration file; never removed by discovery
    Static,
    /// Derived from a discovery refresh
    Discovered,
}

struct TenantEntry {
    config: TenantConfig,
    origin: TenantOrigin,
    enabled: bool,
    /// Set when the last refresh did not report this discovered tenant
    missed_refresh: bool,
}

/// Result of applying one discovery refresh
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    pub added: Vec<String>,
    pub disabled: Vec<String>,
    pub removed: Vec<String>,
}

/// The list of monitored tenants, in registry order
pub struct TenantRegistry {
    entries: RwLock<Vec<TenantEntry>>,
}

impl TenantRegistry {
    /// Build the registry from the configured tenant list.
    pub fn from_config(config: &Config) -> Self {
        let entries = config
            .tenants
            .iter()
            .map(|tenant| TenantEntry {
                enabled: tenant.enabled(),
                config: tenant.clone(),
                origin: TenantOrigin::Static,
                missed_refresh: false,
            })
            .collect();

        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Enabled tenants in registry order (collection iterates these).
    pub async fn enabled_tenants(&self) -> Vec<TenantConfig> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.config.clone())
            .collect()
    }

    /// Every known tenant id, including disabled ones still in grace.
    pub async fn known_ids(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        entries.iter().map(|e| e.config.id().to_string()).collect()
    }

    /// Fold one discovery listing into the registry.
    ///
    /// Names failing identifier validation are rejected here so an
    /// attacker-controlled database name can never reach the exporter.
    pub async fn apply_discovery(
        &self,
        discovered: &[String],
        control: &TenantConfig,
    ) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();
        let mut entries = self.entries.write().await;

        for name in discovered {
            if let Err(e) = validate_tenant_id(name) {
                tracing::warn!(database = %name, error = %e, "Ignoring discovered database with unusable name");
                continue;
            }

            if let Some(entry) = entries.iter_mut().find(|e| e.config.id() == name.as_str()) {
                // Seen again: clear any pending grace state.
                entry.missed_refresh = false;
                if entry.origin == TenantOrigin::Discovered && !entry.enabled {
                    entry.enabled = true;
                    tracing::info!(tenant = %name, "Discovered tenant re-enabled");
                }
            } else {
                entries.push(TenantEntry {
                    config: TenantConfig::derived(name, control),
                    origin: TenantOrigin::Discovered,
                    enabled: true,
                    missed_refresh: false,
                });
                outcome.added.push(name.clone());
                tracing::info!(tenant = %name, "Discovered new tenant");
            }
        }

        // Grace handling for discovered tenants absent from this listing.
        entries.retain_mut(|entry| {
            if entry.origin != TenantOrigin::Discovered
                || discovered.iter().any(|name| name == entry.config.id())
            {
                return true;
            }

            if entry.enabled {
                entry.enabled = false;
                entry.missed_refresh = true;
                outcome.disabled.push(entry.config.id().to_string());
                tracing::info!(tenant = %entry.config.id(), "Tenant missing from discovery, disabled for one grace refresh");
                true
            } else if entry.missed_refresh {
                outcome.removed.push(entry.config.id().to_string());
                tracing::info!(tenant = %entry.config.id(), "Tenant removed after grace refresh");
                false
            } else {
                // Disabled by other means; leave it alone.
                true
            }
        });

        outcome
    }

    /// Periodic discovery loop.
    ///
    /// Runs until the shutdown signal flips. Connects fresh each refresh;
    /// discovery is far rarer than collection, so it does not draw from a
    /// tenant pool.
    pub async fn run_discovery(
        self: Arc<Self>,
        source: Arc<dyn DataSource>,
        control: TenantConfig,
        interval: Duration,
        store: Arc<SnapshotStore>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(interval_seconds = interval.as_secs(), "Starting tenant discovery loop");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.refresh_once(source.as_ref(), &control, &store).await;
        }

        tracing::info!("Tenant discovery loop stopped");
    }

    async fn refresh_once(
        &self,
        source: &dyn DataSource,
        control: &TenantConfig,
        store: &SnapshotStore,
    ) {
        let settings = ConnectionSettings::from_tenant(control);
        let mut conn = match source.connect(&settings).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Discovery connection failed, keeping current registry");
                return;
            }
        };

        let discovered = match conn.list_databases().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(error = %e, "Discovery query failed, keeping current registry");
                return;
            }
        };

        let outcome = self.apply_discovery(&discovered, control).await;
        for removed in &outcome.removed {
            store.remove(removed).await;
        }

        tracing::debug!(
            discovered = discovered.len(),
            added = outcome.added.len(),
            disabled = outcome.disabled.len(),
            removed = outcome.removed.len(),
            "Discovery refresh applied"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn test_config() -> Config {
        Config::from_str(
            r#"
[server]
host = "127.0.0.1"

[[tenants]]
id = "postgres"
host = "localhost"
dbname = "postgres"
user = "monitor"
password = "secret"
"#,
        )
        .expect("should parse test config")
    }

    fn control(config: &Config) -> TenantConfig {
        config.tenant("postgres").unwrap().clone()
    }

    #[tokio::test]
    async fn test_registry_starts_with_config_tenants() {
        let config = test_config();
        let registry = TenantRegistry::from_config(&config);

        let tenants = registry.enabled_tenants().await;
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].id(), "postgres");
    }

    #[tokio::test]
    async fn test_discovery_adds_new_tenants() {
        let config = test_config();
        let registry = TenantRegistry::from_config(&config);

        let outcome = registry
            .apply_discovery(
                &["postgres".to_string(), "orders".to_string()],
                &control(&config),
            )
            .await;

        assert_eq!(outcome.added, vec!["orders"]);
        let ids: Vec<String> = registry
            .enabled_tenants()
            .await
            .iter()
            .map(|t| t.id().to_string())
            .collect();
        assert_eq!(ids, vec!["postgres", "orders"]);
    }

    #[tokio::test]
    async fn test_discovery_rejects_invalid_names() {
        let config = test_config();
        let registry = TenantRegistry::from_config(&config);

        let outcome = registry
            .apply_discovery(
                &["evil\nname".to_string(), "ok_db".to_string()],
                &control(&config),
            )
            .await;

        assert_eq!(outcome.added, vec!["ok_db"]);
        assert!(
            registry
                .known_ids()
                .await
                .iter()
                .all(|id| id != "evil\nname")
        );
    }

    #[tokio::test]
    async fn test_discovery_grace_then_removal() {
        let config = test_config();
        let registry = TenantRegistry::from_config(&config);
        let ctl = control(&config);

        registry
            .apply_discovery(&["postgres".to_string(), "orders".to_string()], &ctl)
            .await;

        // First refresh without the tenant: disabled, still known
        let outcome = registry.apply_discovery(&["postgres".to_string()], &ctl).await;
        assert_eq!(outcome.disabled, vec!["orders"]);
        assert!(outcome.removed.is_empty());
        assert!(registry.known_ids().await.contains(&"orders".to_string()));
        assert!(
            registry
                .enabled_tenants()
                .await
                .iter()
                .all(|t| t.id() != "orders")
        );

        // Second refresh without it: removed
        let outcome = registry.apply_discovery(&["postgres".to_string()], &ctl).await;
        assert_eq!(outcome.removed, vec!["orders"]);
        assert!(!registry.known_ids().await.contains(&"orders".to_string()));
    }

    #[tokio::test]
    async fn test_discovery_reappearance_cancels_grace() {
        let config = test_config();
        let registry = TenantRegistry::from_config(&config);
        let ctl = control(&config);

        registry
            .apply_discovery(&["postgres".to_string(), "orders".to_string()], &ctl)
            .await;
        registry.apply_discovery(&["postgres".to_string()], &ctl).await;

        // Tenant comes back before removal: re-enabled, nothing lost
        let outcome = registry
            .apply_discovery(&["postgres".to_string(), "orders".to_string()], &ctl)
            .await;
        assert!(outcome.added.is_empty());
        assert!(outcome.removed.is_empty());
        assert!(
            registry
                .enabled_tenants()
                .await
                .iter()
                .any(|t| t.id() == "orders")
        );
    }

    #[tokio::test]
    async fn test_discovery_never_removes_static_tenants() {
        let config = test_config();
        let registry = TenantRegistry::from_config(&config);
        let ctl = control(&config);

        // Listing without the static tenant, twice
        registry.apply_discovery(&[], &ctl).await;
        let outcome = registry.apply_discovery(&[], &ctl).await;

        assert!(outcome.removed.is_empty());
        let tenants = registry.enabled_tenants().await;
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].id(), "postgres");
    }
}
