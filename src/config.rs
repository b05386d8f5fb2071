//! Configuration management for pganalytics
//!
//! Parses TOML configuration files and provides typed access to settings.

use crate::exporter::validate_tenant_id;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_port() -> u16 {
    8080
}

/// Collection loop configuration
///
/// `interval_seconds` is the pause between full collection cycles,
/// `pool_size` the number of pooled connections per tenant, and
/// `query_timeout_seconds` the upper bound on one query round so a stalled
/// tenant cannot hold up the whole cycle.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_query_timeout_seconds")]
    pub query_timeout_seconds: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            pool_size: default_pool_size(),
            query_timeout_seconds: default_query_timeout_seconds(),
        }
    }
}

fn default_interval_seconds() -> u64 {
    15
}

fn default_pool_size() -> usize {
    5
}

fn default_query_timeout_seconds() -> u64 {
    10
}

/// Tenant discovery configuration
///
/// When enabled, the registry periodically lists databases through the
/// `control_tenant` connection and derives one tenant per non-template
/// database. Discovery runs on its own cadence, less often than collection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_discovery_interval_seconds")]
    pub interval_seconds: u64,
    /// Id of the `[[tenants]]` entry whose connection runs the listing query
    #[serde(default)]
    pub control_tenant: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: default_discovery_interval_seconds(),
            control_tenant: None,
        }
    }
}

fn default_discovery_interval_seconds() -> u64 {
    300
}

/// Individual tenant configuration
///
/// All fields are private to enforce invariants. Configuration is loaded via
/// deserialization and validated via Config::validate(). After construction,
/// fields cannot be mutated, ensuring validated data remains valid.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TenantConfig {
    id: String,
    host: String,
    #[serde(default = "default_db_port")]
    port: u16,
    dbname: String,
    user: String,
    password: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_db_port() -> u16 {
    5432
}

fn default_enabled() -> bool {
    true
}

impl TenantConfig {
    /// Get the tenant identifier (validated, used as the `tenant` label)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the database host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the database port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the database name
    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// Get the database user
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Get the database password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Whether the tenant participates in collection
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Derive a tenant from a discovered database name, inheriting the
    /// control tenant's connection settings with the database swapped.
    ///
    /// The caller must have validated `name` as a tenant identifier.
    pub(crate) fn derived(name: &str, control: &TenantConfig) -> Self {
        Self {
            id: name.to_string(),
            host: control.host.clone(),
            port: control.port,
            dbname: name.to_string(),
            user: control.user.clone(),
            password: control.password.clone(),
            enabled: true,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            crate::error::AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self = toml::from_str(&content).map_err(|source| {
            crate::error::AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| crate::error::AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()`, but can also be called
    /// explicitly when constructing Config via other means (e.g., in tests).
    pub fn validate(&self) -> crate::error::AppResult<()> {
        if self.server.host.is_empty() {
            return Err(crate::error::AppError::Config(
                "Configuration error: server.host must not be empty".to_string(),
            ));
        }

        // At least one tenant must exist up front unless discovery will
        // provide them later.
        if self.tenants.is_empty() && !self.discovery.enabled {
            return Err(crate::error::AppError::Config(
                "Configuration error: no [[tenants]] configured and discovery is disabled. \
                Add a tenant:\n\
                [[tenants]]\n\
                id = \"primary\"\n\
                host = \"localhost\"\n\
                port = 5432\n\
                dbname = \"postgres\"\n\
                user = \"monitor\"\n\
                password = \"secret\""
                    .to_string(),
            ));
        }

        let mut seen_ids = HashSet::new();
        for tenant in &self.tenants {
            // Reject ids that the exporter would refuse to render. Catching
            // them here turns a scrape-time 500 into a startup error.
            validate_tenant_id(&tenant.id)?;

            if !seen_ids.insert(tenant.id.as_str()) {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: duplicate tenant id '{}'",
                    tenant.id
                )));
            }

            if tenant.host.is_empty() {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: tenant '{}' has an empty host",
                    tenant.id
                )));
            }
            if tenant.dbname.is_empty() {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: tenant '{}' has an empty dbname",
                    tenant.id
                )));
            }
            if tenant.user.is_empty() {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: tenant '{}' has an empty user",
                    tenant.id
                )));
            }
        }

        if self.collector.interval_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "Configuration error: collector.interval_seconds must be greater than 0"
                    .to_string(),
            ));
        }
        if self.collector.interval_seconds > 3600 {
            return Err(crate::error::AppError::Config(format!(
                "Configuration error: collector.interval_seconds cannot exceed 3600, got {}",
                self.collector.interval_seconds
            )));
        }

        if self.collector.pool_size == 0 {
            return Err(crate::error::AppError::Config(
                "Configuration error: collector.pool_size must be greater than 0".to_string(),
            ));
        }
        if self.collector.pool_size > 32 {
            return Err(crate::error::AppError::Config(format!(
                "Configuration error: collector.pool_size cannot exceed 32, got {}",
                self.collector.pool_size
            )));
        }

        if self.collector.query_timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "Configuration error: collector.query_timeout_seconds must be greater than 0"
                    .to_string(),
            ));
        }
        if self.collector.query_timeout_seconds > 300 {
            return Err(crate::error::AppError::Config(format!(
                "Configuration error: collector.query_timeout_seconds cannot exceed 300, got {}",
                self.collector.query_timeout_seconds
            )));
        }

        if self.discovery.enabled {
            // Discovery must run less frequently than collection so a
            // registry refresh never races every collection cycle.
            if self.discovery.interval_seconds <= self.collector.interval_seconds {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: discovery.interval_seconds ({}) must be greater than \
                    collector.interval_seconds ({})",
                    self.discovery.interval_seconds, self.collector.interval_seconds
                )));
            }

            let control = self.discovery.control_tenant.as_deref().ok_or_else(|| {
                crate::error::AppError::Config(
                    "Configuration error: discovery.enabled requires discovery.control_tenant"
                        .to_string(),
                )
            })?;
            if !self.tenants.iter().any(|t| t.id == control) {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: discovery.control_tenant '{}' does not match any \
                    [[tenants]] entry",
                    control
                )));
            }
        }

        Ok(())
    }

    /// Look up a tenant by id
    pub fn tenant(&self, id: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.id == id)
    }
}

impl FromStr for Config {
    type Err = crate::error::AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(toml_str).map_err(|source| {
            crate::error::AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            }
        })?;

        // Validate config before returning
        config.validate()?;
        Ok(config)
    }
}
