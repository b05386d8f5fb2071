//! Command-line interface for pganalytics
//!
//! Provides argument parsing and subcommand handling for the pganalytics binary.

use clap::{Parser, Subcommand};

/// Multi-tenant PostgreSQL metrics collector
#[derive(Parser)]
#[command(name = "pganalytics")]
#[command(version)]
#[command(about = "Multi-tenant PostgreSQL metrics collector")]
#[command(
    long_about = "pganalytics samples operational statistics from one or more PostgreSQL \
    databases on a fixed interval and serves the latest snapshot per tenant as a \
    Prometheus scrape endpoint."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# pganalytics Configuration
# ==========================
#
# This file configures the HTTP server, the monitored tenants, the
# collection loop and observability settings for pganalytics.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on (scrape endpoint is GET /metrics, liveness is GET /health)
port = 8080

# ─────────────────────────────────────────────────────────────────────────────
# COLLECTION LOOP
# ─────────────────────────────────────────────────────────────────────────────

[collector]
# Seconds between collection cycles
interval_seconds = 15

# Pooled connections per tenant; bounds concurrent load on each database
pool_size = 5

# Upper bound on one tenant's query round, in seconds
query_timeout_seconds = 10

# ─────────────────────────────────────────────────────────────────────────────
# TENANTS
# ─────────────────────────────────────────────────────────────────────────────
#
# One block per monitored database. The id becomes the `tenant` label on
# every exported metric; it must be 1-50 characters of [A-Za-z0-9_-].

[[tenants]]
id = "postgres"
host = "localhost"
port = 5432
dbname = "postgres"
user = "monitor"
password = "secret"
# enabled = true

# Add additional tenants:
# [[tenants]]
# id = "orders"
# host = "db2.internal"
# port = 5432
# dbname = "orders"
# user = "monitor"
# password = "secret"

# ─────────────────────────────────────────────────────────────────────────────
# TENANT DISCOVERY (optional)
# ─────────────────────────────────────────────────────────────────────────────
#
# When enabled, databases listed by the control tenant's server become
# tenants automatically. Discovery runs less often than collection; a
# database that disappears is disabled for one refresh before removal.

[discovery]
enabled = false
interval_seconds = 300
# control_tenant = "postgres"

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: trace, debug, info, warn, error (RUST_LOG overrides this)
log_level = "info"
"#
}
