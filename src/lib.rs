//! pganalytics - Multi-tenant PostgreSQL metrics collector
//!
//! This library samples operational statistics from one or more PostgreSQL
//! databases ("tenants") on a fixed interval, caches the latest snapshot
//! per tenant, and renders the cache as bounded, injection-safe Prometheus
//! exposition text.

pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod exporter;
pub mod handlers;
pub mod middleware;
pub mod pool;
pub mod registry;
pub mod snapshot;
pub mod source;
pub mod telemetry;
