//! Data-source access for tenant databases
//!
//! The collector and pool only see the `DataSource`/`SourceConnection`
//! traits; `PgDataSource` is the PostgreSQL implementation on top of a bare
//! `sqlx::PgConnection` per handle. Pooling is not delegated to sqlx: the
//! crate's own `ConnectionPool` owns the bounded-acquire semantics.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Row};
use std::time::Duration;
use thiserror::Error;

use crate::config::TenantConfig;

/// Connection descriptor for one tenant database
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl ConnectionSettings {
    pub fn from_tenant(tenant: &TenantConfig) -> Self {
        Self {
            host: tenant.host().to_string(),
            port: tenant.port(),
            dbname: tenant.dbname().to_string(),
            user: tenant.user().to_string(),
            password: tenant.password().to_string(),
        }
    }
}

/// Raw results of one query round, before range checking.
///
/// `None` carries SQL NULLs (empty aggregates, statistics not yet
/// populated) through to the snapshot builder.
#[derive(Debug, Clone, Default)]
pub struct StatSample {
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
}

/// Errors surfaced by a data source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        SourceError::Query(err.to_string())
    }
}

/// Factory for tenant database connections
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Establish one connection to the described database.
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn SourceConnection>, SourceError>;
}

/// One live connection, able to run the fixed query set
#[async_trait]
pub trait SourceConnection: Send {
    /// Run the metric query round and return typed scalars.
    async fn sample(&mut self) -> Result<StatSample, SourceError>;

    /// List non-template databases (tenant discovery).
    async fn list_databases(&mut self) -> Result<Vec<String>, SourceError>;
}

/// Session and transaction statistics, batched into one round trip.
const ACTIVITY_STATS_SQL: &str = "SELECT \
  (SELECT count(*) FROM pg_stat_activity) AS total_connections, \
  (SELECT count(*) FROM pg_stat_activity WHERE state = 'active') AS active_connections, \
  (SELECT count(*) FROM pg_stat_activity WHERE state = 'idle') AS idle_connections, \
  (SELECT count(*) FROM pg_stat_activity WHERE state = 'idle in transaction') AS idle_in_transaction, \
  (SELECT count(*) FROM pg_stat_activity WHERE state = 'active' \
     AND now() - query_start > interval '1 second') AS slow_queries, \
  (SELECT (avg(extract(epoch FROM now() - query_start)) * 1000.0)::double precision \
     FROM pg_stat_activity WHERE state = 'active') AS avg_query_time_ms, \
  (SELECT (max(extract(epoch FROM now() - query_start)) * 1000.0)::double precision \
     FROM pg_stat_activity WHERE state = 'active') AS max_query_time_ms, \
  (SELECT sum(xact_commit)::bigint FROM pg_stat_database) AS commits_total, \
  (SELECT sum(xact_rollback)::bigint FROM pg_stat_database) AS rollbacks_total, \
  (SELECT sum(deadlocks)::bigint FROM pg_stat_database) AS deadlocks_total, \
  (SELECT (sum(blks_hit) * 100.0 / NULLIF(sum(blks_hit + blks_read), 0))::double precision \
     FROM pg_stat_database) AS cache_hit_ratio, \
  (SELECT (sum(idx_blks_hit) * 100.0 / NULLIF(sum(idx_blks_hit + idx_blks_read), 0))::double precision \
     FROM pg_statio_user_indexes) AS index_hit_ratio";

/// Storage, lock and replication statistics.
const STORAGE_STATS_SQL: &str = "SELECT \
  pg_database_size(current_database())::bigint AS database_size_bytes, \
  (SELECT max(pg_total_relation_size(oid))::bigint FROM pg_class WHERE relkind = 'r') \
     AS largest_table_size_bytes, \
  (SELECT count(*) FROM pg_locks WHERE granted) AS active_locks, \
  (SELECT count(*) FROM pg_locks WHERE NOT granted) AS waiting_locks, \
  (NOT pg_is_in_recovery()) AS is_primary, \
  (CASE WHEN pg_is_in_recovery() \
     THEN pg_wal_lsn_diff(pg_last_wal_receive_lsn(), pg_last_wal_replay_lsn())::bigint \
     ELSE 0 END) AS replication_lag_bytes, \
  (CASE WHEN pg_is_in_recovery() \
     THEN COALESCE(extract(epoch FROM now() - pg_last_xact_replay_timestamp()), 0)::double precision \
     ELSE 0 END) AS replication_lag_seconds";

const DISCOVERY_SQL: &str =
    "SELECT datname FROM pg_database WHERE datistemplate = false AND datallowconn ORDER BY datname";

/// PostgreSQL data source
///
/// Every operation is bounded by `query_timeout` so a stalled server cannot
/// hold the collector's cycle open indefinitely.
pub struct PgDataSource {
    query_timeout: Duration,
}

impl PgDataSource {
    pub fn new(query_timeout: Duration) -> Self {
        Self { query_timeout }
    }
}

#[async_trait]
impl DataSource for PgDataSource {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn SourceConnection>, SourceError> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.dbname)
            .username(&settings.user)
            .password(&settings.password);

        let conn = tokio::time::timeout(self.query_timeout, options.connect())
            .await
            .map_err(|_| SourceError::Timeout(self.query_timeout))?
            .map_err(|e| SourceError::Connect(e.to_string()))?;

        Ok(Box::new(PgSourceConnection {
            conn,
            query_timeout: self.query_timeout,
        }))
    }
}

struct PgSourceConnection {
    conn: PgConnection,
    query_timeout: Duration,
}

impl PgSourceConnection {
    async fn fetch_activity_stats(&mut self, sample: &mut StatSample) -> Result<(), SourceError> {
        let row = sqlx::query(ACTIVITY_STATS_SQL)
            .fetch_one(&mut self.conn)
            .await?;

        sample.total_connections = row.try_get("total_connections")?;
        sample.active_connections = row.try_get("active_connections")?;
        sample.idle_connections = row.try_get("idle_connections")?;
        sample.idle_in_transaction = row.try_get("idle_in_transaction")?;
        sample.slow_queries = row.try_get("slow_queries")?;
        sample.avg_query_time_ms = row.try_get("avg_query_time_ms")?;
        sample.max_query_time_ms = row.try_get("max_query_time_ms")?;
        sample.commits_total = row.try_get("commits_total")?;
        sample.rollbacks_total = row.try_get("rollbacks_total")?;
        sample.deadlocks_total = row.try_get("deadlocks_total")?;
        sample.cache_hit_ratio = row.try_get("cache_hit_ratio")?;
        sample.index_hit_ratio = row.try_get("index_hit_ratio")?;
        Ok(())
    }

    async fn fetch_storage_stats(&mut self, sample: &mut StatSample) -> Result<(), SourceError> {
        let row = sqlx::query(STORAGE_STATS_SQL)
            .fetch_one(&mut self.conn)
            .await?;

        sample.database_size_bytes = row.try_get("database_size_bytes")?;
        sample.largest_table_size_bytes = row.try_get("largest_table_size_bytes")?;
        sample.active_locks = row.try_get("active_locks")?;
        sample.waiting_locks = row.try_get("waiting_locks")?;
        sample.is_primary = row.try_get("is_primary")?;
        sample.replication_lag_bytes = row.try_get("replication_lag_bytes")?;
        sample.replication_lag_seconds = row.try_get("replication_lag_seconds")?;
        Ok(())
    }
}

#[async_trait]
impl SourceConnection for PgSourceConnection {
    async fn sample(&mut self) -> Result<StatSample, SourceError> {
        let timeout = self.query_timeout;
        let round = async {
            let mut sample = StatSample::default();
            self.fetch_activity_stats(&mut sample).await?;
            self.fetch_storage_stats(&mut sample).await?;
            Ok(sample)
        };

        tokio::time::timeout(timeout, round)
            .await
            .map_err(|_| SourceError::Timeout(timeout))?
    }

    async fn list_databases(&mut self) -> Result<Vec<String>, SourceError> {
        let timeout = self.query_timeout;
        let names = tokio::time::timeout(
            timeout,
            sqlx::query_scalar::<_, String>(DISCOVERY_SQL).fetch_all(&mut self.conn),
        )
        .await
        .map_err(|_| SourceError::Timeout(timeout))??;

        Ok(names)
    }
}
