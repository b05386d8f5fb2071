//! Prometheus exposition rendering
//!
//! Turns copied-out snapshots into bounded exposition text. The renderer
//! performs no locking and no I/O; the caller hands it data already copied
//! from the snapshot store and a capacity-limited output buffer.
//!
//! Tenant identifiers are validated before a single byte is written. An id
//! containing `\n` or `"` could forge extra metric lines or break label
//! syntax, so a bad id fails the whole render rather than producing
//! partial output.

use crate::error::{AppError, AppResult};
use crate::snapshot::MetricsSnapshot;

/// Maximum accepted tenant identifier length
pub const TENANT_ID_MAX_LEN: usize = 50;

/// Check a tenant identifier against the label-safe alphabet.
///
/// Accepted: 1 to 50 characters, ASCII alphanumerics, `_` and `-`.
pub fn validate_tenant_id(id: &str) -> AppResult<()> {
    if id.is_empty() || id.len() > TENANT_ID_MAX_LEN {
        return Err(AppError::InvalidIdentifier {
            tenant: id.to_string(),
            reason: format!("length must be 1..={}, got {}", TENANT_ID_MAX_LEN, id.len()),
        });
    }

    for c in id.chars() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
            return Err(AppError::InvalidIdentifier {
                tenant: id.to_string(),
                reason: format!("contains disallowed character {:?}", c),
            });
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// A rendered sample value. Floats always print with two decimals.
enum MetricValue {
    Int(i64),
    Float(f64),
}

/// Fixed metric table. Names are never tenant-supplied; a snapshot can only
/// select which of these lines appear, not add new ones.
struct MetricDef {
    name: &'static str,
    help: &'static str,
    kind: MetricKind,
    value: fn(&MetricsSnapshot) -> Option<MetricValue>,
}

/// Floats are emitted only below this bound so every rendered value fits
/// the fixed width used by `required_capacity`.
const FLOAT_EMIT_BOUND: f64 = 1e15;

fn int_field(value: Option<i64>) -> Option<MetricValue> {
    value.map(MetricValue::Int)
}

fn float_field(value: Option<f64>) -> Option<MetricValue> {
    value
        .filter(|v| v.is_finite() && v.abs() < FLOAT_EMIT_BOUND)
        .map(MetricValue::Float)
}

/// Ratio fields render only inside [0, 100]; anything else is omitted.
fn ratio_field(value: Option<f64>) -> Option<MetricValue> {
    value
        .filter(|v| (0.0..=100.0).contains(v))
        .map(MetricValue::Float)
}

fn bool_field(value: bool) -> Option<MetricValue> {
    Some(MetricValue::Int(i64::from(value)))
}

static METRICS: &[MetricDef] = &[
    MetricDef {
        name: "pganalytics_total_connections",
        help: "Total backend connections",
        kind: MetricKind::Gauge,
        value: |s| int_field(s.total_connections),
    },
    MetricDef {
        name: "pganalytics_active_connections",
        help: "Backends currently executing a query",
        kind: MetricKind::Gauge,
        value: |s| int_field(s.active_connections),
    },
    MetricDef {
        name: "pganalytics_idle_connections",
        help: "Idle backends",
        kind: MetricKind::Gauge,
        value: |s| int_field(s.idle_connections),
    },
    MetricDef {
        name: "pganalytics_idle_in_transaction",
        help: "Backends idle inside a transaction",
        kind: MetricKind::Gauge,
        value: |s| int_field(s.idle_in_transaction),
    },
    MetricDef {
        name: "pganalytics_slow_queries_count",
        help: "Active queries running longer than one second",
        kind: MetricKind::Gauge,
        value: |s| int_field(s.slow_queries),
    },
    MetricDef {
        name: "pganalytics_avg_query_time_ms",
        help: "Average runtime of active queries in milliseconds",
        kind: MetricKind::Gauge,
        value: |s| float_field(s.avg_query_time_ms),
    },
    MetricDef {
        name: "pganalytics_max_query_time_ms",
        help: "Longest runtime among active queries in milliseconds",
        kind: MetricKind::Gauge,
        value: |s| float_field(s.max_query_time_ms),
    },
    MetricDef {
        name: "pganalytics_commits_total",
        help: "Committed transactions across all databases",
        kind: MetricKind::Counter,
        value: |s| int_field(s.commits_total),
    },
    MetricDef {
        name: "pganalytics_rollbacks_total",
        help: "Rolled-back transactions across all databases",
        kind: MetricKind::Counter,
        value: |s| int_field(s.rollbacks_total),
    },
    MetricDef {
        name: "pganalytics_database_size_bytes",
        help: "Size of the tenant database in bytes",
        kind: MetricKind::Gauge,
        value: |s| int_field(s.database_size_bytes),
    },
    MetricDef {
        name: "pganalytics_largest_table_size_bytes",
        help: "Size of the largest table in bytes",
        kind: MetricKind::Gauge,
        value: |s| int_field(s.largest_table_size_bytes),
    },
    MetricDef {
        name: "pganalytics_active_locks",
        help: "Granted locks",
        kind: MetricKind::Gauge,
        value: |s| int_field(s.active_locks),
    },
    MetricDef {
        name: "pganalytics_waiting_locks",
        help: "Lock requests not yet granted",
        kind: MetricKind::Gauge,
        value: |s| int_field(s.waiting_locks),
    },
    MetricDef {
        name: "pganalytics_deadlocks_total",
        help: "Deadlocks detected across all databases",
        kind: MetricKind::Counter,
        value: |s| int_field(s.deadlocks_total),
    },
    MetricDef {
        name: "pganalytics_is_primary",
        help: "1 when the server is primary, 0 when in recovery",
        kind: MetricKind::Gauge,
        value: |s| bool_field(s.is_primary),
    },
    MetricDef {
        name: "pganalytics_replication_lag_bytes",
        help: "Replication lag in bytes",
        kind: MetricKind::Gauge,
        value: |s| int_field(s.replication_lag_bytes),
    },
    MetricDef {
        name: "pganalytics_replication_lag_seconds",
        help: "Replication lag in seconds",
        kind: MetricKind::Gauge,
        value: |s| float_field(s.replication_lag_seconds),
    },
    MetricDef {
        name: "pganalytics_cache_hit_ratio",
        help: "Buffer cache hit ratio in percent",
        kind: MetricKind::Gauge,
        value: |s| ratio_field(s.cache_hit_ratio),
    },
    MetricDef {
        name: "pganalytics_index_hit_ratio",
        help: "Index cache hit ratio in percent",
        kind: MetricKind::Gauge,
        value: |s| ratio_field(s.index_hit_ratio),
    },
    MetricDef {
        name: "pganalytics_database_connected",
        help: "1 when the last collection attempt reached the database",
        kind: MetricKind::Gauge,
        value: |s| bool_field(s.database_connected),
    },
    MetricDef {
        name: "pganalytics_last_update",
        help: "Unix timestamp of the last collection attempt",
        kind: MetricKind::Gauge,
        value: |s| Some(MetricValue::Int(s.last_update)),
    },
];

/// Byte cost of `{tenant=""} ` around a label value
const LABEL_OVERHEAD: usize = 12;
/// Fixed width reserved per rendered value (covers any i64 and any float
/// below `FLOAT_EMIT_BOUND` at two decimals)
const VALUE_WIDTH: usize = 21;

/// Worst-case output size for a render over the given tenant ids.
///
/// Callers size their `ExpositionBuffer` with this so `BufferExceeded`
/// only signals a genuine contract violation.
pub fn required_capacity(tenant_ids: &[&str]) -> usize {
    let mut total = 0;
    for metric in METRICS {
        // "# HELP <name> <help>\n" and "# TYPE <name> <kind>\n"
        total += 7 + metric.name.len() + 1 + metric.help.len() + 1;
        total += 7 + metric.name.len() + 1 + metric.kind.as_str().len() + 1;
        for id in tenant_ids {
            total += metric.name.len() + LABEL_OVERHEAD + id.len() + VALUE_WIDTH + 1;
        }
    }
    total
}

/// Capacity-tracked output buffer with line-atomic appends.
///
/// Replaces ad hoc offset arithmetic with one fallible operation: a line
/// either fits completely or the buffer is left untouched.
#[derive(Debug)]
pub struct ExpositionBuffer {
    out: String,
    capacity: usize,
}

impl ExpositionBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: String::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.out.len()
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }

    /// Append one line (newline added here). Fails with `BufferExceeded`
    /// without writing anything when the line does not fit.
    pub fn append_line(&mut self, args: std::fmt::Arguments<'_>) -> AppResult<()> {
        use std::fmt::Write;

        let mut line = String::new();
        line.write_fmt(args)
            .map_err(|e| AppError::Internal(format!("formatting metric line failed: {}", e)))?;
        line.push('\n');

        let needed = self.out.len() + line.len();
        if needed > self.capacity {
            return Err(AppError::BufferExceeded {
                needed,
                capacity: self.capacity,
            });
        }

        self.out.push_str(&line);
        Ok(())
    }

    fn truncate_to(&mut self, len: usize) {
        self.out.truncate(len);
    }
}

/// Render every (tenant, snapshot) pair into `buf`.
///
/// Headers are emitted once per metric name; sample lines follow in the
/// order of `entries`. On any error the buffer is restored to its
/// pre-call state, so callers never observe partial output.
pub fn render_all(
    entries: &[(String, MetricsSnapshot)],
    buf: &mut ExpositionBuffer,
) -> AppResult<()> {
    let refs: Vec<(&str, &MetricsSnapshot)> = entries
        .iter()
        .map(|(id, snapshot)| (id.as_str(), snapshot))
        .collect();
    render(&refs, buf)
}

/// Render a single tenant's snapshot into `buf`.
pub fn render_tenant(
    tenant_id: &str,
    snapshot: &MetricsSnapshot,
    buf: &mut ExpositionBuffer,
) -> AppResult<()> {
    render(&[(tenant_id, snapshot)], buf)
}

fn render(entries: &[(&str, &MetricsSnapshot)], buf: &mut ExpositionBuffer) -> AppResult<()> {
    // Validate every id before writing a single byte.
    for (id, _) in entries {
        validate_tenant_id(id)?;
    }

    let start = buf.len();
    let result = render_lines(entries, buf);
    if result.is_err() {
        buf.truncate_to(start);
    }
    result
}

fn render_lines(entries: &[(&str, &MetricsSnapshot)], buf: &mut ExpositionBuffer) -> AppResult<()> {
    for metric in METRICS {
        buf.append_line(format_args!("# HELP {} {}", metric.name, metric.help))?;
        buf.append_line(format_args!(
            "# TYPE {} {}",
            metric.name,
            metric.kind.as_str()
        ))?;

        for (id, snapshot) in entries {
            match (metric.value)(snapshot) {
                Some(MetricValue::Int(v)) => buf.append_line(format_args!(
                    "{}{{tenant=\"{}\"}} {}",
                    metric.name, id, v
                ))?,
                Some(MetricValue::Float(v)) => buf.append_line(format_args!(
                    "{}{{tenant=\"{}\"}} {:.2}",
                    metric.name, id, v
                ))?,
                None => {}
            }
        }
    }
    Ok(())
}
