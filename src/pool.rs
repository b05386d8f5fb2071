//! Fixed-size connection pool for one tenant's data source
//!
//! Bounds concurrent load on a tenant database and amortizes connection
//! setup. `acquire` never blocks or dials: when every slot is checked out
//! or dead it reports `Unavailable` and the caller skips that tenant for
//! the cycle. Handles travel inside a `PooledConnection` guard whose drop
//! returns them to the pool, so release cannot be forgotten or doubled.
//! A handle that hit a protocol error is `discard`ed instead, leaving a
//! dead slot that only an explicit `recover` call re-dials.

use crate::source::{ConnectionSettings, DataSource, SourceConnection};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by the pool
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no pooled connection available")]
    Unavailable,
}

enum Slot {
    Available(Box<dyn SourceConnection>),
    CheckedOut,
    Dead,
}

struct PoolShared {
    // Availability bookkeeping only; never held across network I/O.
    slots: Mutex<Vec<Slot>>,
}

impl PoolShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Slot>> {
        // A panic while holding this lock leaves only bookkeeping state;
        // recover the guard rather than wedging every future cycle.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A bounded set of reusable connections for one tenant
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
    settings: ConnectionSettings,
    source: Arc<dyn DataSource>,
}

impl ConnectionPool {
    /// Create a pool of `size` slots, dialing every connection eagerly.
    ///
    /// Slots that fail to connect start dead and stay dead until
    /// `recover` is called; the pool itself is always constructed so that
    /// partial tenant availability beats total unavailability.
    pub async fn connect(
        source: Arc<dyn DataSource>,
        settings: ConnectionSettings,
        size: usize,
    ) -> Self {
        let mut slots = Vec::with_capacity(size);
        for slot_index in 0..size {
            match source.connect(&settings).await {
                Ok(conn) => slots.push(Slot::Available(conn)),
                Err(e) => {
                    tracing::warn!(
                        slot = slot_index,
                        error = %e,
                        "Pooled connection failed to establish at init"
                    );
                    slots.push(Slot::Dead);
                }
            }
        }

        Self {
            shared: Arc::new(PoolShared {
                slots: Mutex::new(slots),
            }),
            settings,
            source,
        }
    }

    /// Check out an available connection, or report `Unavailable`.
    ///
    /// Pure in-memory state transition; the caller is never queued.
    pub fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let mut slots = self.shared.lock();
        for (index, slot) in slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Available(_)) {
                let Slot::Available(conn) = std::mem::replace(slot, Slot::CheckedOut) else {
                    unreachable!("slot matched Available above");
                };
                return Ok(PooledConnection {
                    conn: Some(conn),
                    slot: index,
                    shared: Arc::clone(&self.shared),
                });
            }
        }
        Err(PoolError::Unavailable)
    }

    /// Re-dial dead slots. This is the explicit re-initialization step;
    /// nothing else in the pool performs network I/O after construction.
    ///
    /// Returns how many slots came back.
    pub async fn recover(&self) -> usize {
        let dead: Vec<usize> = {
            let slots = self.shared.lock();
            slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| matches!(s, Slot::Dead).then_some(i))
                .collect()
        };

        let mut recovered = 0;
        for index in dead {
            match self.source.connect(&self.settings).await {
                Ok(conn) => {
                    let mut slots = self.shared.lock();
                    // The slot stayed Dead while we dialed, nobody else
                    // hands out dead slots.
                    slots[index] = Slot::Available(conn);
                    recovered += 1;
                }
                Err(e) => {
                    tracing::debug!(slot = index, error = %e, "Pool slot recovery failed");
                }
            }
        }

        if recovered > 0 {
            tracing::info!(recovered, "Recovered dead pool slots");
        }
        recovered
    }

    /// Total slot count fixed at construction
    pub fn size(&self) -> usize {
        self.shared.lock().len()
    }

    /// Number of slots currently available for acquire
    pub fn available(&self) -> usize {
        self.shared
            .lock()
            .iter()
            .filter(|s| matches!(s, Slot::Available(_)))
            .count()
    }

    /// Number of dead slots awaiting recovery
    pub fn dead_slots(&self) -> usize {
        self.shared
            .lock()
            .iter()
            .filter(|s| matches!(s, Slot::Dead))
            .count()
    }
}

/// A checked-out connection. Dropping it returns the handle to the pool.
pub struct PooledConnection {
    conn: Option<Box<dyn SourceConnection>>,
    slot: usize,
    shared: Arc<PoolShared>,
}

impl PooledConnection {
    /// Access the underlying connection
    pub fn connection(&mut self) -> &mut dyn SourceConnection {
        self.conn
            .as_mut()
            .expect("connection present until drop or discard")
            .as_mut()
    }

    /// Tear the connection down after an unrecoverable protocol error.
    ///
    /// The slot is marked dead so the pool recreates the handle on the
    /// next `recover` instead of serving it again.
    pub fn discard(mut self) {
        self.conn = None;
        let mut slots = self.shared.lock();
        slots[self.slot] = Slot::Dead;
        // Drop now runs with conn already taken and does nothing further.
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut slots = self.shared.lock();
            slots[self.slot] = Slot::Available(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceError, StatSample};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source whose first `fail_first` connection attempts fail.
    struct FlakySource {
        attempts: AtomicUsize,
        fail_first: usize,
    }

    impl FlakySource {
        fn reliable() -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                fail_first: 0,
            }
        }

        fn failing_first(n: usize) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                fail_first: n,
            }
        }
    }

    struct NullConnection;

    #[async_trait]
    impl SourceConnection for NullConnection {
        async fn sample(&mut self) -> Result<StatSample, SourceError> {
            Ok(StatSample::default())
        }

        async fn list_databases(&mut self) -> Result<Vec<String>, SourceError> {
            Ok(vec![])
        }
    }

    #[async_trait]
    impl DataSource for FlakySource {
        async fn connect(
            &self,
            _settings: &ConnectionSettings,
        ) -> Result<Box<dyn SourceConnection>, SourceError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                Err(SourceError::Connect("refused".to_string()))
            } else {
                Ok(Box::new(NullConnection))
            }
        }
    }

    fn test_settings() -> ConnectionSettings {
        ConnectionSettings {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "monitor".to_string(),
            password: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_pool_connects_all_slots_eagerly() {
        let pool =
            ConnectionPool::connect(Arc::new(FlakySource::reliable()), test_settings(), 5).await;
        assert_eq!(pool.size(), 5);
        assert_eq!(pool.available(), 5);
        assert_eq!(pool.dead_slots(), 0);
    }

    #[tokio::test]
    async fn test_pool_exhaustion_returns_unavailable() {
        let pool =
            ConnectionPool::connect(Arc::new(FlakySource::reliable()), test_settings(), 3).await;

        let c1 = pool.acquire().expect("first acquire");
        let c2 = pool.acquire().expect("second acquire");
        let c3 = pool.acquire().expect("third acquire");

        assert_eq!(pool.acquire().err(), Some(PoolError::Unavailable));

        drop(c2);
        assert!(pool.acquire().is_ok(), "released slot should be reusable");

        drop(c1);
        drop(c3);
    }

    #[tokio::test]
    async fn test_pool_drop_returns_connection() {
        let pool =
            ConnectionPool::connect(Arc::new(FlakySource::reliable()), test_settings(), 1).await;

        {
            let _conn = pool.acquire().expect("acquire");
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_pool_init_failures_leave_dead_slots() {
        let pool = ConnectionPool::connect(
            Arc::new(FlakySource::failing_first(2)),
            test_settings(),
            5,
        )
        .await;

        assert_eq!(pool.size(), 5);
        assert_eq!(pool.available(), 3);
        assert_eq!(pool.dead_slots(), 2);

        // Dead slots are not served
        let mut held = Vec::new();
        while let Ok(conn) = pool.acquire() {
            held.push(conn);
        }
        assert_eq!(held.len(), 3);
    }

    #[tokio::test]
    async fn test_pool_recover_redials_dead_slots() {
        let pool = ConnectionPool::connect(
            Arc::new(FlakySource::failing_first(5)),
            test_settings(),
            5,
        )
        .await;
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.dead_slots(), 5);

        let recovered = pool.recover().await;
        assert_eq!(recovered, 5);
        assert_eq!(pool.available(), 5);
        assert_eq!(pool.dead_slots(), 0);
    }

    #[tokio::test]
    async fn test_pool_discard_marks_slot_dead() {
        let pool =
            ConnectionPool::connect(Arc::new(FlakySource::reliable()), test_settings(), 2).await;

        let conn = pool.acquire().expect("acquire");
        conn.discard();

        assert_eq!(pool.available(), 1);
        assert_eq!(pool.dead_slots(), 1);

        // recover brings the slot back
        assert_eq!(pool.recover().await, 1);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_pool_sample_through_guard() {
        let pool =
            ConnectionPool::connect(Arc::new(FlakySource::reliable()), test_settings(), 1).await;

        let mut conn = pool.acquire().expect("acquire");
        let sample = conn.connection().sample().await.expect("sample");
        assert_eq!(sample.total_connections, None);
    }
}
