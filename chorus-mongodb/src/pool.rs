//! Per-server connection pool.
//!
//! A [`ConnectionPool`] lends out driver connections wrapped in a
//! [`PooledConnection`] guard that returns the connection when dropped.
//! Acquisition blocks on a condition variable until a connection is free,
//! or fails at once in no-block mode. Connections are opened lazily, up to
//! the pool's maximum size.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::ServerConfig;
use crate::driver::{Connection, Driver};
use crate::error::{MongoError, MongoResult};

/// Connections per server when nothing else is configured.
pub const DEFAULT_POOL_MAX: usize = 100;

struct PoolState {
    idle: Vec<Box<dyn Connection>>,
    active: usize,
    opening: usize,
    closed: bool,
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections waiting to be used.
    pub idle: usize,
    /// Connections lent out.
    pub active: usize,
    /// Upper bound on idle plus active connections.
    pub max_size: usize,
    /// Connections opened over the pool's life.
    pub opened: u64,
    /// Successful acquisitions.
    pub checkouts: u64,
    /// Connections given back.
    pub releases: u64,
}

/// A bounded pool of driver connections for one server.
pub struct ConnectionPool {
    driver: Arc<dyn Driver>,
    config: Arc<ServerConfig>,
    max_size: usize,
    state: Mutex<PoolState>,
    available: Condvar,
    opened: AtomicU64,
    checkouts: AtomicU64,
    releases: AtomicU64,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("driver", &self.driver.name())
            .field("spec", &self.config.spec())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Create a pool. The size comes from the configuration's `poolmax`.
    pub fn new(driver: Arc<dyn Driver>, config: Arc<ServerConfig>) -> Arc<Self> {
        let max_size = config
            .pool_max
            .map_or(DEFAULT_POOL_MAX, |n| (n as usize).max(1));
        Arc::new(Self {
            driver,
            config,
            max_size,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                active: 0,
                opening: 0,
                closed: false,
            }),
            available: Condvar::new(),
            opened: AtomicU64::new(0),
            checkouts: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        })
    }

    /// The configuration connections are opened with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The largest number of connections the pool holds.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Borrow a connection.
    ///
    /// With `block` set this waits until a connection is free. Without it,
    /// an exhausted pool is a [`MongoError::Pool`] error.
    pub fn acquire(self: &Arc<Self>, block: bool) -> MongoResult<PooledConnection> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(MongoError::pool(format!(
                    "pool for {} is closed",
                    self.config.spec()
                )));
            }
            if let Some(conn) = state.idle.pop() {
                state.active += 1;
                return Ok(self.lend(conn));
            }
            if state.active + state.opening < self.max_size {
                return self.open(state);
            }
            if !block {
                return Err(MongoError::pool(format!(
                    "no free connection for {} ({} in use)",
                    self.config.spec(),
                    state.active
                )));
            }
            trace!(spec = %self.config.spec(), "Waiting for a pooled connection");
            self.available.wait(&mut state);
        }
    }

    fn open(self: &Arc<Self>, mut state: MutexGuard<'_, PoolState>) -> MongoResult<PooledConnection> {
        state.opening += 1;
        let result = MutexGuard::unlocked(&mut state, || self.driver.connect(&self.config));
        state.opening -= 1;
        match result {
            Ok(conn) => {
                state.active += 1;
                let opened = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    spec = %self.config.spec(),
                    driver = self.driver.name(),
                    opened = opened,
                    "Opened pooled connection"
                );
                Ok(self.lend(conn))
            }
            Err(err) => {
                self.available.notify_one();
                Err(err.with_context(self.config.uri.to_string()))
            }
        }
    }

    fn lend(self: &Arc<Self>, conn: Box<dyn Connection>) -> PooledConnection {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, conn: Box<dyn Connection>) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        if !state.closed {
            state.idle.push(conn);
        }
        drop(state);
        self.available.notify_one();
    }

    /// Drop idle connections and refuse further acquisitions. Connections
    /// still lent out are dropped when they come back.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.idle.clear();
        drop(state);
        self.available.notify_all();
    }

    /// Current statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            idle: state.idle.len(),
            active: state.active,
            max_size: self.max_size,
            opened: self.opened.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }
}

/// A borrowed connection, returned to its pool on drop.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<ConnectionPool>,
}

impl PooledConnection {
    /// The connection.
    pub fn connection(&mut self) -> MongoResult<&mut dyn Connection> {
        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(MongoError::pool("connection already returned")),
        }
    }

    /// Give the connection back now.
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("spec", &self.pool.config.spec())
            .field("held", &self.conn.is_some())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.give_back();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverOp, MemoryDriver};
    use pretty_assertions::assert_eq;
    use std::thread;
    use std::time::Duration;

    fn pool(max: u32) -> (MemoryDriver, Arc<ConnectionPool>) {
        let driver = MemoryDriver::new();
        let config = ServerConfig::builder()
            .uri("mongodb://localhost/test")
            .pool_max(max)
            .build()
            .unwrap();
        let pool = ConnectionPool::new(Arc::new(driver.clone()), Arc::new(config));
        (driver, pool)
    }

    #[test]
    fn test_acquire_and_release() {
        let (driver, pool) = pool(2);
        let conn = pool.acquire(true).unwrap();
        assert_eq!(pool.stats().active, 1);
        drop(conn);

        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.checkouts, 1);
        assert_eq!(stats.releases, 1);

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["max_size"], 2);
        assert_eq!(json["checkouts"], 1);

        let _again = pool.acquire(true).unwrap();
        assert_eq!(driver.store().connections_opened(), 1);
    }

    #[test]
    fn test_noblock_fails_when_exhausted() {
        let (_driver, pool) = pool(1);
        let held = pool.acquire(false).unwrap();
        let err = pool.acquire(false).unwrap_err();
        assert!(err.is_pool());
        held.release();
        assert!(pool.acquire(false).is_ok());
    }

    #[test]
    fn test_blocking_acquire_waits_for_release() {
        let (_driver, pool) = pool(1);
        let held = pool.acquire(true).unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire(true).map(|_| ()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        waiter.join().unwrap().unwrap();
        assert_eq!(pool.stats().checkouts, 2);
    }

    #[test]
    fn test_connect_failure_frees_slot() {
        let (driver, pool) = pool(1);
        driver.store().fail_next(DriverOp::Connect, "refused");
        let err = pool.acquire(false).unwrap_err();
        assert!(err.is_driver());
        assert_eq!(pool.stats().active, 0);
        assert!(pool.acquire(false).is_ok());
    }

    #[test]
    fn test_closed_pool() {
        let (_driver, pool) = pool(2);
        let held = pool.acquire(true).unwrap();
        pool.close();
        assert!(pool.acquire(true).unwrap_err().is_pool());
        drop(held);
        assert_eq!(pool.stats().idle, 0);
    }
}
