use super::{Connection, config::ConnectionConfig};
use crate::core::{DbError, Result};
use crate::server::DocumentServer;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{Level, event};

type IdleQueue = Arc<Mutex<VecDeque<Connection>>>;

/// Connection pool
///
/// Bounded set of reusable connections to one document server. At most
/// `max_connections` connections are checked out at once; further callers
/// wait (up to `connect_timeout`) until a guard is dropped. This bound is the
/// backpressure on concurrent in-flight commands.
pub struct ConnectionPool {
    /// Pool configuration
    config: ConnectionConfig,
    server: Arc<DocumentServer>,
    /// One permit per connection that may be checked out
    permits: Arc<Semaphore>,
    /// Idle connections
    available: IdleQueue,
    /// Total number of open connections
    total_connections: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    /// Create a pool against the deployment registered for the configured endpoint
    pub async fn new(config: ConnectionConfig) -> Result<Self> {
        let server = DocumentServer::for_endpoint(&config.address());
        Self::new_with_server(config, server).await
    }

    /// Create a pool from a connection string
    pub async fn from_uri(uri: &str) -> Result<Self> {
        let config = ConnectionConfig::from_uri(uri).map_err(DbError::InvalidConfig)?;
        Self::new(config).await
    }

    /// Create a pool against a specific server instance
    ///
    /// Useful for testing to ensure tests don't interfere with each other.
    pub async fn new_with_server(config: ConnectionConfig, server: Arc<DocumentServer>) -> Result<Self> {
        config.validate().map_err(DbError::InvalidConfig)?;

        let pool = Self {
            permits: Arc::new(Semaphore::new(config.max_connections)),
            config,
            server,
            available: Arc::new(Mutex::new(VecDeque::new())),
            total_connections: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        };

        // Pre-create minimum connections
        pool.ensure_min_connections()?;

        Ok(pool)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn server(&self) -> &Arc<DocumentServer> {
        &self.server
    }

    /// Get a connection from the pool, waiting while the pool is exhausted
    pub async fn get_connection(&self) -> Result<PoolGuard> {
        let permit = match timeout(
            self.config.connect_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(permit) => permit?,
            Err(_) => {
                event!(
                    Level::WARN,
                    address = %self.server.address(),
                    max_connections = self.config.max_connections,
                    "connection pool exhausted"
                );
                return Err(DbError::PoolTimeout(self.config.connect_timeout));
            }
        };

        let connection = match self.take_available() {
            Some(connection) => connection,
            None => self.create_connection()?,
        };

        Ok(PoolGuard {
            connection: Some(connection),
            pool: Arc::clone(&self.available),
            total_connections: Arc::clone(&self.total_connections),
            _permit: permit,
        })
    }

    /// Pop an idle connection, discarding expired ones
    fn take_available(&self) -> Option<Connection> {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(connection) = available.pop_front() {
            if connection.is_expired(self.config.max_lifetime)
                || connection.is_idle_too_long(self.config.idle_timeout)
            {
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
                continue;
            }
            return Some(connection);
        }
        None
    }

    fn create_connection(&self) -> Result<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let connection = Connection::open(id, Arc::clone(&self.server))?;
        self.total_connections.fetch_add(1, Ordering::SeqCst);
        Ok(connection)
    }

    fn ensure_min_connections(&self) -> Result<()> {
        while self.total_connections.load(Ordering::SeqCst) < self.config.min_connections {
            let connection = self.create_connection()?;
            self.available
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(connection);
        }
        Ok(())
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let available = self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        let total = self.total_connections.load(Ordering::SeqCst);

        PoolStats {
            total_connections: total,
            available_connections: available,
            active_connections: self.config.max_connections - self.permits.available_permits(),
            max_connections: self.config.max_connections,
        }
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} available, max {}",
            self.active_connections,
            self.total_connections,
            self.available_connections,
            self.max_connections
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to the pool when dropped; broken connections are
/// closed instead.
pub struct PoolGuard {
    connection: Option<Connection>,
    pool: IdleQueue,
    total_connections: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl PoolGuard {
    pub fn connection(&mut self) -> &mut Connection {
        self.connection
            .as_mut()
            .expect("connection is present until the guard drops")
    }
}

impl std::ops::Deref for PoolGuard {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection
            .as_ref()
            .expect("connection is present until the guard drops")
    }
}

impl std::ops::DerefMut for PoolGuard {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection()
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if connection.is_broken() {
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            self.pool
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back(connection);
        }
    }
}
