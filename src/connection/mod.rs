pub mod config;
pub mod pool;

use crate::bulk::command::WriteModel;
use crate::bulk::result::BulkWriteResult;
use crate::core::{DbError, Result};
use crate::server::DocumentServer;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Database connection handle
///
/// One logical session with a document server. Obtained from a
/// [`pool::ConnectionPool`]; not shared between concurrent commands.
pub struct Connection {
    /// Unique connection ID
    id: u64,
    server: Arc<DocumentServer>,
    created_at: Instant,
    last_used: Instant,
    /// Set after a transport error; broken connections are not returned to the pool
    broken: bool,
}

impl Connection {
    /// Open a connection (internal use)
    pub(crate) fn open(id: u64, server: Arc<DocumentServer>) -> Result<Self> {
        server.check_available()?;
        let now = Instant::now();
        Ok(Self {
            id,
            server,
            created_at: now,
            last_used: now,
            broken: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|lifetime| self.created_at.elapsed() > lifetime)
    }

    pub(crate) fn is_idle_too_long(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|timeout| self.last_used.elapsed() > timeout)
    }

    /// Submit one ordered batch of write models to `database.collection`.
    pub async fn bulk_write(
        &mut self,
        database: &str,
        collection: &str,
        models: &[WriteModel],
    ) -> Result<BulkWriteResult> {
        if self.broken {
            return Err(DbError::ConnectionFailure(format!(
                "connection {} is closed",
                self.id
            )));
        }

        self.last_used = Instant::now();
        let result = self.server.execute_bulk(database, collection, models).await;
        if matches!(result, Err(DbError::ConnectionFailure(_))) {
            self.broken = true;
        }
        result
    }
}
