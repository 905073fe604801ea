// ============================================================================
// docbulk Library
// ============================================================================

pub mod bulk;
pub mod connection;
pub mod core;
pub mod server;
pub mod worker;

#[doc(hidden)]
pub use serde_json;

// Re-export main types for convenience
pub use bulk::{
    BulkWriteFuture, BulkWriteOutcome, BulkWriteResult, BulkWriter, WriteOperation,
    WriteOperationKind,
};
pub use core::{DbError, Document, Result, WriteError};
pub use server::DocumentServer;
pub use worker::WorkerPool;

// Re-export connection API
pub use connection::{
    Connection,
    config::{BulkWriterConfig, ConnectionConfig},
    pool::{ConnectionPool, PoolGuard, PoolStats},
};
