//! Concurrent bulk persistence.
//!
//! Entities are split into partitions ([`partition`]), each partition is turned
//! into an ordered [`command::BulkCommand`], and every command is executed on
//! its own pooled connection ([`executor`]). [`writer::BulkWriter`] ties the
//! steps together on a worker pool.

pub mod command;
pub mod executor;
pub mod partition;
pub mod result;
pub mod writer;

pub use command::{
    BulkCommand, DocumentMapper, DocumentsMapper, FilterMapper, WriteModel, WriteOperation,
    WriteOperationKind,
};
pub use partition::Partition;
pub use result::{BulkWriteOutcome, BulkWriteResult};
pub use writer::{BulkWriteFuture, BulkWriter};
