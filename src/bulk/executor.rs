use super::command::BulkCommand;
use super::result::{BulkWriteOutcome, BulkWriteResult};
use crate::connection::pool::ConnectionPool;
use crate::core::DbError;
use tracing::{Level, event};

/// Drive one partition's command to completion on a pooled connection.
///
/// Waits for a free connection when the pool is exhausted. Sub-batches of at
/// most `max_batch_size` operations are submitted in order on that connection;
/// the first failure ends the partition. Every failure is logged at ERROR and
/// returned as the outcome; nothing is propagated past this function.
pub async fn execute_command(
    pool: &ConnectionPool,
    database: &str,
    collection: &str,
    batch_index: usize,
    command: &BulkCommand,
    max_batch_size: usize,
) -> BulkWriteOutcome {
    let result = submit(pool, database, collection, command, max_batch_size).await;
    match &result {
        Ok(counts) => {
            event!(
                Level::DEBUG,
                batch_index,
                operations = command.len(),
                %counts,
                "bulk partition completed"
            );
        }
        Err(err) => {
            event!(
                Level::ERROR,
                batch_index,
                collection,
                operations = command.len(),
                error = %err,
                "bulk partition failed"
            );
        }
    }
    result
}

async fn submit(
    pool: &ConnectionPool,
    database: &str,
    collection: &str,
    command: &BulkCommand,
    max_batch_size: usize,
) -> BulkWriteOutcome {
    // nothing to send, e.g. a one-to-many mapper that produced no documents
    if command.is_empty() {
        return Ok(BulkWriteResult::ZERO);
    }

    let mut connection = pool.get_connection().await?;
    let mut applied = BulkWriteResult::ZERO;
    for (offset, batch) in command.batches(max_batch_size).enumerate() {
        match connection.bulk_write(database, collection, batch).await {
            Ok(counts) => applied += counts,
            Err(DbError::CommandRejected {
                code,
                message,
                mut write_errors,
                partial,
            }) => {
                let base = offset * max_batch_size.max(1);
                for write_error in &mut write_errors {
                    write_error.index += base;
                }
                return Err(DbError::CommandRejected {
                    code,
                    message,
                    write_errors,
                    partial: applied + partial,
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(applied)
}
