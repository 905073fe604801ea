use super::command::{BulkCommand, WriteOperation, build_command};
use super::executor::execute_command;
use super::partition::{Partition, partition};
use super::result::BulkWriteOutcome;
use crate::connection::config::{BulkWriterConfig, ConnectionConfig};
use crate::connection::pool::ConnectionPool;
use crate::core::{DbError, Document, Result};
use crate::worker::WorkerPool;
use futures::future::{BoxFuture, FutureExt, join_all};
use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, Level, event, info_span};

/// Writes entities to a document database in bulk.
///
/// Every call splits its entities into at most one partition per worker,
/// builds each partition's command on the worker pool and, once built,
/// schedules its execution on the same pool against a pooled connection.
/// Scheduled tasks keep the writer alive, and the writer keeps its worker
/// pool alive, so dropping the caller's `Arc` or `WorkerPool` never cuts
/// in-flight work short.
pub struct BulkWriter {
    database: String,
    pool: ConnectionPool,
    workers: WorkerPool,
    config: BulkWriterConfig,
}

impl BulkWriter {
    /// Create a writer connected to `uri` that writes into `database`,
    /// scheduling work on `workers`.
    pub async fn create(uri: &str, database: &str, workers: &WorkerPool) -> Result<Arc<Self>> {
        let config = ConnectionConfig::from_uri(uri).map_err(DbError::InvalidConfig)?;
        let pool = ConnectionPool::new(config).await?;
        Self::with_pool(pool, database, workers, BulkWriterConfig::default())
    }

    pub fn with_pool(
        pool: ConnectionPool,
        database: &str,
        workers: &WorkerPool,
        config: BulkWriterConfig,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(DbError::InvalidConfig)?;
        if database.is_empty() {
            return Err(DbError::InvalidConfig("database name cannot be empty".into()));
        }

        Ok(Arc::new(Self {
            database: database.to_string(),
            pool,
            workers: workers.clone(),
            config,
        }))
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn num_workers(&self) -> usize {
        self.workers.num_workers()
    }

    /// Inserts `entities` into `collection` using a one-to-one mapping of entities to documents.
    pub fn bulk_insert<E, F>(
        self: &Arc<Self>,
        collection: &str,
        entities: impl Into<Arc<[E]>>,
        create_document: F,
    ) -> BulkWriteFuture
    where
        E: Send + Sync + 'static,
        F: Fn(&E, u32) -> Document + Send + Sync + 'static,
    {
        self.bulk_write(collection, entities, WriteOperation::insert_one(create_document))
    }

    /// Inserts `entities` into `collection` using a one-to-many mapping of entities to documents.
    pub fn bulk_insert_many<E, F>(
        self: &Arc<Self>,
        collection: &str,
        entities: impl Into<Arc<[E]>>,
        create_documents: F,
    ) -> BulkWriteFuture
    where
        E: Send + Sync + 'static,
        F: Fn(&E, u32) -> Vec<Document> + Send + Sync + 'static,
    {
        self.bulk_write(collection, entities, WriteOperation::insert_many(create_documents))
    }

    /// Upserts `entities` into `collection`: each document replaces the first
    /// document matching its entity filter, or is inserted when none matches.
    pub fn bulk_upsert<E, D, F>(
        self: &Arc<Self>,
        collection: &str,
        entities: impl Into<Arc<[E]>>,
        create_document: D,
        create_filter: F,
    ) -> BulkWriteFuture
    where
        E: Send + Sync + 'static,
        D: Fn(&E, u32) -> Document + Send + Sync + 'static,
        F: Fn(&E) -> Document + Send + Sync + 'static,
    {
        self.bulk_write(
            collection,
            entities,
            WriteOperation::upsert(create_document, create_filter),
        )
    }

    /// Deletes every document in `collection` matching any entity filter.
    pub fn bulk_delete<E, F>(
        self: &Arc<Self>,
        collection: &str,
        entities: impl Into<Arc<[E]>>,
        create_filter: F,
    ) -> BulkWriteFuture
    where
        E: Send + Sync + 'static,
        F: Fn(&E) -> Document + Send + Sync + 'static,
    {
        self.bulk_write(collection, entities, WriteOperation::delete(create_filter))
    }

    /// Partition `entities`, then build and execute every partition concurrently.
    ///
    /// The returned future resolves once every partition has finished, with
    /// one outcome per partition in batch order. Readiness does not imply
    /// success; each outcome must be inspected.
    pub fn bulk_write<E>(
        self: &Arc<Self>,
        collection: &str,
        entities: impl Into<Arc<[E]>>,
        operation: WriteOperation<E>,
    ) -> BulkWriteFuture
    where
        E: Send + Sync + 'static,
    {
        let entities: Arc<[E]> = entities.into();
        let partitions = partition(entities.len(), self.num_workers());
        if partitions.is_empty() {
            return BulkWriteFuture::ready(Vec::new());
        }

        let span = info_span!(
            "bulk.write",
            collection,
            kind = %operation.kind(),
            entities = entities.len(),
            partitions = partitions.len()
        );
        let partition_count = partitions.len();
        let context = Arc::new(DispatchContext::new(partition_count));
        let collection: Arc<str> = Arc::from(collection);

        let builds: Vec<JoinHandle<()>> = partitions
            .into_iter()
            .map(|partition| {
                let this = Arc::clone(self);
                let context = Arc::clone(&context);
                let entities = Arc::clone(&entities);
                let operation = operation.clone();
                let collection = Arc::clone(&collection);
                let task = async move {
                    let batch_index = partition.batch_index;
                    context.set(batch_index, PartitionSlot::Building);
                    let built = catch_unwind(AssertUnwindSafe(|| {
                        build_command(&operation, &entities, &partition)
                    }))
                    .unwrap_or_else(|payload| {
                        Err(DbError::MapperFailure {
                            batch_index,
                            message: panic_message(payload),
                        })
                    });
                    let slot = match built {
                        Ok(command) => PartitionSlot::Dispatched(
                            this.schedule_execute(collection, partition, command),
                        ),
                        Err(err) => {
                            event!(Level::ERROR, batch_index, error = %err, "bulk partition build failed");
                            PartitionSlot::Failed(err)
                        }
                    };
                    context.set(batch_index, slot);
                };
                self.workers.spawn(task.instrument(span.clone()))
            })
            .collect();

        let composed = async move {
            // dispatch-complete: every execute task has been scheduled (or its build failed)
            for (batch_index, build) in join_all(builds).await.into_iter().enumerate() {
                if let Err(err) = build {
                    let err = DbError::WorkerPool(join_error_message(err));
                    event!(Level::ERROR, batch_index, error = %err, "bulk partition build task aborted");
                    context.set(batch_index, PartitionSlot::Failed(err));
                }
            }
            event!(Level::DEBUG, "bulk partitions dispatched");

            join_all(
                context
                    .take()
                    .into_iter()
                    .enumerate()
                    .map(|(batch_index, slot)| slot.resolve(batch_index)),
            )
            .await
        };

        BulkWriteFuture {
            partition_count,
            inner: composed.instrument(span).boxed(),
        }
    }

    fn schedule_execute(
        self: Arc<Self>,
        collection: Arc<str>,
        partition: Partition,
        command: BulkCommand,
    ) -> JoinHandle<BulkWriteOutcome> {
        event!(
            Level::DEBUG,
            batch_index = partition.batch_index,
            start_index = partition.start_index,
            operations = command.len(),
            "bulk partition dispatched"
        );
        let workers = self.workers.handle().clone();
        let task = async move {
            execute_command(
                &self.pool,
                &self.database,
                &collection,
                partition.batch_index,
                &command,
                self.config.max_batch_size,
            )
            .await
        };
        workers.spawn(task.in_current_span())
    }
}

/// Per-partition progress, one slot per batch index.
enum PartitionSlot {
    Pending,
    Building,
    Dispatched(JoinHandle<BulkWriteOutcome>),
    Failed(DbError),
}

impl PartitionSlot {
    /// Build and execute failures were logged where they happened; only
    /// failures of the scheduling itself are logged here.
    async fn resolve(self, batch_index: usize) -> BulkWriteOutcome {
        let err = match self {
            Self::Dispatched(execute) => match execute.await {
                Ok(outcome) => return outcome,
                Err(err) => DbError::WorkerPool(join_error_message(err)),
            },
            Self::Failed(err) => return Err(err),
            Self::Pending | Self::Building => {
                DbError::WorkerPool("partition was never dispatched".into())
            }
        };
        event!(Level::ERROR, batch_index, error = %err, "bulk partition lost");
        Err(err)
    }
}

/// Fixed-size slot array shared by the partitions of one call.
struct DispatchContext {
    slots: Mutex<Vec<PartitionSlot>>,
}

impl DispatchContext {
    fn new(partition_count: usize) -> Self {
        Self {
            slots: Mutex::new((0..partition_count).map(|_| PartitionSlot::Pending).collect()),
        }
    }

    fn set(&self, batch_index: usize, slot: PartitionSlot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots[batch_index] = slot;
    }

    fn take(&self) -> Vec<PartitionSlot> {
        std::mem::take(&mut *self.slots.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        err.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "task panicked".to_string(),
        },
    }
}

/// Handle over the per-partition outcomes of one bulk call.
///
/// Resolves to one [`BulkWriteOutcome`] per partition, indexed by batch index.
/// Dropping it does not cancel the scheduled work.
#[must_use = "outcomes must be inspected to detect partial failure"]
pub struct BulkWriteFuture {
    partition_count: usize,
    inner: BoxFuture<'static, Vec<BulkWriteOutcome>>,
}

impl BulkWriteFuture {
    fn ready(outcomes: Vec<BulkWriteOutcome>) -> Self {
        Self {
            partition_count: outcomes.len(),
            inner: futures::future::ready(outcomes).boxed(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }
}

impl Future for BulkWriteFuture {
    type Output = Vec<BulkWriteOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "task panicked");
    }

    #[test]
    fn test_dispatch_context_slots() {
        let context = DispatchContext::new(2);
        context.set(1, PartitionSlot::Failed(DbError::NotFound("x".into())));

        let slots = context.take();
        assert!(matches!(slots[0], PartitionSlot::Pending));
        assert!(matches!(slots[1], PartitionSlot::Failed(_)));
        assert!(context.take().is_empty());
    }

    #[test]
    fn test_undispatched_slot_resolves_to_worker_pool_error() {
        let outcome = tokio_test::block_on(PartitionSlot::Building.resolve(0));
        assert!(matches!(outcome, Err(DbError::WorkerPool(_))));

        let failed = PartitionSlot::Failed(DbError::NotFound("x".into()));
        let outcome = tokio_test::block_on(failed.resolve(1));
        assert!(matches!(outcome, Err(DbError::NotFound(_))));
    }
}
