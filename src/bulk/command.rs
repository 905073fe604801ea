//! Bulk command construction.
//!
//! A [`WriteOperation`] describes how every entity of a partition turns into
//! low-level [`WriteModel`]s. [`build_command`] walks one partition and
//! produces an immutable [`BulkCommand`] whose order is the order the server
//! applies the operations in.

use super::partition::Partition;
use crate::core::{DbError, Document, Result};
use std::fmt;
use std::sync::Arc;

/// Maps an entity and its global index to one document.
pub type DocumentMapper<E> = Arc<dyn Fn(&E, u32) -> Document + Send + Sync>;

/// Maps an entity and its global index to zero or more documents.
pub type DocumentsMapper<E> = Arc<dyn Fn(&E, u32) -> Vec<Document> + Send + Sync>;

/// Maps an entity to a filter matching its existing records.
pub type FilterMapper<E> = Arc<dyn Fn(&E) -> Document + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOperationKind {
    InsertOne,
    InsertMany,
    Upsert,
    Delete,
}

impl fmt::Display for WriteOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InsertOne => "insert_one",
            Self::InsertMany => "insert_many",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Operation descriptor shared by every partition of one call.
pub enum WriteOperation<E> {
    InsertOne(DocumentMapper<E>),
    InsertMany(DocumentsMapper<E>),
    Upsert {
        document: DocumentMapper<E>,
        filter: FilterMapper<E>,
    },
    Delete(FilterMapper<E>),
}

impl<E> WriteOperation<E> {
    pub fn insert_one<F>(create_document: F) -> Self
    where
        F: Fn(&E, u32) -> Document + Send + Sync + 'static,
    {
        Self::InsertOne(Arc::new(create_document))
    }

    pub fn insert_many<F>(create_documents: F) -> Self
    where
        F: Fn(&E, u32) -> Vec<Document> + Send + Sync + 'static,
    {
        Self::InsertMany(Arc::new(create_documents))
    }

    pub fn upsert<D, F>(create_document: D, create_filter: F) -> Self
    where
        D: Fn(&E, u32) -> Document + Send + Sync + 'static,
        F: Fn(&E) -> Document + Send + Sync + 'static,
    {
        Self::Upsert {
            document: Arc::new(create_document),
            filter: Arc::new(create_filter),
        }
    }

    pub fn delete<F>(create_filter: F) -> Self
    where
        F: Fn(&E) -> Document + Send + Sync + 'static,
    {
        Self::Delete(Arc::new(create_filter))
    }

    pub fn kind(&self) -> WriteOperationKind {
        match self {
            Self::InsertOne(_) => WriteOperationKind::InsertOne,
            Self::InsertMany(_) => WriteOperationKind::InsertMany,
            Self::Upsert { .. } => WriteOperationKind::Upsert,
            Self::Delete(_) => WriteOperationKind::Delete,
        }
    }

    /// Append the operations for one entity.
    fn append(&self, command: &mut Vec<WriteModel>, entity: &E, index: u32) {
        match self {
            Self::InsertOne(create_document) => {
                command.push(WriteModel::InsertOne {
                    document: create_document(entity, index),
                });
            }
            Self::InsertMany(create_documents) => {
                command.extend(
                    create_documents(entity, index)
                        .into_iter()
                        .map(|document| WriteModel::InsertOne { document }),
                );
            }
            Self::Upsert { document, filter } => {
                let replacement = document(entity, index);
                command.push(WriteModel::ReplaceOne {
                    filter: filter(entity),
                    replacement,
                    upsert: true,
                });
            }
            Self::Delete(create_filter) => {
                command.push(WriteModel::DeleteMany {
                    filter: create_filter(entity),
                });
            }
        }
    }
}

// Manual impl: the mappers are shared, `E` itself need not be Clone.
impl<E> Clone for WriteOperation<E> {
    fn clone(&self) -> Self {
        match self {
            Self::InsertOne(mapper) => Self::InsertOne(Arc::clone(mapper)),
            Self::InsertMany(mapper) => Self::InsertMany(Arc::clone(mapper)),
            Self::Upsert { document, filter } => Self::Upsert {
                document: Arc::clone(document),
                filter: Arc::clone(filter),
            },
            Self::Delete(mapper) => Self::Delete(Arc::clone(mapper)),
        }
    }
}

impl<E> fmt::Debug for WriteOperation<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WriteOperation").field(&self.kind()).finish()
    }
}

/// One low-level write as understood by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    /// Replace the first document matching `filter`; insert when `upsert` and nothing matches.
    ReplaceOne {
        filter: Document,
        replacement: Document,
        upsert: bool,
    },
    /// Remove every document matching `filter`.
    DeleteMany {
        filter: Document,
    },
}

/// Ordered, immutable batch of write models built for one partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkCommand {
    models: Vec<WriteModel>,
}

impl BulkCommand {
    pub fn new(models: Vec<WriteModel>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &[WriteModel] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Consecutive sub-batches of at most `max_batch_size` models.
    pub fn batches(&self, max_batch_size: usize) -> std::slice::Chunks<'_, WriteModel> {
        self.models.chunks(max_batch_size.max(1))
    }
}

/// Build the command for one partition, indexing entities from its start index.
///
/// Mappers receive a `u32` global index; a partition reaching past
/// `u32::MAX` fails as a mapper failure.
pub fn build_command<E>(
    operation: &WriteOperation<E>,
    entities: &[E],
    partition: &Partition,
) -> Result<BulkCommand> {
    let mut models = Vec::with_capacity(partition.len);
    for (offset, entity) in entities[partition.range()].iter().enumerate() {
        let index = global_index(partition, offset)?;
        operation.append(&mut models, entity, index);
    }
    Ok(BulkCommand::new(models))
}

fn global_index(partition: &Partition, offset: usize) -> Result<u32> {
    let index = partition.start_index + offset;
    u32::try_from(index).map_err(|_| DbError::MapperFailure {
        batch_index: partition.batch_index,
        message: format!("entity index {index} exceeds the u32 index range"),
    })
}
