use crate::bulk::command::WriteModel;
use crate::bulk::result::BulkWriteResult;
use crate::core::{DbError, Document, JsonValue, WriteError, lookup, matches_filter};

pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Documents of one collection plus its unique indexes.
#[derive(Debug, Default)]
pub struct Collection {
    namespace: String,
    documents: Vec<Document>,
    unique_fields: Vec<String>,
}

impl Collection {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn add_unique_field(&mut self, field: &str) -> Result<(), DbError> {
        if self.unique_fields.iter().any(|existing| existing == field) {
            return Ok(());
        }
        for (position, document) in self.documents.iter().enumerate() {
            if let Some(value) = lookup(document, field) {
                if let Some(message) = self.duplicate_of(field, value, Some(position)) {
                    return Err(DbError::CommandRejected {
                        code: DUPLICATE_KEY_CODE,
                        message,
                        write_errors: Vec::new(),
                        partial: BulkWriteResult::ZERO,
                    });
                }
            }
        }
        self.unique_fields.push(field.to_string());
        Ok(())
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn count(&self, filter: &Document) -> usize {
        self.documents
            .iter()
            .filter(|document| matches_filter(document, filter))
            .count()
    }

    /// Apply models in order, aborting at the first failing operation.
    pub fn apply_ordered(&mut self, models: &[WriteModel]) -> Result<BulkWriteResult, DbError> {
        let mut counts = BulkWriteResult::ZERO;
        for (index, model) in models.iter().enumerate() {
            if let Err((code, message)) = self.apply(model, &mut counts) {
                return Err(DbError::CommandRejected {
                    code,
                    message: message.clone(),
                    write_errors: vec![WriteError {
                        index,
                        code,
                        message,
                    }],
                    partial: counts,
                });
            }
        }
        Ok(counts)
    }

    fn apply(&mut self, model: &WriteModel, counts: &mut BulkWriteResult) -> Result<(), (i32, String)> {
        match model {
            WriteModel::InsertOne { document } => {
                self.check_unique(document, None)?;
                self.documents.push(document.clone());
                counts.inserted += 1;
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                let position = self
                    .documents
                    .iter()
                    .position(|document| matches_filter(document, filter));
                match position {
                    Some(position) => {
                        let mut replacement = replacement.clone();
                        if let Some(id) = self.documents[position].get("_id") {
                            replacement.entry("_id").or_insert_with(|| id.clone());
                        }
                        self.check_unique(&replacement, Some(position))?;
                        counts.matched += 1;
                        if self.documents[position] != replacement {
                            self.documents[position] = replacement;
                            counts.modified += 1;
                        }
                    }
                    None if *upsert => {
                        self.check_unique(replacement, None)?;
                        self.documents.push(replacement.clone());
                        counts.upserted += 1;
                    }
                    None => {}
                }
            }
            WriteModel::DeleteMany { filter } => {
                let before = self.documents.len();
                self.documents.retain(|document| !matches_filter(document, filter));
                counts.deleted += (before - self.documents.len()) as u64;
            }
        }
        Ok(())
    }

    fn check_unique(&self, document: &Document, skip: Option<usize>) -> Result<(), (i32, String)> {
        for field in &self.unique_fields {
            if let Some(value) = lookup(document, field) {
                if let Some(message) = self.duplicate_of(field, value, skip) {
                    return Err((DUPLICATE_KEY_CODE, message));
                }
            }
        }
        Ok(())
    }

    fn duplicate_of(&self, field: &str, value: &JsonValue, skip: Option<usize>) -> Option<String> {
        let clash = self
            .documents
            .iter()
            .enumerate()
            .filter(|(position, _)| Some(*position) != skip)
            .any(|(_, existing)| lookup(existing, field) == Some(value));
        clash.then(|| {
            format!(
                "E11000 duplicate key error collection: {} index: {}_1 dup key: {{ {}: {} }}",
                self.namespace, field, field, value
            )
        })
    }
}
