use crate::bulk::result::BulkWriteResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-operation diagnostic attached to a rejected command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteError {
    /// Position of the failing operation inside the submitted batch.
    pub index: usize,
    pub code: i32,
    pub message: String,
}

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Mapper failure in partition {batch_index}: {message}")]
    MapperFailure { batch_index: usize, message: String },

    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    #[error("Connection pool timeout: no connections available after {0:?}")]
    PoolTimeout(std::time::Duration),

    #[error("message: {message}{}", describe(.write_errors))]
    CommandRejected {
        code: i32,
        message: String,
        write_errors: Vec<WriteError>,
        /// Counts applied before the command was aborted.
        partial: BulkWriteResult,
    },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("'{0}' not found")]
    NotFound(String),
}

impl DbError {
    /// Server error code, if the failure came from a rejected command.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::CommandRejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_command_rejected(&self) -> bool {
        matches!(self, Self::CommandRejected { .. })
    }

    /// Server diagnostic rendered as JSON, when one was supplied.
    pub fn description(&self) -> Option<String> {
        match self {
            Self::CommandRejected { write_errors, .. } if !write_errors.is_empty() => {
                serde_json::to_string(&serde_json::json!({ "writeErrors": write_errors })).ok()
            }
            _ => None,
        }
    }
}

fn describe(write_errors: &[WriteError]) -> String {
    if write_errors.is_empty() {
        return String::new();
    }
    let payload = serde_json::json!({ "writeErrors": write_errors });
    format!(", description: {payload}")
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<tokio::sync::AcquireError> for DbError {
    fn from(err: tokio::sync::AcquireError) -> Self {
        Self::ConnectionFailure(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::WorkerPool(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_message_includes_description() {
        let err = DbError::CommandRejected {
            code: 11000,
            message: "E11000 duplicate key error".into(),
            write_errors: vec![WriteError {
                index: 1,
                code: 11000,
                message: "dup key".into(),
            }],
            partial: BulkWriteResult::default(),
        };

        let expected = r#"{"writeErrors":[{"code":11000,"index":1,"message":"dup key"}]}"#;
        assert_eq!(
            err.to_string(),
            format!("message: E11000 duplicate key error, description: {expected}")
        );
        assert_eq!(err.description().as_deref(), Some(expected));
        assert_eq!(err.code(), Some(11000));
    }

    #[test]
    fn test_rejection_message_without_description() {
        let err = DbError::CommandRejected {
            code: 2,
            message: "bad value".into(),
            write_errors: Vec::new(),
            partial: BulkWriteResult::default(),
        };

        assert_eq!(err.to_string(), "message: bad value");
        assert!(err.description().is_none());
        assert!(DbError::ConnectionFailure("down".into()).code().is_none());
    }
}
