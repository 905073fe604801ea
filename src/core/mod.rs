pub mod document;
pub mod error;

pub use document::{Document, JsonValue, lookup, matches_filter};
pub use error::{DbError, Result, WriteError};
