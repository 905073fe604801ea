use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Counts reported by the server for one bulk command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BulkWriteResult {
    /// The number of documents that were inserted.
    pub inserted: u64,
    /// The number of documents that matched existing documents.
    pub matched: u64,
    /// The number of existing documents that were modified.
    pub modified: u64,
    /// The number of existing documents that were deleted.
    pub deleted: u64,
    /// The number of documents that were inserted because no document matched.
    pub upserted: u64,
}

/// Per-partition outcome: counts or the captured failure.
pub type BulkWriteOutcome = Result<BulkWriteResult>;

impl BulkWriteResult {
    pub const ZERO: Self = Self {
        inserted: 0,
        matched: 0,
        modified: 0,
        deleted: 0,
        upserted: 0,
    };

    /// Aggregates all results into a single result.
    pub fn aggregate<'a>(results: impl IntoIterator<Item = &'a BulkWriteResult>) -> Self {
        results.into_iter().copied().sum()
    }

    /// Aggregates the successful outcomes, skipping failed partitions.
    pub fn aggregate_successes<'a>(outcomes: impl IntoIterator<Item = &'a BulkWriteOutcome>) -> Self {
        Self::aggregate(outcomes.into_iter().filter_map(|outcome| outcome.as_ref().ok()))
    }
}

impl Add for BulkWriteResult {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl AddAssign for BulkWriteResult {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.matched += rhs.matched;
        self.modified += rhs.modified;
        self.deleted += rhs.deleted;
        self.upserted += rhs.upserted;
    }
}

impl Sum for BulkWriteResult {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl std::fmt::Display for BulkWriteResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted: {}, matched: {}, modified: {}, deleted: {}, upserted: {}",
            self.inserted, self.matched, self.modified, self.deleted, self.upserted
        )
    }
}
