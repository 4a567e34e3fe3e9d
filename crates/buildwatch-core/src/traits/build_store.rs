//! Build store trait
//!
//! The store owns the compare/accept decision. Callers hand it a candidate
//! record and receive a [`crate::model::Decision`]; they never inspect the
//! cache to decide for themselves. This keeps the sequence ledger, the
//! staleness rules, and the significant-field comparison in exactly one
//! place, whichever backend is in use.

use crate::model::{CacheEntry, Decision, VersionRecord};
use async_trait::async_trait;

/// Result of a compare-and-update call: the decision plus the record that
/// was current before the call (needed for diff rendering on `New`).
#[derive(Debug, Clone)]
pub struct Outcome {
    /// The accept decision
    pub decision: Decision,
    /// The previously current record, if any
    pub previous: Option<VersionRecord>,
}

/// Trait for build store implementations
///
/// All methods must be safe to call concurrently; implementations serialize
/// writes internally so two concurrent accept decisions can never race on
/// the same entry.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Compare `candidate` against the cached state for `product` and
    /// persist whatever the decision requires.
    ///
    /// Decision order: duplicate sequence, foreign-writer deferral, stale
    /// sequence, significant-field comparison, accept. `Unchanged` still
    /// persists non-significant sharpening and records the sequence.
    async fn compare_and_update(
        &self,
        product: &str,
        candidate: VersionRecord,
    ) -> Result<Outcome, crate::Error>;

    /// Cached entry for a product
    async fn entry(&self, product: &str) -> Result<Option<CacheEntry>, crate::Error>;

    /// Number of products with a cached entry
    async fn entry_count(&self) -> Result<usize, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
