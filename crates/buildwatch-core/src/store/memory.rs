// # Memory Build Store
//
// In-memory implementation of BuildStore.
//
// Same decision rules as the file store, no persistence and no
// cross-instance guard (a process-local store has no other instances).
// After a restart every product reads as a first observation, which the
// poller's cold-start rule absorbs without notifying anyone.
//
// Intended for tests and ephemeral deployments.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{CacheEntry, Decision, VersionRecord};
use crate::store::{decide, record_seqn};
use crate::traits::build_store::{BuildStore, Outcome};

/// Per-product ledger cap, matching the file store's default
const DEFAULT_LEDGER_CAP: usize = 64;

/// In-memory build store implementation
#[derive(Debug, Clone, Default)]
pub struct MemoryBuildStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    builds: HashMap<String, CacheEntry>,
    seen: HashMap<String, BTreeSet<u64>>,
}

impl MemoryBuildStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all entries and the ledger
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.builds.clear();
        inner.seen.clear();
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn compare_and_update(
        &self,
        product: &str,
        candidate: VersionRecord,
    ) -> Result<Outcome, Error> {
        let mut inner = self.inner.write().await;

        let decision = decide(
            inner.builds.get(product),
            inner.seen.get(product),
            false,
            &candidate,
        );

        let previous = inner.builds.get(product).map(|e| e.current.clone());

        match decision {
            Decision::New => {
                let seqn = candidate.seqn;
                inner.builds.insert(
                    product.to_string(),
                    CacheEntry {
                        current: candidate,
                        old: previous.clone(),
                    },
                );
                record_seqn(
                    inner.seen.entry(product.to_string()).or_default(),
                    seqn,
                    DEFAULT_LEDGER_CAP,
                );
            }
            Decision::Unchanged => {
                if let Some(entry) = inner.builds.get_mut(product) {
                    entry.current.absorb(&candidate);
                }
                record_seqn(
                    inner.seen.entry(product.to_string()).or_default(),
                    candidate.seqn,
                    DEFAULT_LEDGER_CAP,
                );
            }
            Decision::Duplicate | Decision::Stale => {}
        }

        Ok(Outcome { decision, previous })
    }

    async fn entry(&self, product: &str) -> Result<Option<CacheEntry>, Error> {
        let inner = self.inner.read().await;
        Ok(inner.builds.get(product).cloned())
    }

    async fn entry_count(&self) -> Result<usize, Error> {
        let inner = self.inner.read().await;
        Ok(inner.builds.len())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered; everything is already "persisted"
        Ok(())
    }
}
