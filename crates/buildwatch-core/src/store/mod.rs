//! Build store implementations
//!
//! The store is the single authority on whether a fetched record is news.
//! Both backends share one decision function so the file and memory stores
//! can never drift apart on the accept rules.

pub mod file;
pub mod memory;

pub use file::FileBuildStore;
pub use memory::MemoryBuildStore;

use crate::model::{CacheEntry, Decision, VersionRecord};
use std::collections::BTreeSet;

/// Apply the accept rules to a candidate record.
///
/// Order matters and is fixed:
/// 1. sequence already processed → [`Decision::Duplicate`]
/// 2. another writer owns the current interval → [`Decision::Unchanged`]
/// 3. sequence > 0 and behind the accepted one → [`Decision::Stale`]
///    (a source-side caching artifact, not an error; seqn 0 means the
///    response carried no usable sequence and bypasses this check)
/// 4. no significant field differs → [`Decision::Unchanged`]
/// 5. otherwise → [`Decision::New`]
///
/// The caller is responsible for the persistence each decision implies.
pub(crate) fn decide(
    entry: Option<&CacheEntry>,
    seen: Option<&BTreeSet<u64>>,
    deferred: bool,
    candidate: &VersionRecord,
) -> Decision {
    if candidate.seqn > 0 && seen.is_some_and(|s| s.contains(&candidate.seqn)) {
        return Decision::Duplicate;
    }

    if deferred {
        return Decision::Unchanged;
    }

    let Some(entry) = entry else {
        return Decision::New;
    };

    if candidate.seqn > 0 && candidate.seqn < entry.current.seqn {
        return Decision::Stale;
    }

    if candidate.differs_significantly(&entry.current) {
        Decision::New
    } else {
        Decision::Unchanged
    }
}

/// Record a processed sequence number, pruning the oldest once the ledger
/// grows past `cap`. Sequence 0 is never recorded: it stands for "no
/// sequence available" and must not poison the duplicate check.
pub(crate) fn record_seqn(seen: &mut BTreeSet<u64>, seqn: u64, cap: usize) {
    if seqn == 0 {
        return;
    }
    seen.insert(seqn);
    while seen.len() > cap {
        let oldest = *seen.iter().next().expect("non-empty ledger");
        seen.remove(&oldest);
    }
}
