// # File Build Store
//
// File-backed implementation of BuildStore with crash recovery.
//
// ## Layout
//
// - `builds.json`: one JSON document mapping product to CacheEntry, plus
//   `updated_by` / `updated_at` provenance for the cross-instance guard
// - `seqn.json`: sibling ledger mapping product to processed sequence numbers
// - `backups/`: rotating, capped set of timestamped snapshots of the
//   cache document; the oldest (by modification time) is evicted at cap
//
// ## Write discipline
//
// Every mutation is a full read-modify-write-replace: the document is
// reloaded from disk, the decision applied, and the result written to a
// temporary file that is renamed over the original. A reader can never
// observe a partially written document. Accepted (`New`) writes snapshot
// the previous document into `backups/` before the rename commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StoreConfig;
use crate::model::{CacheEntry, Decision, VersionRecord};
use crate::store::{decide, record_seqn};
use crate::traits::build_store::{BuildStore, Outcome};

/// Cache document format version
const CACHE_FILE_VERSION: &str = "1.0";

/// File-backed build store
///
/// One instance per process; writes are serialized through an internal
/// lock so two concurrent accept decisions cannot race on the same entry.
///
/// # Cross-instance guard
///
/// When the on-disk provenance shows a different `writer_id` updated the
/// document within the current poll interval, comparisons defer with
/// `Unchanged` instead of racing that instance to the notification. This
/// is an advisory heuristic, not mutual exclusion; deployments that truly
/// run two writers against one path should front it with a single-writer
/// process.
#[derive(Debug)]
pub struct FileBuildStore {
    path: PathBuf,
    ledger_path: PathBuf,
    backup_dir: PathBuf,
    writer_id: String,
    guard_window: chrono::Duration,
    backup_cap: usize,
    ledger_cap: usize,
    state: Arc<RwLock<StoreState>>,
}

#[derive(Debug)]
struct StoreState {
    builds: HashMap<String, CacheEntry>,
    seen: HashMap<String, BTreeSet<u64>>,
    updated_by: String,
    updated_at: DateTime<Utc>,
    dirty: bool,
}

/// Serializable cache document
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CacheFileFormat {
    version: String,
    builds: HashMap<String, CacheEntry>,
    updated_by: String,
    updated_at: DateTime<Utc>,
}

/// Serializable sequence ledger
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct LedgerFileFormat {
    version: String,
    seen: HashMap<String, BTreeSet<u64>>,
}

impl FileBuildStore {
    /// Open or create a file build store.
    ///
    /// `poll_interval` sizes the cross-instance guard window. Creates the
    /// parent and backup directories, then loads the cache document,
    /// falling back to the newest backup on corruption and to an empty
    /// state when neither is readable.
    pub async fn open(config: &StoreConfig, poll_interval: Duration) -> Result<Self, Error> {
        let path = PathBuf::from(&config.path);
        let ledger_path = path.with_file_name("seqn.json");
        let backup_dir = path
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| PathBuf::from("backups"));

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::store(format!(
                    "failed to create store directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        if !backup_dir.exists() {
            fs::create_dir_all(&backup_dir).await.map_err(|e| {
                Error::store(format!(
                    "failed to create backup directory {}: {}",
                    backup_dir.display(),
                    e
                ))
            })?;
        }

        let store = Self {
            path,
            ledger_path,
            backup_dir,
            writer_id: config.writer_id.clone(),
            guard_window: chrono::Duration::seconds(poll_interval.as_secs() as i64),
            backup_cap: config.backup_cap,
            ledger_cap: config.ledger_cap,
            state: Arc::new(RwLock::new(StoreState {
                builds: HashMap::new(),
                seen: HashMap::new(),
                updated_by: config.writer_id.clone(),
                updated_at: Utc::now(),
                dirty: false,
            })),
        };

        {
            let mut state = store.state.write().await;
            store.reload_into(&mut state).await?;
        }

        Ok(store)
    }

    /// Reload both documents from disk into `state`.
    ///
    /// Reading before every decision is what makes the cross-instance
    /// provenance visible at all; the in-memory state is only a cache of
    /// the last read.
    async fn reload_into(&self, state: &mut StoreState) -> Result<(), Error> {
        if let Some(doc) = self.load_cache_with_recovery().await? {
            state.builds = doc.builds;
            state.updated_by = doc.updated_by;
            state.updated_at = doc.updated_at;
        }
        state.seen = self.load_ledger().await;
        state.dirty = false;
        Ok(())
    }

    /// Load the cache document, recovering from the newest backup when the
    /// main document is corrupted. `None` when no document exists yet.
    async fn load_cache_with_recovery(&self) -> Result<Option<CacheFileFormat>, Error> {
        match Self::load_cache(&self.path).await {
            Ok(doc) => Ok(doc),
            Err(Error::Json(parse_err)) => {
                tracing::warn!(
                    "cache document {} is corrupted ({}), attempting backup recovery",
                    self.path.display(),
                    parse_err
                );
                match self.newest_backup().await? {
                    Some(backup) => match Self::load_cache(&backup).await {
                        Ok(doc) => {
                            tracing::info!("recovered cache from backup {}", backup.display());
                            Ok(doc)
                        }
                        Err(e) => {
                            tracing::error!(
                                "backup {} also unreadable ({}), starting empty",
                                backup.display(),
                                e
                            );
                            Ok(None)
                        }
                    },
                    None => {
                        tracing::warn!("no backups available, starting empty");
                        Ok(None)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load_cache(path: &Path) -> Result<Option<CacheFileFormat>, Error> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::store(format!(
                    "failed to read cache document {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let doc: CacheFileFormat = serde_json::from_str(&content)?;
        if doc.version != CACHE_FILE_VERSION {
            tracing::warn!(
                "cache document version mismatch: expected {}, got {}; loading anyway",
                CACHE_FILE_VERSION,
                doc.version
            );
        }
        Ok(Some(doc))
    }

    /// Load the ledger. The ledger is advisory: an unreadable one is
    /// logged and replaced rather than failing the store open.
    async fn load_ledger(&self) -> HashMap<String, BTreeSet<u64>> {
        let content = match fs::read_to_string(&self.ledger_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::warn!(
                    "failed to read ledger {}: {}; starting empty",
                    self.ledger_path.display(),
                    e
                );
                return HashMap::new();
            }
        };

        match serde_json::from_str::<LedgerFileFormat>(&content) {
            Ok(doc) => doc.seen,
            Err(e) => {
                tracing::warn!(
                    "ledger {} is corrupted ({}); starting empty",
                    self.ledger_path.display(),
                    e
                );
                HashMap::new()
            }
        }
    }

    /// Write both documents atomically (temp file + rename) and refresh
    /// the provenance to this writer.
    async fn persist(&self, state: &mut StoreState) -> Result<(), Error> {
        state.updated_by = self.writer_id.clone();
        state.updated_at = Utc::now();

        let cache_doc = CacheFileFormat {
            version: CACHE_FILE_VERSION.to_string(),
            builds: state.builds.clone(),
            updated_by: state.updated_by.clone(),
            updated_at: state.updated_at,
        };
        let cache_json = serde_json::to_string_pretty(&cache_doc)?;
        Self::write_atomic(&self.path, cache_json.as_bytes()).await?;

        let ledger_doc = LedgerFileFormat {
            version: CACHE_FILE_VERSION.to_string(),
            seen: state.seen.clone(),
        };
        let ledger_json = serde_json::to_string_pretty(&ledger_doc)?;
        Self::write_atomic(&self.ledger_path, ledger_json.as_bytes()).await?;

        state.dirty = false;
        tracing::trace!("store written to {}", self.path.display());
        Ok(())
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
        let temp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(bytes).await.map_err(|e| {
                Error::store(format!(
                    "failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.flush().await.map_err(|e| {
                Error::store(format!(
                    "failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        fs::rename(&temp_path, path).await.map_err(|e| {
            Error::store(format!(
                "failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })
    }

    /// Snapshot the current cache document into `backups/`, evicting the
    /// oldest snapshots once the cap is reached. Called before an accepted
    /// write commits; a store with no document yet has nothing to snapshot.
    async fn snapshot_backup(&self) -> Result<(), Error> {
        if !self.path.exists() {
            return Ok(());
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%6f");
        let mut target = self.backup_dir.join(format!("builds-{stamp}.json"));
        let mut suffix = 1u32;
        while target.exists() {
            target = self.backup_dir.join(format!("builds-{stamp}-{suffix}.json"));
            suffix += 1;
        }

        fs::copy(&self.path, &target).await.map_err(|e| {
            Error::store(format!(
                "failed to snapshot cache to {}: {}",
                target.display(),
                e
            ))
        })?;

        self.evict_old_backups().await
    }

    async fn evict_old_backups(&self) -> Result<(), Error> {
        let mut backups = self.list_backups().await?;
        while backups.len() > self.backup_cap {
            let (_, oldest) = backups.remove(0);
            if let Err(e) = fs::remove_file(&oldest).await {
                tracing::warn!("failed to evict backup {}: {}", oldest.display(), e);
                break;
            }
            tracing::debug!("evicted backup {}", oldest.display());
        }
        Ok(())
    }

    /// Backups sorted oldest-first by modification time (file name as the
    /// tie-breaker; stamped names sort chronologically).
    async fn list_backups(&self) -> Result<Vec<(std::time::SystemTime, PathBuf)>, Error> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.backup_dir).await.map_err(|e| {
            Error::store(format!(
                "failed to read backup directory {}: {}",
                self.backup_dir.display(),
                e
            ))
        })?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::store(format!("failed to list backups: {}", e)))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let modified = entry
                    .metadata()
                    .await
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                entries.push((modified, path));
            }
        }

        entries.sort();
        Ok(entries)
    }

    async fn newest_backup(&self) -> Result<Option<PathBuf>, Error> {
        Ok(self.list_backups().await?.pop().map(|(_, path)| path))
    }
}

#[async_trait]
impl BuildStore for FileBuildStore {
    async fn compare_and_update(
        &self,
        product: &str,
        candidate: VersionRecord,
    ) -> Result<Outcome, Error> {
        let mut state = self.state.write().await;
        self.reload_into(&mut state).await?;

        let deferred = state.updated_by != self.writer_id
            && Utc::now().signed_duration_since(state.updated_at) < self.guard_window;
        if deferred {
            tracing::info!(
                "deferring comparison for '{}': '{}' updated the store within the current interval",
                product,
                state.updated_by
            );
        }

        let decision = decide(
            state.builds.get(product),
            state.seen.get(product),
            deferred,
            &candidate,
        );

        let previous = state.builds.get(product).map(|e| e.current.clone());

        match decision {
            Decision::New => {
                self.snapshot_backup().await?;

                let seqn = candidate.seqn;
                state.builds.insert(
                    product.to_string(),
                    CacheEntry {
                        current: candidate,
                        old: previous.clone(),
                    },
                );
                record_seqn(
                    state.seen.entry(product.to_string()).or_default(),
                    seqn,
                    self.ledger_cap,
                );
                self.persist(&mut state).await?;
            }
            Decision::Unchanged if !deferred => {
                // Sharpening pass: hashes and probe results still land,
                // and the sequence is recorded as processed.
                if let Some(entry) = state.builds.get_mut(product) {
                    let before = entry.current.clone();
                    entry.current.absorb(&candidate);
                    let sharpened = entry.current != before;

                    let seen = state.seen.entry(product.to_string()).or_default();
                    let newly_seen = candidate.seqn > 0 && !seen.contains(&candidate.seqn);
                    record_seqn(seen, candidate.seqn, self.ledger_cap);

                    if sharpened || newly_seen {
                        self.persist(&mut state).await?;
                    }
                }
            }
            Decision::Duplicate | Decision::Stale | Decision::Unchanged => {}
        }

        Ok(Outcome { decision, previous })
    }

    async fn entry(&self, product: &str) -> Result<Option<CacheEntry>, Error> {
        let state = self.state.read().await;
        Ok(state.builds.get(product).cloned())
    }

    async fn entry_count(&self) -> Result<usize, Error> {
        let state = self.state.read().await;
        Ok(state.builds.len())
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if state.dirty {
            self.persist(&mut state).await
        } else {
            Ok(())
        }
    }
}
