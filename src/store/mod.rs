//! Versioned vector store: builds, persists, backs up and publishes index
//! generations.
//!
//! Readers take an `Arc` of the current [`IndexGeneration`] and never block
//! on a rebuild. A rebuild assembles the next generation off to the side,
//! snapshots the live artifacts, swaps directories on disk and finally
//! replaces the published pointer.
//!
//! On-disk layout under `data_dir`:
//!
//! ```text
//! live/             manifest.json, mapping.json, <field>.idx
//! staging-v<N>/     next version while it is being written
//! retired-v<N>/     previous live version during the swap
//! ```

mod backup;
mod generation;
mod manifest;
mod mapping;
mod retry;
mod source;

pub use backup::{BackupManager, SNAPSHOT_META_FILE, SnapshotInfo, select_for_pruning};
pub use generation::IndexGeneration;
pub use manifest::{MANIFEST_FILE, StoreManifest};
pub use mapping::{IdMapping, MAPPING_FILE, MappingEntry};
pub use retry::{Attempted, RetryPolicy, Transient};
pub use source::{BugSource, InMemoryBugSource, JsonFileBugSource, SourceError};

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::Settings;
use crate::embedding::Embedder;
use crate::error::{SearchError, SearchResult};
use crate::types::{BugId, BugReport, IndexVersion};
use crate::vector::{ArtifactError, IndexParams};

/// Directory holding the published version.
pub const LIVE_DIR: &str = "live";

/// Callback fired after a new version is published.
pub type PublishListener = Box<dyn Fn(IndexVersion) + Send + Sync>;

/// Summary of one successful rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub version: IndexVersion,
    pub previous: Option<IndexVersion>,
    pub report_count: usize,
    /// Field texts the embedder rejected
    pub skipped_fields: usize,
    /// Backup of the version that was replaced
    pub snapshot: Option<SnapshotInfo>,
    pub pruned_snapshots: usize,
    pub elapsed_ms: u64,
}

/// How [`VectorStore::load`] obtained its version.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded(IndexVersion),
    Rebuilt(RebuildReport),
}

impl LoadOutcome {
    pub fn version(&self) -> IndexVersion {
        match self {
            LoadOutcome::Loaded(version) => *version,
            LoadOutcome::Rebuilt(report) => report.version,
        }
    }
}

/// Clears the rebuild flag when the rebuild ends, however it ends.
struct RebuildGuard<'a>(&'a AtomicBool);

impl<'a> RebuildGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct VectorStore {
    live: RwLock<Option<Arc<IndexGeneration>>>,
    embedder: Arc<dyn Embedder>,
    source: Arc<dyn BugSource>,
    /// Reports waiting for the next rebuild
    staged: DashMap<BugId, BugReport>,
    backups: BackupManager,
    data_dir: PathBuf,
    params: IndexParams,
    retry: RetryPolicy,
    retention_days: u32,
    rebuilding: AtomicBool,
    listeners: RwLock<Vec<PublishListener>>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("data_dir", &self.data_dir)
            .field("version", &self.version())
            .field("staged", &self.staged.len())
            .field("rebuilding", &self.is_rebuilding())
            .finish()
    }
}

impl VectorStore {
    pub fn new(settings: &Settings, embedder: Arc<dyn Embedder>, source: Arc<dyn BugSource>) -> Self {
        Self {
            live: RwLock::new(None),
            embedder,
            source,
            staged: DashMap::new(),
            backups: BackupManager::new(&settings.store.backup_dir),
            data_dir: settings.store.data_dir.clone(),
            params: settings.index.params(),
            retry: RetryPolicy::from_config(&settings.store),
            retention_days: settings.store.retention_days,
            rebuilding: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// The published generation, if any.
    pub fn current(&self) -> Option<Arc<IndexGeneration>> {
        self.live.read().clone()
    }

    /// The published generation, or `IndexNotReady`.
    pub fn snapshot(&self) -> SearchResult<Arc<IndexGeneration>> {
        self.current().ok_or(SearchError::IndexNotReady)
    }

    pub fn version(&self) -> Option<IndexVersion> {
        self.live.read().as_ref().map(|g| g.version())
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::Acquire)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn live_dir(&self) -> PathBuf {
        self.data_dir.join(LIVE_DIR)
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Registers a callback run after every publish.
    pub fn on_publish(&self, listener: impl Fn(IndexVersion) + Send + Sync + 'static) {
        self.listeners.write().push(Box::new(listener));
    }

    /// Stages reports for the next rebuild. The live version is unaffected.
    ///
    /// Returns how many reports were staged; reports without an id are
    /// ignored.
    pub fn upsert_batch(&self, reports: impl IntoIterator<Item = BugReport>) -> usize {
        let mut staged = 0;
        for report in reports {
            if report.bug_id.is_empty() {
                tracing::warn!("ignoring upserted bug report without a bug_id");
                continue;
            }
            self.staged.insert(report.bug_id.clone(), report);
            staged += 1;
        }
        tracing::debug!(staged, pending = self.staged.len(), "staged bug reports");
        staged
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    /// Looks a report up for hydration. Staged reports shadow the source.
    pub fn get_bug_report(&self, bug_id: &BugId) -> SearchResult<Option<BugReport>> {
        if let Some(report) = self.staged.get(bug_id) {
            return Ok(Some(report.value().clone()));
        }
        Ok(self.source.get_bug_report(bug_id)?)
    }

    /// Publishes the persisted version, or rebuilds when there is none or it
    /// was produced by a different embedder.
    ///
    /// Shares the rebuild guard, so it is rejected with `RebuildInProgress`
    /// while a rebuild is swapping `live/`.
    #[tracing::instrument(skip(self), fields(data_dir = %self.data_dir.display()))]
    pub fn load(&self) -> SearchResult<LoadOutcome> {
        let _guard = RebuildGuard::acquire(&self.rebuilding).ok_or(SearchError::RebuildInProgress)?;
        let live_dir = self.live_dir();
        if !StoreManifest::exists(&live_dir) {
            tracing::info!("no persisted index found, building one");
            return self.rebuild_locked().map(LoadOutcome::Rebuilt);
        }

        let manifest = self
            .retry
            .run("load manifest", || StoreManifest::load(&live_dir))
            .map_err(|failure| artifact_failure("load manifest", &live_dir, failure))?;

        if let Err(incompatible) = self.check_compatible(&manifest) {
            tracing::warn!(error = %incompatible, "persisted index is unusable, rebuilding");
            return self.rebuild_locked().map(LoadOutcome::Rebuilt);
        }

        let started = Instant::now();
        let generation = self
            .retry
            .run("load index", || IndexGeneration::load(&live_dir, self.params))
            .map_err(|failure| artifact_failure("load index", &live_dir, failure))?;
        let version = generation.version();

        if !self.publish(Arc::new(generation)) {
            return Ok(LoadOutcome::Loaded(self.version().unwrap_or(version)));
        }
        tracing::info!(
            version = %version,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded persisted index"
        );
        Ok(LoadOutcome::Loaded(version))
    }

    fn check_compatible(&self, manifest: &StoreManifest) -> SearchResult<()> {
        let model_id = self.embedder.model_id();
        let dimension = self.embedder.dimension().get();
        if manifest.model_id != model_id || manifest.dimension != dimension {
            return Err(SearchError::IncompatibleIndex {
                reason: format!(
                    "built with {} ({} dims), current embedder is {model_id} ({dimension} dims)",
                    manifest.model_id, manifest.dimension
                ),
            });
        }
        Ok(())
    }

    /// Builds the next version from the source plus staged reports and
    /// publishes it.
    ///
    /// Rejected with `RebuildInProgress` while another rebuild runs. Any
    /// failure before the publish leaves the live version serving.
    #[tracing::instrument(skip(self), fields(data_dir = %self.data_dir.display()))]
    pub fn rebuild(&self) -> SearchResult<RebuildReport> {
        let _guard = RebuildGuard::acquire(&self.rebuilding).ok_or(SearchError::RebuildInProgress)?;
        self.rebuild_locked()
    }

    /// Rebuild body; the caller holds the rebuild guard.
    fn rebuild_locked(&self) -> SearchResult<RebuildReport> {
        let started = Instant::now();

        let reports = self.collect_reports()?;
        let previous = self.version();
        let live_dir = self.live_dir();
        let on_disk = StoreManifest::load(&live_dir).ok().map(|m| m.version);
        let version = previous.max(on_disk).unwrap_or_default().next();

        let generation =
            IndexGeneration::build(version, &reports, self.embedder.as_ref(), self.params)?;

        let staging = self.data_dir.join(format!("staging-{version}"));
        self.retry
            .run("persist index", || {
                if staging.exists() {
                    fs::remove_dir_all(&staging)?;
                }
                generation.persist(&staging)
            })
            .map_err(|failure| artifact_failure("persist index", &staging, failure))?;

        let snapshot = if live_dir.exists() {
            let live_version = on_disk.or(previous).unwrap_or_default();
            match self.backups.snapshot(&live_dir, live_version) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::error!(error = %e, "backup failed, keeping the live index");
                    discard(&staging);
                    return Err(e);
                }
            }
        } else {
            None
        };

        if let Err(e) = self.swap_on_disk(&staging, version) {
            discard(&staging);
            return Err(e);
        }

        let report_count = generation.report_count();
        let skipped_fields = generation.skipped_fields();
        self.publish(Arc::new(generation));
        self.settle_staged(&reports);

        let pruned_snapshots = match self.backups.prune(self.retention_days, Utc::now()) {
            Ok(pruned) => pruned.len(),
            Err(e) => {
                tracing::warn!(error = %e, "snapshot pruning failed");
                0
            }
        };

        let report = RebuildReport {
            version,
            previous,
            report_count,
            skipped_fields,
            snapshot,
            pruned_snapshots,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            version = %version,
            reports = report_count,
            elapsed_ms = report.elapsed_ms,
            "published index version"
        );
        Ok(report)
    }

    /// Source reports merged with staged ones, staged winning, sorted by id.
    fn collect_reports(&self) -> SearchResult<Vec<BugReport>> {
        let listed = self
            .retry
            .run("list bug reports", || self.source.list_all_bug_reports())
            .map_err(|failure| {
                tracing::error!(attempts = failure.attempts, error = %failure.error, "could not read bug reports");
                SearchError::Source(failure.error)
            })?;

        let mut merged: BTreeMap<BugId, BugReport> = listed
            .into_iter()
            .map(|report| (report.bug_id.clone(), report))
            .collect();
        for entry in self.staged.iter() {
            merged.insert(entry.key().clone(), entry.value().clone());
        }
        Ok(merged.into_values().collect())
    }

    /// Replaces `live/` with the staging directory, restoring the old
    /// directory if the second rename fails.
    fn swap_on_disk(&self, staging: &Path, version: IndexVersion) -> SearchResult<()> {
        let live_dir = self.live_dir();
        let retired = self.data_dir.join(format!("retired-{version}"));

        if retired.exists() {
            self.retry
                .run("clear retired index", || fs::remove_dir_all(&retired))
                .map_err(|failure| io_failure("clear retired index", failure))?;
        }

        let had_live = live_dir.exists();
        if had_live {
            self.retry
                .run("retire live index", || fs::rename(&live_dir, &retired))
                .map_err(|failure| io_failure("retire live index", failure))?;
        }

        if let Err(failure) = self
            .retry
            .run("publish index", || fs::rename(staging, &live_dir))
        {
            if had_live {
                if let Err(e) = fs::rename(&retired, &live_dir) {
                    tracing::error!(retired = %retired.display(), error = %e, "could not restore the previous live index");
                }
            }
            return Err(io_failure("publish index", failure));
        }

        if had_live {
            if let Err(e) = fs::remove_dir_all(&retired) {
                tracing::warn!(path = %retired.display(), error = %e, "could not remove retired index");
            }
        }
        Ok(())
    }

    /// Replaces the published generation. Versions never move backwards.
    fn publish(&self, generation: Arc<IndexGeneration>) -> bool {
        let version = generation.version();
        {
            let mut live = self.live.write();
            if let Some(current) = live.as_ref().map(|g| g.version()) {
                if current > version {
                    tracing::warn!(current = %current, stale = %version, "refusing to publish an older version");
                    return false;
                }
            }
            *live = Some(generation);
        }
        for listener in self.listeners.read().iter() {
            listener(version);
        }
        true
    }

    /// Drops staged reports the source now returns unchanged.
    fn settle_staged(&self, built: &[BugReport]) {
        for report in built {
            let Some(staged) = self.staged.get(&report.bug_id).map(|e| e.value().clone()) else {
                continue;
            };
            if staged != *report {
                // Upserted again while the rebuild ran
                continue;
            }
            match self.source.get_bug_report(&report.bug_id) {
                Ok(Some(current)) if current == staged => {
                    self.staged.remove(&report.bug_id);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(bug_id = %report.bug_id, error = %e, "keeping staged report");
                }
            }
        }
    }

    /// Prunes backups with the configured retention.
    pub fn prune_snapshots(&self) -> SearchResult<Vec<SnapshotInfo>> {
        self.backups.prune(self.retention_days, Utc::now())
    }
}

fn discard(dir: &Path) {
    if dir.exists() {
        if let Err(e) = fs::remove_dir_all(dir) {
            tracing::warn!(path = %dir.display(), error = %e, "could not remove staging directory");
        }
    }
}

fn io_failure(operation: &str, failure: Attempted<io::Error>) -> SearchError {
    SearchError::StoreIo {
        operation: operation.to_string(),
        attempts: failure.attempts,
        source: failure.error,
    }
}

fn artifact_failure(operation: &str, path: &Path, failure: Attempted<ArtifactError>) -> SearchError {
    match failure.error {
        ArtifactError::Io(source) => SearchError::StoreIo {
            operation: operation.to_string(),
            attempts: failure.attempts,
            source,
        },
        ArtifactError::InvalidFormat(reason) => SearchError::IndexCorrupted {
            path: path.to_path_buf(),
            reason,
        },
        ArtifactError::Vector(e) => SearchError::IndexCorrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    }
}
