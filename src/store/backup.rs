//! Timestamped backup snapshots of the live index and their retention.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorContext, SearchError, SearchResult};
use crate::types::IndexVersion;

/// Metadata file written into every snapshot directory.
pub const SNAPSHOT_META_FILE: &str = "snapshot.json";

const PARTIAL_SUFFIX: &str = ".partial";
const NAME_TIMESTAMP: &str = "%Y%m%dT%H%M%S%3fZ";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotMeta {
    version: IndexVersion,
    created_at: DateTime<Utc>,
    #[serde(default)]
    important: bool,
}

/// One complete, immutable copy of a published index version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub path: PathBuf,
    pub version: IndexVersion,
    pub created_at: DateTime<Utc>,
    /// Important snapshots survive every prune
    pub important: bool,
}

impl SnapshotInfo {
    fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            version: self.version,
            created_at: self.created_at,
            important: self.important,
        }
    }
}

/// Owns the backup directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copies every file of `live_dir` into a new snapshot directory.
    ///
    /// The copy is assembled under a `.partial` name and renamed once
    /// complete, so a listed snapshot is always whole.
    pub fn snapshot(&self, live_dir: &Path, version: IndexVersion) -> SearchResult<SnapshotInfo> {
        let created_at = Utc::now();
        let name = self.unused_name(created_at, version);
        let target = self.backup_dir.join(&name);
        let partial = self.backup_dir.join(format!("{name}{PARTIAL_SUFFIX}"));

        let info = SnapshotInfo {
            name,
            path: target.clone(),
            version,
            created_at,
            important: false,
        };

        let result = (|| -> io::Result<()> {
            fs::create_dir_all(&self.backup_dir)?;
            if partial.exists() {
                fs::remove_dir_all(&partial)?;
            }
            fs::create_dir(&partial)?;
            for entry in fs::read_dir(live_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    fs::copy(entry.path(), partial.join(entry.file_name()))?;
                }
            }
            write_meta(&partial, &info.meta())?;
            fs::rename(&partial, &target)
        })();

        if let Err(source) = result {
            if partial.exists() {
                let _ = fs::remove_dir_all(&partial);
            }
            return Err(SearchError::Backup {
                path: target,
                source,
            });
        }

        tracing::info!(snapshot = %info.name, version = %version, "created backup snapshot");
        Ok(info)
    }

    fn unused_name(&self, created_at: DateTime<Utc>, version: IndexVersion) -> String {
        let base = format!("{}-{version}", created_at.format(NAME_TIMESTAMP));
        let mut name = base.clone();
        let mut n = 1;
        while self.backup_dir.join(&name).exists() {
            name = format!("{base}-{n}");
            n += 1;
        }
        name
    }

    /// Every complete snapshot, oldest first.
    pub fn list(&self) -> SearchResult<Vec<SnapshotInfo>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.backup_dir).context("list snapshots")? {
            let entry = entry.context("list snapshots")?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if name.ends_with(PARTIAL_SUFFIX) || !path.is_dir() {
                continue;
            }
            match read_meta(&path) {
                Ok(meta) => snapshots.push(SnapshotInfo {
                    name,
                    path,
                    version: meta.version,
                    created_at: meta.created_at,
                    important: meta.important,
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring snapshot without readable metadata");
                }
            }
        }

        snapshots.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(snapshots)
    }

    pub fn find(&self, name: &str) -> SearchResult<SnapshotInfo> {
        self.list()?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| SearchError::SnapshotNotFound {
                name: name.to_string(),
            })
    }

    /// Marks or unmarks a snapshot as exempt from pruning.
    pub fn set_important(&self, name: &str, important: bool) -> SearchResult<SnapshotInfo> {
        let mut snapshot = self.find(name)?;
        snapshot.important = important;
        write_meta(&snapshot.path, &snapshot.meta()).context("update snapshot metadata")?;
        tracing::info!(snapshot = %snapshot.name, important, "updated snapshot");
        Ok(snapshot)
    }

    /// Deletes the snapshots the retention policy no longer keeps.
    pub fn prune(&self, retention_days: u32, now: DateTime<Utc>) -> SearchResult<Vec<SnapshotInfo>> {
        let snapshots = self.list()?;
        let doomed = select_for_pruning(&snapshots, now, retention_days);

        for snapshot in &doomed {
            fs::remove_dir_all(&snapshot.path).context("prune snapshots")?;
            tracing::debug!(snapshot = %snapshot.name, "pruned snapshot");
        }
        if !doomed.is_empty() {
            tracing::info!(pruned = doomed.len(), kept = snapshots.len() - doomed.len(), "pruned backup snapshots");
        }
        Ok(doomed)
    }
}

/// Applies the retention policy to `snapshots`.
///
/// Snapshots younger than `retention_days` are kept. Older ones are removed
/// unless marked important or they are the newest snapshot of their
/// calendar month.
pub fn select_for_pruning(
    snapshots: &[SnapshotInfo],
    now: DateTime<Utc>,
    retention_days: u32,
) -> Vec<SnapshotInfo> {
    let cutoff = now - TimeDelta::days(i64::from(retention_days));

    let mut newest_first: Vec<&SnapshotInfo> = snapshots.iter().collect();
    newest_first.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.name.cmp(&a.name))
    });

    let mut months_seen = HashSet::new();
    let mut doomed = Vec::new();
    for snapshot in newest_first {
        let month = (snapshot.created_at.year(), snapshot.created_at.month());
        let newest_of_month = months_seen.insert(month);
        let expired = snapshot.created_at < cutoff;

        if expired && !newest_of_month && !snapshot.important {
            doomed.push(snapshot.clone());
        }
    }
    doomed.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    doomed
}

fn write_meta(dir: &Path, meta: &SnapshotMeta) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(meta).map_err(io::Error::other)?;
    fs::write(dir.join(SNAPSHOT_META_FILE), json)
}

fn read_meta(dir: &Path) -> io::Result<SnapshotMeta> {
    let bytes = fs::read(dir.join(SNAPSHOT_META_FILE))?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn live_dir(root: &Path) -> PathBuf {
        let live = root.join("live");
        fs::create_dir_all(&live).unwrap();
        fs::write(live.join("manifest.json"), b"{}").unwrap();
        fs::write(live.join("summary.idx"), b"BFIX....").unwrap();
        live
    }

    fn at(ts: &str) -> DateTime<Utc> {
        ts.parse().unwrap()
    }

    fn info(name: &str, created_at: &str, important: bool) -> SnapshotInfo {
        SnapshotInfo {
            name: name.to_string(),
            path: PathBuf::from(name),
            version: IndexVersion(1),
            created_at: at(created_at),
            important,
        }
    }

    fn names(snapshots: &[SnapshotInfo]) -> Vec<&str> {
        snapshots.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_snapshot_copies_every_file() {
        let temp_dir = TempDir::new().unwrap();
        let live = live_dir(temp_dir.path());
        let manager = BackupManager::new(temp_dir.path().join("backups"));

        let snapshot = manager.snapshot(&live, IndexVersion(3)).unwrap();

        assert!(snapshot.name.ends_with("-v3"));
        assert_eq!(
            fs::read(snapshot.path.join("summary.idx")).unwrap(),
            b"BFIX...."
        );
        assert!(snapshot.path.join(SNAPSHOT_META_FILE).is_file());

        let listed = manager.list().unwrap();
        assert_eq!(listed, vec![snapshot]);
    }

    #[test]
    fn test_snapshot_failure_is_backup_error() {
        let temp_dir = TempDir::new().unwrap();
        let live = live_dir(temp_dir.path());
        let blocker = temp_dir.path().join("backups");
        fs::write(&blocker, b"not a directory").unwrap();

        let err = BackupManager::new(&blocker)
            .snapshot(&live, IndexVersion(1))
            .unwrap_err();
        assert!(matches!(err, SearchError::Backup { .. }));
    }

    #[test]
    fn test_partial_snapshots_are_not_listed() {
        let temp_dir = TempDir::new().unwrap();
        let manager = BackupManager::new(temp_dir.path());
        fs::create_dir_all(temp_dir.path().join("20240101T000000000Z-v1.partial")).unwrap();

        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn test_mark_important() {
        let temp_dir = TempDir::new().unwrap();
        let live = live_dir(temp_dir.path());
        let manager = BackupManager::new(temp_dir.path().join("backups"));
        let snapshot = manager.snapshot(&live, IndexVersion(1)).unwrap();

        manager.set_important(&snapshot.name, true).unwrap();
        assert!(manager.find(&snapshot.name).unwrap().important);

        assert!(matches!(
            manager.set_important("nope", true),
            Err(SearchError::SnapshotNotFound { .. })
        ));
    }

    #[test]
    fn test_recent_snapshots_are_kept() {
        let now = at("2024-06-20T12:00:00Z");
        let snapshots = vec![
            info("a", "2024-06-01T00:00:00Z", false),
            info("b", "2024-06-10T00:00:00Z", false),
            info("c", "2024-06-19T00:00:00Z", false),
        ];
        assert!(select_for_pruning(&snapshots, now, 30).is_empty());
    }

    #[test]
    fn test_one_snapshot_per_month_survives() {
        let now = at("2024-06-20T12:00:00Z");
        let snapshots = vec![
            info("mar-1", "2024-03-02T00:00:00Z", false),
            info("mar-2", "2024-03-28T00:00:00Z", false),
            info("apr-1", "2024-04-05T00:00:00Z", false),
            info("apr-2", "2024-04-06T00:00:00Z", false),
            info("apr-3", "2024-04-30T00:00:00Z", false),
            info("jun-1", "2024-06-18T00:00:00Z", false),
        ];

        let doomed = select_for_pruning(&snapshots, now, 30);
        assert_eq!(names(&doomed), vec!["mar-1", "apr-1", "apr-2"]);
    }

    #[test]
    fn test_important_snapshots_survive() {
        let now = at("2024-06-20T12:00:00Z");
        let snapshots = vec![
            info("keep", "2024-01-02T00:00:00Z", true),
            info("drop", "2024-01-03T00:00:00Z", false),
            info("newest", "2024-01-31T00:00:00Z", false),
        ];

        let doomed = select_for_pruning(&snapshots, now, 30);
        assert_eq!(names(&doomed), vec!["drop"]);
    }

    #[test]
    fn test_prune_removes_directories() {
        let temp_dir = TempDir::new().unwrap();
        let backups = temp_dir.path().join("backups");
        let manager = BackupManager::new(&backups);

        for (name, created_at) in [
            ("20240301T000000000Z-v1", "2024-03-01T00:00:00Z"),
            ("20240315T000000000Z-v2", "2024-03-15T00:00:00Z"),
        ] {
            let dir = backups.join(name);
            fs::create_dir_all(&dir).unwrap();
            write_meta(
                &dir,
                &SnapshotMeta {
                    version: IndexVersion(1),
                    created_at: at(created_at),
                    important: false,
                },
            )
            .unwrap();
        }

        let pruned = manager.prune(30, at("2024-06-01T00:00:00Z")).unwrap();
        assert_eq!(names(&pruned), vec!["20240301T000000000Z-v1"]);
        assert!(!backups.join("20240301T000000000Z-v1").exists());
        assert!(backups.join("20240315T000000000Z-v2").exists());
    }
}
