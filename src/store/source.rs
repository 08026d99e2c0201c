//! Bug report sources: the relational collaborator the store reads from.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::types::{BugId, BugReport};

use super::retry::Transient;

/// Errors raised while reading bug reports.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to read bug reports from '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Malformed bug report data in '{path}' at line {line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Bug report #{index} in '{path}' has an empty bug_id")]
    MissingId { path: PathBuf, index: usize },
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Read { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        SourceError::is_transient(self)
    }
}

/// Read access to the full set of bug reports.
pub trait BugSource: Send + Sync {
    /// Every report, used by rebuilds.
    fn list_all_bug_reports(&self) -> Result<Vec<BugReport>, SourceError>;

    /// One report, used to hydrate search hits. `None` if it no longer exists.
    fn get_bug_report(&self, bug_id: &BugId) -> Result<Option<BugReport>, SourceError>;
}

/// Concurrent in-memory source.
#[derive(Debug, Default)]
pub struct InMemoryBugSource {
    reports: DashMap<BugId, BugReport>,
}

impl InMemoryBugSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_reports(reports: impl IntoIterator<Item = BugReport>) -> Self {
        let source = Self::new();
        for report in reports {
            source.insert(report);
        }
        source
    }

    /// Inserts or replaces a report.
    pub fn insert(&self, report: BugReport) {
        self.reports.insert(report.bug_id.clone(), report);
    }

    pub fn remove(&self, bug_id: &BugId) -> Option<BugReport> {
        self.reports.remove(bug_id).map(|(_, report)| report)
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl BugSource for InMemoryBugSource {
    fn list_all_bug_reports(&self) -> Result<Vec<BugReport>, SourceError> {
        let mut reports: Vec<BugReport> = self.reports.iter().map(|e| e.value().clone()).collect();
        reports.sort_by(|a, b| a.bug_id.cmp(&b.bug_id));
        Ok(reports)
    }

    fn get_bug_report(&self, bug_id: &BugId) -> Result<Option<BugReport>, SourceError> {
        Ok(self.reports.get(bug_id).map(|e| e.value().clone()))
    }
}

type ReportTable = Arc<HashMap<BugId, BugReport>>;

/// Reads bug reports from a JSON array or JSON-lines file.
///
/// The parsed file is memoized by modification time so hydration does not
/// re-read it per hit.
#[derive(Debug)]
pub struct JsonFileBugSource {
    path: PathBuf,
    memo: RwLock<Option<(SystemTime, ReportTable)>>,
}

impl JsonFileBugSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            memo: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table(&self) -> Result<ReportTable, SourceError> {
        let modified = std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .map_err(|source| self.read_error(source))?;

        if let Some((stamp, table)) = self.memo.read().as_ref() {
            if *stamp == modified {
                return Ok(Arc::clone(table));
            }
        }

        let reports = self.parse()?;
        let mut table = HashMap::with_capacity(reports.len());
        for report in reports {
            if let Some(previous) = table.insert(report.bug_id.clone(), report) {
                tracing::warn!(bug_id = %previous.bug_id, path = %self.path.display(), "duplicate bug_id, keeping the later entry");
            }
        }
        let table = Arc::new(table);
        *self.memo.write() = Some((modified, Arc::clone(&table)));
        Ok(table)
    }

    fn parse(&self) -> Result<Vec<BugReport>, SourceError> {
        let content =
            std::fs::read_to_string(&self.path).map_err(|source| self.read_error(source))?;
        let trimmed = content.trim_start();

        let reports: Vec<BugReport> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed).map_err(|e| SourceError::Parse {
                path: self.path.clone(),
                line: e.line(),
                reason: e.to_string(),
            })?
        } else {
            content
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(i, line)| {
                    serde_json::from_str(line).map_err(|e| SourceError::Parse {
                        path: self.path.clone(),
                        line: i + 1,
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<_, _>>()?
        };

        if let Some(index) = reports.iter().position(|r| r.bug_id.is_empty()) {
            return Err(SourceError::MissingId {
                path: self.path.clone(),
                index,
            });
        }
        Ok(reports)
    }

    fn read_error(&self, source: io::Error) -> SourceError {
        SourceError::Read {
            path: self.path.clone(),
            source,
        }
    }
}

impl BugSource for JsonFileBugSource {
    fn list_all_bug_reports(&self) -> Result<Vec<BugReport>, SourceError> {
        let table = self.table()?;
        let mut reports: Vec<BugReport> = table.values().cloned().collect();
        reports.sort_by(|a, b| a.bug_id.cmp(&b.bug_id));
        Ok(reports)
    }

    fn get_bug_report(&self, bug_id: &BugId) -> Result<Option<BugReport>, SourceError> {
        Ok(self.table()?.get(bug_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_source() {
        let source = InMemoryBugSource::from_reports([
            BugReport::new("B-2").with_summary("second"),
            BugReport::new("B-1").with_summary("first"),
        ]);

        let all = source.list_all_bug_reports().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].bug_id, BugId::from("B-1"));

        source.insert(BugReport::new("B-1").with_summary("replaced"));
        let one = source.get_bug_report(&BugId::from("B-1")).unwrap().unwrap();
        assert_eq!(one.summary, "replaced");

        assert!(source.remove(&BugId::from("B-2")).is_some());
        assert!(source.get_bug_report(&BugId::from("B-2")).unwrap().is_none());
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_json_array_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bugs.json");
        fs::write(
            &path,
            r#"[{"bug_id": "A", "summary": "null pointer"}, {"bug_id": "B", "error_logs": "OOM"}]"#,
        )
        .unwrap();

        let source = JsonFileBugSource::new(&path);
        let all = source.list_all_bug_reports().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(
            source
                .get_bug_report(&BugId::from("B"))
                .unwrap()
                .unwrap()
                .error_logs,
            "OOM"
        );
    }

    #[test]
    fn test_json_lines_file_reports_bad_line() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bugs.jsonl");
        fs::write(
            &path,
            "{\"bug_id\": \"A\"}\n\n{\"bug_id\": \"B\"}\n{not json}\n",
        )
        .unwrap();

        let err = JsonFileBugSource::new(&path)
            .list_all_bug_reports()
            .unwrap_err();
        assert!(matches!(err, SourceError::Parse { line: 4, .. }));
    }

    #[test]
    fn test_empty_bug_id_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bugs.jsonl");
        fs::write(&path, "{\"bug_id\": \"A\"}\n{\"summary\": \"no id\"}\n").unwrap();

        let err = JsonFileBugSource::new(&path)
            .list_all_bug_reports()
            .unwrap_err();
        assert!(matches!(err, SourceError::MissingId { index: 1, .. }));
    }

    #[test]
    fn test_missing_file_is_a_permanent_read_error() {
        let source = JsonFileBugSource::new("/definitely/not/here.json");
        let err = source.list_all_bug_reports().unwrap_err();
        assert!(matches!(err, SourceError::Read { .. }));
        assert!(!err.is_transient());
    }
}
