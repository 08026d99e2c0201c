//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bugfuse::config::EmbeddingProvider;
use bugfuse::store::SourceError;
use bugfuse::vector::{VectorDimension, VectorError};
use bugfuse::{
    BugId, BugReport, BugSource, Embedder, FieldKind, HashingEmbedder, InMemoryBugSource, SearchContext,
    Settings,
};
use parking_lot::{Condvar, Mutex};
use tempfile::TempDir;

pub const DIMENSION: usize = 128;

/// Settings rooted in `root` with the hashing embedder and no retry delay.
pub fn test_settings(root: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.store.data_dir = root.join("index");
    settings.store.backup_dir = root.join("backups");
    settings.store.retry_delay_ms = 0;
    settings.embedding.provider = EmbeddingProvider::Hashing;
    settings.embedding.dimension = DIMENSION;
    settings.source.path = root.join("bugs.json");
    settings
}

pub fn hashing_embedder() -> Arc<dyn Embedder> {
    Arc::new(HashingEmbedder::new(VectorDimension::new(DIMENSION).unwrap()))
}

pub fn abc_reports() -> Vec<BugReport> {
    vec![
        BugReport::new("A").with_summary("null pointer dereference in JSON parser"),
        BugReport::new("B").with_summary("memory leak in LRU cache eviction"),
        BugReport::new("C").with_summary("connection timeout in network client"),
    ]
}

/// A small but varied corpus touching every field.
pub fn sample_reports() -> Vec<BugReport> {
    let mut reports = vec![
        BugReport::new("BUG-101")
            .with_summary("crash when opening settings dialog twice")
            .with_code("fn open_dialog(&mut self) { self.dialog.take().unwrap().show() }")
            .with_error_logs("thread 'main' panicked at 'called Option::unwrap() on a None value'")
            .with_environment("linux x86_64 gtk 3.24"),
        BugReport::new("BUG-102")
            .with_summary("slow startup with large workspace")
            .with_code("for entry in walk(root) { index.add(read(entry)?) }")
            .with_error_logs("WARN indexing took 45s for 120000 files")
            .with_environment("macos arm64 apfs"),
        BugReport::new("BUG-103")
            .with_summary("login form rejects valid email addresses with plus sign")
            .with_code("let re = Regex::new(r\"^[a-z0-9.]+@[a-z]+\\.[a-z]+$\")")
            .with_environment("chrome 120 windows 11"),
        BugReport::new("BUG-104")
            .with_summary("database connection pool exhausted under load")
            .with_error_logs("ERROR pool timed out while waiting for an open connection")
            .with_environment("postgres 15 kubernetes"),
        BugReport::new("BUG-105")
            .with_summary("dark theme colors unreadable in tooltip")
            .with_environment("windows 10 high contrast mode"),
    ];
    reports[2].test_steps = "open login page\ntype user+tag@example.com\nsubmit".to_string();
    reports[2].expected_result = "account is created".to_string();
    reports[2].actual_result = "form shows invalid email".to_string();
    reports
}

pub fn memory_source(reports: Vec<BugReport>) -> Arc<InMemoryBugSource> {
    Arc::new(InMemoryBugSource::from_reports(reports))
}

pub struct TestContext {
    pub dir: TempDir,
    pub settings: Settings,
    pub context: SearchContext,
}

impl TestContext {
    pub fn new(source: Arc<dyn BugSource>) -> Self {
        Self::with_embedder(hashing_embedder(), source)
    }

    pub fn with_embedder(embedder: Arc<dyn Embedder>, source: Arc<dyn BugSource>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let settings = test_settings(dir.path());
        let context =
            SearchContext::new(&settings, embedder, source).expect("Failed to create context");
        Self {
            dir,
            settings,
            context,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Hashing embedder whose batch calls, the ones rebuilds make, can be held
/// at a gate. Single-text calls used by queries always pass.
pub struct GatedEmbedder {
    inner: HashingEmbedder,
    open: Mutex<bool>,
    opened: Condvar,
    blocked: AtomicBool,
}

impl GatedEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(VectorDimension::new(DIMENSION).unwrap()),
            open: Mutex::new(true),
            opened: Condvar::new(),
            blocked: AtomicBool::new(false),
        }
    }

    pub fn close(&self) {
        *self.open.lock() = false;
        self.blocked.store(false, Ordering::SeqCst);
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Spins until some batch call is waiting at the gate.
    pub fn wait_until_blocked(&self) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while !self.blocked.load(Ordering::SeqCst) {
            assert!(
                std::time::Instant::now() < deadline,
                "rebuild never reached the embedder"
            );
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
}

impl Embedder for GatedEmbedder {
    fn embed(&self, text: &str, field: FieldKind) -> Result<Vec<f32>, VectorError> {
        self.inner.embed(text, field)
    }

    fn embed_batch(&self, texts: &[&str], field: FieldKind) -> Result<Vec<Vec<f32>>, VectorError> {
        let mut open = self.open.lock();
        while !*open {
            self.blocked.store(true, Ordering::SeqCst);
            self.opened.wait(&mut open);
        }
        drop(open);
        self.inner.embed_batch(texts, field)
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn model_id(&self) -> String {
        self.inner.model_id()
    }
}

/// In-memory source whose listing times out a set number of times before
/// it succeeds again.
pub struct FlakySource {
    inner: InMemoryBugSource,
    failures_left: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FlakySource {
    pub fn new(reports: Vec<BugReport>) -> Self {
        Self {
            inner: InMemoryBugSource::from_reports(reports),
            failures_left: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// The next `count` listings fail with a timed-out read.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
        self.list_calls.store(0, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl BugSource for FlakySource {
    fn list_all_bug_reports(&self) -> Result<Vec<BugReport>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::Read {
                path: PathBuf::from("flaky.json"),
                source: io::Error::new(io::ErrorKind::TimedOut, "source timed out"),
            });
        }
        self.inner.list_all_bug_reports()
    }

    fn get_bug_report(&self, bug_id: &BugId) -> Result<Option<BugReport>, SourceError> {
        self.inner.get_bug_report(bug_id)
    }
}
