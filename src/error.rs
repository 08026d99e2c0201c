//! Error types for the bug report search engine
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::SourceError;
use crate::vector::VectorError;

/// Main error type for store, rebuild and search operations
#[derive(Error, Debug)]
pub enum SearchError {
    /// No supplied query field could be embedded
    #[error("Failed to vectorize query: {reason}")]
    Vectorization { reason: String },

    #[error("Query has no non-empty fields. Supply at least one of summary, code, test info, log or environment")]
    EmptyQuery,

    /// Query arrived before the first successful build or load
    #[error("No index version is published yet. Run a rebuild or load a persisted index first")]
    IndexNotReady,

    #[error("A rebuild is already in progress; the request was rejected")]
    RebuildInProgress,

    /// Snapshot I/O failed; the rebuild was aborted and the live version kept
    #[error("Failed to back up the live index to '{path}': {source}")]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Store I/O failed during {operation} after {attempts} attempt(s): {source}")]
    StoreIo {
        operation: String,
        attempts: u32,
        source: std::io::Error,
    },

    #[error("Index at '{path}' appears to be corrupted: {reason}")]
    IndexCorrupted { path: PathBuf, reason: String },

    /// Persisted index was built with a different model or format
    #[error("Persisted index is incompatible: {reason}")]
    IncompatibleIndex { reason: String },

    #[error("Bug report source failed: {0}")]
    Source(#[from] SourceError),

    #[error("Invalid field weights: {0}")]
    InvalidWeights(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Snapshot '{name}' not found")]
    SnapshotNotFound { name: String },

    #[error("Vector operation failed: {0}")]
    Vector(#[from] VectorError),
}

impl SearchError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::Vectorization { .. } => "VECTORIZATION_ERROR",
            Self::EmptyQuery => "EMPTY_QUERY",
            Self::IndexNotReady => "INDEX_NOT_READY",
            Self::RebuildInProgress => "REBUILD_IN_PROGRESS",
            Self::Backup { .. } => "BACKUP_ERROR",
            Self::StoreIo { .. } => "STORE_IO_ERROR",
            Self::IndexCorrupted { .. } => "INDEX_CORRUPTED",
            Self::IncompatibleIndex { .. } => "INCOMPATIBLE_INDEX",
            Self::Source(_) => "SOURCE_ERROR",
            Self::InvalidWeights(_) => "INVALID_WEIGHTS",
            Self::Config(_) => "CONFIG_ERROR",
            Self::SnapshotNotFound { .. } => "SNAPSHOT_NOT_FOUND",
            Self::Vector(_) => "VECTOR_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::IndexNotReady => vec![
                "Run 'bugfuse rebuild' to build the first index version",
                "Check that store.data_dir points at an existing index",
            ],
            Self::RebuildInProgress => vec![
                "Wait for the running rebuild to finish, searches keep using the current version",
            ],
            Self::Backup { .. } => vec![
                "The rebuild was aborted and the previous index is still serving",
                "Check disk space and permissions of store.backup_dir",
            ],
            Self::StoreIo { .. } => vec![
                "Check disk space and permissions of store.data_dir",
                "Increase store.max_retries if the storage is flaky",
            ],
            Self::IndexCorrupted { .. } | Self::IncompatibleIndex { .. } => vec![
                "Run 'bugfuse rebuild' to regenerate the index from the bug report source",
            ],
            Self::Vectorization { .. } => vec![
                "Check that the embedding model is installed and loads",
                "Make sure the query text contains words, not only punctuation",
            ],
            Self::InvalidWeights(_) => vec![
                "Use non-negative finite weights with at least one queried field above zero",
            ],
            Self::Source(_) => vec![
                "Check that source.path exists and holds a JSON array or JSON lines",
            ],
            _ => vec![],
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        use crate::store::Transient;

        match self {
            Self::StoreIo { source, .. } => source.is_transient(),
            Self::Source(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias for store and search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Helper trait for attaching store context to I/O errors
pub trait ErrorContext<T> {
    /// Wrap the error as a single-attempt store I/O failure
    fn context(self, operation: &str) -> SearchResult<T>;
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn context(self, operation: &str) -> SearchResult<T> {
        self.map_err(|source| SearchError::StoreIo {
            operation: operation.to_string(),
            attempts: 1,
            source,
        })
    }
}
