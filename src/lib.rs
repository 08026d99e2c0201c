/// The main library module for bugfuse
pub mod config;
pub mod context;
pub mod display;
pub mod embedding;
pub mod error;
pub mod search;
pub mod store;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use context::{ContextStatus, SearchContext, SearchHit, SearchResponse};
pub use embedding::{Embedder, FastEmbedEmbedder, HashingEmbedder, create_embedder};
pub use error::{ErrorContext, SearchError, SearchResult};
pub use search::{
    AbsentFieldPolicy, BugQuery, FieldWeights, FusionRetriever, QueryShape, RankedHit, Ranking,
    ResultCache,
};
pub use store::{
    BackupManager, BugSource, InMemoryBugSource, IndexGeneration, JsonFileBugSource, LoadOutcome,
    RebuildReport, SnapshotInfo, VectorStore,
};
pub use types::{BugId, BugReport, FieldKind, IndexVersion, InternalId};
