//! Configuration module for the bug report search engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.bugfuse/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `BUGFUSE_` and use double
//! underscores to separate nested levels:
//! - `BUGFUSE_CACHE__CAPACITY=512` sets `cache.capacity`
//! - `BUGFUSE_SEARCH__WEIGHTS__LOG=0.4` sets `search.weights.log`
//! - `BUGFUSE_EMBEDDING__PROVIDER=hashing` sets `embedding.provider`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SearchError, SearchResult};
use crate::search::{AbsentFieldPolicy, FieldWeights};
use crate::vector::IndexParams;

/// Directory holding the settings file, searched upward from the cwd.
pub const CONFIG_DIR: &str = ".bugfuse";

/// Settings file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "settings.toml";

const ENV_PREFIX: &str = "BUGFUSE_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root directory (where .bugfuse is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Index storage, backups and retry policy
    #[serde(default)]
    pub store: StoreConfig,

    /// Field index partitioning
    #[serde(default)]
    pub index: IndexConfig,

    /// Embedding model selection
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Fusion weights and result sizing
    #[serde(default)]
    pub search: SearchConfig,

    /// Result cache sizing
    #[serde(default)]
    pub cache: CacheConfig,

    /// Where bug reports are read from
    #[serde(default)]
    pub source: SourceConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoreConfig {
    /// Directory holding the live index version
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory holding timestamped backup snapshots
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Retries for transient I/O failures during rebuild and load
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between retries
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Snapshots older than this are pruned (one per month is kept)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Fixed number of IVF clusters per field (defaults to sqrt of entries)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clusters: Option<usize>,

    /// Clusters scanned per query
    #[serde(default = "default_n_probe")]
    pub n_probe: usize,

    /// Fields with at most this many entries are scanned exhaustively
    #[serde(default = "default_exact_search_threshold")]
    pub exact_search_threshold: usize,

    /// Seed for k-means, making rebuilds reproducible
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// ONNX sentence-transformer models through fastembed
    #[default]
    Fastembed,
    /// Deterministic feature hashing, no model download
    Hashing,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    /// Model to use for embeddings
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension (the hashing provider uses it directly)
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Where downloaded models are cached
    #[serde(default = "default_model_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default)]
    pub show_download_progress: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    /// Results returned when the caller does not ask for a count
    #[serde(default = "default_results")]
    pub default_results: usize,

    /// Each field index is asked for `n * oversample_factor` neighbors
    #[serde(default = "default_oversample_factor")]
    pub oversample_factor: usize,

    /// How weights of fields missing from a query are treated
    #[serde(default)]
    pub absent_fields: AbsentFieldPolicy,

    #[serde(default)]
    pub weights: FieldWeights,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Total cached rankings across all shards
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Independently locked LRU shards
    #[serde(default = "default_cache_shards")]
    pub shards: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SourceConfig {
    /// JSON array or JSON-lines file of bug reports
    #[serde(default = "default_source_path")]
    pub path: PathBuf,
}

fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".bugfuse/index")
}
fn default_backup_dir() -> PathBuf {
    PathBuf::from(".bugfuse/backups")
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}
fn default_retention_days() -> u32 {
    30
}
fn default_n_probe() -> usize {
    4
}
fn default_exact_search_threshold() -> usize {
    2048
}
fn default_seed() -> u64 {
    42
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_dimension() -> usize {
    crate::vector::VECTOR_DIMENSION_384
}
fn default_model_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("bugfuse").join("models"))
        .unwrap_or_else(|| PathBuf::from(".bugfuse/models"))
}
fn default_results() -> usize {
    5
}
fn default_oversample_factor() -> usize {
    3
}
fn default_cache_capacity() -> usize {
    1024
}
fn default_cache_shards() -> usize {
    16
}
fn default_source_path() -> PathBuf {
    PathBuf::from("bug_reports.json")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            store: StoreConfig::default(),
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            cache: CacheConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backup_dir: default_backup_dir(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            clusters: None,
            n_probe: default_n_probe(),
            exact_search_threshold: default_exact_search_threshold(),
            seed: default_seed(),
        }
    }
}

impl IndexConfig {
    pub fn params(&self) -> IndexParams {
        IndexParams {
            clusters: self.clusters,
            n_probe: self.n_probe,
            exact_search_threshold: self.exact_search_threshold,
            seed: self.seed,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            cache_dir: default_model_cache_dir(),
            show_download_progress: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_results: default_results(),
            oversample_factor: default_oversample_factor(),
            absent_fields: AbsentFieldPolicy::default(),
            weights: FieldWeights::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            shards: default_cache_shards(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings.rebase_paths();
                settings
            })
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nesting levels, single underscores stay
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the settings file by looking for a .bugfuse directory
    /// from the current directory up to the filesystem root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Get the workspace root directory (where .bugfuse is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Resolves relative store and source paths against the workspace root.
    fn rebase_paths(&mut self) {
        let Some(root) = self.workspace_root.clone() else {
            return;
        };
        for path in [
            &mut self.store.data_dir,
            &mut self.store.backup_dir,
            &mut self.source.path,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> SearchResult<()> {
        self.search.weights.validate()?;
        if self.embedding.dimension == 0 {
            return Err(SearchError::Config(
                "embedding.dimension must be greater than zero".to_string(),
            ));
        }
        if self.cache.capacity == 0 || self.cache.shards == 0 {
            return Err(SearchError::Config(
                "cache.capacity and cache.shards must be greater than zero".to_string(),
            ));
        }
        if self.search.oversample_factor == 0 || self.search.default_results == 0 {
            return Err(SearchError::Config(
                "search.oversample_factor and search.default_results must be greater than zero"
                    .to_string(),
            ));
        }
        if self.index.n_probe == 0 || self.index.clusters == Some(0) {
            return Err(SearchError::Config(
                "index.n_probe and index.clusters must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file under `.bugfuse/` in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let root = std::env::current_dir()?;
        Self::init_config_file_in(&root, force)
    }

    /// Create a default settings file under `<root>/.bugfuse/`
    pub fn init_config_file_in(
        root: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let body = toml::to_string_pretty(&Settings::default())?;
        let template = format!(
            "# bugfuse configuration\n\
             #\n\
             # Every key can be overridden with an environment variable, e.g.\n\
             # BUGFUSE_CACHE__CAPACITY=512 or BUGFUSE_SEARCH__ABSENT_FIELDS=fixed\n\n\
             {body}"
        );
        std::fs::write(&config_path, template)?;

        Ok(config_path)
    }
}
