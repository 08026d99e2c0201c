//! Process-wide search context handed to every request handler.
//!
//! Built once at startup from [`Settings`]; owns the store, the result cache
//! and the default weights. There is no global state: front ends keep a
//! `SearchContext` (usually in an `Arc`) and call into it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::embedding::{Embedder, create_embedder};
use crate::error::{SearchError, SearchResult};
use crate::search::{
    BugQuery, CacheStats, FieldWeights, Fingerprint, FusionRetriever, QueryShape, Ranking,
    ResultCache,
};
use crate::store::{BugSource, JsonFileBugSource, LoadOutcome, RebuildReport, VectorStore};
use crate::types::{BugId, BugReport, FieldKind, IndexVersion};

/// One hydrated search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub bug_id: BugId,
    pub score: f32,
    pub field_scores: BTreeMap<FieldKind, f32>,
    pub report: BugReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub version: IndexVersion,
    pub shape: QueryShape,
    /// Served from the result cache
    pub cached: bool,
    pub weights: BTreeMap<FieldKind, f32>,
    pub dropped_fields: Vec<FieldKind>,
    pub hits: Vec<SearchHit>,
}

/// Point-in-time view for operators.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStatus {
    pub version: Option<IndexVersion>,
    pub report_count: usize,
    pub field_counts: BTreeMap<FieldKind, usize>,
    pub staged_reports: usize,
    pub rebuilding: bool,
    pub model_id: String,
    pub dimension: usize,
    pub cache: CacheStats,
}

#[derive(Debug)]
pub struct SearchContext {
    store: Arc<VectorStore>,
    cache: Arc<ResultCache>,
    retriever: FusionRetriever,
    weights: FieldWeights,
    default_results: usize,
}

impl SearchContext {
    /// Validates `settings` and wires the store to the cache so every
    /// published version clears it.
    pub fn new(
        settings: &Settings,
        embedder: Arc<dyn Embedder>,
        source: Arc<dyn BugSource>,
    ) -> SearchResult<Self> {
        settings.validate()?;

        let store = Arc::new(VectorStore::new(settings, Arc::clone(&embedder), source));
        let cache = Arc::new(ResultCache::new(
            settings.cache.capacity,
            settings.cache.shards,
        ));

        let invalidated = Arc::clone(&cache);
        store.on_publish(move |version| {
            invalidated.advance_to(version);
            tracing::debug!(version = %version, "result cache invalidated");
        });

        Ok(Self {
            store,
            cache,
            retriever: FusionRetriever::new(
                embedder,
                settings.search.oversample_factor,
                settings.search.absent_fields,
            ),
            weights: settings.search.weights,
            default_results: settings.search.default_results,
        })
    }

    /// Context over the configured embedder and JSON bug report file.
    pub fn from_settings(settings: &Settings) -> SearchResult<Self> {
        let embedder = create_embedder(&settings.embedding)?;
        let source = Arc::new(JsonFileBugSource::new(&settings.source.path));
        Self::new(settings, embedder, source)
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn weights(&self) -> &FieldWeights {
        &self.weights
    }

    pub fn default_results(&self) -> usize {
        self.default_results
    }

    /// Publishes the persisted version or builds the first one.
    pub fn load(&self) -> SearchResult<LoadOutcome> {
        self.store.load()
    }

    pub fn rebuild(&self) -> SearchResult<RebuildReport> {
        self.store.rebuild()
    }

    /// Runs a rebuild on the blocking pool; searches keep being served from
    /// the current version meanwhile.
    pub fn spawn_rebuild(&self) -> JoinHandle<SearchResult<RebuildReport>> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.rebuild())
    }

    pub fn upsert_batch(&self, reports: impl IntoIterator<Item = BugReport>) -> usize {
        self.store.upsert_batch(reports)
    }

    /// Ranks `query` and hydrates the hits.
    ///
    /// `weights` and `n_results` fall back to the configured defaults. Hits
    /// whose report has disappeared from the source are left out.
    #[tracing::instrument(skip_all, fields(n_results = ?n_results))]
    pub fn search(
        &self,
        query: &BugQuery,
        weights: Option<&FieldWeights>,
        n_results: Option<usize>,
    ) -> SearchResult<SearchResponse> {
        let (ranking, cached) = self.rank(query, weights, n_results)?;

        let mut hits = Vec::with_capacity(ranking.hits.len());
        for hit in &ranking.hits {
            match self.store.get_bug_report(&hit.bug_id)? {
                Some(report) => hits.push(SearchHit {
                    bug_id: hit.bug_id.clone(),
                    score: hit.score,
                    field_scores: hit.field_scores.clone(),
                    report,
                }),
                None => {
                    tracing::warn!(bug_id = %hit.bug_id, "ranked bug report no longer exists, skipping");
                }
            }
        }

        Ok(SearchResponse {
            version: ranking.version,
            shape: ranking.shape,
            cached,
            weights: ranking.weights.clone(),
            dropped_fields: ranking.dropped_fields.clone(),
            hits,
        })
    }

    /// Fused ranking without hydration, through the cache. The flag tells
    /// whether it was a cache hit.
    pub fn rank(
        &self,
        query: &BugQuery,
        weights: Option<&FieldWeights>,
        n_results: Option<usize>,
    ) -> SearchResult<(Arc<Ranking>, bool)> {
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let generation = self.store.snapshot()?;
        let weights = weights.unwrap_or(&self.weights);
        let n = n_results.unwrap_or(self.default_results);
        let version = generation.version();

        let key = Fingerprint::compute(query, weights, self.retriever.policy(), n, version);
        if let Some(ranking) = self.cache.get(&key, version) {
            tracing::debug!(version = %version, "result cache hit");
            return Ok((ranking, true));
        }

        let ranking = Arc::new(self.retriever.rank(&generation, query, weights, n)?);
        if !self.cache.put(key, Arc::clone(&ranking)) {
            tracing::debug!(version = %version, "index moved on during search, ranking not cached");
        }
        tracing::info!(
            version = %version,
            shape = %ranking.shape,
            hits = ranking.hits.len(),
            "search completed"
        );
        Ok((ranking, false))
    }

    pub fn status(&self) -> ContextStatus {
        let generation = self.store.current();
        let embedder = self.store.embedder();
        ContextStatus {
            version: generation.as_ref().map(|g| g.version()),
            report_count: generation.as_ref().map_or(0, |g| g.report_count()),
            field_counts: generation
                .as_ref()
                .map(|g| g.manifest().field_counts.clone())
                .unwrap_or_default(),
            staged_reports: self.store.staged_count(),
            rebuilding: self.store.is_rebuilding(),
            model_id: embedder.model_id(),
            dimension: embedder.dimension().get(),
            cache: self.cache.stats(),
        }
    }
}
