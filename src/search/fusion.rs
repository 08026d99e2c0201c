//! Weighted fusion of per-field nearest neighbor results.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::embedding::Embedder;
use crate::error::{SearchError, SearchResult};
use crate::store::IndexGeneration;
use crate::types::{BugId, FieldKind, IndexVersion, InternalId};
use crate::vector::{Score, VectorError};

use super::query::{BugQuery, QueryShape};
use super::weights::{AbsentFieldPolicy, FieldWeights};

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedHit {
    pub bug_id: BugId,
    pub score: f32,
    /// Similarity in `[0, 1]` per queried field that surfaced this bug
    pub field_scores: BTreeMap<FieldKind, f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_date: Option<DateTime<Utc>>,
}

/// Fused ranking for one query against one index version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub version: IndexVersion,
    pub shape: QueryShape,
    /// Weights applied to the fields that were embedded
    pub weights: BTreeMap<FieldKind, f32>,
    /// Supplied fields that could not be embedded
    pub dropped_fields: Vec<FieldKind>,
    pub hits: Vec<RankedHit>,
}

#[derive(Default)]
struct Candidate {
    score: f32,
    field_scores: BTreeMap<FieldKind, f32>,
}

/// Embeds query fields, queries their indices and fuses the similarities.
#[derive(Clone)]
pub struct FusionRetriever {
    embedder: Arc<dyn Embedder>,
    oversample_factor: usize,
    policy: AbsentFieldPolicy,
}

impl std::fmt::Debug for FusionRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FusionRetriever")
            .field("model", &self.embedder.model_id())
            .field("oversample_factor", &self.oversample_factor)
            .field("policy", &self.policy)
            .finish()
    }
}

impl FusionRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        oversample_factor: usize,
        policy: AbsentFieldPolicy,
    ) -> Self {
        Self {
            embedder,
            oversample_factor: oversample_factor.max(1),
            policy,
        }
    }

    pub fn policy(&self) -> AbsentFieldPolicy {
        self.policy
    }

    /// Ranks the bugs of `generation` against `query`, best first.
    ///
    /// A field that fails to embed is dropped with a warning. Bugs missing
    /// from one field's neighbor list score 0 for that field.
    pub fn rank(
        &self,
        generation: &IndexGeneration,
        query: &BugQuery,
        weights: &FieldWeights,
        n: usize,
    ) -> SearchResult<Ranking> {
        let texts = query.field_texts();
        if texts.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        weights.validate()?;

        let supplied: Vec<FieldKind> = texts.iter().map(|(f, _)| *f).collect();
        let shape = QueryShape::classify(&supplied).unwrap_or(QueryShape::Mixed);

        let mut vectors = Vec::with_capacity(texts.len());
        let mut dropped_fields = Vec::new();
        let mut last_error = None;
        for (field, text) in &texts {
            match self.embedder.embed(text, *field) {
                Ok(vector) => vectors.push((*field, vector)),
                Err(e) => {
                    tracing::warn!(field = %field, error = %e, "dropping query field that failed to embed");
                    dropped_fields.push(*field);
                    last_error = Some(e);
                }
            }
        }
        if vectors.is_empty() {
            return Err(SearchError::Vectorization {
                reason: last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no field produced a vector".to_string()),
            });
        }

        let embedded: Vec<FieldKind> = vectors.iter().map(|(f, _)| *f).collect();
        let applied = weights.effective(&embedded, self.policy)?;
        let k = n.saturating_mul(self.oversample_factor).max(n);

        let mut candidates: HashMap<InternalId, Candidate> = HashMap::new();
        for (field, vector) in &vectors {
            let weight = applied.get(field).copied().unwrap_or(0.0);
            if weight == 0.0 {
                continue;
            }
            let neighbors = generation
                .index(*field)
                .query(vector, k)
                .map_err(not_ready)?;
            for neighbor in neighbors {
                let similarity = Score::from_angular_distance(neighbor.distance).get();
                let candidate = candidates.entry(neighbor.id).or_default();
                candidate.score += weight * similarity;
                candidate.field_scores.insert(*field, similarity);
            }
        }

        let mapping = generation.mapping();
        let mut hits: Vec<RankedHit> = candidates
            .into_iter()
            .filter_map(|(id, candidate)| {
                let Some(entry) = mapping.entry(id) else {
                    tracing::warn!(internal_id = %id, version = %generation.version(), "neighbor missing from mapping");
                    return None;
                };
                Some(RankedHit {
                    bug_id: entry.bug_id.clone(),
                    score: candidate.score,
                    field_scores: candidate.field_scores,
                    fix_date: entry.fix_date,
                })
            })
            .collect();

        hits.sort_by(compare_hits);
        hits.truncate(n);

        tracing::debug!(
            shape = %shape,
            fields = embedded.len(),
            dropped = dropped_fields.len(),
            hits = hits.len(),
            "fused ranking"
        );

        Ok(Ranking {
            version: generation.version(),
            shape,
            weights: applied,
            dropped_fields,
            hits,
        })
    }
}

/// Score descending, then most recent fix date, then bug id.
fn compare_hits(a: &RankedHit, b: &RankedHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| match (a.fix_date, b.fix_date) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.bug_id.cmp(&b.bug_id))
}

fn not_ready(error: VectorError) -> SearchError {
    match error {
        VectorError::IndexNotFinalized { .. } => SearchError::IndexNotReady,
        other => SearchError::Vector(other),
    }
}
