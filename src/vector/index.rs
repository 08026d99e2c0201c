//! Per-field approximate nearest neighbor index.
//!
//! A [`FieldIndex`] is built once and then frozen. Vectors are accumulated in
//! a build buffer, [`FieldIndex::finalize`] normalizes them and partitions
//! them with seeded k-means into inverted lists (IVF), and queries probe the
//! `n_probe` closest lists. Small indices skip partitioning and are scanned
//! exhaustively.
//!
//! Distances are angular: `sqrt(2 - 2 * cos)`, in `[0, 2]`.

use std::collections::HashSet;

use crate::types::{FieldKind, InternalId};
use crate::vector::clustering::{
    SphericalKMeans, cosine_similarity, normalize_vector_copy,
};
use crate::vector::types::{ClusterId, MAX_ANGULAR_DISTANCE, VectorDimension, VectorError};

/// Upper bound on the number of inverted lists per field.
pub const MAX_CLUSTERS: usize = 256;

/// Partitioning and probing parameters shared by all five field indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexParams {
    /// Fixed cluster count; `None` uses `ceil(sqrt(n))`.
    pub clusters: Option<usize>,
    /// Number of closest inverted lists scanned per query.
    pub n_probe: usize,
    /// Indices with at most this many entries are scanned exhaustively.
    pub exact_search_threshold: usize,
    /// Seed for k-means so identical inputs produce identical indices.
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            clusters: None,
            n_probe: 4,
            exact_search_threshold: 2048,
            seed: 42,
        }
    }
}

impl IndexParams {
    fn cluster_count(&self, entries: usize) -> usize {
        let k = self
            .clusters
            .unwrap_or_else(|| (entries as f64).sqrt().ceil() as usize);
        k.clamp(1, MAX_CLUSTERS).min(entries.max(1))
    }
}

/// One query result: internal id plus angular distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: InternalId,
    pub distance: f32,
}

/// Frozen, queryable layout of an index.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FrozenIndex {
    /// Entry ids, parallel to `vectors` rows
    pub(crate) ids: Vec<InternalId>,
    /// Row-major unit vectors, `ids.len() * dimension` floats
    pub(crate) vectors: Vec<f32>,
    /// Cluster of each row; empty when the index is scanned exhaustively
    pub(crate) cluster_of: Vec<ClusterId>,
    pub(crate) centroids: Vec<Vec<f32>>,
    /// Row positions per cluster, in insertion order
    pub(crate) lists: Vec<Vec<u32>>,
}

impl FrozenIndex {
    pub(crate) fn from_parts(
        ids: Vec<InternalId>,
        vectors: Vec<f32>,
        cluster_of: Vec<ClusterId>,
        centroids: Vec<Vec<f32>>,
    ) -> Self {
        let mut lists = vec![Vec::new(); centroids.len()];
        for (row, cluster) in cluster_of.iter().enumerate() {
            if let Some(list) = lists.get_mut(cluster.index()) {
                list.push(row as u32);
            }
        }
        Self {
            ids,
            vectors,
            cluster_of,
            centroids,
            lists,
        }
    }
}

#[derive(Debug)]
enum IndexState {
    Building {
        ids: Vec<InternalId>,
        vectors: Vec<Vec<f32>>,
        seen: HashSet<InternalId>,
    },
    Finalized(FrozenIndex),
}

/// Append-then-freeze ANN index for one field kind.
#[derive(Debug)]
pub struct FieldIndex {
    field: FieldKind,
    dimension: VectorDimension,
    params: IndexParams,
    state: IndexState,
}

impl FieldIndex {
    /// Creates an empty index in the building state.
    pub fn new(field: FieldKind, dimension: VectorDimension, params: IndexParams) -> Self {
        Self {
            field,
            dimension,
            params,
            state: IndexState::Building {
                ids: Vec::new(),
                vectors: Vec::new(),
                seen: HashSet::new(),
            },
        }
    }

    /// Restores an already finalized index from its persisted layout.
    pub(crate) fn from_frozen(
        field: FieldKind,
        dimension: VectorDimension,
        params: IndexParams,
        frozen: FrozenIndex,
    ) -> Self {
        Self {
            field,
            dimension,
            params,
            state: IndexState::Finalized(frozen),
        }
    }

    pub fn field(&self) -> FieldKind {
        self.field
    }

    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, IndexState::Finalized(_))
    }

    /// Number of vectors held, in either state.
    pub fn len(&self) -> usize {
        match &self.state {
            IndexState::Building { ids, .. } => ids.len(),
            IndexState::Finalized(frozen) => frozen.ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of inverted lists; zero for exhaustively scanned indices.
    pub fn cluster_count(&self) -> usize {
        match &self.state {
            IndexState::Building { .. } => 0,
            IndexState::Finalized(frozen) => frozen.centroids.len(),
        }
    }

    /// Adds a vector during the build phase.
    pub fn insert(&mut self, vector: &[f32], id: InternalId) -> Result<(), VectorError> {
        let field = self.field;
        let IndexState::Building { ids, vectors, seen } = &mut self.state else {
            return Err(VectorError::IndexFinalized { field });
        };
        self.dimension.validate_vector(vector)?;
        if !seen.insert(id) {
            return Err(VectorError::DuplicateInternalId {
                field,
                id: id.value(),
            });
        }
        ids.push(id);
        vectors.push(vector.to_vec());
        Ok(())
    }

    /// Freezes the index and makes it queryable.
    pub fn finalize(&mut self) -> Result<(), VectorError> {
        let field = self.field;
        let IndexState::Building { ids, vectors, .. } = &mut self.state else {
            return Err(VectorError::IndexFinalized { field });
        };
        let ids = std::mem::take(ids);
        let normalized: Vec<Vec<f32>> = vectors.iter().map(|v| normalize_vector_copy(v)).collect();

        let (cluster_of, centroids) = if ids.len() > self.params.exact_search_threshold {
            let refs: Vec<&[f32]> = normalized.iter().map(Vec::as_slice).collect();
            let k = self.params.cluster_count(refs.len());
            let result = SphericalKMeans::new(k, self.params.seed)
                .fit(&refs)
                .map_err(|e| VectorError::ClusteringFailed(e.to_string()))?;
            tracing::debug!(
                field = %field,
                entries = ids.len(),
                clusters = result.centroids.len(),
                iterations = result.iterations,
                "partitioned field index"
            );
            (result.assignments, result.centroids)
        } else {
            (Vec::new(), Vec::new())
        };

        let flat: Vec<f32> = normalized.into_iter().flatten().collect();
        self.state = IndexState::Finalized(FrozenIndex::from_parts(ids, flat, cluster_of, centroids));
        Ok(())
    }

    /// Returns up to `k` nearest entries, ascending by distance then id.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, VectorError> {
        let IndexState::Finalized(frozen) = &self.state else {
            return Err(VectorError::IndexNotFinalized { field: self.field });
        };
        self.dimension.validate_vector(vector)?;
        if k == 0 || frozen.ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = normalize_vector_copy(vector);
        let dim = self.dimension.get();
        let distance_to = |row: usize| {
            let stored = &frozen.vectors[row * dim..(row + 1) * dim];
            angular_distance(&query, stored)
        };

        let mut candidates: Vec<Neighbor> = if frozen.centroids.is_empty() {
            (0..frozen.ids.len())
                .map(|row| Neighbor {
                    id: frozen.ids[row],
                    distance: distance_to(row),
                })
                .collect()
        } else {
            let mut gathered = Vec::new();
            for (probed, cluster) in self.probe_order(frozen, &query).into_iter().enumerate() {
                if probed >= self.params.n_probe.max(1) && gathered.len() >= k {
                    break;
                }
                gathered.extend(frozen.lists[cluster].iter().map(|&row| Neighbor {
                    id: frozen.ids[row as usize],
                    distance: distance_to(row as usize),
                }));
            }
            gathered
        };

        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        candidates.truncate(k);
        Ok(candidates)
    }

    /// Every cluster position, nearest centroid first. Lists past `n_probe`
    /// are only scanned while fewer than `k` candidates are gathered.
    fn probe_order(&self, frozen: &FrozenIndex, query: &[f32]) -> Vec<usize> {
        let mut ranked: Vec<(usize, f32)> = frozen
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(query, c)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().map(|(i, _)| i).collect()
    }

    pub(crate) fn frozen(&self) -> Option<&FrozenIndex> {
        match &self.state {
            IndexState::Finalized(frozen) => Some(frozen),
            IndexState::Building { .. } => None,
        }
    }
}

/// Angular distance between two unit vectors, clamped to `[0, 2]`.
///
/// Zero vectors sit at distance 1 from everything (cosine 0).
pub fn angular_distance(a: &[f32], b: &[f32]) -> f32 {
    let cos: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let squared = (2.0 - 2.0 * cos.clamp(-1.0, 1.0)).max(0.0);
    squared.sqrt().min(MAX_ANGULAR_DISTANCE)
}
