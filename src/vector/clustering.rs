//! Spherical k-means used to partition a field index into inverted lists.
//!
//! Inputs are unit vectors, so the dot product is the cosine similarity and
//! centroids are re-projected onto the unit sphere after every update. The
//! only randomness is the K-means++ seeding, drawn from a caller-provided
//! seed: identical inputs always produce identical partitions.

use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::vector::types::ClusterId;

/// Norms at or below this are treated as zero.
const NORM_EPSILON: f32 = 1e-10;

/// Cosine distances below this count as the same direction.
const DUPLICATE_EPSILON: f32 = 1e-6;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClusteringError {
    #[error("Cannot partition an empty vector set\nSuggestion: Finalize only indices that received vectors")]
    EmptyVectorSet,

    #[error("Cannot split {vectors} vectors into {k} clusters\nSuggestion: Use a cluster count between 1 and the entry count")]
    InvalidClusterCount { k: usize, vectors: usize },

    #[error("Vector {position} has {actual} components, expected {expected}")]
    DimensionMismatch {
        position: usize,
        expected: usize,
        actual: usize,
    },
}

/// Outcome of [`SphericalKMeans::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Unit-length centroids. Duplicate-heavy input can yield fewer than `k`.
    pub centroids: Vec<Vec<f32>>,
    /// Cluster of every input vector, against the final centroids
    pub assignments: Vec<ClusterId>,
    pub iterations: usize,
}

/// Seeded spherical k-means.
#[derive(Debug, Clone, Copy)]
pub struct SphericalKMeans {
    k: usize,
    seed: u64,
    max_iterations: usize,
    /// Largest centroid shift, in cosine distance, still counted as moving
    tolerance: f32,
}

impl SphericalKMeans {
    pub fn new(k: usize, seed: u64) -> Self {
        Self {
            k,
            seed,
            max_iterations: 100,
            tolerance: 1e-4,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Partitions `vectors`, which should already be unit length.
    #[must_use = "the partition is the whole point of fitting"]
    pub fn fit(&self, vectors: &[&[f32]]) -> Result<Partition, ClusteringError> {
        let Some(first) = vectors.first() else {
            return Err(ClusteringError::EmptyVectorSet);
        };
        if self.k == 0 || self.k > vectors.len() {
            return Err(ClusteringError::InvalidClusterCount {
                k: self.k,
                vectors: vectors.len(),
            });
        }
        let dimension = first.len();
        if let Some((position, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dimension) {
            return Err(ClusteringError::DimensionMismatch {
                position,
                expected: dimension,
                actual: v.len(),
            });
        }

        let mut centroids = self.seed_centroids(vectors);
        let mut assignments: Vec<usize> = vectors.iter().map(|v| nearest_centroid(v, &centroids)).collect();
        let mut iterations = 0;

        loop {
            iterations += 1;
            let updated = recompute_centroids(vectors, &assignments, centroids.len());
            let shift = centroids
                .iter()
                .zip(&updated)
                .map(|(old, new)| 1.0 - dot(old, new))
                .fold(0.0f32, f32::max);
            centroids = updated;

            let reassigned: Vec<usize> = vectors.iter().map(|v| nearest_centroid(v, &centroids)).collect();
            let stable = reassigned == assignments;
            assignments = reassigned;

            if stable || shift < self.tolerance {
                break;
            }
            if iterations == self.max_iterations {
                tracing::warn!(iterations, shift, "k-means stopped before converging");
                break;
            }
        }

        Ok(Partition {
            centroids,
            assignments: assignments.into_iter().map(ClusterId::from_index).collect(),
            iterations,
        })
    }

    /// K-means++: each further centroid is drawn with probability
    /// proportional to the squared cosine distance to the closest one so far.
    fn seed_centroids(&self, vectors: &[&[f32]]) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let first = rng.random_range(0..vectors.len());
        let mut centroids = vec![normalize_vector_copy(vectors[first])];
        let mut closest: Vec<f32> = vectors.iter().map(|v| cosine_gap(v, &centroids[0])).collect();

        while centroids.len() < self.k {
            let weights: Vec<f32> = closest.iter().map(|d| d * d).collect();
            // All remaining vectors coincide with a centroid
            let Ok(picker) = WeightedIndex::new(&weights) else {
                break;
            };
            let chosen = normalize_vector_copy(vectors[picker.sample(&mut rng)]);
            for (gap, v) in closest.iter_mut().zip(vectors) {
                *gap = gap.min(cosine_gap(v, &chosen));
            }
            centroids.push(chosen);
        }
        centroids
    }
}

/// Mean direction of every cluster. An emptied cluster takes over the
/// vector that sits worst in a cluster that can spare it.
fn recompute_centroids(vectors: &[&[f32]], assignments: &[usize], k: usize) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut sums = vec![vec![0.0f32; dimension]; k];
    let mut sizes = vec![0usize; k];
    for (v, &cluster) in vectors.iter().zip(assignments) {
        sizes[cluster] += 1;
        for (acc, x) in sums[cluster].iter_mut().zip(v.iter()) {
            *acc += x;
        }
    }
    for sum in sums.iter_mut() {
        normalize_vector(sum);
    }

    let empties: Vec<usize> = (0..k).filter(|&c| sizes[c] == 0).collect();
    let mut owner = assignments.to_vec();
    for empty in empties {
        let worst = (0..vectors.len())
            .filter(|&i| sizes[owner[i]] > 1)
            .map(|i| (i, cosine_gap(vectors[i], &sums[owner[i]])))
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
        if let Some((i, _)) = worst {
            sizes[owner[i]] -= 1;
            sizes[empty] = 1;
            owner[i] = empty;
            sums[empty] = normalize_vector_copy(vectors[i]);
        }
    }
    sums
}

/// Position of the most similar centroid; ties go to the lower position.
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> usize {
    centroids
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, c)| {
            let similarity = dot(vector, c);
            if similarity > best.1 { (i, similarity) } else { best }
        })
        .0
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `1 - cos` for unit vectors; near-duplicates are exactly 0.
fn cosine_gap(a: &[f32], b: &[f32]) -> f32 {
    let gap = 1.0 - dot(a, b);
    if gap < DUPLICATE_EPSILON { 0.0 } else { gap }
}

/// Cosine similarity in `[-1, 1]`; 0 when either vector is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let norms = dot(a, a).sqrt() * dot(b, b).sqrt();
    if norms <= NORM_EPSILON { 0.0 } else { dot(a, b) / norms }
}

/// Scales `vector` to unit length in place. Zero vectors stay zero.
pub fn normalize_vector(vector: &mut [f32]) {
    let norm = dot(vector, vector).sqrt();
    if norm > NORM_EPSILON {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

pub fn normalize_vector_copy(vector: &[f32]) -> Vec<f32> {
    let mut copy = vector.to_vec();
    normalize_vector(&mut copy);
    copy
}
