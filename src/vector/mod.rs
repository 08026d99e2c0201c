//! Per-field vector indices.
//!
//! Each semantic field of a bug report gets its own [`FieldIndex`]: an
//! IVFFlat (Inverted File with Flat vectors) structure partitioned by
//! seeded k-means, built once and then frozen. Frozen indices are persisted
//! as memory-mapped artifacts and reloaded without re-embedding.
//!
//! # Architecture
//! - `types`: dimension, score and cluster newtypes plus [`VectorError`]
//! - `clustering`: seeded spherical k-means with K-means++ initialization
//! - `index`: the append-then-freeze index and angular distance
//! - `storage`: binary artifact format

mod clustering;
mod index;
mod storage;
mod types;

pub use clustering::{
    ClusteringError, Partition, SphericalKMeans, cosine_similarity, nearest_centroid,
    normalize_vector, normalize_vector_copy,
};
pub use index::{FieldIndex, IndexParams, MAX_CLUSTERS, Neighbor, angular_distance};
pub use storage::{ARTIFACT_VERSION, ArtifactError, read_index, write_index};
pub use types::{
    ClusterId, MAX_ANGULAR_DISTANCE, Score, VECTOR_DIMENSION_384, VectorDimension, VectorError,
};
