//! Newtypes shared by the field indices and the vector-layer error.
//!
//! Dimensions, similarities and inverted-list ids never travel as a bare
//! `usize` or `f32` between modules.

use std::cmp::Ordering;
use std::fmt;
use std::num::NonZeroU32;

use thiserror::Error;

use crate::types::FieldKind;

/// Output dimension of the default all-MiniLM-L6-v2 model.
pub const VECTOR_DIMENSION_384: usize = 384;

/// Angular distance between opposite unit vectors.
pub const MAX_ANGULAR_DISTANCE: f32 = 2.0;

/// Inverted list of a partitioned index.
///
/// Stored 1-based so that 0 can mark "unpartitioned" in artifacts; the
/// centroid of `ClusterId(n)` lives at position `n - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(NonZeroU32);

impl ClusterId {
    /// `None` for the reserved id 0.
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn from_index(position: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add(position as u32))
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }

    pub fn index(&self) -> usize {
        self.0.get() as usize - 1
    }
}

/// Per-field similarity in `[0, 1]`, 1 meaning same direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(f32);

impl Score {
    /// `1 - distance / 2`. Distances drifting outside `[0, 2]`, NaN
    /// included, are clamped first.
    #[must_use]
    pub fn from_angular_distance(distance: f32) -> Self {
        let distance = if distance.is_nan() {
            MAX_ANGULAR_DISTANCE
        } else {
            distance.clamp(0.0, MAX_ANGULAR_DISTANCE)
        };
        Self(1.0 - distance / MAX_ANGULAR_DISTANCE)
    }

    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Length of every vector an embedder produces, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    pub fn new(dimension: usize) -> Result<Self, VectorError> {
        if dimension == 0 {
            return Err(VectorError::InvalidDimension {
                dimension,
                reason: "an embedding needs at least one component",
            });
        }
        Ok(Self(dimension))
    }

    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    pub const fn get(&self) -> usize {
        self.0
    }

    /// Checks length and that every component is finite.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        if let Some(position) = vector.iter().position(|x| !x.is_finite()) {
            return Err(VectorError::NonFiniteComponent { position });
        }
        Ok(())
    }
}

impl fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failures of the embedding and field-index layer.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Got a {actual}-component vector where {expected} were expected\nSuggestion: Rebuild after switching embedding models"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding dimension {dimension} is not usable: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error(
        "Component {position} of the vector is NaN or infinite\nSuggestion: Check what the embedder returns for this text"
    )]
    NonFiniteComponent { position: usize },

    #[error("Embedding failed: {0}\nSuggestion: Check the embedding model configuration and cache directory")]
    EmbeddingFailed(String),

    #[error("Partitioning failed: {0}")]
    ClusteringFailed(String),

    #[error("The {field} index is still being built and cannot be queried yet")]
    IndexNotFinalized { field: FieldKind },

    #[error("The {field} index is frozen; build a new index generation to add vectors")]
    IndexFinalized { field: FieldKind },

    #[error("Internal id {id} was inserted twice into the {field} index")]
    DuplicateInternalId { field: FieldKind, id: u32 },

    #[error(
        "Index artifact format {actual} is not supported (expected {expected})\nSuggestion: Run `bugfuse rebuild`"
    )]
    VersionMismatch { expected: u32, actual: u32 },
}
