//! Embedding generation for bug report fields.
//!
//! The [`Embedder`] trait is the seam to the text-embedding model. Two
//! implementations ship with the crate:
//! - [`FastEmbedEmbedder`]: ONNX sentence-transformer models through fastembed
//! - [`HashingEmbedder`]: deterministic feature hashing, no model download
//!
//! Implementations must be deterministic for a fixed model and always return
//! vectors of [`Embedder::dimension`] components.

mod model;
mod hashing;
pub mod text;

use std::sync::Arc;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::types::FieldKind;
use crate::vector::{VectorDimension, VectorError};

pub use model::{FastEmbedEmbedder, model_dimension, parse_embedding_model};
pub use hashing::HashingEmbedder;
pub use text::{DiffAggregate, aggregate_diffs, field_text};

/// Turns field text into fixed-dimension vectors.
///
/// Implementations should be thread-safe; search requests embed concurrently.
pub trait Embedder: Send + Sync {
    /// Embeds one text for the given field.
    fn embed(&self, text: &str, field: FieldKind) -> Result<Vec<f32>, VectorError>;

    /// Embeds several texts of the same field.
    ///
    /// The default calls [`Embedder::embed`] once per text.
    fn embed_batch(&self, texts: &[&str], field: FieldKind) -> Result<Vec<Vec<f32>>, VectorError> {
        texts.iter().map(|text| self.embed(text, field)).collect()
    }

    /// Dimension of every vector this embedder returns.
    #[must_use]
    fn dimension(&self) -> VectorDimension;

    /// Identifier persisted with an index so incompatible models are detected.
    fn model_id(&self) -> String;
}

/// Builds the embedder selected in configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, VectorError> {
    match config.provider {
        EmbeddingProvider::Fastembed => {
            let embedder = FastEmbedEmbedder::from_config(config)?;
            if embedder.dimension().get() != config.dimension {
                tracing::warn!(
                    model = %config.model,
                    configured = config.dimension,
                    actual = embedder.dimension().get(),
                    "configured dimension differs from the model; using the model's"
                );
            }
            Ok(Arc::new(embedder))
        }
        EmbeddingProvider::Hashing => {
            let dimension = VectorDimension::new(config.dimension)?;
            Ok(Arc::new(HashingEmbedder::new(dimension)))
        }
    }
}
