//! Feature-hashing embedder.
//!
//! Lowercased alphanumeric tokens are hashed with FNV-1a into a signed
//! bag-of-words vector and L2-normalized. Texts sharing words land close
//! together, which is enough for offline operation and for tests that must
//! not download a model.

use crate::types::FieldKind;
use crate::vector::{VectorDimension, VectorError, normalize_vector};

use super::Embedder;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic bag-of-words embedder.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: VectorDimension,
}

impl HashingEmbedder {
    pub fn new(dimension: VectorDimension) -> Self {
        Self { dimension }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(VectorDimension::dimension_384())
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str, _field: FieldKind) -> Result<Vec<f32>, VectorError> {
        let dim = self.dimension.get();
        let mut vector = vec![0.0f32; dim];
        let mut tokens = 0usize;

        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let slot = (hash % dim as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
            tokens += 1;
        }

        if tokens == 0 {
            return Err(VectorError::EmbeddingFailed(
                "text contains no alphanumeric tokens".to_string(),
            ));
        }

        normalize_vector(&mut vector);
        Ok(vector)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_id(&self) -> String {
        format!("hashing-fnv1a-{}", self.dimension.get())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}
