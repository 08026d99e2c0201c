//! fastembed-backed embedder.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::config::EmbeddingConfig;
use crate::types::FieldKind;
use crate::vector::{VectorDimension, VectorError};

use super::Embedder;

/// Resolves a configured model name to a fastembed model.
///
/// Accepts the enum spelling (`AllMiniLML6V2`) and the Hugging Face name
/// (`all-MiniLM-L6-v2`).
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    let normalized: String = name
        .trim()
        .rsplit('/')
        .next()
        .unwrap_or(name)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    match normalized.as_str() {
        "allminilml6v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "allminilml12v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "bgesmallenv15" => Ok(EmbeddingModel::BGESmallENV15),
        "bgebaseenv15" => Ok(EmbeddingModel::BGEBaseENV15),
        "multilinguale5small" => Ok(EmbeddingModel::MultilingualE5Small),
        "nomicembedtextv15" => Ok(EmbeddingModel::NomicEmbedTextV15),
        _ => Err(VectorError::EmbeddingFailed(format!(
            "unsupported embedding model '{name}'. Use one of: AllMiniLML6V2, AllMiniLML12V2, BGESmallENV15, BGEBaseENV15, MultilingualE5Small, NomicEmbedTextV15"
        ))),
    }
}

/// Output dimension of a supported model.
pub fn model_dimension(model: &EmbeddingModel) -> VectorDimension {
    let dim = match model {
        EmbeddingModel::BGEBaseENV15 | EmbeddingModel::NomicEmbedTextV15 => 768,
        _ => 384,
    };
    VectorDimension::new(dim).unwrap_or_else(|_| VectorDimension::dimension_384())
}

/// Persisted model identity. Every accepted spelling of a model maps to the
/// same id.
pub fn model_id_for(model: &EmbeddingModel) -> String {
    format!("fastembed:{model:?}")
}

/// Sentence-transformer embeddings through fastembed's ONNX runtime.
///
/// The same model serves every field kind.
pub struct FastEmbedEmbedder {
    model: Mutex<TextEmbedding>,
    model_id: String,
    dimension: VectorDimension,
}

impl FastEmbedEmbedder {
    /// Loads (downloading on first use) the configured model.
    ///
    /// # Errors
    /// Returns an error if the model name is unknown or the model fails to
    /// initialize.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, VectorError> {
        let model_kind = parse_embedding_model(&config.model)?;
        let dimension = model_dimension(&model_kind);
        let model_id = model_id_for(&model_kind);

        let model = TextEmbedding::try_new(
            InitOptions::new(model_kind)
                .with_cache_dir(config.cache_dir.clone())
                .with_show_download_progress(config.show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        tracing::info!(model = %config.model, dimension = dimension.get(), "embedding model loaded");

        Ok(Self {
            model: Mutex::new(model),
            model_id,
            dimension,
        })
    }
}

impl Embedder for FastEmbedEmbedder {
    fn embed(&self, text: &str, field: FieldKind) -> Result<Vec<f32>, VectorError> {
        self.embed_batch(&[text], field)?
            .pop()
            .ok_or_else(|| VectorError::EmbeddingFailed("model returned no embedding".to_string()))
    }

    fn embed_batch(&self, texts: &[&str], _field: FieldKind) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(VectorError::EmbeddingFailed(
                "cannot embed blank text".to_string(),
            ));
        }

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_id(&self) -> String {
        self.model_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding_model_spellings() {
        assert!(matches!(
            parse_embedding_model("AllMiniLML6V2"),
            Ok(EmbeddingModel::AllMiniLML6V2)
        ));
        assert!(matches!(
            parse_embedding_model("sentence-transformers/all-MiniLM-L6-v2"),
            Ok(EmbeddingModel::AllMiniLML6V2)
        ));
        assert!(matches!(
            parse_embedding_model("BAAI/bge-base-en-v1.5"),
            Ok(EmbeddingModel::BGEBaseENV15)
        ));
        assert!(parse_embedding_model("word2vec").is_err());
    }

    #[test]
    fn test_model_id_ignores_spelling() {
        let enum_name = parse_embedding_model("AllMiniLML6V2").unwrap();
        let hub_name = parse_embedding_model("sentence-transformers/all-MiniLM-L6-v2").unwrap();
        assert_eq!(model_id_for(&enum_name), model_id_for(&hub_name));
        assert_eq!(model_id_for(&enum_name), "fastembed:AllMiniLML6V2");

        let other = parse_embedding_model("bge-small-en-v1.5").unwrap();
        assert_ne!(model_id_for(&enum_name), model_id_for(&other));
    }

    #[test]
    fn test_model_dimensions() {
        assert_eq!(model_dimension(&EmbeddingModel::AllMiniLML6V2).get(), 384);
        assert_eq!(model_dimension(&EmbeddingModel::BGEBaseENV15).get(), 768);
    }

    #[test]
    #[ignore = "Downloads 86MB model - run with --ignored for model tests"]
    fn test_fastembed_similar_reports_are_close() {
        use crate::vector::cosine_similarity;

        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = EmbeddingConfig {
            cache_dir: temp_dir.path().to_path_buf(),
            ..EmbeddingConfig::default()
        };
        let embedder = FastEmbedEmbedder::from_config(&config).unwrap();

        let vectors = embedder
            .embed_batch(
                &[
                    "parser throws null pointer",
                    "null pointer dereference in JSON parser",
                    "connection timeout in network client",
                ],
                FieldKind::Summary,
            )
            .unwrap();

        assert_eq!(vectors[0].len(), 384);
        assert!(
            cosine_similarity(&vectors[0], &vectors[1]) > cosine_similarity(&vectors[0], &vectors[2])
        );
    }
}
