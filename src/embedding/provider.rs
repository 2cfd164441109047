/// Embedding provider trait and FastEmbed implementation
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;

use super::{rows_to_matrix, Matrix};

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// The ranking engine calls [`EmbeddingProvider::embed_batch`] once per request
/// for the preference phrases. Row `i` of the returned matrix embeds `texts[i]`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed every text, one row per input, in input order
    fn embed_batch(&self, texts: &[String]) -> Result<Matrix, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let matrix = self.embed_batch(&[text.to_string()])?;
        Ok(matrix.row(0).to_vec())
    }
}

/// FastEmbed provider for local embedding generation
///
/// Uses all-MiniLM-L6-v2 model (384 dimensions) by default. The model is
/// loaded on the first non-empty `embed_batch`, so hosts that never reach
/// coverage-risk ranking pay no load or download cost.
pub struct FastEmbedProvider {
    model: OnceLock<Arc<TextEmbedding>>,
    init_lock: Mutex<()>,
    embedding_model: EmbeddingModel,
    model_name: String,
    model_size_mb: usize,
    dimension: usize,
    batch_size: usize,
}

impl FastEmbedProvider {
    /// Create a new FastEmbed provider with the specified model
    ///
    /// Only the model name is checked here. **Important**: models are
    /// downloaded on-demand to `~/.cache/huggingface/` on first embedding.
    /// - all-MiniLM-L6-v2: 90MB (384 dims)
    /// - bge-small-en-v1.5: 130MB (384 dims)
    /// - bge-base-en-v1.5: 440MB (768 dims)
    pub fn new(model_name: &str, batch_size: usize) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension, model_size_mb) = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384, 90),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384, 130),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768, 440),
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                    model_name
                )));
            }
        };

        Ok(Self {
            model: OnceLock::new(),
            init_lock: Mutex::new(()),
            embedding_model,
            model_name: model_name.to_string(),
            model_size_mb,
            dimension,
            batch_size: batch_size.max(1),
        })
    }

    /// Create provider with default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new("all-MiniLM-L6-v2", 32)
    }

    /// Whether the model has been loaded yet
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    /// Load the model once; a failed load leaves the provider unloaded
    fn model(&self) -> Result<Arc<TextEmbedding>, EmbeddingError> {
        if let Some(model) = self.model.get() {
            return Ok(Arc::clone(model));
        }

        let _guard = self.init_lock.lock().map_err(|_| {
            EmbeddingError::InitializationError("model init lock poisoned".to_string())
        })?;

        if let Some(model) = self.model.get() {
            return Ok(Arc::clone(model));
        }

        tracing::info!(
            "Initializing embedding model: {} ({}D, ~{}MB download if not cached)",
            self.model_name,
            self.dimension,
            self.model_size_mb
        );

        let init_options =
            InitOptions::new(self.embedding_model.clone()).with_show_download_progress(false);

        let model = Arc::new(
            TextEmbedding::try_new(init_options)
                .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?,
        );
        let _ = self.model.set(Arc::clone(&model));
        Ok(model)
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Matrix, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Matrix::zeros((0, self.dimension)));
        }

        // Dropping empties would shift rows against their phrases
        if let Some(idx) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(format!(
                "Empty text at position {}",
                idx
            )));
        }

        let rows = self
            .model()?
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        if rows.len() != texts.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                rows.len()
            )));
        }

        rows_to_matrix(rows, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
