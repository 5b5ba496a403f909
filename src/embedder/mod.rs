/// Embedder trait and shared types for text embedding.
///
/// Everything behind a handle is reached through [`Embedder`]; the concrete
/// backend is chosen by a [`loader::ModelLoader`] from the [`model::ModelKind`]
/// catalog.
pub mod download;
pub mod loader;
pub mod mock;
pub mod model;
pub mod onnx;
pub mod tokenizer;

use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` so a handle's model can live
/// behind `Arc` in the registry.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}
