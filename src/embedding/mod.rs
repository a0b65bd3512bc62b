pub mod local;

use anyhow::Result;

/// Number of dimensions in the embedding vectors (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into dense vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`EMBEDDING_DIM`]
/// dimensions. Methods are synchronous — async callers should wrap them in
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch in one pass. The default maps over [`embed`];
    /// implementations override with true batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Create the embedding provider from config (local ONNX runtime).
/// Returns an error if model files are missing — run
/// `context-orchestrator model download` first.
pub fn create_provider(
    config: &crate::config::EmbedderConfig,
) -> Result<Box<dyn EmbeddingProvider>> {
    let provider = local::LocalEmbedder::new(config)?;
    Ok(Box::new(provider))
}
