//! Embedding model capability.
//!
//! Operators only see [`EmbeddingModel`]: `text -> vector`. Backends are
//! resolved from an identifier by [`load_model`]:
//!
//! - `hashing`: deterministic feature hashing, no external resources
//! - `api:<model>`: OpenAI-compatible `/v1/embeddings` endpoint
//! - `MiniLM-L6-v2`, `sentence-transformers/<name>`: local BERT via candle
//!   (requires the `local-models` feature)

mod api;
#[cfg(feature = "local-models")]
mod candle;

pub use api::ApiEmbedder;
#[cfg(feature = "local-models")]
pub use candle::CandleEmbedder;

use crate::config::Settings;
use crate::error::{EvalError, Result};
use std::sync::Arc;

/// A text embedding backend.
pub trait EmbeddingModel: Send + Sync {
    /// Identifier the model was loaded with.
    fn id(&self) -> &str;

    /// Length of every vector this model returns.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input in order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// Shared handle to a loaded model.
pub type ModelHandle = Arc<dyn EmbeddingModel>;

/// Resolve a model identifier to a loaded backend.
pub fn load_model(id: &str, settings: &Settings) -> Result<ModelHandle> {
    if id == HashingEmbedder::ID {
        return Ok(Arc::new(HashingEmbedder::new(settings.models.embedding_dim)));
    }

    if let Some(model) = id.strip_prefix("api:") {
        return Ok(Arc::new(ApiEmbedder::new(model, &settings.models)?));
    }

    #[cfg(feature = "local-models")]
    {
        if id == "MiniLM-L6-v2" {
            return Ok(Arc::new(CandleEmbedder::load_minilm()?));
        }
        if id.starts_with("sentence-transformers/") {
            return Ok(Arc::new(CandleEmbedder::load(id)?));
        }
    }

    Err(EvalError::Model(format!(
        "Unknown embedding model '{}' (local models need the `local-models` feature)",
        id
    )))
}

/// Deterministic bag-of-words embedder using signed feature hashing.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub const ID: &'static str = "hashing";

    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl EmbeddingModel for HashingEmbedder {
    fn id(&self) -> &str {
        Self::ID
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Lowercased alphanumeric tokens.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Compute cosine similarity between two vectors.
///
/// Returns `None` when the lengths differ. A zero vector has similarity 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        Some(0.0)
    } else {
        Some((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-9);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).unwrap().abs() < 1e-9);

        assert_eq!(cosine_similarity(&a, &[1.0]), None);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), Some(0.0));
    }

    #[test]
    fn test_hashing_embedder_is_deterministic_and_normalised() {
        let model = HashingEmbedder::new(64);
        let first = model.embed_batch(&["Rust ownership rules", ""]).unwrap();
        let second = model.embed_batch(&["rust OWNERSHIP rules"]).unwrap();

        assert_eq!(first[0], second[0]);
        assert_eq!(first[0].len(), 64);
        let norm: f32 = first[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(first[1].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_load_model_registry() {
        let settings = Settings::default();
        let model = load_model("hashing", &settings).unwrap();
        assert_eq!(model.dimension(), 384);
        assert_eq!(model.id(), "hashing");

        let err = load_model("does-not-exist", &settings).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::ModelError);
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World! v1.2"), vec!["hello", "world", "v1", "2"]);
    }
}
