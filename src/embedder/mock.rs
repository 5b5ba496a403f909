/// Model-free backend.
///
/// Vectors are derived from a hash of the text, so equal texts always map to
/// equal unit vectors and handles can be exercised without model files.
use std::hash::{DefaultHasher, Hash, Hasher};

use super::{Embedder, EmbedderError};

/// Deterministic hash-seeded embedder.
pub struct MockEmbedder {
    pub dimensions: usize,
    /// Texts containing this marker fail with an inference error.
    pub failure_marker: Option<String>,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            failure_marker: None,
        }
    }

    /// Make every text containing `marker` fail.
    #[must_use]
    pub fn with_failure_marker(mut self, marker: impl Into<String>) -> Self {
        self.failure_marker = Some(marker.into());
        self
    }

    fn seed(text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

/// splitmix64 step: advances `state` and returns the next output.
fn next_u64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl Embedder for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if let Some(marker) = self
            .failure_marker
            .as_deref()
            .filter(|m| text.contains(m))
        {
            return Err(EmbedderError::InferenceFailed(format!(
                "mock failure triggered by {marker:?}"
            )));
        }

        let mut state = Self::seed(text);
        // top 24 bits mapped into [-1, 1)
        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|_| (next_u64(&mut state) >> 40) as f32 / (1u64 << 23) as f32 - 1.0)
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
