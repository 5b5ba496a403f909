//! Batch embedding into one flattened buffer.
use crate::embedder::Embedder;
use crate::engine::{embed_one, ensure_capacity};
use crate::error::BoundaryError;

/// Vectors of a whole batch, laid out back to back.
///
/// Slot `i` of `values` spans `[i * dimension, (i + 1) * dimension)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    pub dimension: usize,
    pub values: Vec<f32>,
}

/// Embed `texts` in order, staging the results.
///
/// The capacity check runs before the model sees any text. The first failing
/// text aborts the batch and nothing is returned for the texts before it.
pub fn embed_many(
    model: &dyn Embedder,
    texts: &[&str],
    capacity: usize,
) -> Result<BatchOutput, BoundaryError> {
    let dimension = model.dimensions();
    let required = texts
        .len()
        .checked_mul(dimension)
        .ok_or(BoundaryError::BufferTooSmall {
            required: usize::MAX,
            capacity,
        })?;
    ensure_capacity(required, capacity)?;

    let mut values = Vec::with_capacity(required);
    for (i, text) in texts.iter().enumerate() {
        let vector = embed_one(model, text).map_err(|e| e.at_index(i))?;
        values.extend_from_slice(&vector);
    }

    Ok(BatchOutput { dimension, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbedderError;
    use crate::embedder::mock::MockEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls so tests can assert the model was never reached.
    struct CountingEmbedder {
        inner: MockEmbedder,
        calls: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text)
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    fn counting(dim: usize) -> CountingEmbedder {
        CountingEmbedder {
            inner: MockEmbedder::new(dim).with_failure_marker("__fail__"),
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_layout_matches_single_embeds() {
        let model = MockEmbedder::new(8);
        let texts = ["first", "second", "third"];
        let out = embed_many(&model, &texts, 24).unwrap();

        assert_eq!(out.dimension, 8);
        assert_eq!(out.values.len(), 24);
        for (slot, text) in out.values.chunks_exact(8).zip(texts) {
            assert_eq!(slot, model.embed(text).unwrap().as_slice());
        }
    }

    #[test]
    fn test_insufficient_capacity_skips_model() {
        let model = counting(8);
        let err = embed_many(&model, &["a", "b"], 15).unwrap_err();
        assert!(matches!(
            err,
            BoundaryError::BufferTooSmall {
                required: 16,
                capacity: 15
            }
        ));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_first_failure_aborts() {
        let model = counting(4);
        let err = embed_many(&model, &["ok", "__fail__", "never"], 12).unwrap_err();
        assert!(err.to_string().contains("text 1"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_batch() {
        let model = MockEmbedder::new(4);
        let out = embed_many(&model, &[], 0).unwrap();
        assert!(out.values.is_empty());
        assert_eq!(out.dimension, 4);
    }

    #[test]
    fn test_size_overflow_is_too_small() {
        let model = MockEmbedder::new(usize::MAX);
        let err = embed_many(&model, &["a", "b"], 1024).unwrap_err();
        assert!(matches!(err, BoundaryError::BufferTooSmall { .. }));
    }
}
