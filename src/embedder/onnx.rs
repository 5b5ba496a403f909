/// Sentence embeddings from an ONNX export via `ort`.
///
/// The session's `last_hidden_state` is averaged over the attended tokens
/// and scaled to unit length.
use std::fmt::Display;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::model::ModelKind;
use super::tokenizer::{BertTokenizer, TokenizerOutput};
use super::{Embedder, EmbedderError};
use crate::config::ComputeConfig;

fn load_error<E: Display>(stage: &str) -> impl Fn(E) -> EmbedderError + '_ {
    move |e| EmbedderError::ModelLoadFailed(format!("{stage}: {e}"))
}

fn inference_error<E: Display>(stage: &str) -> impl Fn(E) -> EmbedderError + '_ {
    move |e| EmbedderError::InferenceFailed(format!("{stage}: {e}"))
}

// A panic mid-run is reported by the caller; the session itself stays usable.
fn lock_session<T>(session: &Mutex<T>) -> MutexGuard<'_, T> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A loaded model and its tokenizer. Runs are serialized on the session lock.
pub struct OnnxEmbedder {
    kind: ModelKind,
    session: Mutex<Session>,
    tokenizer: BertTokenizer,
    dimensions: usize,
}

impl OnnxEmbedder {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn new(
        model_dir: &Path,
        kind: ModelKind,
        compute: &ComputeConfig,
        max_length: usize,
    ) -> Result<Self, EmbedderError> {
        let model_path = model_dir.join("model.onnx");
        if !model_path.is_file() {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "{} is missing model.onnx",
                model_dir.display()
            )));
        }

        let tokenizer = BertTokenizer::from_model_dir(model_dir, max_length)
            .map_err(|e| EmbedderError::TokenizerError(format!("{e:#}")))?;

        debug!(model = %kind, path = %model_path.display(), "creating ONNX session");
        let session = Session::builder()
            .map_err(load_error("session builder"))?
            .with_intra_threads(compute.intra_threads)
            .map_err(load_error("intra-op threads"))?
            .with_inter_threads(compute.inter_threads)
            .map_err(load_error("inter-op threads"))?
            .commit_from_file(&model_path)
            .map_err(load_error("reading model.onnx"))?;

        info!(
            model = %kind,
            vocab = tokenizer.vocab_size(),
            max_length = tokenizer.max_length(),
            "ONNX model loaded"
        );

        Ok(Self {
            kind,
            session: Mutex::new(session),
            tokenizer,
            dimensions: kind.dimensions(),
        })
    }

    fn run(&self, tokens: &TokenizerOutput) -> Result<Vec<f32>, EmbedderError> {
        let seq_len = tokens.len();
        let shape = [1usize, seq_len];

        // (shape, data) tuples keep ndarray out of the dependency graph
        let input_ids = Tensor::from_array((shape, tokens.input_ids.clone()))
            .map_err(inference_error("input_ids"))?;
        let attention_mask = Tensor::from_array((shape, tokens.attention_mask.clone()))
            .map_err(inference_error("attention_mask"))?;
        let token_type_ids = Tensor::from_array((shape, vec![0i64; seq_len]))
            .map_err(inference_error("token_type_ids"))?;

        let mut session = lock_session(&self.session);
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
            .map_err(inference_error("session run"))?;

        let (_shape, hidden) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference_error("reading last_hidden_state"))?;

        if hidden.len() != seq_len * self.dimensions {
            return Err(EmbedderError::InferenceFailed(format!(
                "last_hidden_state has {} values, expected {seq_len} tokens x {} dims",
                hidden.len(),
                self.dimensions
            )));
        }
        Ok(masked_mean(hidden, &tokens.attention_mask, self.dimensions))
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let tokens = self
            .tokenizer
            .tokenize(text)
            .map_err(|e| EmbedderError::TokenizerError(format!("{e:#}")))?;
        debug!(model = %self.kind, tokens = tokens.len(), "embedding");

        let mut vector = self.run(&tokens)?;
        normalize(&mut vector);
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Average the token rows of `hidden` (row-major, `dims` wide) whose mask is
/// set. Returns zeros when no token is attended.
fn masked_mean(hidden: &[f32], mask: &[i64], dims: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; dims];
    let mut attended = 0usize;

    for (row, _) in hidden
        .chunks_exact(dims)
        .zip(mask)
        .filter(|&(_, &m)| m != 0)
    {
        attended += 1;
        for (acc, &x) in sum.iter_mut().zip(row) {
            *acc += x;
        }
    }

    if attended > 0 {
        let scale = 1.0 / attended as f32;
        sum.iter_mut().for_each(|v| *v *= scale);
    }
    sum
}

/// Scale `v` to unit L2 norm in place. Zero vectors are left alone.
fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_mean_skips_padding() {
        // three tokens of width 2; the last is padding
        let hidden = [1.0, 4.0, 3.0, 8.0, 100.0, 100.0];
        assert_eq!(masked_mean(&hidden, &[1, 1, 0], 2), vec![2.0, 6.0]);
    }

    #[test]
    fn test_masked_mean_without_attended_tokens() {
        let hidden = [5.0, 5.0, 5.0];
        assert_eq!(masked_mean(&hidden, &[0], 3), vec![0.0; 3]);
    }

    #[test]
    fn test_normalize() {
        let mut v = [0.0, 3.0, 4.0];
        normalize(&mut v);
        assert!((v[1] - 0.6).abs() < 1e-6);
        assert!((v[2] - 0.8).abs() < 1e-6);

        let mut zero = [0.0f32; 4];
        normalize(&mut zero);
        assert_eq!(zero, [0.0; 4]);
    }

    #[test]
    fn test_session_lock_survives_panic() {
        let session = Mutex::new(vec![1, 2, 3]);
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = session.lock().unwrap();
            panic!("backend panicked mid-run");
        }));
        assert!(poisoned.is_err());
        assert!(session.is_poisoned());

        lock_session(&session).push(4);
        assert_eq!(*lock_session(&session), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_new_requires_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxEmbedder::new(
            dir.path(),
            ModelKind::Jina,
            &ComputeConfig::default(),
            512,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EmbedderError::ModelLoadFailed(_)));
        assert!(err.to_string().contains("model.onnx"));
    }

    /// Needs a real MiniLM export in `BERT_MODEL_FOLDER`.
    #[test]
    #[ignore]
    fn test_mini_lm_embedding_is_unit_length() {
        let Some(model_dir) = std::env::var_os("BERT_MODEL_FOLDER") else {
            eprintln!("Skipping: BERT_MODEL_FOLDER not set");
            return;
        };

        let embedder = OnnxEmbedder::new(
            Path::new(&model_dir),
            ModelKind::MiniLmV2,
            &ComputeConfig::default(),
            512,
        )
        .unwrap();

        let a = embedder.embed("The cat sits on the mat.").unwrap();
        let b = embedder.embed("The cat sits on the mat.").unwrap();
        assert_eq!(a.len(), 384);
        assert_eq!(a, b);

        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3, "norm = {norm}");
    }
}
