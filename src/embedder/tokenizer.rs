/// `tokenizer.json` loading for the ONNX backend.
///
/// Both catalog models ship a BERT-style WordPiece tokenizer. Inputs are
/// encoded one at a time, so padding is disabled and only truncation applies.
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tokenizers::{Encoding, Tokenizer, TruncationParams};

/// A HuggingFace tokenizer truncating to a fixed sequence length.
pub struct BertTokenizer {
    inner: Tokenizer,
    max_length: usize,
}

/// Model inputs for one text.
#[derive(Debug, Clone)]
pub struct TokenizerOutput {
    pub input_ids: Vec<i64>,
    /// 1 for real tokens, 0 for padding.
    pub attention_mask: Vec<i64>,
}

impl TokenizerOutput {
    #[must_use]
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

impl From<&Encoding> for TokenizerOutput {
    fn from(encoding: &Encoding) -> Self {
        let widen = |xs: &[u32]| -> Vec<i64> { xs.iter().copied().map(i64::from).collect() };
        Self {
            input_ids: widen(encoding.get_ids()),
            attention_mask: widen(encoding.get_attention_mask()),
        }
    }
}

impl BertTokenizer {
    /// Load `<model_dir>/tokenizer.json`, truncating inputs to `max_length`
    /// tokens (special tokens included).
    pub fn from_model_dir(model_dir: &Path, max_length: usize) -> Result<Self> {
        anyhow::ensure!(max_length > 0, "max_length must be positive");

        let path = model_dir.join("tokenizer.json");
        anyhow::ensure!(path.is_file(), "{} is missing tokenizer.json", model_dir.display());

        let mut inner = Tokenizer::from_file(&path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("failed to parse {}", path.display()))?;

        inner
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("{e}"))
            .context("failed to configure truncation")?;
        inner.with_padding(None);

        Ok(Self { inner, max_length })
    }

    /// Encode one text with the model's special tokens.
    pub fn tokenize(&self, text: &str) -> Result<TokenizerOutput> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| anyhow!("{e}"))
            .context("failed to encode text")?;
        Ok(TokenizerOutput::from(&encoding))
    }

    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(false)
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tokenizer_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BertTokenizer::from_model_dir(dir.path(), 512).err().unwrap();
        assert!(err.to_string().contains("tokenizer.json"));
    }

    #[test]
    fn test_unparseable_tokenizer_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), "{ not json").unwrap();
        let err = BertTokenizer::from_model_dir(dir.path(), 512).err().unwrap();
        assert!(format!("{err:#}").contains("failed to parse"));
    }

    #[test]
    fn test_zero_max_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(BertTokenizer::from_model_dir(dir.path(), 0).is_err());
    }

    /// Needs a real `tokenizer.json` in `BERT_MODEL_FOLDER`.
    #[test]
    #[ignore]
    fn test_truncates_long_input() {
        let Some(model_dir) = std::env::var_os("BERT_MODEL_FOLDER") else {
            eprintln!("Skipping: BERT_MODEL_FOLDER not set");
            return;
        };

        let tokenizer = BertTokenizer::from_model_dir(Path::new(&model_dir), 16).unwrap();
        let short = tokenizer.tokenize("Hello, world!").unwrap();
        assert!(short.len() >= 3, "expected [CLS] ... [SEP]");
        assert!(short.attention_mask.iter().all(|&m| m == 1));

        let long = tokenizer.tokenize(&"word ".repeat(200)).unwrap();
        assert_eq!(long.len(), 16);
    }
}
