/// Catalog of the models a handle can be initialized with.
use std::fmt;

/// A supported embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// sentence-transformers all-MiniLM-L6-v2 (BERT, 384 dims).
    MiniLmV2,
    /// jina-embeddings-v2-base-en (JinaBERT, 768 dims).
    Jina,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::MiniLmV2, ModelKind::Jina];

    /// Resolve a caller-supplied model name. Matching is case-insensitive and
    /// accepts the historical aliases `mini_lm` and `bert`; surrounding
    /// whitespace is not stripped.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "mini_lm_v2" | "mini_lm" | "bert" => Some(Self::MiniLmV2),
            "jina" => Some(Self::Jina),
            _ => None,
        }
    }

    /// Canonical name, as accepted by `embedder_init`.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::MiniLmV2 => "mini_lm_v2",
            Self::Jina => "jina",
        }
    }

    /// Native output dimension.
    #[must_use]
    pub fn dimensions(self) -> usize {
        match self {
            Self::MiniLmV2 => 384,
            Self::Jina => 768,
        }
    }

    /// HuggingFace repository the model files are fetched from.
    #[must_use]
    pub fn hf_repo(self) -> &'static str {
        match self {
            Self::MiniLmV2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::Jina => "jinaai/jina-embeddings-v2-base-en",
        }
    }

    /// Directory name under the download cache.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::MiniLmV2 => "all-MiniLM-L6-v2",
            Self::Jina => "jina-embeddings-v2-base-en",
        }
    }

    /// Environment variable pointing at a local copy of the model files.
    #[must_use]
    pub fn folder_env_var(self) -> &'static str {
        match self {
            Self::MiniLmV2 => "BERT_MODEL_FOLDER",
            Self::Jina => "JINA_MODEL_FOLDER",
        }
    }

    /// Comma-separated list of canonical names, for error messages.
    #[must_use]
    pub fn supported_names() -> String {
        Self::ALL
            .iter()
            .map(|k| format!("'{}'", k.name()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
