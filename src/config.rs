/// Configuration module for rustembed.
///
/// Handles loading, validating, and providing default configuration values.
/// The library has no command line, so configuration comes from the JSON file
/// named by `RUSTEMBED_CONFIG` plus a few environment overrides.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embedder::model::ModelKind;

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "RUSTEMBED_CONFIG";

// ── Default value functions ──────────────────────────────────────────

fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rustembed")
        .join("models")
}

fn default_true() -> bool {
    true
}

fn default_max_length() -> usize {
    512
}

fn default_intra_threads() -> usize {
    4
}

fn default_inter_threads() -> usize {
    1
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Root directory for downloaded models.
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Fetch missing model files from HuggingFace.
    #[serde(default = "default_true")]
    pub allow_download: bool,

    /// Tokenizer truncation length.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default)]
    pub compute: ComputeConfig,

    #[serde(default)]
    pub model_paths: ModelPaths,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ComputeConfig {
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_inter_threads")]
    pub inter_threads: usize,
}

/// Explicit local folders holding `model.onnx` + `tokenizer.json`.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ModelPaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mini_lm_v2: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jina: Option<PathBuf>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            allow_download: default_true(),
            max_length: default_max_length(),
            compute: ComputeConfig::default(),
            model_paths: ModelPaths::default(),
        }
    }
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            intra_threads: default_intra_threads(),
            inter_threads: default_inter_threads(),
        }
    }
}

impl ModelPaths {
    #[must_use]
    pub fn get(&self, kind: ModelKind) -> Option<&Path> {
        match kind {
            ModelKind::MiniLmV2 => self.mini_lm_v2.as_deref(),
            ModelKind::Jina => self.jina.as_deref(),
        }
    }

    pub fn set(&mut self, kind: ModelKind, path: PathBuf) {
        match kind {
            ModelKind::MiniLmV2 => self.mini_lm_v2 = Some(path),
            ModelKind::Jina => self.jina = Some(path),
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Build the process configuration: the file named by `RUSTEMBED_CONFIG`
    /// (or defaults), then environment overrides.
    ///
    /// Never fails; problems are logged and defaults are used instead.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(&path).unwrap_or_else(|e| {
                warn!("Failed to load {path}: {e:#}");
                Self::default()
            }),
            Err(_) => Self::default(),
        };

        cfg.apply_overrides(|key| std::env::var(key).ok());

        if let Err(e) = cfg.validate() {
            warn!("Invalid configuration ({e:#}), using defaults");
            cfg = Self::default();
            cfg.apply_overrides(|key| std::env::var(key).ok());
        }

        cfg
    }

    /// Load configuration from a JSON file.
    ///
    /// If the file does not exist, returns the default config.
    pub fn load(config_path: &str) -> Result<Self> {
        if !Path::new(config_path).exists() {
            info!("{config_path} not found, using defaults");
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config: {config_path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {config_path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {config_path}");
        Ok(cfg)
    }

    /// Apply per-model folder overrides (`BERT_MODEL_FOLDER`,
    /// `JINA_MODEL_FOLDER`) looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for kind in ModelKind::ALL {
            if let Some(folder) = lookup(kind.folder_env_var()).filter(|v| !v.is_empty()) {
                info!(model = %kind, folder = %folder, "Using local model folder from environment");
                self.model_paths.set(kind, PathBuf::from(folder));
            }
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_length > 0, "max_length must be positive");
        anyhow::ensure!(
            self.compute.intra_threads > 0,
            "compute.intra_threads must be positive"
        );
        anyhow::ensure!(
            self.compute.inter_threads > 0,
            "compute.inter_threads must be positive"
        );
        Ok(())
    }

    /// Directory a model is loaded from when no explicit folder is set.
    #[must_use]
    pub fn cached_model_dir(&self, kind: ModelKind) -> PathBuf {
        self.model_dir.join(kind.dir_name())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_length, 512);
        assert_eq!(config.compute.intra_threads, 4);
        assert_eq!(config.compute.inter_threads, 1);
        assert!(config.allow_download);
        assert!(config.model_dir.ends_with("rustembed/models"));
        assert!(config.model_paths.get(ModelKind::Jina).is_none());
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"max_length": 256, "allow_download": false}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_length, 256);
        assert!(!config.allow_download);
        // Other fields should have defaults
        assert_eq!(config.compute.intra_threads, 4);
    }

    #[test]
    fn test_load_model_paths() {
        let json = r#"{"model_paths": {"jina": "/opt/jina"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.model_paths.get(ModelKind::Jina),
            Some(Path::new("/opt/jina"))
        );
        assert!(config.model_paths.get(ModelKind::MiniLmV2).is_none());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/rustembed.json").unwrap();
        assert_eq!(config.max_length, 512);
    }

    #[test]
    fn test_load_invalid_json_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.max_length, 512);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.max_length = 128;
        config.model_paths.set(ModelKind::MiniLmV2, PathBuf::from("/models/bert"));
        config.save(path).unwrap();

        let loaded = Config::load(path).unwrap();
        assert_eq!(loaded.max_length, 128);
        assert_eq!(
            loaded.model_paths.get(ModelKind::MiniLmV2),
            Some(Path::new("/models/bert"))
        );
    }

    #[test]
    fn test_validate_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_max_length() {
        let mut config = Config::default();
        config.max_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_threads() {
        let mut config = Config::default();
        config.compute.intra_threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "BERT_MODEL_FOLDER" => Some("/local/bert".to_string()),
            "JINA_MODEL_FOLDER" => Some(String::new()),
            _ => None,
        });
        assert_eq!(
            config.model_paths.get(ModelKind::MiniLmV2),
            Some(Path::new("/local/bert"))
        );
        assert!(config.model_paths.get(ModelKind::Jina).is_none());
    }

    #[test]
    fn test_cached_model_dir() {
        let mut config = Config::default();
        config.model_dir = PathBuf::from("/cache");
        assert_eq!(
            config.cached_model_dir(ModelKind::Jina),
            PathBuf::from("/cache/jina-embeddings-v2-base-en")
        );
    }
}
