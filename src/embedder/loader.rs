/// Model loaders: turn a catalog entry into a live [`Embedder`].
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use super::download::{self, Fetch};
use super::mock::MockEmbedder;
use super::model::ModelKind;
use super::onnx::OnnxEmbedder;
use super::{Embedder, EmbedderError};
use crate::config::Config;

/// Builds model instances for the handle registry.
pub trait ModelLoader: Send + Sync {
    fn load(&self, kind: ModelKind) -> Result<Box<dyn Embedder>, EmbedderError>;
}

/// Loads ONNX exports from a local folder or the download cache.
pub struct OnnxLoader {
    config: Config,
    fetch: Arc<Fetch>,
    // held while a model's cache directory is being filled
    downloads: [Mutex<()>; ModelKind::ALL.len()],
}

impl OnnxLoader {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            fetch: Arc::new(download::http_fetch),
            downloads: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    #[cfg(test)]
    fn with_fetch(
        mut self,
        fetch: impl Fn(&str, &mut dyn std::io::Write) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.fetch = Arc::new(fetch);
        self
    }

    /// Locate the directory holding `kind`'s files, downloading them into the
    /// cache when allowed.
    ///
    /// An explicitly configured folder is used as-is and never written to.
    /// Concurrent loads of the same model share one download.
    pub fn resolve_model_dir(&self, kind: ModelKind) -> Result<PathBuf, EmbedderError> {
        if let Some(dir) = self.config.model_paths.get(kind) {
            if let Some(missing) = download::first_missing_file(dir) {
                return Err(EmbedderError::ModelLoadFailed(format!(
                    "{missing} not found in {} (configured folder for {kind})",
                    dir.display()
                )));
            }
            return Ok(dir.to_path_buf());
        }

        let dir = self.config.cached_model_dir(kind);
        if download::all_files_present(&dir) {
            return Ok(dir);
        }

        if !self.config.allow_download {
            let missing = download::first_missing_file(&dir).unwrap_or("model files");
            return Err(EmbedderError::ModelLoadFailed(format!(
                "{missing} not found in {} and downloads are disabled; set {} or enable allow_download",
                dir.display(),
                kind.folder_env_var()
            )));
        }

        let _downloading = self.downloads[kind as usize]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Files fetched by a thread that held the lock before us are skipped.
        download::download_missing(kind, &dir, self.fetch.as_ref()).map_err(|e| {
            warn!(model = %kind, "Model download failed: {e:#}");
            EmbedderError::ModelLoadFailed(format!("download failed: {e:#}"))
        })?;
        Ok(dir)
    }
}

impl ModelLoader for OnnxLoader {
    fn load(&self, kind: ModelKind) -> Result<Box<dyn Embedder>, EmbedderError> {
        let dir = self.resolve_model_dir(kind)?;
        info!(model = %kind, dir = %dir.display(), "Loading model");
        let embedder = OnnxEmbedder::new(
            &dir,
            kind,
            &self.config.compute,
            self.config.max_length,
        )?;
        Ok(Box::new(embedder))
    }
}

/// Loader producing [`MockEmbedder`]s with each model's native dimension.
#[derive(Debug, Clone, Default)]
pub struct MockLoader {
    failure_marker: Option<String>,
    fail_load: bool,
}

impl MockLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Embedders built by this loader fail on texts containing `marker`.
    #[must_use]
    pub fn with_failure_marker(mut self, marker: impl Into<String>) -> Self {
        self.failure_marker = Some(marker.into());
        self
    }

    /// Every load fails, as if the model files were unusable.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_load: true,
            ..Self::default()
        }
    }
}

impl ModelLoader for MockLoader {
    fn load(&self, kind: ModelKind) -> Result<Box<dyn Embedder>, EmbedderError> {
        if self.fail_load {
            return Err(EmbedderError::ModelLoadFailed(format!(
                "mock loader refused {kind}"
            )));
        }
        let mut embedder = MockEmbedder::new(kind.dimensions());
        embedder.failure_marker = self.failure_marker.clone();
        Ok(Box::new(embedder))
    }
}
