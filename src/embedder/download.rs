/// Fetching catalog models from the HuggingFace hub.
///
/// Only the ONNX export and `tokenizer.json` are needed. Files already on
/// disk are kept, so an interrupted download resumes file by file.
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::model::ModelKind;
use crate::logging;

const HF_BASE: &str = "https://huggingface.co";

/// Copies the body behind a URL into a sink.
pub type Fetch = dyn Fn(&str, &mut dyn Write) -> Result<()> + Send + Sync;

/// A file the ONNX backend reads from a model directory.
#[derive(Debug, Clone, Copy)]
pub struct ModelFile {
    /// Name inside the local model directory.
    pub name: &'static str,
    /// Path inside the HuggingFace repository.
    pub remote: &'static str,
}

pub const MODEL_FILES: &[ModelFile] = &[
    ModelFile {
        name: "model.onnx",
        remote: "onnx/model.onnx",
    },
    ModelFile {
        name: "tokenizer.json",
        remote: "tokenizer.json",
    },
];

/// Name of the first required file missing from `model_dir`, if any.
#[must_use]
pub fn first_missing_file(model_dir: &Path) -> Option<&'static str> {
    MODEL_FILES
        .iter()
        .find(|f| !model_dir.join(f.name).is_file())
        .map(|f| f.name)
}

#[must_use]
pub fn all_files_present(model_dir: &Path) -> bool {
    first_missing_file(model_dir).is_none()
}

/// Download URL of one repository file.
#[must_use]
pub fn file_url(kind: ModelKind, remote: &str) -> String {
    format!("{HF_BASE}/{}/resolve/main/{remote}", kind.hf_repo())
}

/// Fetch whichever model files are missing from `model_dir`, creating it if
/// needed.
///
/// Each file is written to its own temporary file in `model_dir` and renamed
/// into place once complete; a failed fetch leaves nothing behind.
pub fn download_missing(kind: ModelKind, model_dir: &Path, fetch: &Fetch) -> Result<()> {
    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create {}", model_dir.display()))?;

    let pending: Vec<&ModelFile> = MODEL_FILES
        .iter()
        .filter(|f| !model_dir.join(f.name).is_file())
        .collect();
    if pending.is_empty() {
        debug!(model = %kind, "model files already present");
        return Ok(());
    }

    info!(model = %kind, repo = kind.hf_repo(), dir = %model_dir.display(), "Downloading model");
    for file in pending {
        let mut tmp = NamedTempFile::new_in(model_dir).with_context(|| {
            format!("failed to create a temporary file in {}", model_dir.display())
        })?;
        fetch(&file_url(kind, file.remote), tmp.as_file_mut())
            .with_context(|| format!("failed to download {}", file.name))?;
        tmp.as_file()
            .sync_all()
            .context("failed to flush download")?;
        tmp.persist(model_dir.join(file.name))
            .with_context(|| format!("failed to move {} into place", file.name))?;
        info!(model = %kind, file = file.name, "Downloaded");
    }
    Ok(())
}

fn progress_bar(total: Option<u64>, label: String, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let Some(total) = total.filter(|&n| n > 0) else {
        return ProgressBar::new_spinner().with_message(label);
    };
    let style = ProgressStyle::default_bar()
        .template("  {msg} {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
    ProgressBar::new(total).with_style(style).with_message(label)
}

/// Stream `url` over HTTP into `out`. The progress bar only shows when
/// `RUSTEMBED_LOG` is set.
pub fn http_fetch(url: &str, out: &mut dyn Write) -> Result<()> {
    let mut resp =
        reqwest::blocking::get(url).with_context(|| format!("HTTP request failed: {url}"))?;
    anyhow::ensure!(
        resp.status().is_success(),
        "HTTP {} for {url}",
        resp.status()
    );

    let label = url.rsplit('/').next().unwrap_or(url).to_string();
    let pb = progress_bar(resp.content_length(), label, logging::enabled());
    let copied = io::copy(&mut resp, &mut pb.wrap_write(out));
    pb.finish_and_clear();
    copied.context("download interrupted")?;
    Ok(())
}
