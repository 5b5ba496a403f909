//! # rustembed: text embeddings over a C ABI
//!
//! Loads a sentence-embedding model behind an opaque handle and fills
//! caller-owned `float` buffers with its vectors, one text at a time or in
//! batches. Failures come back as status codes, with a per-handle message the
//! caller takes ownership of.
//!
//! ## Architecture
//!
//! - **[`ffi`]** - the `embedder_*` C entry points and argument validation
//! - **[`registry`]** - generation-checked handle table owning the models
//! - **[`error_channel`]** - per-handle last-error record and owned messages
//! - **[`engine`]** - single-text validation and embedding
//! - **[`batch`]** - ordered batch embedding into one flattened buffer
//! - **[`embedder`]** - model capability: catalog, loaders, ONNX and mock backends
//! - **[`config`]** - JSON configuration and environment overrides
//! - **[`logging`]** - opt-in `tracing` output for host processes

pub mod batch;
pub mod config;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod error_channel;
pub mod ffi;
pub mod logging;
pub mod registry;

pub use error::{BoundaryError, EmbedderStatus};
pub use ffi::{
    embedder_dimension, embedder_embed, embedder_embed_batch, embedder_free, embedder_free_error,
    embedder_get_last_error, embedder_init, embedder_version,
};
pub use registry::{EmbedderHandle, Registry, install_model_loader};
