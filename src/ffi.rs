//! The C entry points.
//!
//! C callers include `include/rustembed.h`, which declares the signatures
//! below (`EmbedderHandle` is `uint64_t`, `EmbedderStatus` is an `int`-sized
//! enum):
//!
//! ```c
//! EmbedderHandle embedder_init(const char* model_name);
//! EmbedderStatus embedder_embed(EmbedderHandle h, const char* text,
//!                               float* out, size_t capacity, size_t* actual_dimension);
//! EmbedderStatus embedder_embed_batch(EmbedderHandle h, const char* const* texts, size_t count,
//!                                     float* out, size_t capacity,
//!                                     size_t* dimension, size_t* total_written);
//! char*          embedder_get_last_error(EmbedderHandle h);
//! void           embedder_free_error(char* message);
//! void           embedder_free(EmbedderHandle h);
//! const char*    embedder_version(void);
//! size_t         embedder_dimension(EmbedderHandle h);
//! ```
//!
//! Arguments are checked in a fixed order: handle, null pointers, text
//! encoding, buffer capacity, then the model runs. Any failure after the
//! handle check is recorded on the handle for `embedder_get_last_error`.
//! Output buffers are written only when the whole call succeeds.
use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::{ptr, slice};

use tracing::{debug, error, warn};

use crate::batch::embed_many;
use crate::embedder::Embedder;
use crate::engine::{decode_text, embed_one, ensure_capacity};
use crate::error::{BoundaryError, EmbedderStatus};
use crate::error_channel::OwnedMessage;
use crate::logging;
use crate::registry::{EmbedderHandle, Registry};

const VERSION: &CStr =
    match CStr::from_bytes_with_nul(concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes()) {
        Ok(version) => version,
        Err(_) => panic!("package version contains a NUL byte"),
    };

/// Keep panics from unwinding into the caller.
fn guard<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!("panic caught at the C boundary");
        fallback
    })
}

fn with_entry(
    handle: EmbedderHandle,
    op: impl FnOnce(&dyn Embedder) -> Result<(), BoundaryError>,
) -> EmbedderStatus {
    guard(EmbedderStatus::EmbeddingFailed, || {
        match Registry::global().lookup(handle) {
            Ok(entry) => entry.run(op).into(),
            Err(err) => {
                debug!(handle = handle.as_raw(), "{err}");
                err.status()
            }
        }
    })
}

fn require<T>(ptr: *const T, what: &str) -> Result<(), BoundaryError> {
    if ptr.is_null() {
        return Err(BoundaryError::NullPointer(what.to_string()));
    }
    Ok(())
}

/// Create an embedder for `model_name` (`"mini_lm_v2"` or `"jina"`).
///
/// Returns the null handle (0) on failure; set `RUSTEMBED_LOG` to see why.
///
/// # Safety
/// `model_name` must be null or a valid NUL-terminated string. The returned
/// handle must be released with [`embedder_free`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn embedder_init(model_name: *const c_char) -> EmbedderHandle {
    logging::init();
    guard(EmbedderHandle::NULL, || {
        let name = match unsafe { decode_text(model_name, "model_name") } {
            Ok(name) => name,
            Err(err) => {
                warn!("embedder_init rejected: {err}");
                return EmbedderHandle::NULL;
            }
        };
        match Registry::global().init(name) {
            Ok(handle) => handle,
            Err(err) => {
                error!("{err}");
                EmbedderHandle::NULL
            }
        }
    })
}

/// Embed one text into `output_buffer`.
///
/// `*actual_dimension` receives the model's native dimension whenever the
/// handle is valid and the pointer is non-null, including on
/// `BufferTooSmall`.
///
/// # Safety
/// `text` must be null or a valid NUL-terminated string; `output_buffer` must
/// be null or valid for `buffer_capacity` writes of `f32`; `actual_dimension`
/// must be null or valid for one write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn embedder_embed(
    handle: EmbedderHandle,
    text: *const c_char,
    output_buffer: *mut f32,
    buffer_capacity: usize,
    actual_dimension: *mut usize,
) -> EmbedderStatus {
    with_entry(handle, |model| unsafe {
        embed_into(model, text, output_buffer, buffer_capacity, actual_dimension)
    })
}

unsafe fn embed_into(
    model: &dyn Embedder,
    text: *const c_char,
    output_buffer: *mut f32,
    buffer_capacity: usize,
    actual_dimension: *mut usize,
) -> Result<(), BoundaryError> {
    let dimension = model.dimensions();
    if !actual_dimension.is_null() {
        unsafe { actual_dimension.write(dimension) };
    }

    require(text, "text")?;
    require(output_buffer.cast_const(), "output_buffer")?;
    require(actual_dimension.cast_const(), "actual_dimension")?;

    let text = unsafe { decode_text(text, "text") }?;
    ensure_capacity(dimension, buffer_capacity)?;

    let vector = embed_one(model, text)?;
    unsafe { slice::from_raw_parts_mut(output_buffer, vector.len()) }.copy_from_slice(&vector);
    Ok(())
}

/// Embed `count` texts into one flattened buffer.
///
/// On success `output_buffer[i * dim + j]` is coordinate `j` of text `i` and
/// `*total_written == count * dim`. On failure nothing is written to
/// `output_buffer` and `*total_written` is 0.
///
/// # Safety
/// `texts` must be null or point to `count` pointers, each null or a valid
/// NUL-terminated string; `output_buffer` must be null or valid for
/// `buffer_capacity` writes of `f32`; `dimension` and `total_written` must be
/// null or valid for one write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn embedder_embed_batch(
    handle: EmbedderHandle,
    texts: *const *const c_char,
    count: usize,
    output_buffer: *mut f32,
    buffer_capacity: usize,
    dimension: *mut usize,
    total_written: *mut usize,
) -> EmbedderStatus {
    with_entry(handle, |model| unsafe {
        embed_batch_into(
            model,
            texts,
            count,
            output_buffer,
            buffer_capacity,
            dimension,
            total_written,
        )
    })
}

unsafe fn embed_batch_into(
    model: &dyn Embedder,
    texts: *const *const c_char,
    count: usize,
    output_buffer: *mut f32,
    buffer_capacity: usize,
    dimension: *mut usize,
    total_written: *mut usize,
) -> Result<(), BoundaryError> {
    if !dimension.is_null() {
        unsafe { dimension.write(model.dimensions()) };
    }
    if !total_written.is_null() {
        unsafe { total_written.write(0) };
    }

    require(texts, "texts")?;
    require(output_buffer.cast_const(), "output_buffer")?;
    require(dimension.cast_const(), "dimension")?;
    require(total_written.cast_const(), "total_written")?;

    let ptrs: &[*const c_char] = if count == 0 {
        &[]
    } else {
        unsafe { slice::from_raw_parts(texts, count) }
    };
    if let Some(i) = ptrs.iter().position(|p| p.is_null()) {
        return Err(BoundaryError::NullPointer(format!("texts[{i}]")));
    }

    let inputs = ptrs
        .iter()
        .enumerate()
        .map(|(i, &p)| unsafe { decode_text(p, &format!("texts[{i}]")) })
        .collect::<Result<Vec<&str>, _>>()?;

    let batch = embed_many(model, &inputs, buffer_capacity)?;
    if !batch.values.is_empty() {
        unsafe { slice::from_raw_parts_mut(output_buffer, batch.values.len()) }
            .copy_from_slice(&batch.values);
    }
    unsafe { total_written.write(batch.values.len()) };
    Ok(())
}

/// Take the handle's pending error message.
///
/// Returns null if no error is pending or the handle is invalid. A non-null
/// result belongs to the caller and must be released with
/// [`embedder_free_error`] exactly once.
#[unsafe(no_mangle)]
pub extern "C" fn embedder_get_last_error(handle: EmbedderHandle) -> *mut c_char {
    guard(ptr::null_mut(), || match Registry::global().lookup(handle) {
        Ok(entry) => OwnedMessage::into_raw_or_null(entry.take_error()),
        Err(_) => ptr::null_mut(),
    })
}

/// Release a message returned by [`embedder_get_last_error`]. Null is ignored.
///
/// # Safety
/// `message` must be null or a pointer from `embedder_get_last_error` that
/// has not been released yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn embedder_free_error(message: *mut c_char) {
    drop(unsafe { OwnedMessage::from_raw(message) });
}

/// Release a handle and its model. Invalid handles are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn embedder_free(handle: EmbedderHandle) {
    guard((), || {
        Registry::global().free(handle);
    });
}

/// Library version. Static; never free it.
#[unsafe(no_mangle)]
pub extern "C" fn embedder_version() -> *const c_char {
    VERSION.as_ptr()
}

/// Native embedding dimension of a live handle, or 0 for an invalid one.
#[unsafe(no_mangle)]
pub extern "C" fn embedder_dimension(handle: EmbedderHandle) -> usize {
    guard(0, || {
        Registry::global()
            .lookup(handle)
            .map_or(0, |entry| entry.dimensions())
    })
}
