//! Single-text embedding: text validation and delegation to the model.
use std::ffi::CStr;
use std::os::raw::c_char;

use crate::embedder::Embedder;
use crate::error::BoundaryError;

/// Borrow a caller-supplied C string as UTF-8.
///
/// Null and non-UTF-8 input are rejected before anything else sees the text.
///
/// # Safety
/// A non-null `ptr` must point to a NUL-terminated string that stays valid and
/// unmodified for `'a`.
pub unsafe fn decode_text<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, BoundaryError> {
    if ptr.is_null() {
        return Err(BoundaryError::NullPointer(what.to_string()));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|source| BoundaryError::InvalidEncoding {
            what: what.to_string(),
            source,
        })
}

/// Embed one validated text, checking the vector has the model's dimension.
pub fn embed_one(model: &dyn Embedder, text: &str) -> Result<Vec<f32>, BoundaryError> {
    let vector = model.embed(text)?;
    let expected = model.dimensions();
    if vector.len() != expected {
        return Err(BoundaryError::EmbeddingFailed(format!(
            "model returned {} values, expected {expected}",
            vector.len()
        )));
    }
    Ok(vector)
}

/// Fail with `BufferTooSmall` unless `capacity` holds `required` floats.
pub fn ensure_capacity(required: usize, capacity: usize) -> Result<(), BoundaryError> {
    if required > capacity {
        return Err(BoundaryError::BufferTooSmall { required, capacity });
    }
    Ok(())
}
