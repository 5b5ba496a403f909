//! Per-handle error record and the owned C string handed to callers.
use std::ffi::CString;
use std::os::raw::c_char;
use std::ptr;

/// The most recent failure message of one handle.
#[derive(Debug, Default)]
pub struct ErrorRecord {
    pending: Option<String>,
}

impl ErrorRecord {
    /// Store `message`, dropping any message nobody retrieved.
    pub fn record(&mut self, message: impl Into<String>) {
        self.pending = Some(message.into());
    }

    /// Hand the pending message over to the caller.
    pub fn take(&mut self) -> Option<OwnedMessage> {
        self.pending.take().map(OwnedMessage::new)
    }
}

/// A NUL-terminated message with exactly one owner.
///
/// Ownership leaves Rust through [`OwnedMessage::into_raw`] and comes back
/// through [`OwnedMessage::from_raw`]; the two must pair up one to one.
#[derive(Debug)]
pub struct OwnedMessage(CString);

impl OwnedMessage {
    /// Interior NUL bytes are escaped as `\0` so nothing is truncated.
    #[must_use]
    pub fn new(message: String) -> Self {
        let bytes = if message.contains('\0') {
            message.replace('\0', "\\0").into_bytes()
        } else {
            message.into_bytes()
        };
        // No NUL bytes remain, so this cannot fail.
        Self(CString::new(bytes).unwrap_or_default())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.to_str().unwrap_or_default()
    }

    /// Give up ownership; the pointer must be passed to
    /// `embedder_free_error` exactly once.
    #[must_use]
    pub fn into_raw(self) -> *mut c_char {
        self.0.into_raw()
    }

    /// Reclaim a pointer produced by [`OwnedMessage::into_raw`].
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` and must not have been reclaimed before.
    pub unsafe fn from_raw(ptr: *mut c_char) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        Some(Self(unsafe { CString::from_raw(ptr) }))
    }

    /// Null when there is no message.
    #[must_use]
    pub fn into_raw_or_null(message: Option<Self>) -> *mut c_char {
        message.map_or(ptr::null_mut(), Self::into_raw)
    }
}
