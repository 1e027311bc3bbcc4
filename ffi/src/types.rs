//! Handle type and string helpers for the FFI boundary.
//!
//! # Design
//! Everything crossing the boundary is a NUL-terminated UTF-8 string holding
//! JSON, so the only non-string type C sees is the opaque executor handle.
//! Strings returned to C are allocated with `CString::into_raw` and must come
//! back through `reqbatch_free_string`.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use reqbatch_core::{BatchError, BlockingExecutor};

/// Opaque handle to a long-lived executor. C callers receive a pointer to
/// this from `reqbatch_executor_new` and pass it back to
/// `reqbatch_executor_process`.
pub struct FfiExecutor {
    pub(crate) inner: BlockingExecutor,
}

/// Borrow a C string as `&str`. `name` is used in the error message.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives the
/// returned reference.
pub(crate) unsafe fn read_str<'a>(ptr: *const c_char, name: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("null argument: {name}"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| format!("{name} is not valid UTF-8: {e}"))
}

/// Hand an owned string to C. JSON output never contains interior NULs;
/// anything else that does is replaced by an error payload.
pub(crate) fn into_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(c) => c.into_raw(),
        Err(_) => error_payload("result contained a NUL byte"),
    }
}

/// `{"error": "<message>"}` as an owned C string.
pub(crate) fn error_payload(message: &str) -> *mut c_char {
    let body = serde_json::json!({ "error": message }).to_string();
    CString::new(body).unwrap_or_default().into_raw()
}

/// Render a call-level result: the encoded result batch or an error payload.
pub(crate) fn batch_payload(result: Result<String, BatchError>) -> *mut c_char {
    match result {
        Ok(json) => into_c_string(json),
        Err(err) => {
            tracing::warn!(%err, "batch call failed");
            error_payload(&format!("Error: {err}"))
        }
    }
}
