//! C-ABI wrapper around `reqbatch-core`.
//!
//! # Overview
//! Exposes batch execution through `extern "C"` functions so any language
//! with a C FFI can run many HTTP requests concurrently with one call. The
//! whole batch goes in as one JSON array and comes back as one JSON array,
//! element for element.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Call-level failures (null argument, payload that is not an array) come
//!   back as `{"error": "..."}` instead of a result array. Per-request
//!   failures are `{"error": "..."}` elements inside the array.
//! - `reqbatch_process` is one-shot. Callers running many batches should
//!   hold an executor from `reqbatch_executor_new` to reuse its connection
//!   pool and runtime.
//! - The C caller owns all returned pointers and must call the matching
//!   `reqbatch_*_free` function to release them.

pub mod types;

use std::ffi::CString;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use reqbatch_core::{logging, BlockingExecutor, ExecutorConfig};

use types::*;

// ---------------------------------------------------------------------------
// One-shot
// ---------------------------------------------------------------------------

/// Execute a JSON request batch with the default configuration.
///
/// `payload` is a JSON array of `{"method", "uri", "headers", "body"}`
/// objects. Returns a JSON array of results in the same order, or an
/// `{"error": ...}` object if the batch could not be attempted. Never returns
/// null. The caller must free the result with `reqbatch_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn reqbatch_process(payload: *const c_char) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| {
        let payload = match unsafe { read_str(payload, "payload") } {
            Ok(p) => p,
            Err(msg) => return error_payload(&msg),
        };
        let executor = match BlockingExecutor::new(ExecutorConfig::default()) {
            Ok(e) => e,
            Err(err) => return batch_payload(Err(err)),
        };
        batch_payload(executor.process(payload))
    }))
    .unwrap_or_else(|_| error_payload("internal panic"))
}

// ---------------------------------------------------------------------------
// Executor lifecycle
// ---------------------------------------------------------------------------

/// Create an executor from a JSON configuration object.
///
/// `config_json` may be null for defaults. Recognised keys: `max_in_flight`,
/// `request_timeout_ms`, `connect_timeout_ms`, `batch_deadline_ms`,
/// `accept_invalid_certs`, `follow_redirects`, `max_redirects`,
/// `echo_request`, `user_agent`, `worker_threads`.
/// Returns null if the configuration is invalid or the transport cannot be
/// built. The caller must free the handle with `reqbatch_executor_free`.
#[unsafe(no_mangle)]
pub extern "C" fn reqbatch_executor_new(config_json: *const c_char) -> *mut FfiExecutor {
    catch_unwind(AssertUnwindSafe(|| {
        let config = if config_json.is_null() {
            ExecutorConfig::default()
        } else {
            let parsed = unsafe { read_str(config_json, "config_json") }
                .map_err(reqbatch_core::BatchError::Config)
                .and_then(ExecutorConfig::from_json);
            match parsed {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(%err, "rejected executor configuration");
                    return std::ptr::null_mut();
                }
            }
        };
        match BlockingExecutor::new(config) {
            Ok(inner) => Box::into_raw(Box::new(FfiExecutor { inner })),
            Err(err) => {
                tracing::warn!(%err, "could not create executor");
                std::ptr::null_mut()
            }
        }
    }))
    .unwrap_or(std::ptr::null_mut())
}

/// Execute a JSON request batch on an existing executor.
///
/// Same payload and result contract as `reqbatch_process`. Blocks until every
/// request in the batch has completed, failed or timed out.
#[unsafe(no_mangle)]
pub extern "C" fn reqbatch_executor_process(
    executor: *const FfiExecutor,
    payload: *const c_char,
) -> *mut c_char {
    catch_unwind(AssertUnwindSafe(|| {
        if executor.is_null() {
            return error_payload("null argument: executor");
        }
        let executor = unsafe { &*executor };
        let payload = match unsafe { read_str(payload, "payload") } {
            Ok(p) => p,
            Err(msg) => return error_payload(&msg),
        };
        batch_payload(executor.inner.process(payload))
    }))
    .unwrap_or_else(|_| error_payload("internal panic"))
}

/// Free an executor created by `reqbatch_executor_new`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn reqbatch_executor_free(executor: *mut FfiExecutor) {
    if !executor.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(executor) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

/// Install the stderr log subscriber, filtered by `RUST_LOG`. Idempotent.
#[unsafe(no_mangle)]
pub extern "C" fn reqbatch_init_logging() {
    let _ = catch_unwind(logging::init);
}

/// Free a string returned by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn reqbatch_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { CString::from_raw(s) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    /// Copy a returned string into Rust and free it.
    fn take(ptr: *mut c_char) -> serde_json::Value {
        assert!(!ptr.is_null());
        let s = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        reqbatch_free_string(ptr);
        serde_json::from_str(&s).unwrap()
    }

    fn spawn_server() -> String {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
                mock_server::run(listener).await
            })
            .unwrap();
        });

        format!("http://{addr}")
    }

    #[test]
    fn process_null_payload_returns_error() {
        let out = take(reqbatch_process(std::ptr::null()));
        assert_eq!(out["error"], "null argument: payload");
    }

    #[test]
    fn process_empty_batch() {
        let payload = CString::new("[]").unwrap();
        let out = take(reqbatch_process(payload.as_ptr()));
        assert_eq!(out, serde_json::json!([]));
    }

    #[test]
    fn process_non_array_is_call_level_error() {
        let payload = CString::new(r#"{"method":"GET"}"#).unwrap();
        let out = take(reqbatch_process(payload.as_ptr()));
        assert!(out["error"].as_str().unwrap().starts_with("Error: malformed batch payload"));
    }

    #[test]
    fn process_invalid_entry_is_isolated() {
        let payload = CString::new(r#"[{"method":"GET","uri":"nope"}, 5]"#).unwrap();
        let out = take(reqbatch_process(payload.as_ptr()));
        let results = out.as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0]["error"].as_str().unwrap().contains("cannot parse uri"));
        assert!(results[1]["error"].as_str().unwrap().contains("malformed entry"));
    }

    #[test]
    fn executor_new_with_null_config_uses_defaults() {
        let exec = reqbatch_executor_new(std::ptr::null());
        assert!(!exec.is_null());
        let max = unsafe { &*exec }.inner.executor().config().max_in_flight;
        assert_eq!(max, ExecutorConfig::default().max_in_flight);
        reqbatch_executor_free(exec);
    }

    #[test]
    fn executor_new_reads_config() {
        let config = CString::new(r#"{"max_in_flight":2,"request_timeout_ms":500}"#).unwrap();
        let exec = reqbatch_executor_new(config.as_ptr());
        assert!(!exec.is_null());
        let cfg = unsafe { &*exec }.inner.executor().config().clone();
        assert_eq!(cfg.max_in_flight, 2);
        assert_eq!(cfg.request_timeout.as_millis(), 500);
        reqbatch_executor_free(exec);
    }

    #[test]
    fn executor_new_invalid_config_returns_null() {
        for bad in [
            r#"{"max_in_flight":0}"#,
            r#"{"max_in_flight":18446744073709551615}"#,
            "not json",
            r#"{"unknown":1}"#,
        ] {
            let config = CString::new(bad).unwrap();
            assert!(reqbatch_executor_new(config.as_ptr()).is_null(), "{bad}");
        }
    }

    #[test]
    fn executor_process_null_executor() {
        let payload = CString::new("[]").unwrap();
        let out = take(reqbatch_executor_process(std::ptr::null(), payload.as_ptr()));
        assert_eq!(out["error"], "null argument: executor");
    }

    #[test]
    fn executor_process_null_payload() {
        let exec = reqbatch_executor_new(std::ptr::null());
        let out = take(reqbatch_executor_process(exec, std::ptr::null()));
        assert_eq!(out["error"], "null argument: payload");
        reqbatch_executor_free(exec);
    }

    #[test]
    fn executor_process_against_mock_server() {
        let base = spawn_server();
        let exec = reqbatch_executor_new(std::ptr::null());
        let payload = serde_json::json!([
            {"method": "GET", "uri": format!("{base}/status/200"), "headers": {}, "body": null},
            {"method": "POST", "uri": format!("{base}/echo"), "headers": {"X-Id": ["7"]}, "body": "ping"},
            {"method": "GET", "uri": format!("{base}/status/404")}
        ])
        .to_string();
        let payload = CString::new(payload).unwrap();

        // Two batches on one handle.
        for _ in 0..2 {
            let out = take(reqbatch_executor_process(exec, payload.as_ptr()));
            let results = out.as_array().unwrap();
            assert_eq!(results.len(), 3);
            assert_eq!(results[0]["status"], 200);
            assert_eq!(results[1]["status"], 200);
            let echo: mock_server::Echo =
                serde_json::from_str(results[1]["body"].as_str().unwrap()).unwrap();
            assert_eq!(echo.body, "ping");
            assert_eq!(echo.headers["x-id"], vec!["7"]);
            assert_eq!(results[2]["status"], 404);
        }

        reqbatch_executor_free(exec);
    }

    #[test]
    fn init_logging_twice_is_safe() {
        reqbatch_init_logging();
        reqbatch_init_logging();
    }

    #[test]
    fn free_executor_null_is_safe() {
        reqbatch_executor_free(std::ptr::null_mut());
    }

    #[test]
    fn free_string_null_is_safe() {
        reqbatch_free_string(std::ptr::null_mut());
    }
}
