//! FFI bindings for Proctor Flux
//!
//! This module provides C-compatible functions for driving a proctoring session
//! from other languages. All functions use C strings (null-terminated) and
//! return allocated memory that must be freed by the caller using
//! `proctor_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::ProctorConfig;
use crate::error::ProctorError;
use crate::pipeline::{replay_ndjson, ReplayProcessor};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Join already-encoded JSON records into one JSON array
fn vec_to_json_array(vec: Vec<String>) -> String {
    format!("[{}]", vec.join(","))
}

/// NULL or empty means the default configuration
unsafe fn config_from_ptr(config_json: *const c_char) -> Result<ProctorConfig, ProctorError> {
    match cstr_to_string(config_json) {
        Some(json) if !json.trim().is_empty() => ProctorConfig::from_json(&json),
        _ => Ok(ProctorConfig::default()),
    }
}

fn records_or_null(result: Result<Vec<String>, ProctorError>) -> *mut c_char {
    match result {
        Ok(records) => string_to_cstr(&vec_to_json_array(records)),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Replay NDJSON input records and return a JSON array of output records.
///
/// # Safety
/// - `config_json` must be NULL or a valid null-terminated C string.
/// - `session_id` and `ndjson` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `proctor_free_string`.
/// - Returns NULL on error; call `proctor_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn proctor_replay_ndjson(
    config_json: *const c_char,
    session_id: *const c_char,
    ndjson: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let config = match config_from_ptr(config_json) {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let Some(session_id) = cstr_to_string(session_id) else {
        set_last_error("Invalid session_id string pointer");
        return ptr::null_mut();
    };

    let Some(ndjson) = cstr_to_string(ndjson) else {
        set_last_error("Invalid NDJSON string pointer");
        return ptr::null_mut();
    };

    records_or_null(replay_ndjson(&ndjson, config, &session_id))
}

// ============================================================================
// Session API
// ============================================================================

/// Opaque handle to a replaying session
pub struct ProctorSessionHandle {
    processor: ReplayProcessor,
}

/// Create a session.
///
/// # Safety
/// - `config_json` must be NULL (defaults) or a valid null-terminated C string.
/// - `session_id` must be a valid null-terminated C string.
/// - Returns a pointer that must be freed with `proctor_session_free`.
/// - Returns NULL on error; call `proctor_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn proctor_session_new(
    config_json: *const c_char,
    session_id: *const c_char,
) -> *mut ProctorSessionHandle {
    clear_last_error();

    let config = match config_from_ptr(config_json) {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let Some(session_id) = cstr_to_string(session_id) else {
        set_last_error("Invalid session_id string pointer");
        return ptr::null_mut();
    };

    match ReplayProcessor::new(config, &session_id) {
        Ok(processor) => Box::into_raw(Box::new(ProctorSessionHandle { processor })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Push one input record and return the output records it produced.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `proctor_session_new`.
/// - `record_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `proctor_free_string`.
/// - Returns NULL on error; call `proctor_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn proctor_session_push(
    handle: *mut ProctorSessionHandle,
    record_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    let handle = &mut *handle;

    let Some(record) = cstr_to_string(record_json) else {
        set_last_error("Invalid record string pointer");
        return ptr::null_mut();
    };

    records_or_null(handle.processor.push_json(&record))
}

/// Stop the session, flush evidence, and return any final output records.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `proctor_session_new`.
/// - Returns a newly allocated string that must be freed with `proctor_free_string`.
/// - Returns NULL on error; call `proctor_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn proctor_session_stop(handle: *mut ProctorSessionHandle) -> *mut c_char {
    clear_last_error();

    if handle.is_null() {
        set_last_error("Null session pointer");
        return ptr::null_mut();
    }
    let handle = &mut *handle;

    records_or_null(handle.processor.finish())
}

/// Free a session.
///
/// # Safety
/// - `handle` must be a valid pointer returned by `proctor_session_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn proctor_session_free(handle: *mut ProctorSessionHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Proctor functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Proctor function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn proctor_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Proctor function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn proctor_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn proctor_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        proctor_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_session_lifecycle() {
        let session_id = CString::new("exam-ffi").unwrap();
        let chunk = CString::new(
            r#"{"type":"chunk","timestamp":"2024-03-01T09:00:01Z","data":[7,8]}"#,
        )
        .unwrap();
        let error = CString::new(
            r#"{"type":"device_error","timestamp":"2024-03-01T09:00:02Z","modality":"audio","message":"muted"}"#,
        )
        .unwrap();

        unsafe {
            let handle = proctor_session_new(ptr::null(), session_id.as_ptr());
            assert!(!handle.is_null());

            let first = take_string(proctor_session_push(handle, chunk.as_ptr()));
            assert_eq!(first, "[]");

            let second = take_string(proctor_session_push(handle, error.as_ptr()));
            let records: serde_json::Value = serde_json::from_str(&second).unwrap();
            let records = records.as_array().unwrap();
            assert!(records.iter().any(|r| r["kind"] == "device_error"));
            assert!(records
                .iter()
                .any(|r| r["kind"] == "flag" && r["type"] == "device_error"));

            let last = take_string(proctor_session_stop(handle));
            assert!(last.starts_with('['));

            proctor_session_free(handle);
        }
    }

    #[test]
    fn test_ffi_replay_ndjson() {
        let session_id = CString::new("exam-ffi").unwrap();
        let ndjson = CString::new(
            r#"{"type":"vision","timestamp":"2024-03-01T09:00:00Z","face_count":1}"#,
        )
        .unwrap();

        unsafe {
            let result = take_string(proctor_replay_ndjson(
                ptr::null(),
                session_id.as_ptr(),
                ndjson.as_ptr(),
            ));
            assert!(result.starts_with('['));
            assert!(result.contains("proctor.signal.v1"));
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let config = CString::new("not json").unwrap();
        let session_id = CString::new("exam-ffi").unwrap();

        unsafe {
            let handle = proctor_session_new(config.as_ptr(), session_id.as_ptr());
            assert!(handle.is_null());

            let error = proctor_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());

            let result = proctor_session_push(ptr::null_mut(), session_id.as_ptr());
            assert!(result.is_null());
            let error_str = CStr::from_ptr(proctor_last_error()).to_str().unwrap();
            assert_eq!(error_str, "Null session pointer");
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = proctor_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
