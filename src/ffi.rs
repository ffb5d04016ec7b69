//! C ABI for managed-runtime callers
//!
//! Flat functions over one process-wide session registry, loadable through
//! JNA, P/Invoke, or ctypes. No fault crosses this boundary: failures come
//! back as a `0` handle or as a string carrying the `Error: ` prefix.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::BridgeError;
use crate::inference::generate::GenerationParams;
use crate::inference::session::{Session, SessionConfig};
use crate::registry::HandleRegistry;

/// Prefix carried by every error string returned across the boundary;
/// callers test for it to tell failures from generated text.
pub const ERROR_PREFIX: &str = "Error: ";

static REGISTRY: OnceLock<HandleRegistry<Session>> = OnceLock::new();

fn registry() -> &'static HandleRegistry<Session> {
    REGISTRY.get_or_init(HandleRegistry::new)
}

/// Installs the tracing subscriber once, honoring `RUST_LOG`.
///
/// Best-effort: if the host process already installed one, it stays.
fn init_tracing() {
    static TRACING: OnceLock<()> = OnceLock::new();
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .try_init();
    });
}

/// Owned UTF-8 copy of a C string; `None` for null pointers. Invalid UTF-8
/// is converted lossily rather than rejected.
fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let cstr = unsafe { CStr::from_ptr(ptr) };
    Some(cstr.to_string_lossy().into_owned())
}

/// Heap-allocates a NUL-terminated copy of `text`; ownership passes to the
/// caller, who releases it with [`llama_bridge_free_string`].
fn into_c_string(text: String) -> *mut c_char {
    let mut bytes = text.into_bytes();
    // C strings end at the first NUL; cut there rather than fail.
    if let Some(i) = bytes.iter().position(|&b| b == 0) {
        bytes.truncate(i);
    }
    match CString::new(bytes) {
        Ok(s) => s.into_raw(),
        Err(_) => CString::default().into_raw(),
    }
}

fn error_cstring(err: &BridgeError) -> *mut c_char {
    into_c_string(format!("{ERROR_PREFIX}{err}"))
}

/// Loads a GGUF model and returns an opaque handle for it, or `0` on any
/// failure. `context_size <= 0` selects the default window; `threads`
/// follows the `-1` auto-detect convention.
#[no_mangle]
pub extern "C" fn llama_bridge_load_model(
    model_path: *const c_char,
    context_size: i32,
    threads: i32,
) -> i64 {
    init_tracing();
    let Some(path) = cstr_to_string(model_path) else {
        return 0;
    };
    catch_unwind(AssertUnwindSafe(|| {
        match registry().load(SessionConfig::new(path, context_size, threads)) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("model load failed: {}", e);
                0
            }
        }
    }))
    .unwrap_or(0)
}

/// Generates text for `prompt` on the session behind `handle`.
///
/// Always returns a heap-allocated NUL-terminated string, to be released
/// with [`llama_bridge_free_string`]; failures carry the `Error: ` prefix.
/// `temperature`, `top_p`, and `top_k` are accepted for signature stability
/// but decoding is greedy.
#[no_mangle]
pub extern "C" fn llama_bridge_generate_text(
    handle: i64,
    prompt: *const c_char,
    max_tokens: i32,
    temperature: f32,
    top_p: f32,
    top_k: i32,
) -> *mut c_char {
    init_tracing();
    let Some(prompt) = cstr_to_string(prompt) else {
        return into_c_string(format!("{ERROR_PREFIX}Invalid parameters"));
    };
    let params = GenerationParams {
        max_tokens,
        temperature,
        top_p,
        top_k,
    };
    catch_unwind(AssertUnwindSafe(|| {
        match registry().generate(handle, &prompt, &params) {
            Ok(text) => into_c_string(text),
            Err(e) => {
                tracing::warn!("generation failed on handle {}: {}", handle, e);
                error_cstring(&e)
            }
        }
    }))
    .unwrap_or_else(|_| into_c_string(format!("{ERROR_PREFIX}Exception during text generation")))
}

/// Returns the fixed-format metadata report for the session behind
/// `handle`, or an `Error: `-prefixed message. Release the result with
/// [`llama_bridge_free_string`].
#[no_mangle]
pub extern "C" fn llama_bridge_model_info(handle: i64) -> *mut c_char {
    init_tracing();
    catch_unwind(AssertUnwindSafe(|| match registry().describe(handle) {
        Ok(info) => into_c_string(info),
        Err(BridgeError::UnknownHandle(_)) => {
            into_c_string(format!("{ERROR_PREFIX}No model loaded for this handle"))
        }
        Err(e) => error_cstring(&e),
    }))
    .unwrap_or_else(|_| into_c_string(format!("{ERROR_PREFIX}Exception getting model info")))
}

/// Releases the session behind `handle`. Unknown, zero, and already
/// released handles are ignored, so finalizers may call this freely.
#[no_mangle]
pub extern "C" fn llama_bridge_cleanup(handle: i64) {
    init_tracing();
    let _ = catch_unwind(AssertUnwindSafe(|| registry().cleanup(handle)));
}

/// # Safety
/// `ptr` must be null or a pointer previously returned by
/// [`llama_bridge_generate_text`] or [`llama_bridge_model_info`], and must
/// not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn llama_bridge_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    let _ = CString::from_raw(ptr);
}
