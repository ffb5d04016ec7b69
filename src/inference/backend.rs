//! llama.cpp backend lifetime
//!
//! The backend can only be initialized once per process, so it lives in a
//! `OnceLock` and is never torn down. Engine-side logging is silenced; the
//! bridge reports its own events through `tracing`.

use std::sync::OnceLock;

use llama_cpp_2::llama_backend::LlamaBackend;

use crate::error::BridgeError;

/// Global llama.cpp backend (can only be initialized once)
static BACKEND: OnceLock<Result<LlamaBackend, String>> = OnceLock::new();

/// Get or initialize the global llama.cpp backend.
///
/// A failed initialization is sticky: every later call reports the same
/// error without retrying.
pub fn get_backend() -> Result<&'static LlamaBackend, BridgeError> {
    let result = BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        backend.void_logs();
        tracing::info!("llama.cpp backend initialized");
        Ok(backend)
    });
    match result {
        Ok(backend) => Ok(backend),
        Err(e) => Err(BridgeError::BackendInit(e.clone())),
    }
}
