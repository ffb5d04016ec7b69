//! llama-bridge
//!
//! Handle-based bridge exposing llama.cpp text generation to a managed
//! runtime. A caller loads a GGUF model and receives an opaque handle, runs
//! generation and metadata queries against that handle, and destroys it when
//! done. The same operations are exported as a C ABI in [`ffi`] for hosts
//! that load this crate as a shared library.

pub mod error;
pub mod ffi;
pub mod inference;
pub mod registry;

pub use error::BridgeError;
pub use inference::generate::GenerationParams;
pub use inference::session::{Session, SessionConfig};
pub use registry::{Handle, HandleRegistry};

/// Safely truncate a string at a char boundary, never panics.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    // Walk backwards from max_bytes to find a valid char boundary
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
