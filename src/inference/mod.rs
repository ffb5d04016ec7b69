//! LLM inference engine
//!
//! Everything that touches llama-cpp: backend lifetime, model file
//! validation, session state, and the generation loop.

pub mod backend;
pub mod generate;
pub mod model;
pub mod session;

// Re-export main types for convenience
pub use generate::{GenerationParams, DEFAULT_MAX_TOKENS};
pub use model::{validate_gguf, GgufHeader, ModelError, GGUF_MAGIC};
pub use session::{Session, SessionConfig, DEFAULT_CONTEXT_SIZE, DEFAULT_THREADS, THREADS_AUTO};
