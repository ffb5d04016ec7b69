//! Bridge error types
//!
//! Every fallible bridge operation returns `Result<_, BridgeError>`, so the
//! FFI layer has a single place to turn failures into sentinel values.

use thiserror::Error;

use crate::inference::model::ModelError;
use crate::registry::Handle;

/// Errors that can occur during bridge operations
#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    #[error("Invalid model path")]
    InvalidModelPath,

    #[error("Empty prompt")]
    EmptyPrompt,

    #[error("Invalid handle or model not loaded")]
    UnknownHandle(Handle),

    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Model validation failed: {0}")]
    ModelValidation(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create context: {0}")]
    ContextCreate(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Tokenization failed: prompt needs {required} tokens but only {budget} fit in the context window")]
    PromptTooLong { required: usize, budget: usize },

    #[error("Failed to decode prompt: {0}")]
    Decode(String),

    #[error("Lock poisoned while {operation}")]
    LockPoisoned { operation: &'static str },
}

impl From<ModelError> for BridgeError {
    fn from(e: ModelError) -> Self {
        BridgeError::ModelValidation(e.to_string())
    }
}
