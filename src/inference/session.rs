//! Session lifetime and metadata
//!
//! A session owns one loaded model plus the execution context bound to it.
//! Sessions live in a [`HandleRegistry`] and are only reachable through
//! their handle.

use std::num::NonZeroU32;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::token::LlamaToken;

use crate::error::BridgeError;
use crate::inference::backend::get_backend;
use crate::inference::model::validate_gguf;
use crate::registry::{Handle, HandleRegistry};
use crate::truncate_str;

/// Context window used when the caller passes a non-positive size.
pub const DEFAULT_CONTEXT_SIZE: u32 = 2048;

/// Thread count used when auto-detection fails or the request is malformed.
pub const DEFAULT_THREADS: i32 = 4;

/// Callers pass this to size the thread pool from the host's CPU count.
pub const THREADS_AUTO: i32 = -1;

/// Normalized per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Path to the GGUF model file
    pub model_path: String,
    /// Context window size in tokens
    pub context_length: u32,
    /// Worker threads for prompt and token processing
    pub threads: i32,
}

impl SessionConfig {
    /// Builds a config from raw caller values: non-positive context sizes
    /// become [`DEFAULT_CONTEXT_SIZE`] and the thread request resolves
    /// through [`resolve_threads`].
    pub fn new(model_path: impl Into<String>, context_size: i32, threads: i32) -> Self {
        Self {
            model_path: model_path.into(),
            context_length: normalize_context_size(context_size),
            threads: resolve_threads(threads),
        }
    }
}

/// Non-positive context sizes fall back to the default window.
pub fn normalize_context_size(requested: i32) -> u32 {
    if requested > 0 {
        requested as u32
    } else {
        DEFAULT_CONTEXT_SIZE
    }
}

/// Resolves a caller's thread request to a concrete count: positive values
/// pass through, [`THREADS_AUTO`] asks the host for its CPU count, anything
/// else falls back to [`DEFAULT_THREADS`].
pub fn resolve_threads(requested: i32) -> i32 {
    match requested {
        n if n > 0 => n,
        THREADS_AUTO => std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(DEFAULT_THREADS),
        _ => DEFAULT_THREADS,
    }
}

/// One loaded model with its execution context and generation state.
///
/// Field order is load-bearing: `context` is declared before `model`, so the
/// context drops first and never outlives the model it borrows.
#[derive(Debug)]
pub struct Session {
    context: LlamaContext<'static>,
    model: Box<LlamaModel>,
    token_history: Vec<LlamaToken>,
    config: SessionConfig,
    sampler_seed: u32,
}

// SAFETY: llama.cpp contexts must not be used from two threads at once, but
// a `Session` is only reachable through the per-handle mutex in the registry,
// which gives whoever holds the guard exclusive access.
unsafe impl Send for Session {}

impl Session {
    /// Loads the model named by `config` and builds its execution context.
    ///
    /// The file is sniffed before the backend is touched, so a bad path or a
    /// non-GGUF file never pulls in the engine. Any failure leaves nothing
    /// behind: a partially built session is dropped context-first.
    pub fn open(config: SessionConfig) -> Result<Self, BridgeError> {
        if config.model_path.is_empty() {
            return Err(BridgeError::InvalidModelPath);
        }

        let header = validate_gguf(&config.model_path)?;
        tracing::debug!(
            "GGUF header ok: version {} with {} tensors",
            header.version,
            header.tensor_count
        );

        let backend = get_backend()?;

        let model_params = LlamaModelParams::default();
        let model = Box::new(
            LlamaModel::load_from_file(backend, &config.model_path, &model_params)
                .map_err(|e| BridgeError::ModelLoad(e.to_string()))?,
        );

        let n_ctx = NonZeroU32::new(config.context_length).ok_or_else(|| {
            BridgeError::ContextCreate("context size must be non-zero".to_string())
        })?;
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            // The prompt is decoded in one call, so the batch must admit
            // anything the token budget admits.
            .with_n_batch(config.context_length)
            .with_n_threads(config.threads)
            .with_n_threads_batch(config.threads);

        // SAFETY: the model is boxed, so its heap address survives the move
        // into the returned Session, and `context` is declared before
        // `model`, so the borrow is gone before the model frees.
        let model_ref: &'static LlamaModel = unsafe { &*(model.as_ref() as *const LlamaModel) };

        let context = model_ref
            .new_context(backend, ctx_params)
            .map_err(|e| BridgeError::ContextCreate(e.to_string()))?;

        Ok(Self {
            context,
            model,
            token_history: Vec::new(),
            config,
            sampler_seed: rand_seed(),
        })
    }

    /// Drops per-request state: the token history and the attention cache.
    pub(crate) fn reset(&mut self) {
        self.token_history.clear();
        self.context.clear_kv_cache();
    }

    /// Split borrows for the generation loop.
    pub(crate) fn parts_mut(
        &mut self,
    ) -> (
        &mut LlamaContext<'static>,
        &LlamaModel,
        &mut Vec<LlamaToken>,
    ) {
        (&mut self.context, &self.model, &mut self.token_history)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Per-session seed, reserved for stochastic sampling.
    pub fn sampler_seed(&self) -> u32 {
        self.sampler_seed
    }

    /// Fixed-format report about the loaded model; callers parse these
    /// labels, so the layout stays stable.
    pub fn describe(&self, handle: Handle) -> String {
        format!(
            "Model Information:\n\
             Handle: {}\n\
             Vocabulary size: {}\n\
             Context size: {}\n\
             Embedding size: {}\n\
             Model type: {}\n\
             Status: Loaded and ready",
            handle,
            self.model.n_vocab(),
            self.config.context_length,
            self.model.n_embd(),
            self.model_family(),
        )
    }

    /// Short human-readable description of the loaded weights.
    fn model_family(&self) -> String {
        format!(
            "{} parameters, {} (trained on {} token context)",
            format_param_count(self.model.n_params() as u64),
            format_size_bytes(self.model.size() as u64),
            self.model.n_ctx_train()
        )
    }
}

impl HandleRegistry<Session> {
    /// Loads a model and registers the resulting session.
    ///
    /// Returns the new session's handle; on any failure the registry is
    /// left unchanged.
    pub fn load(&self, config: SessionConfig) -> Result<Handle, BridgeError> {
        let summary = format!(
            "{} ({} ctx, {} threads)",
            truncate_str(&config.model_path, 120),
            config.context_length,
            config.threads
        );
        let session = Session::open(config)?;
        let handle = self.insert(session)?;
        tracing::info!("session {} ready: {}", handle, summary);
        Ok(handle)
    }

    /// Produces the metadata report for a session.
    pub fn describe(&self, handle: Handle) -> Result<String, BridgeError> {
        let session = self.lookup(handle)?;
        let session = session.lock().map_err(|_| BridgeError::LockPoisoned {
            operation: "reading session metadata",
        })?;
        Ok(session.describe(handle))
    }

    /// Releases a session. Safe with zero, stale, and never-issued handles,
    /// and safe to call more than once.
    pub fn cleanup(&self, handle: Handle) {
        if self.destroy(handle) {
            tracing::info!("session {} destroyed", handle);
        } else {
            tracing::debug!("cleanup for unknown handle {} ignored", handle);
        }
    }
}

/// "6.7B" / "124M" style count for the info report.
fn format_param_count(count: u64) -> String {
    if count >= 1_000_000_000 {
        format!("{:.1}B", count as f64 / 1e9)
    } else if count >= 1_000_000 {
        format!("{:.0}M", count as f64 / 1e6)
    } else if count >= 1_000 {
        format!("{:.0}K", count as f64 / 1e3)
    } else {
        count.to_string()
    }
}

/// Binary-unit file size for the info report.
fn format_size_bytes(bytes: u64) -> String {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let bytes = bytes as f64;
    if bytes >= GIB {
        format!("{:.1} GiB", bytes / GIB)
    } else {
        format!("{:.0} MiB", bytes / MIB)
    }
}

/// Generates a random seed using system entropy
fn rand_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_normalizes_context_size() {
        assert_eq!(SessionConfig::new("m.gguf", 0, 4).context_length, 2048);
        assert_eq!(SessionConfig::new("m.gguf", -16, 4).context_length, 2048);
        assert_eq!(SessionConfig::new("m.gguf", 4096, 4).context_length, 4096);
    }

    #[test]
    fn test_resolve_threads() {
        assert_eq!(resolve_threads(6), 6);
        assert_eq!(resolve_threads(1), 1);
        assert!(resolve_threads(THREADS_AUTO) > 0);
        assert_eq!(resolve_threads(0), DEFAULT_THREADS);
        assert_eq!(resolve_threads(-7), DEFAULT_THREADS);
    }

    #[test]
    fn test_open_rejects_empty_path() {
        let err = Session::open(SessionConfig::new("", 2048, 4)).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidModelPath));
    }

    #[test]
    fn test_open_rejects_missing_file() {
        let err =
            Session::open(SessionConfig::new("/nonexistent/model.gguf", 2048, 4)).unwrap_err();
        assert!(matches!(err, BridgeError::ModelValidation(_)));
    }

    #[test]
    fn test_open_rejects_non_gguf_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a model file, but long enough to read")
            .unwrap();
        file.flush().unwrap();

        let path = file.path().to_string_lossy().into_owned();
        let err = Session::open(SessionConfig::new(path, 2048, 4)).unwrap_err();
        assert!(matches!(err, BridgeError::ModelValidation(_)));
    }

    #[test]
    fn test_failed_load_leaves_registry_empty() {
        let registry: HandleRegistry<Session> = HandleRegistry::new();
        assert!(registry.load(SessionConfig::new("", 0, -1)).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_describe_unknown_handle() {
        let registry: HandleRegistry<Session> = HandleRegistry::new();
        assert!(matches!(
            registry.describe(3),
            Err(BridgeError::UnknownHandle(3))
        ));
    }

    #[test]
    fn test_cleanup_unknown_handle_is_silent() {
        let registry: HandleRegistry<Session> = HandleRegistry::new();
        registry.cleanup(0);
        registry.cleanup(41);
        registry.cleanup(41);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_format_param_count() {
        assert_eq!(format_param_count(6_738_415_616), "6.7B");
        assert_eq!(format_param_count(124_000_000), "124M");
        assert_eq!(format_param_count(900), "900");
    }

    #[test]
    fn test_format_size_bytes() {
        assert_eq!(format_size_bytes(4_026_531_840), "3.8 GiB");
        assert_eq!(format_size_bytes(150 * 1024 * 1024), "150 MiB");
    }
}
