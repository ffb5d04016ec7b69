//! Autoregressive text generation
//!
//! Greedy decoding against a session's context. Every request starts from a
//! clean KV cache, so the same prompt on the same session always produces
//! the same output.

use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::{AddBos, Special};
use llama_cpp_2::token::LlamaToken;

use crate::error::BridgeError;
use crate::inference::session::Session;
use crate::registry::{Handle, HandleRegistry};
use crate::truncate_str;

/// Token cap used when the caller passes a non-positive `max_tokens`.
pub const DEFAULT_MAX_TOKENS: i32 = 256;

/// Generation parameters for a single request.
///
/// Decoding is greedy; `temperature`, `top_p`, and `top_k` are accepted so
/// the call signature stays stable for callers, but they do not influence
/// token selection.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate
    pub max_tokens: i32,
    /// Sampling temperature (unused by greedy decoding)
    pub temperature: f32,
    /// Top-p (nucleus) bound (unused by greedy decoding)
    pub top_p: f32,
    /// Top-k bound (unused by greedy decoding)
    pub top_k: i32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.8,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

/// Non-positive requests fall back to the default cap.
pub fn normalize_max_tokens(requested: i32) -> i32 {
    if requested > 0 {
        requested
    } else {
        DEFAULT_MAX_TOKENS
    }
}

/// Number of tokens a request may generate: the caller's cap, bounded by the
/// context space left after the prompt.
fn generation_ceiling(max_tokens: i32, context_length: u32, prompt_len: usize) -> usize {
    let remaining = (context_length as usize).saturating_sub(prompt_len);
    (max_tokens.max(0) as usize).min(remaining)
}

/// Index of the largest logit, scanning left to right so ties resolve to the
/// lowest token id. `None` on an empty row.
fn greedy_pick(logits: &[f32]) -> Option<usize> {
    let (first, rest) = logits.split_first()?;
    let mut best_index = 0;
    let mut best_score = *first;
    for (offset, &score) in rest.iter().enumerate() {
        if score > best_score {
            best_index = offset + 1;
            best_score = score;
        }
    }
    Some(best_index)
}

/// Longest prefix of `bytes` that is valid UTF-8, as an owned string.
///
/// Token boundaries are not character boundaries, so a generation that stops
/// mid-sequence can end on a partial character; the trailing fragment is
/// dropped rather than replaced.
fn utf8_prefix(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let valid = err.utf8_error().valid_up_to();
            let mut bytes = err.into_bytes();
            bytes.truncate(valid);
            String::from_utf8(bytes).unwrap_or_default()
        }
    }
}

impl HandleRegistry<Session> {
    /// Runs one generation request against a session.
    ///
    /// Requests on the same handle serialize on the session lock; requests
    /// on different handles run in parallel.
    pub fn generate(
        &self,
        handle: Handle,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BridgeError> {
        let session = self.lookup(handle)?;
        if prompt.is_empty() {
            return Err(BridgeError::EmptyPrompt);
        }
        let mut session = session.lock().map_err(|_| BridgeError::LockPoisoned {
            operation: "locking session for generation",
        })?;
        run_generation(&mut session, handle, prompt, params)
    }
}

/// Drives the decode loop for one request.
fn run_generation(
    session: &mut Session,
    handle: Handle,
    prompt: &str,
    params: &GenerationParams,
) -> Result<String, BridgeError> {
    let max_tokens = normalize_max_tokens(params.max_tokens);
    let context_length = session.config().context_length;

    tracing::debug!(
        "generate on session {}: up to {} tokens, seed {}, prompt {:?}",
        handle,
        max_tokens,
        session.sampler_seed(),
        truncate_str(prompt, 80)
    );

    // Fresh state per request: forget the previous request's tokens and
    // attention cache.
    session.reset();

    let (ctx, model, history) = session.parts_mut();

    let tokens = model
        .str_to_token(prompt, AddBos::Always)
        .map_err(|e| BridgeError::Tokenization(e.to_string()))?;
    if tokens.is_empty() {
        return Err(BridgeError::Tokenization("no tokens produced".to_string()));
    }

    // Half the window is reserved for generated output.
    let budget = (context_length / 2) as usize;
    if tokens.len() > budget {
        return Err(BridgeError::PromptTooLong {
            required: tokens.len(),
            budget,
        });
    }

    // Prefill: the whole prompt in one batch, logits only at the last
    // position.
    let mut batch = LlamaBatch::new(context_length as usize, 1);
    let last_index = tokens.len() - 1;
    for (i, token) in tokens.iter().enumerate() {
        batch
            .add(*token, i as i32, &[0], i == last_index)
            .map_err(|e| BridgeError::Decode(e.to_string()))?;
    }
    ctx.decode(&mut batch)
        .map_err(|e| BridgeError::Decode(e.to_string()))?;

    history.extend_from_slice(&tokens);

    let ceiling = generation_ceiling(max_tokens, context_length, tokens.len());
    let mut output: Vec<u8> = Vec::new();

    for _ in 0..ceiling {
        let logits = ctx.get_logits_ith(batch.n_tokens() - 1);
        let Some(next) = greedy_pick(logits) else {
            tracing::warn!("empty logit row on session {}, stopping", handle);
            break;
        };
        let token = LlamaToken(next as i32);

        if model.is_eog_token(token) {
            tracing::debug!("end of generation token on session {}", handle);
            break;
        }

        match model.token_to_bytes(token, Special::Plaintext) {
            Ok(bytes) => output.extend_from_slice(&bytes),
            // A token with no text rendering still advances the context.
            Err(e) => tracing::debug!("token {} has no piece: {}", token.0, e),
        }

        let position = history.len() as i32;
        history.push(token);

        batch.clear();
        if batch.add(token, position, &[0], true).is_err() {
            break;
        }
        if let Err(e) = ctx.decode(&mut batch) {
            // Keep what was produced; the request just ends early.
            tracing::warn!("decode failed mid-generation on session {}: {}", handle, e);
            break;
        }
    }

    tracing::debug!(
        "session {} generated {} tokens",
        handle,
        history.len() - tokens.len()
    );

    Ok(utf8_prefix(output))
}
