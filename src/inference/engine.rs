//! Inference session implementation
//!
//! Core logic for driving llama-cpp through a blocking completion.
//!
//! # Architecture
//!
//! llama-cpp-2 types (`LlamaModel`, `LlamaContext`) contain raw
//! pointers that are not `Send`, so each session owns a dedicated
//! worker thread that holds the model; callers talk to it over
//! channels. That keeps a handle usable from any caller thread and
//! serializes completions per handle: commands queue on the channel and
//! the worker runs one generation at a time. The process-wide llama
//! backend is initialized once, on first use.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use once_cell::sync::OnceCell;
use thiserror::Error;

/// Errors that can occur while loading or running a model.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("Failed to initialize llama backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create inference context: {0}")]
    ContextCreate(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Detokenization failed: {0}")]
    Detokenization(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Inference worker error: {0}")]
    Worker(String),
}

/// Sampling and context configuration for a session.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Temperature for sampling (below 0.01 switches to greedy)
    pub temperature: f32,
    /// Top-k sampling parameter
    pub top_k: u32,
    /// Top-p (nucleus) sampling parameter
    pub top_p: f32,
    /// Random seed for sampling (0 = seed from system entropy)
    pub seed: u32,
    /// Upper bound on the context window; clamped to what the model
    /// was trained with
    pub max_context_size: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            seed: 0,
            max_context_size: 8192,
        }
    }
}

static BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn backend() -> Result<&'static LlamaBackend, EngineError> {
    BACKEND.get_or_try_init(|| {
        tracing::info!("initializing llama backend");
        LlamaBackend::init().map_err(|e| EngineError::BackendInit(e.to_string()))
    })
}

/// Commands sent to the worker thread
enum WorkerCommand {
    Complete {
        prompt: String,
        max_tokens: usize,
        response_tx: Sender<Result<String, EngineError>>,
    },
    Shutdown,
}

/// A loaded model plus the worker thread that owns it.
///
/// Spawning blocks until the worker reports the load outcome, so a
/// session either exists fully loaded or not at all.
pub struct InferenceSession {
    command_tx: Mutex<Sender<WorkerCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl InferenceSession {
    /// Loads the GGUF model at `path` on a fresh worker thread.
    pub fn spawn(
        path: &Path,
        gpu_layers: u32,
        params: GenerationParams,
    ) -> Result<Self, EngineError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let model_path = path.to_path_buf();

        let worker = thread::Builder::new()
            .name("localm-inference".to_string())
            .spawn(move || worker_main(model_path, gpu_layers, params, ready_tx, command_rx))
            .map_err(|e| EngineError::Worker(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                command_tx: Mutex::new(command_tx),
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(EngineError::Worker(
                    "worker exited before reporting load result".to_string(),
                ))
            }
        }
    }

    /// Generates up to `max_tokens` tokens continuing `prompt` and
    /// returns the generated text (never the prompt echo).
    ///
    /// Blocking. Calls from multiple threads on one session queue up
    /// and run one at a time. A zero budget succeeds immediately with
    /// an empty string. On any engine failure partial output is
    /// discarded.
    pub fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, EngineError> {
        if max_tokens == 0 {
            return Ok(String::new());
        }

        let (response_tx, response_rx) = mpsc::channel();
        {
            let command_tx = self
                .command_tx
                .lock()
                .map_err(|_| EngineError::Worker("command channel lock poisoned".to_string()))?;
            command_tx
                .send(WorkerCommand::Complete {
                    prompt: prompt.to_string(),
                    max_tokens,
                    response_tx,
                })
                .map_err(|_| EngineError::Worker("inference worker is gone".to_string()))?;
        }

        response_rx
            .recv()
            .map_err(|_| EngineError::Worker("inference worker dropped the request".to_string()))?
    }
}

impl Drop for InferenceSession {
    fn drop(&mut self) {
        if let Ok(command_tx) = self.command_tx.lock() {
            let _ = command_tx.send(WorkerCommand::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Worker thread main loop: owns the model, processes completions.
fn worker_main(
    path: PathBuf,
    gpu_layers: u32,
    params: GenerationParams,
    ready_tx: Sender<Result<(), EngineError>>,
    command_rx: Receiver<WorkerCommand>,
) {
    let (backend, model) = match load_model(&path, gpu_layers) {
        Ok(loaded) => {
            let _ = ready_tx.send(Ok(()));
            loaded
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    while let Ok(command) = command_rx.recv() {
        match command {
            WorkerCommand::Complete {
                prompt,
                max_tokens,
                response_tx,
            } => {
                let result = run_completion(backend, &model, &prompt, max_tokens, &params);
                if let Err(e) = &result {
                    tracing::error!("completion failed: {e}");
                }
                let _ = response_tx.send(result);
            }
            WorkerCommand::Shutdown => break,
        }
    }
    tracing::debug!("inference worker for {} exiting", path.display());
}

fn load_model(
    path: &Path,
    gpu_layers: u32,
) -> Result<(&'static LlamaBackend, LlamaModel), EngineError> {
    let backend = backend()?;
    let model_params = LlamaModelParams::default().with_n_gpu_layers(gpu_layers);
    let model = LlamaModel::load_from_file(backend, path, &model_params)
        .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

    tracing::info!(
        "loaded {} ({} params, {} vocab, {} train ctx)",
        path.display(),
        model.n_params(),
        model.n_vocab(),
        model.n_ctx_train()
    );
    Ok((backend, model))
}

/// Runs one full completion: prompt decode, then the sample loop.
fn run_completion(
    backend: &LlamaBackend,
    model: &LlamaModel,
    prompt: &str,
    max_tokens: usize,
    params: &GenerationParams,
) -> Result<String, EngineError> {
    let prompt_tokens = model
        .str_to_token(prompt, AddBos::Always)
        .map_err(|e| EngineError::Tokenization(e.to_string()))?;
    tracing::debug!("prompt tokenized into {} tokens", prompt_tokens.len());

    let n_ctx = params.max_context_size.min(model.n_ctx_train()).max(2048);
    let n_batch = prompt_tokens.len().max(512);

    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(Some(NonZeroU32::new(n_ctx).unwrap()))
        .with_n_batch(n_batch as u32);

    let mut ctx = model
        .new_context(backend, ctx_params)
        .map_err(|e| EngineError::ContextCreate(e.to_string()))?;

    let mut batch = LlamaBatch::new(n_batch, 1);
    for (i, token) in prompt_tokens.iter().enumerate() {
        let is_last = i == prompt_tokens.len() - 1;
        batch
            .add(*token, i as i32, &[0], is_last)
            .map_err(|e| EngineError::Inference(e.to_string()))?;
    }
    ctx.decode(&mut batch)
        .map_err(|e| EngineError::Inference(e.to_string()))?;

    let mut sampler = build_sampler(params);
    let mut n_past = prompt_tokens.len() as i32;

    let generated = drive_generation(max_tokens, || {
        let token = sampler.sample(&ctx, batch.n_tokens() - 1);
        sampler.accept(token);

        if model.is_eog_token(token) {
            return Ok(None);
        }

        let piece = model
            .token_to_bytes(token, Special::Tokenize)
            .map_err(|e| EngineError::Detokenization(e.to_string()))?;

        batch.clear();
        batch
            .add(token, n_past, &[0], true)
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        ctx.decode(&mut batch)
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        n_past += 1;

        Ok(Some(piece))
    })?;

    Ok(text_from_token_bytes(generated))
}

fn build_sampler(params: &GenerationParams) -> LlamaSampler {
    if params.temperature < 0.01 {
        return LlamaSampler::greedy();
    }
    let seed = if params.seed == 0 {
        entropy_seed()
    } else {
        params.seed
    };
    LlamaSampler::chain_simple([
        LlamaSampler::top_k(params.top_k as i32),
        LlamaSampler::top_p(params.top_p, 1),
        LlamaSampler::temp(params.temperature),
        LlamaSampler::dist(seed),
    ])
}

/// Pulls token byte pieces from `next_piece` until the budget is spent
/// or the engine signals end-of-generation (`None`).
///
/// Any error discards everything accumulated so far: the completion
/// contract is all-or-nothing.
fn drive_generation(
    budget: usize,
    mut next_piece: impl FnMut() -> Result<Option<Vec<u8>>, EngineError>,
) -> Result<Vec<u8>, EngineError> {
    let mut generated = Vec::new();
    for _ in 0..budget {
        match next_piece()? {
            Some(piece) => generated.extend_from_slice(&piece),
            None => {
                tracing::debug!("end-of-generation after {} bytes", generated.len());
                break;
            }
        }
    }
    Ok(generated)
}

/// Decodes accumulated token bytes as UTF-8.
///
/// A budget cut can land mid-character, leaving an incomplete sequence
/// at the tail; only the longest valid prefix is kept. Zero decodable
/// bytes is a legitimate empty result.
fn text_from_token_bytes(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            let valid_len = err.utf8_error().valid_up_to();
            let mut bytes = err.into_bytes();
            bytes.truncate(valid_len);
            String::from_utf8(bytes).unwrap_or_default()
        }
    }
}

/// Generates a random seed using system entropy
fn entropy_seed() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}
