//! Model registry and handle lifecycle
//!
//! Resolves a canonical model name against the catalog, makes sure the
//! GGUF artifact is present and well-formed, and spins up the inference
//! session that backs the opaque handle crossing the boundary. A load
//! either fully succeeds (handle issued) or fully fails (error, no
//! handle); nothing partially initialized ever escapes.

pub mod artifact;
pub mod catalog;
pub mod download;

use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::inference::{EngineError, GenerationParams, InferenceSession};
use artifact::ArtifactError;
use catalog::Catalog;
use download::DownloadError;

pub use catalog::CatalogEntry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

const HANDLE_LIVE: u32 = 0x4C4F_434D; // "LOCM"
const HANDLE_RELEASED: u32 = 0xDEAD_D00D;

/// Liveness sentinel embedded in caller-held handles.
///
/// Release poisons the value, so use-after-release and double-release
/// trip an assertion in debug builds instead of corrupting memory
/// silently. Not a recovery mechanism: misuse stays a caller error.
#[derive(Debug)]
pub(crate) struct Sentinel(u32);

impl Sentinel {
    fn live() -> Self {
        Sentinel(HANDLE_LIVE)
    }

    pub(crate) fn check_live(&self, what: &str) {
        debug_assert_eq!(self.0, HANDLE_LIVE, "{what} used after release");
    }

    pub(crate) fn retire(&mut self, what: &str) {
        debug_assert_ne!(self.0, HANDLE_RELEASED, "{what} released twice");
        debug_assert_eq!(self.0, HANDLE_LIVE, "{what} is not a live handle");
        self.0 = HANDLE_RELEASED;
    }
}

/// A loaded model: the opaque handle the caller holds between
/// `localm_load_model` and `localm_release_model`.
///
/// Each handle owns its own inference session, so distinct handles
/// (including two loads of the same name) are fully independent.
pub struct Model {
    liveness: Sentinel,
    name: String,
    session: InferenceSession,
}

impl Model {
    fn new(name: String, session: InferenceSession) -> Self {
        Self {
            liveness: Sentinel::live(),
            name,
            session,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocking generation; see `InferenceSession::complete`.
    pub fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, EngineError> {
        self.liveness.check_live("model handle");
        self.session.complete(prompt, max_tokens)
    }

    /// Marks the handle released. The session itself tears down on drop.
    pub(crate) fn retire(&mut self) {
        self.liveness.retire("model handle");
        tracing::info!("released model '{}'", self.name);
    }
}

/// Resolves names from a catalog to loaded models.
pub struct ModelRegistry {
    catalog: Catalog,
    models_dir: PathBuf,
    gpu_layers: u32,
}

impl ModelRegistry {
    pub fn new(catalog: Catalog, models_dir: PathBuf) -> Self {
        Self {
            catalog,
            models_dir,
            gpu_layers: 0,
        }
    }

    /// Number of layers to offload to the GPU for subsequent loads.
    pub fn with_gpu_layers(mut self, gpu_layers: u32) -> Self {
        self.gpu_layers = gpu_layers;
        self
    }

    /// Builtin catalog, models directory from `LOCALM_MODELS_DIR` or
    /// the platform data dir, GPU offload from `LOCALM_GPU_LAYERS`.
    pub fn with_defaults() -> Self {
        let gpu_layers = env::var("LOCALM_GPU_LAYERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Self::new(Catalog::builtin(), default_models_dir()).with_gpu_layers(gpu_layers)
    }

    pub fn models_dir(&self) -> &std::path::Path {
        &self.models_dir
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Loads a model by name and issues a fresh handle.
    ///
    /// Blocking: may download the artifact and always pays the full
    /// weight-loading cost. No retries; whether a failure is worth
    /// retrying (network blip vs. unsupported model) is the caller's
    /// call.
    pub fn load(&self, name: &str) -> Result<Model, RegistryError> {
        let entry = self
            .catalog
            .find(name)
            .ok_or_else(|| RegistryError::UnknownModel(name.to_string()))?;

        let path = self.models_dir.join(&entry.hf_file);
        if !path.exists() {
            tracing::info!(
                "model '{}' not cached, fetching {} (~{} bytes)",
                entry.name,
                entry.hf_file,
                entry.size_bytes
            );
            download::fetch_hf_file(&entry.hf_repo, &entry.hf_file, &self.models_dir)?;
        }

        let header = artifact::validate_gguf(&path)?;
        tracing::debug!(
            "artifact ok: GGUF v{}, {} tensors",
            header.version,
            header.tensor_count
        );

        let session =
            InferenceSession::spawn(&path, self.gpu_layers, GenerationParams::default())?;
        tracing::info!("model '{}' loaded from {}", entry.name, path.display());

        Ok(Model::new(entry.name.clone(), session))
    }
}

fn default_models_dir() -> PathBuf {
    if let Some(dir) = env::var_os("LOCALM_MODELS_DIR") {
        return PathBuf::from(dir);
    }
    directories::ProjectDirs::from("com", "LocaLM", "LocaLM")
        .map(|dirs| dirs.data_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}
