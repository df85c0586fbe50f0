//! Inference engine integration
//!
//! Everything that talks to llama-cpp lives here: per-session worker
//! threads, the completion loop, and process-wide backend setup.

pub mod engine;

pub use engine::{EngineError, GenerationParams, InferenceSession};
