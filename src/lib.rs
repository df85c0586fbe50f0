//! LocaLM FFI
//!
//! C-callable boundary around a local llama.cpp text-generation runtime:
//! load a model from the supported catalog by name, run blocking
//! autoregressive generation under a token budget, and hand the result
//! back across the boundary with explicit ownership transfer.
//!
//! All boundary types and entry points live in [`boundary`]; the model
//! catalog and handle lifecycle in [`registry`]; the llama.cpp worker in
//! [`inference`].

pub mod boundary;
pub mod inference;
pub mod registry;
