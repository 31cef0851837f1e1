//! ns-ml: Stateful streaming inference for recurrent denoising models
//!
//! A denoising model is a recurrent ONNX graph that takes one block of mono
//! audio plus its hidden state and returns the cleaned block plus the next
//! hidden state. This crate discovers that contract from tensor names and
//! runs it block by block.
//!
//! ## Modules
//!
//! - [`ports`] - classification of model inputs/outputs into audio and state
//! - [`inference`] - backend abstraction and the tract ONNX session
//! - [`engine`] - state-carrying [`DenoiseEngine`]
//! - [`config`] - engine settings
//!
//! ## Example
//!
//! ```rust,ignore
//! use ns_ml::{DenoiseEngine, EngineConfig};
//!
//! let mut engine = DenoiseEngine::new("denoiser.onnx", &EngineConfig::default())?;
//! let block = vec![0.0f32; engine.block_size()];
//! let clean = engine.process_chunk(&block)?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ports;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::EngineConfig;
pub use engine::DenoiseEngine;
pub use error::{EngineError, EngineResult, PortResolutionError};
pub use inference::{
    ExecutionProvider, InferenceSession, TractSession, available_providers, detect_best_provider,
};
pub use ports::{
    ModelPortMap, PairMatch, PortClassifier, PortRef, PortSpec, StatePair, SubstringClassifier,
};

/// Sample rate every supported model is trained on
pub const SAMPLE_RATE: u32 = 16_000;

/// Block size when the model does not declare one
pub const DEFAULT_BLOCK_SIZE: usize = 1024;
