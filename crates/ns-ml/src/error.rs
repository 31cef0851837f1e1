//! Error types for model loading, port resolution and inference

use thiserror::Error;

/// The model's declared ports do not form a usable audio + state contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortResolutionError {
    /// No input port was classified as audio
    #[error("Model has no audio input port")]
    MissingAudioInput,

    /// No output port was classified as audio
    #[error("Model has no audio output port")]
    MissingAudioOutput,

    /// More than one non-state input
    #[error("Model has more than one audio input: '{first}' and '{second}'")]
    MultipleAudioInputs { first: String, second: String },

    /// More than one non-state output
    #[error("Model has more than one audio output: '{first}' and '{second}'")]
    MultipleAudioOutputs { first: String, second: String },

    /// A state input without a matching state output
    #[error("State input '{name}' has no matching state output")]
    UnmatchedStateInput { name: String },

    /// A state output that no state input claimed
    #[error("State output '{name}' has no matching state input")]
    UnmatchedStateOutput { name: String },

    /// Port map was built for a different session
    #[error("Port map does not fit session: {reason}")]
    SessionMismatch { reason: String },
}

/// Engine error types
#[derive(Error, Debug)]
pub enum EngineError {
    /// Model file not found
    #[error("Model not found: {path}")]
    ModelNotFound { path: String },

    /// Model could not be loaded or compiled
    #[error("Failed to initialize engine: {reason}")]
    EngineInit { reason: String },

    /// Requested execution device is not available in this build
    #[error("Execution device not available: {device}")]
    DeviceUnavailable { device: String },

    /// Port classification failed
    #[error("Port resolution failed: {0}")]
    PortResolution(#[from] PortResolutionError),

    /// Backend execution failed
    #[error("Inference failed: {reason}")]
    Inference { reason: String },

    /// Chunk does not match the model block size
    #[error("Chunk length mismatch: expected {expected} samples, got {got}")]
    ChunkLength { expected: usize, got: usize },

    /// Output tensor has the wrong number of values
    #[error("Invalid output for port '{port}': expected {expected} values, got {got}")]
    OutputShape {
        port: String,
        expected: usize,
        got: usize,
    },
}

impl EngineError {
    /// Errors raised while building the engine
    pub fn is_init(&self) -> bool {
        matches!(
            self,
            EngineError::ModelNotFound { .. }
                | EngineError::EngineInit { .. }
                | EngineError::DeviceUnavailable { .. }
                | EngineError::PortResolution(_)
        )
    }

    /// Errors scoped to a single chunk; state buffers are untouched
    pub fn is_inference(&self) -> bool {
        !self.is_init()
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
