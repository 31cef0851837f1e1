//! Error types for offline processing

use ns_ml::EngineError;
use thiserror::Error;

/// Offline file processing errors
#[derive(Error, Debug)]
pub enum FileProcessingError {
    #[error("Input file not found: {0}")]
    InputNotFound(String),

    #[error("Failed to read audio file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Input is {from} Hz but the model needs {to} Hz and resampling is not available")]
    ResamplerUnavailable { from: u32, to: u32 },

    #[error("Sample rate conversion failed: {0}")]
    Resample(String),

    #[error("Failed to write output file {path}: {reason}")]
    Unwritable { path: String, reason: String },

    #[error("Audio contains no samples")]
    EmptyAudio,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Inference(#[from] EngineError),
}

/// Result type for offline operations
pub type FileResult<T> = Result<T, FileProcessingError>;
