//! Realtime driver errors
//!
//! Everything here happens before or while opening the streams. Once audio
//! flows, failures are counted in the stream statistics instead.

use ns_ml::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No default {0} device")]
    NoDevice(&'static str),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Device offers no f32 configuration at the model rate
    #[error("{direction} device has no f32 configuration at {rate} Hz (device offers {offered})")]
    UnsupportedSampleRate {
        direction: &'static str,
        rate: u32,
        offered: String,
    },

    #[error("Block size {requested} does not match the model's {model}")]
    BlockSizeMismatch { requested: usize, model: usize },

    #[error("Failed to query device configs: {0}")]
    ConfigError(String),

    #[error("Failed to build {direction} stream: {reason}")]
    StreamBuildError {
        direction: &'static str,
        reason: String,
    },

    #[error("Failed to start {direction} stream: {reason}")]
    StreamStartError {
        direction: &'static str,
        reason: String,
    },

    #[error("Audio host error: {0}")]
    BackendError(String),

    /// Warm-up pass failed before streaming
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

pub type AudioResult<T> = Result<T, AudioError>;
