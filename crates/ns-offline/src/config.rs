//! Configuration types for offline processing

use serde::{Deserialize, Serialize};

use crate::error::{FileProcessingError, FileResult};

/// Offline processing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Processing and output sample rate
    pub sample_rate: u32,

    /// Samples per chunk (None = the engine's block size)
    pub block_size: Option<usize>,

    /// Output bit depth: 16 or 24 (PCM), 32 (float)
    pub bit_depth: u16,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            sample_rate: ns_ml::SAMPLE_RATE,
            block_size: None,
            bit_depth: 16,
        }
    }
}

impl OfflineConfig {
    /// 32-bit float output, no requantization of the model output
    pub fn lossless() -> Self {
        Self {
            bit_depth: 32,
            ..Default::default()
        }
    }

    /// Set output bit depth
    pub fn with_bit_depth(mut self, bit_depth: u16) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    pub fn validate(&self) -> FileResult<()> {
        if self.sample_rate == 0 {
            return Err(FileProcessingError::InvalidConfig(
                "sample rate must be non-zero".into(),
            ));
        }
        if self.block_size == Some(0) {
            return Err(FileProcessingError::InvalidConfig(
                "block size must be non-zero".into(),
            ));
        }
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(FileProcessingError::InvalidConfig(format!(
                "Unsupported bit depth: {}",
                self.bit_depth
            )));
        }
        Ok(())
    }
}
