//! Duplex stream configuration

use serde::{Deserialize, Serialize};

use crate::device::DeviceSelector;

/// Realtime stream settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexConfig {
    /// Device sample rate, must equal the model rate
    pub sample_rate: u32,
    /// Samples per period (None = the engine's block size)
    pub block_size: Option<usize>,
    pub input_device: DeviceSelector,
    pub output_device: DeviceSelector,
    /// Processed blocks the playback ring can hold
    pub ring_blocks: usize,
    /// How often stream statistics are logged (0 = only at stop)
    pub stats_interval_ms: u64,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            sample_rate: ns_ml::SAMPLE_RATE,
            block_size: None,
            input_device: DeviceSelector::Default,
            output_device: DeviceSelector::Default,
            ring_blocks: 4,
            stats_interval_ms: 5000,
        }
    }
}

impl DuplexConfig {
    /// Smallest playback ring: one block of latency on top of the period
    pub fn low_latency() -> Self {
        Self {
            ring_blocks: 2,
            ..Default::default()
        }
    }

    pub fn with_devices(mut self, input: DeviceSelector, output: DeviceSelector) -> Self {
        self.input_device = input;
        self.output_device = output;
        self
    }

    /// Added latency of the playback ring at `block_size`, in milliseconds
    pub fn ring_latency_ms(&self, block_size: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        (self.ring_blocks.saturating_sub(1) * block_size) as f64 * 1000.0
            / self.sample_rate as f64
    }
}
