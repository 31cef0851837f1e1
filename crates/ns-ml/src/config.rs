//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::DEFAULT_BLOCK_SIZE;
use crate::inference::ExecutionProvider;

/// Engine construction settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Requested execution device
    pub device: ExecutionProvider,
    /// Block size used when the model's audio port has a dynamic length
    pub fallback_block_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: ExecutionProvider::Cpu,
            fallback_block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl EngineConfig {
    /// Config for a specific device
    pub fn with_device(device: ExecutionProvider) -> Self {
        Self {
            device,
            ..Default::default()
        }
    }

    /// Pick the best device available in this build
    pub fn auto() -> Self {
        Self::with_device(ExecutionProvider::Auto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.device, ExecutionProvider::Cpu);
        assert_eq!(config.fallback_block_size, 1024);
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig = serde_json::from_str(r#"{"device":"Auto"}"#).unwrap();
        assert_eq!(config, EngineConfig::auto());
    }
}
