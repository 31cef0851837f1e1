//! JSON run configuration, overridden by command line flags

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use ns_audio::{DeviceSelector, DuplexConfig};
use ns_ml::{EngineConfig, ExecutionProvider};
use ns_offline::OfflineConfig;

/// Everything a run needs besides the input/output files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: Option<PathBuf>,
    pub engine: EngineConfig,
    pub duplex: DuplexConfig,
    pub offline: OfflineConfig,
}

/// Flag values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<PathBuf>,
    pub device: Option<ExecutionProvider>,
    pub input_device: Option<DeviceSelector>,
    pub output_device: Option<DeviceSelector>,
    pub bit_depth: Option<u16>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(model) = overrides.model {
            self.model = Some(model);
        }
        if let Some(device) = overrides.device {
            self.engine.device = device;
        }
        if let Some(selector) = overrides.input_device {
            self.duplex.input_device = selector;
        }
        if let Some(selector) = overrides.output_device {
            self.duplex.output_device = selector;
        }
        if let Some(bit_depth) = overrides.bit_depth {
            self.offline.bit_depth = bit_depth;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{"model": "models/dns.onnx", "duplex": {"input_device": 2}, "offline": {"bit_depth": 24}}"#,
        )
        .unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.model, Some(PathBuf::from("models/dns.onnx")));
        assert_eq!(config.duplex.input_device, DeviceSelector::Index(2));
        assert_eq!(config.duplex.output_device, DeviceSelector::Default);
        assert_eq!(config.offline.bit_depth, 24);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_flags_override_file() {
        let file = RunConfig {
            model: Some("from_file.onnx".into()),
            ..Default::default()
        };
        let merged = file.apply(Overrides {
            model: Some("from_flag.onnx".into()),
            device: Some(ExecutionProvider::Auto),
            output_device: Some(DeviceSelector::Name("Cable Input".into())),
            ..Default::default()
        });

        assert_eq!(merged.model, Some(PathBuf::from("from_flag.onnx")));
        assert_eq!(merged.engine.device, ExecutionProvider::Auto);
        assert_eq!(merged.duplex.input_device, DeviceSelector::Default);
        assert_eq!(
            merged.duplex.output_device,
            DeviceSelector::Name("Cable Input".into())
        );
        assert_eq!(merged.offline.bit_depth, 16);
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(RunConfig::load(&path).is_err());
    }
}
