//! Inference backend abstraction
//!
//! The engine only sees an [`InferenceSession`]: a compiled model that
//! declares its ports and runs one pass over positionally ordered tensors.
//! [`TractSession`] is the pure Rust ONNX backend built on tract.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};
use tract_onnx::prelude::*;
use tract_onnx::tract_hir::internal::DimLike;

use crate::error::{EngineError, EngineResult};
use crate::ports::PortSpec;

/// Execution device for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Best available device
    Auto,
    /// CPU execution using tract (pure Rust)
    #[default]
    Cpu,
    /// Discrete or integrated GPU
    Gpu,
    /// Neural accelerator
    Npu,
}

impl ExecutionProvider {
    /// Check if this provider is available in the current build
    pub fn is_available(&self) -> bool {
        match self {
            ExecutionProvider::Auto => true,
            ExecutionProvider::Cpu => true,
            // tract has no GPU/NPU kernels
            ExecutionProvider::Gpu | ExecutionProvider::Npu => false,
        }
    }

    /// Get priority (higher = preferred)
    pub fn priority(&self) -> u32 {
        match self {
            ExecutionProvider::Npu => 100,
            ExecutionProvider::Gpu => 90,
            ExecutionProvider::Cpu => 10,
            ExecutionProvider::Auto => 0,
        }
    }

    /// Concrete device for this request
    pub fn resolve(self) -> EngineResult<ExecutionProvider> {
        match self {
            ExecutionProvider::Auto => Ok(detect_best_provider()),
            provider if provider.is_available() => Ok(provider),
            provider => Err(EngineError::DeviceUnavailable {
                device: provider.to_string(),
            }),
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionProvider::Auto => "AUTO",
            ExecutionProvider::Cpu => "CPU",
            ExecutionProvider::Gpu => "GPU",
            ExecutionProvider::Npu => "NPU",
        };
        f.write_str(name)
    }
}

impl FromStr for ExecutionProvider {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(ExecutionProvider::Auto),
            "CPU" => Ok(ExecutionProvider::Cpu),
            "GPU" => Ok(ExecutionProvider::Gpu),
            "NPU" => Ok(ExecutionProvider::Npu),
            _ => Err(EngineError::DeviceUnavailable {
                device: s.to_string(),
            }),
        }
    }
}

/// Auto-detect best execution provider
pub fn detect_best_provider() -> ExecutionProvider {
    available_providers()
        .into_iter()
        .max_by_key(|p| p.priority())
        .unwrap_or(ExecutionProvider::Cpu)
}

/// Get all available concrete execution providers
pub fn available_providers() -> Vec<ExecutionProvider> {
    [
        ExecutionProvider::Npu,
        ExecutionProvider::Gpu,
        ExecutionProvider::Cpu,
    ]
    .into_iter()
    .filter(|p| p.is_available())
    .collect()
}

/// A compiled model ready to run
///
/// Inputs passed to [`InferenceSession::run`] follow the order of
/// [`InferenceSession::inputs`]; returned outputs follow
/// [`InferenceSession::outputs`].
pub trait InferenceSession: Send {
    /// Declared input ports
    fn inputs(&self) -> &[PortSpec];

    /// Declared output ports
    fn outputs(&self) -> &[PortSpec];

    /// Execute one pass
    fn run(&mut self, inputs: &[ArrayViewD<'_, f32>]) -> EngineResult<Vec<ArrayD<f32>>>;

    /// Device the session was compiled for
    fn provider(&self) -> ExecutionProvider {
        ExecutionProvider::Cpu
    }
}

type RunnableModel =
    SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX session on the tract backend
pub struct TractSession {
    plan: RunnableModel,
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    provider: ExecutionProvider,
}

impl TractSession {
    /// Load and compile an ONNX model
    pub fn load<P: AsRef<Path>>(model_path: P, provider: ExecutionProvider) -> EngineResult<Self> {
        let path = model_path.as_ref();

        if !path.exists() {
            return Err(EngineError::ModelNotFound {
                path: path.display().to_string(),
            });
        }

        let provider = provider.resolve()?;

        let model = tract_onnx::onnx().model_for_path(path).map_err(init_error)?;

        // Names come from the ONNX graph; optimization may rewrite output nodes
        let input_names = model
            .input_outlets()
            .map_err(init_error)?
            .iter()
            .map(|outlet| model.node(outlet.node).name.clone())
            .collect::<Vec<_>>();
        let output_names = model
            .output_outlets()
            .map_err(init_error)?
            .iter()
            .map(|outlet| {
                model
                    .outlet_label(*outlet)
                    .map(str::to_string)
                    .unwrap_or_else(|| model.node(outlet.node).name.clone())
            })
            .collect::<Vec<_>>();

        let typed = model.into_optimized().map_err(init_error)?;

        let inputs = Self::port_specs(&typed, typed.input_outlets().map_err(init_error)?, input_names)?;
        let outputs =
            Self::port_specs(&typed, typed.output_outlets().map_err(init_error)?, output_names)?;

        let plan = typed.into_runnable().map_err(init_error)?;

        log::info!(
            "Compiled {} for {} ({} inputs, {} outputs)",
            path.display(),
            provider,
            inputs.len(),
            outputs.len()
        );

        Ok(Self {
            plan,
            inputs,
            outputs,
            provider,
        })
    }

    fn port_specs(
        model: &TypedModel,
        outlets: &[OutletId],
        names: Vec<String>,
    ) -> EngineResult<Vec<PortSpec>> {
        outlets
            .iter()
            .zip(names)
            .map(|(outlet, name)| {
                let fact = model.outlet_fact(*outlet).map_err(init_error)?;
                let shape = fact.shape.iter().map(|dim| dim.to_usize().ok()).collect();
                Ok(PortSpec::new(name, shape))
            })
            .collect()
    }
}

impl InferenceSession for TractSession {
    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    fn run(&mut self, inputs: &[ArrayViewD<'_, f32>]) -> EngineResult<Vec<ArrayD<f32>>> {
        let values: TVec<TValue> = inputs
            .iter()
            .map(|view| {
                let tensor = match view.as_slice() {
                    Some(data) => Tensor::from_shape(view.shape(), data),
                    None => {
                        let data: Vec<f32> = view.iter().copied().collect();
                        Tensor::from_shape(view.shape(), &data)
                    }
                };
                tensor.map(TValue::from)
            })
            .collect::<TractResult<_>>()
            .map_err(inference_error)?;

        let outputs = self.plan.run(values).map_err(inference_error)?;

        outputs
            .iter()
            .map(|value| {
                let data = value.as_slice::<f32>().map_err(inference_error)?.to_vec();
                ArrayD::from_shape_vec(IxDyn(value.shape()), data).map_err(|e| {
                    EngineError::Inference {
                        reason: e.to_string(),
                    }
                })
            })
            .collect()
    }

    fn provider(&self) -> ExecutionProvider {
        self.provider
    }
}

fn init_error(e: TractError) -> EngineError {
    EngineError::EngineInit {
        reason: e.to_string(),
    }
}

fn inference_error(e: TractError) -> EngineError {
    EngineError::Inference {
        reason: e.to_string(),
    }
}
