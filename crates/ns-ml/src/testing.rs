//! Deterministic in-memory sessions
//!
//! [`RecurrentMock`] behaves like a tiny recurrent denoiser: its audio output
//! depends on the current block and on up to two state tensors that it
//! updates on every pass. It lets the engine, the file pipeline and the
//! benches run without an ONNX file.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ndarray::{ArrayD, ArrayViewD, IxDyn};

use crate::error::{EngineError, EngineResult};
use crate::inference::InferenceSession;
use crate::ports::PortSpec;

/// Input and output port names of one recurrent state
type StateNames = Option<(String, String)>;

/// Two-state recurrent model with declared output order
/// `[out_state_1, output, out_state_0]`.
///
/// Per pass, with `x` the audio block:
/// - `output = 0.5 * x + 0.1 * mean(state_0) + 0.05 * mean(state_1)`
/// - `state_0[j] = 0.9 * state_0[j] + 0.1 * mean(x) * (j + 1)`
/// - `state_1 = 0.5 * state_1 + 0.5 * mean(x^2)`
///
/// Silence in from zeroed state gives silence out.
pub struct RecurrentMock {
    inputs: Vec<PortSpec>,
    outputs: Vec<PortSpec>,
    state_0: StateNames,
    state_1: StateNames,
    fail: Arc<AtomicBool>,
    runs: Arc<AtomicU64>,
}

impl RecurrentMock {
    /// Rank-3 audio port `[1, 1, block_size]`
    pub fn new(block_size: usize) -> Self {
        Self::with_audio_shape(vec![Some(1), Some(1), Some(block_size)])
    }

    /// Rank-2 audio port `[1, block_size]`
    pub fn rank2(block_size: usize) -> Self {
        Self::with_audio_shape(vec![Some(1), Some(block_size)])
    }

    /// Audio port with an arbitrary, possibly dynamic, shape
    pub fn with_audio_shape(shape: Vec<Option<usize>>) -> Self {
        Self::with_ports(
            vec![
                PortSpec::new("input", shape.clone()),
                PortSpec::fixed("inp_state_0", &[1, 4]),
                PortSpec::fixed("inp_state_1", &[1, 2, 3]),
            ],
            vec![
                PortSpec::fixed("out_state_1", &[1, 2, 3]),
                PortSpec::new("output", shape),
                PortSpec::fixed("out_state_0", &[1, 4]),
            ],
        )
    }

    /// Arbitrary port lists. The first input and output whose names contain
    /// `state_0` (or `state_1`) carry that state; every other port is audio.
    pub fn with_ports(inputs: Vec<PortSpec>, outputs: Vec<PortSpec>) -> Self {
        let names = |marker: &str| {
            let input = inputs.iter().find(|p| p.name.contains(marker))?;
            let output = outputs.iter().find(|p| p.name.contains(marker))?;
            Some((input.name.clone(), output.name.clone()))
        };
        let state_0 = names("state_0");
        let state_1 = names("state_1");
        Self {
            inputs,
            outputs,
            state_0,
            state_1,
            fail: Arc::new(AtomicBool::new(false)),
            runs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arbitrary port lists with explicitly named states, for models that do
    /// not follow the `state_<n>` convention
    pub fn with_state_names(
        inputs: Vec<PortSpec>,
        outputs: Vec<PortSpec>,
        state_0: Option<(&str, &str)>,
        state_1: Option<(&str, &str)>,
    ) -> Self {
        let owned =
            |names: Option<(&str, &str)>| names.map(|(i, o)| (i.to_string(), o.to_string()));
        Self {
            state_0: owned(state_0),
            state_1: owned(state_1),
            ..Self::with_ports(inputs, outputs)
        }
    }

    /// While set, every pass fails with an inference error
    pub fn failure_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail)
    }

    /// Number of passes attempted, failed ones included
    pub fn run_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.runs)
    }

    fn check_inputs(&self, inputs: &[ArrayViewD<'_, f32>]) -> EngineResult<()> {
        if inputs.len() != self.inputs.len() {
            return Err(EngineError::Inference {
                reason: format!("expected {} inputs, got {}", self.inputs.len(), inputs.len()),
            });
        }
        for (spec, value) in self.inputs.iter().zip(inputs) {
            let fits = spec.rank() == value.ndim()
                && spec
                    .shape
                    .iter()
                    .zip(value.shape())
                    .all(|(declared, &actual)| declared.is_none_or(|d| d == actual));
            if !fits {
                return Err(EngineError::Inference {
                    reason: format!(
                        "input '{}' has shape {:?}, declared {:?}",
                        spec.name,
                        value.shape(),
                        spec.shape
                    ),
                });
            }
        }
        Ok(())
    }

    fn is_state_input(&self, name: &str) -> bool {
        [&self.state_0, &self.state_1]
            .into_iter()
            .flatten()
            .any(|(input, _)| input == name)
    }

    fn state_input<'a, 'b>(
        &self,
        inputs: &'a [ArrayViewD<'b, f32>],
        names: &StateNames,
    ) -> Option<&'a ArrayViewD<'b, f32>> {
        let (name, _) = names.as_ref()?;
        self.inputs
            .iter()
            .position(|spec| spec.name == *name)
            .map(|i| &inputs[i])
    }
}

fn is_output_of(names: &StateNames, output: &str) -> bool {
    names.as_ref().is_some_and(|(_, name)| name == output)
}

fn mean<'a>(values: impl Iterator<Item = &'a f32>) -> f32 {
    let (sum, count) = values.fold((0.0f32, 0usize), |(s, n), &v| (s + v, n + 1));
    if count == 0 { 0.0 } else { sum / count as f32 }
}

impl InferenceSession for RecurrentMock {
    fn inputs(&self) -> &[PortSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[PortSpec] {
        &self.outputs
    }

    fn run(&mut self, inputs: &[ArrayViewD<'_, f32>]) -> EngineResult<Vec<ArrayD<f32>>> {
        self.runs.fetch_add(1, Ordering::Relaxed);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Inference {
                reason: "injected failure".into(),
            });
        }
        self.check_inputs(inputs)?;

        let audio_index = self
            .inputs
            .iter()
            .position(|spec| !self.is_state_input(&spec.name))
            .ok_or_else(|| EngineError::Inference {
                reason: "no audio input".into(),
            })?;
        let x = &inputs[audio_index];
        let state_0 = self.state_input(inputs, &self.state_0);
        let state_1 = self.state_input(inputs, &self.state_1);

        let x_mean = mean(x.iter());
        let x_energy = x.iter().map(|v| v * v).sum::<f32>() / x.len().max(1) as f32;
        let s0_mean = state_0.map_or(0.0, |s| mean(s.iter()));
        let s1_mean = state_1.map_or(0.0, |s| mean(s.iter()));

        let outputs = self
            .outputs
            .iter()
            .map(|spec| {
                if is_output_of(&self.state_0, &spec.name) {
                    match state_0 {
                        Some(s) => {
                            let mut next = s.to_owned();
                            for (j, v) in next.iter_mut().enumerate() {
                                *v = 0.9 * *v + 0.1 * x_mean * (j + 1) as f32;
                            }
                            next
                        }
                        None => ArrayD::zeros(IxDyn(&spec.concrete_shape())),
                    }
                } else if is_output_of(&self.state_1, &spec.name) {
                    match state_1 {
                        Some(s) => s.mapv(|v| 0.5 * v + 0.5 * x_energy),
                        None => ArrayD::zeros(IxDyn(&spec.concrete_shape())),
                    }
                } else {
                    x.mapv(|v| 0.5 * v + 0.1 * s0_mean + 0.05 * s1_mean)
                }
            })
            .collect();

        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array;

    #[test]
    fn test_declared_ports() {
        let mock = RecurrentMock::new(8);
        let outputs: Vec<_> = mock.outputs().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(outputs, ["out_state_1", "output", "out_state_0"]);
        assert_eq!(mock.inputs()[0].shape, vec![Some(1), Some(1), Some(8)]);
    }

    #[test]
    fn test_recurrence() {
        let mut mock = RecurrentMock::new(4);
        let x = Array::from_elem(IxDyn(&[1, 1, 4]), 1.0f32);
        let s0 = Array::from_elem(IxDyn(&[1, 4]), 0.0f32);
        let s1 = Array::from_elem(IxDyn(&[1, 2, 3]), 2.0f32);

        let out = mock.run(&[x.view(), s0.view(), s1.view()]).unwrap();

        // out_state_1
        assert_relative_eq!(out[0][[0, 0, 0]], 1.5);
        // output
        assert_relative_eq!(out[1][[0, 0, 0]], 0.6);
        // out_state_0
        assert_relative_eq!(out[2][[0, 3]], 0.4);
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let mut mock = RecurrentMock::new(4);
        let x = Array::from_elem(IxDyn(&[1, 1, 5]), 1.0f32);
        let s0 = Array::from_elem(IxDyn(&[1, 4]), 0.0f32);
        let s1 = Array::from_elem(IxDyn(&[1, 2, 3]), 0.0f32);
        assert!(mock.run(&[x.view(), s0.view(), s1.view()]).is_err());
    }
}
