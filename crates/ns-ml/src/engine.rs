//! Stateful streaming inference engine
//!
//! Wraps one [`InferenceSession`] and one buffer per recurrent state pair.
//! Every [`DenoiseEngine::process_chunk`] call feeds the current state
//! buffers to the model and replaces them with the state outputs of that
//! same pass, so chunk N's state is the only state chunk N+1 ever sees.
//!
//! The engine takes `&mut self` for every pass. Callers cannot overlap
//! chunks, and a failed pass leaves the buffers exactly as they were.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{ArrayD, ArrayViewD, IxDyn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, PortResolutionError};
use crate::inference::{ExecutionProvider, InferenceSession, TractSession};
use crate::ports::{self, ModelPortMap, PortClassifier};

/// What feeds a session input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Audio,
    State(usize),
}

/// Recurrent denoising model driven one block at a time
pub struct DenoiseEngine {
    session: Box<dyn InferenceSession>,
    ports: Arc<ModelPortMap>,
    block_size: usize,
    /// Audio input reshaped to the port's rank, reused every pass
    audio_input: ArrayD<f32>,
    /// One buffer per state pair, same order as `ports.state_pairs()`
    states: Vec<ArrayD<f32>>,
    /// Session input position -> source
    bindings: Vec<Binding>,
    chunks_processed: u64,
}

impl DenoiseEngine {
    /// Load, compile and resolve an ONNX model
    pub fn new<P: AsRef<Path>>(model_path: P, config: &EngineConfig) -> EngineResult<Self> {
        let path = model_path.as_ref();
        let provider = config.device.resolve()?;

        log::info!(
            "Using execution provider: {} for model {}",
            provider,
            path.display()
        );

        let session = TractSession::load(path, provider)?;
        Self::with_session(Box::new(session), config)
    }

    /// Build an engine around an already compiled session
    pub fn with_session(
        session: Box<dyn InferenceSession>,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        let map = ports::resolve(session.inputs(), session.outputs())?;
        Self::from_parts(session, Arc::new(map), config.fallback_block_size)
    }

    /// Build an engine with a custom port naming convention
    pub fn with_classifier(
        session: Box<dyn InferenceSession>,
        classifier: &dyn PortClassifier,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        let map = ports::resolve_with(session.inputs(), session.outputs(), classifier)?;
        Self::from_parts(session, Arc::new(map), config.fallback_block_size)
    }

    /// Build an engine from a session and a port map resolved earlier.
    ///
    /// The map may be shared between engines compiled from the same model;
    /// every engine still owns its own zeroed state buffers.
    pub fn from_parts(
        session: Box<dyn InferenceSession>,
        ports: Arc<ModelPortMap>,
        fallback_block_size: usize,
    ) -> EngineResult<Self> {
        let input_count = session.inputs().len();
        let output_count = session.outputs().len();
        if ports.input_count() != input_count || ports.output_count() != output_count {
            return Err(PortResolutionError::SessionMismatch {
                reason: format!(
                    "map has {}/{} inputs/outputs, session has {}/{}",
                    ports.input_count(),
                    ports.output_count(),
                    input_count,
                    output_count
                ),
            }
            .into());
        }

        let block_size = ports.declared_block_size().unwrap_or(fallback_block_size);
        if block_size == 0 {
            return Err(EngineError::EngineInit {
                reason: "block size must be non-zero".into(),
            });
        }

        let audio_shape = if ports.audio_input().spec.rank() == 2 {
            vec![1, block_size]
        } else {
            vec![1, 1, block_size]
        };
        let audio_input = ArrayD::zeros(IxDyn(&audio_shape));

        let mut bindings = vec![Binding::Audio; input_count];
        let states = ports
            .state_pairs()
            .iter()
            .enumerate()
            .map(|(k, pair)| {
                bindings[pair.input.index] = Binding::State(k);
                ArrayD::zeros(IxDyn(&pair.input.spec.concrete_shape()))
            })
            .collect::<Vec<_>>();

        log::info!(
            "Resolved ports: audio '{}' -> '{}', {} state pair(s), block size {}",
            ports.audio_input().spec.name,
            ports.audio_output().spec.name,
            states.len(),
            block_size
        );
        for pair in ports.state_pairs() {
            log::debug!(
                "State '{}' -> '{}' {:?}",
                pair.input.spec.name,
                pair.output.spec.name,
                pair.input.spec.concrete_shape()
            );
        }

        Ok(Self {
            session,
            ports,
            block_size,
            audio_input,
            states,
            bindings,
            chunks_processed: 0,
        })
    }

    /// Denoise one block, returning a new block of the same length
    pub fn process_chunk(&mut self, chunk: &[f32]) -> EngineResult<Vec<f32>> {
        let mut output = vec![0.0; self.block_size];
        self.process_chunk_into(chunk, &mut output)?;
        Ok(output)
    }

    /// Denoise one block into a caller-provided buffer.
    ///
    /// On error `output` and every state buffer keep their previous values.
    pub fn process_chunk_into(&mut self, chunk: &[f32], output: &mut [f32]) -> EngineResult<()> {
        if chunk.len() != self.block_size {
            return Err(EngineError::ChunkLength {
                expected: self.block_size,
                got: chunk.len(),
            });
        }
        if output.len() != self.block_size {
            return Err(EngineError::ChunkLength {
                expected: self.block_size,
                got: output.len(),
            });
        }

        for (dst, &src) in self.audio_input.iter_mut().zip(chunk) {
            *dst = src;
        }

        let mut results = {
            let inputs: Vec<ArrayViewD<'_, f32>> = self
                .bindings
                .iter()
                .map(|binding| match *binding {
                    Binding::Audio => self.audio_input.view(),
                    Binding::State(k) => self.states[k].view(),
                })
                .collect();
            self.session.run(&inputs)?
        };

        // Validate everything before touching any state
        let audio_port = self.ports.audio_output();
        let audio = Self::output_tensor(&results, &audio_port.spec.name, audio_port.index)?;
        if audio.len() != self.block_size {
            return Err(EngineError::OutputShape {
                port: audio_port.spec.name.clone(),
                expected: self.block_size,
                got: audio.len(),
            });
        }
        for (pair, state) in self.ports.state_pairs().iter().zip(&self.states) {
            let next = Self::output_tensor(&results, &pair.output.spec.name, pair.output.index)?;
            if next.len() != state.len() {
                return Err(EngineError::OutputShape {
                    port: pair.output.spec.name.clone(),
                    expected: state.len(),
                    got: next.len(),
                });
            }
        }

        for (dst, &src) in output.iter_mut().zip(results[audio_port.index].iter()) {
            *dst = src;
        }

        for (pair, state) in self.ports.state_pairs().iter().zip(self.states.iter_mut()) {
            let next = &mut results[pair.output.index];
            if next.shape() == state.shape() {
                std::mem::swap(state, next);
            } else {
                // Same element count, different layout (e.g. [1, 256] vs [256])
                for (dst, &src) in state.iter_mut().zip(next.iter()) {
                    *dst = src;
                }
            }
        }

        self.chunks_processed += 1;
        Ok(())
    }

    fn output_tensor<'a>(
        results: &'a [ArrayD<f32>],
        port: &str,
        index: usize,
    ) -> EngineResult<&'a ArrayD<f32>> {
        results.get(index).ok_or_else(|| EngineError::Inference {
            reason: format!(
                "backend returned {} outputs, missing '{}' at position {}",
                results.len(),
                port,
                index
            ),
        })
    }

    /// Zero every state buffer
    pub fn reset(&mut self) {
        for state in &mut self.states {
            state.fill(0.0);
        }
        self.chunks_processed = 0;
    }

    /// Run one silent block and reset, so the first real block does not pay
    /// the backend's one-time costs
    pub fn warmup(&mut self) -> EngineResult<Duration> {
        let silence = vec![0.0; self.block_size];
        let start = Instant::now();
        self.process_chunk(&silence)?;
        let elapsed = start.elapsed();
        self.reset();
        log::debug!("Warm-up pass took {:.2}ms", elapsed.as_secs_f64() * 1000.0);
        Ok(elapsed)
    }

    /// Samples per chunk
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Resolved port map, shareable with engines built from the same model
    pub fn port_map(&self) -> &Arc<ModelPortMap> {
        &self.ports
    }

    /// Number of state pairs carried between chunks
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Chunks processed since construction or the last reset
    pub fn chunks_processed(&self) -> u64 {
        self.chunks_processed
    }

    pub fn provider(&self) -> ExecutionProvider {
        self.session.provider()
    }
}

impl std::fmt::Debug for DenoiseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DenoiseEngine")
            .field("block_size", &self.block_size)
            .field("states", &self.states.len())
            .field("chunks_processed", &self.chunks_processed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PairMatch, PortSpec};
    use crate::testing::RecurrentMock;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::Ordering;

    const BLOCK: usize = 64;

    fn engine() -> DenoiseEngine {
        DenoiseEngine::with_session(Box::new(RecurrentMock::new(BLOCK)), &EngineConfig::default())
            .unwrap()
    }

    fn constant(value: f32) -> Vec<f32> {
        vec![value; BLOCK]
    }

    fn ramp() -> Vec<f32> {
        (0..BLOCK).map(|i| i as f32 / BLOCK as f32 - 0.5).collect()
    }

    #[test]
    fn test_block_size_from_declared_shape() {
        let engine = engine();
        assert_eq!(engine.block_size(), BLOCK);
        assert_eq!(engine.state_count(), 2);
        assert_eq!(engine.chunks_processed(), 0);
    }

    #[test]
    fn test_rank2_audio_port() {
        let mut engine = DenoiseEngine::with_session(
            Box::new(RecurrentMock::rank2(BLOCK)),
            &EngineConfig::default(),
        )
        .unwrap();
        let out = engine.process_chunk(&ramp()).unwrap();
        assert_eq!(out.len(), BLOCK);
    }

    #[test]
    fn test_fallback_block_size_for_dynamic_port() {
        let session = RecurrentMock::with_audio_shape(vec![Some(1), Some(1), None]);
        let engine = DenoiseEngine::with_session(Box::new(session), &EngineConfig::default())
            .unwrap();
        assert_eq!(engine.block_size(), crate::DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn test_output_has_block_length() {
        let mut engine = engine();
        let out = engine.process_chunk(&ramp()).unwrap();
        assert_eq!(out.len(), BLOCK);
        assert_eq!(engine.chunks_processed(), 1);
    }

    #[test]
    fn test_deterministic_after_reset() {
        let mut engine = engine();
        let first = engine.process_chunk(&ramp()).unwrap();
        let second = engine.process_chunk(&ramp()).unwrap();
        assert_ne!(first, second, "state must influence the second pass");

        engine.reset();
        let again = engine.process_chunk(&ramp()).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn test_order_sensitivity() {
        let b1 = constant(0.5);
        let b2 = constant(-0.2);

        let mut forward = engine();
        forward.process_chunk(&b1).unwrap();
        let forward_last = forward.process_chunk(&b2).unwrap();

        let mut reversed = engine();
        reversed.process_chunk(&b2).unwrap();
        let reversed_last = reversed.process_chunk(&b1).unwrap();

        let mut fresh = engine();
        let b2_alone = fresh.process_chunk(&b2).unwrap();

        assert_ne!(forward_last, b2_alone, "state from B1 must reach B2");
        assert_ne!(forward_last, reversed_last);
    }

    #[test]
    fn test_engines_do_not_share_state() {
        let mut a = engine();
        let shared = Arc::clone(a.port_map());
        let mut b = DenoiseEngine::from_parts(Box::new(RecurrentMock::new(BLOCK)), shared, 1024)
            .unwrap();

        for _ in 0..5 {
            a.process_chunk(&constant(0.8)).unwrap();
        }

        let mut fresh = engine();
        assert_eq!(
            b.process_chunk(&ramp()).unwrap(),
            fresh.process_chunk(&ramp()).unwrap()
        );
    }

    #[test]
    fn test_failed_pass_leaves_state_untouched() {
        let mock = RecurrentMock::new(BLOCK);
        let fail = mock.failure_switch();
        let mut engine = DenoiseEngine::with_session(Box::new(mock), &EngineConfig::default())
            .unwrap();

        engine.process_chunk(&constant(0.3)).unwrap();

        fail.store(true, Ordering::SeqCst);
        let mut out = constant(7.0);
        let err = engine.process_chunk_into(&constant(0.9), &mut out).unwrap_err();
        assert!(err.is_inference());
        assert_eq!(out, constant(7.0));
        assert_eq!(engine.chunks_processed(), 1);
        fail.store(false, Ordering::SeqCst);

        let after_failure = engine.process_chunk(&ramp()).unwrap();

        let mut reference = engine_with_history(&[constant(0.3)]);
        assert_eq!(after_failure, reference.process_chunk(&ramp()).unwrap());
    }

    fn engine_with_history(blocks: &[Vec<f32>]) -> DenoiseEngine {
        let mut engine = engine();
        for block in blocks {
            engine.process_chunk(block).unwrap();
        }
        engine
    }

    #[test]
    fn test_wrong_chunk_length() {
        let mut engine = engine();
        let err = engine.process_chunk(&[0.0; 10]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ChunkLength {
                expected: BLOCK,
                got: 10
            }
        ));
        assert_eq!(engine.chunks_processed(), 0);
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut engine = engine();
        for _ in 0..10 {
            let out = engine.process_chunk(&constant(0.0)).unwrap();
            for sample in out {
                assert_abs_diff_eq!(sample, 0.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_warmup_resets_state() {
        let mut warmed = engine();
        warmed.warmup().unwrap();
        assert_eq!(warmed.chunks_processed(), 0);

        let mut cold = engine();
        assert_eq!(
            warmed.process_chunk(&ramp()).unwrap(),
            cold.process_chunk(&ramp()).unwrap()
        );
    }

    #[test]
    fn test_port_map_session_mismatch() {
        let wide = engine();
        let map = Arc::clone(wide.port_map());

        let narrow = RecurrentMock::with_ports(
            vec![PortSpec::fixed("input", &[1, 1, BLOCK])],
            vec![PortSpec::fixed("output", &[1, 1, BLOCK])],
        );
        let err = DenoiseEngine::from_parts(Box::new(narrow), map, 1024).unwrap_err();
        assert!(matches!(
            err,
            EngineError::PortResolution(PortResolutionError::SessionMismatch { .. })
        ));
    }

    #[test]
    fn test_unresolvable_model_fails_construction() {
        let broken = RecurrentMock::with_ports(
            vec![
                PortSpec::fixed("input", &[1, 1, BLOCK]),
                PortSpec::fixed("inp_state_3", &[1, 4]),
            ],
            vec![PortSpec::fixed("output", &[1, 1, BLOCK])],
        );
        let err = DenoiseEngine::with_session(Box::new(broken), &EngineConfig::default())
            .unwrap_err();
        assert!(err.is_init());
    }

    /// `h_in<n>` / `h_out<n>` naming, as some exporters emit
    struct HiddenClassifier;

    impl PortClassifier for HiddenClassifier {
        fn is_state(&self, name: &str) -> bool {
            name.starts_with("h_")
        }

        fn state_key<'a>(&self, name: &'a str) -> &'a str {
            name.trim_start_matches("h_in").trim_start_matches("h_out")
        }

        fn pair_match(&self, key: &str, output_name: &str) -> PairMatch {
            if output_name.starts_with("h_out") && self.state_key(output_name) == key {
                PairMatch::Exact
            } else {
                PairMatch::None
            }
        }
    }

    fn hidden_state_mock() -> RecurrentMock {
        // State input first, so audio does not sit at input position 0
        RecurrentMock::with_state_names(
            vec![
                PortSpec::fixed("h_in0", &[1, 4]),
                PortSpec::fixed("frame", &[1, 1, BLOCK]),
            ],
            vec![
                PortSpec::fixed("h_out0", &[1, 4]),
                PortSpec::fixed("enhanced", &[1, 1, BLOCK]),
            ],
            Some(("h_in0", "h_out0")),
            None,
        )
    }

    #[test]
    fn test_custom_classifier_carries_state() {
        let mut engine = DenoiseEngine::with_classifier(
            Box::new(hidden_state_mock()),
            &HiddenClassifier,
            &EngineConfig::default(),
        )
        .unwrap();

        assert_eq!(engine.block_size(), BLOCK);
        assert_eq!(engine.state_count(), 1);
        let pair = &engine.port_map().state_pairs()[0];
        assert_eq!(pair.input.index, 0);
        assert_eq!(pair.output.spec.name, "h_out0");
        assert_eq!(engine.port_map().audio_input().spec.name, "frame");

        let first = engine.process_chunk(&constant(0.4)).unwrap();
        let second = engine.process_chunk(&constant(0.4)).unwrap();
        assert_ne!(first, second, "state must flow through h_in0/h_out0");

        engine.reset();
        assert_eq!(engine.process_chunk(&constant(0.4)).unwrap(), first);
    }

    #[test]
    fn test_default_classifier_rejects_hidden_naming() {
        // Without the custom strategy both h_* ports look like audio
        let err =
            DenoiseEngine::with_session(Box::new(hidden_state_mock()), &EngineConfig::default())
                .unwrap_err();
        assert!(matches!(
            err,
            EngineError::PortResolution(PortResolutionError::MultipleAudioInputs { .. })
        ));
    }

    #[test]
    fn test_failed_pass_is_not_retried() {
        let mock = RecurrentMock::new(BLOCK);
        let fail = mock.failure_switch();
        let runs = mock.run_counter();
        let mut engine = DenoiseEngine::with_session(Box::new(mock), &EngineConfig::default())
            .unwrap();

        fail.store(true, Ordering::SeqCst);
        assert!(engine.process_chunk(&ramp()).is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        fail.store(false, Ordering::SeqCst);
        engine.process_chunk(&ramp()).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(engine.chunks_processed(), 1);
    }
}
