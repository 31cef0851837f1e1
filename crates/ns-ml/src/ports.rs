//! Model port discovery
//!
//! Denoising models expose no schema beyond their tensor names. The resolver
//! classifies every declared input and output into the audio input, the
//! audio output and an ordered list of recurrent state pairs.
//!
//! Naming conventions differ between exporters, so the classification rule
//! lives behind [`PortClassifier`]. The default [`SubstringClassifier`]
//! treats any port containing `"state"` as recurrent state and pairs
//! `inp_state_3` with `out_state_3` through the identifier after `"state_"`.

use serde::{Deserialize, Serialize};

use crate::error::PortResolutionError;

/// A named tensor slot declared by a compiled model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port name as exported
    pub name: String,
    /// Declared shape, `None` for dimensions only known at run time
    pub shape: Vec<Option<usize>>,
}

impl PortSpec {
    /// Create port with a possibly dynamic shape
    pub fn new(name: impl Into<String>, shape: Vec<Option<usize>>) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    /// Create port with a fully known shape
    pub fn fixed(name: impl Into<String>, shape: &[usize]) -> Self {
        Self::new(name, shape.iter().copied().map(Some).collect())
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Shape with dynamic dimensions resolved to 1
    pub fn concrete_shape(&self) -> Vec<usize> {
        self.shape.iter().map(|d| d.unwrap_or(1)).collect()
    }

    /// Number of values in [`Self::concrete_shape`]
    pub fn element_count(&self) -> usize {
        self.concrete_shape().iter().product()
    }
}

/// A port together with its position in the session's input or output list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRef {
    pub index: usize,
    pub spec: PortSpec,
}

/// Recurrent state carried from one pass to the next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePair {
    pub input: PortRef,
    pub output: PortRef,
}

/// Classified I/O contract of a model. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPortMap {
    audio_input: PortRef,
    audio_output: PortRef,
    state_pairs: Vec<StatePair>,
    input_count: usize,
    output_count: usize,
}

impl ModelPortMap {
    pub fn audio_input(&self) -> &PortRef {
        &self.audio_input
    }

    pub fn audio_output(&self) -> &PortRef {
        &self.audio_output
    }

    /// State pairs in input-port order
    pub fn state_pairs(&self) -> &[StatePair] {
        &self.state_pairs
    }

    /// Number of inputs of the session this map was resolved from
    pub fn input_count(&self) -> usize {
        self.input_count
    }

    /// Number of outputs of the session this map was resolved from
    pub fn output_count(&self) -> usize {
        self.output_count
    }

    /// Block size declared by the audio input port.
    ///
    /// Last dimension of a rank-3 `[batch, channel, samples]` port, second
    /// dimension of a rank-2 `[batch, samples]` port. `None` for other ranks
    /// or a dynamic dimension.
    pub fn declared_block_size(&self) -> Option<usize> {
        let shape = &self.audio_input.spec.shape;
        match shape.len() {
            3 => shape[2],
            2 => shape[1],
            _ => None,
        }
    }
}

/// How strongly an output name matches a state key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PairMatch {
    None,
    /// Output name contains the tagged key somewhere
    Contains,
    /// Output carries exactly the same key
    Exact,
}

/// Pluggable port naming convention
pub trait PortClassifier: Send + Sync {
    /// Whether a port carries recurrent state
    fn is_state(&self, name: &str) -> bool;

    /// Pairing key of a state port
    fn state_key<'a>(&self, name: &'a str) -> &'a str;

    /// How well `output_name` matches the state input keyed by `key`
    fn pair_match(&self, key: &str, output_name: &str) -> PairMatch;
}

/// Name-substring convention (`inp_state_0` ↔ `out_state_0`)
#[derive(Debug, Clone)]
pub struct SubstringClassifier {
    marker: String,
    prefix: String,
}

impl SubstringClassifier {
    pub fn new(marker: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            prefix: prefix.into(),
        }
    }
}

impl Default for SubstringClassifier {
    fn default() -> Self {
        Self::new("state", "state_")
    }
}

impl PortClassifier for SubstringClassifier {
    fn is_state(&self, name: &str) -> bool {
        name.contains(self.marker.as_str())
    }

    fn state_key<'a>(&self, name: &'a str) -> &'a str {
        // Text after the last prefix; the whole name when the prefix is absent
        name.rsplit(self.prefix.as_str()).next().unwrap_or(name)
    }

    fn pair_match(&self, key: &str, output_name: &str) -> PairMatch {
        let tag = format!("{}{}", self.prefix, key);
        if !output_name.contains(&tag) {
            PairMatch::None
        } else if self.state_key(output_name) == key {
            PairMatch::Exact
        } else {
            PairMatch::Contains
        }
    }
}

/// Classify a model's ports with the default naming convention
pub fn resolve(
    inputs: &[PortSpec],
    outputs: &[PortSpec],
) -> Result<ModelPortMap, PortResolutionError> {
    resolve_with(inputs, outputs, &SubstringClassifier::default())
}

/// Classify a model's ports with a custom naming convention
pub fn resolve_with(
    inputs: &[PortSpec],
    outputs: &[PortSpec],
    classifier: &dyn PortClassifier,
) -> Result<ModelPortMap, PortResolutionError> {
    let mut audio_input: Option<PortRef> = None;
    let mut state_pairs = Vec::new();
    let mut claimed = vec![false; outputs.len()];

    for (index, spec) in inputs.iter().enumerate() {
        if !classifier.is_state(&spec.name) {
            if let Some(first) = &audio_input {
                return Err(PortResolutionError::MultipleAudioInputs {
                    first: first.spec.name.clone(),
                    second: spec.name.clone(),
                });
            }
            audio_input = Some(PortRef {
                index,
                spec: spec.clone(),
            });
            continue;
        }

        let key = classifier.state_key(&spec.name);

        let mut best: Option<(usize, PairMatch)> = None;
        for (out_index, out) in outputs.iter().enumerate() {
            if claimed[out_index] {
                continue;
            }
            let quality = classifier.pair_match(key, &out.name);
            if quality == PairMatch::None {
                continue;
            }
            // First match wins unless a later one is strictly better
            if best.is_none_or(|(_, q)| quality > q) {
                best = Some((out_index, quality));
            }
            if quality == PairMatch::Exact {
                break;
            }
        }

        let (out_index, _) = best.ok_or_else(|| PortResolutionError::UnmatchedStateInput {
            name: spec.name.clone(),
        })?;
        claimed[out_index] = true;

        state_pairs.push(StatePair {
            input: PortRef {
                index,
                spec: spec.clone(),
            },
            output: PortRef {
                index: out_index,
                spec: outputs[out_index].clone(),
            },
        });
    }

    let mut audio_output: Option<PortRef> = None;
    for (index, spec) in outputs.iter().enumerate() {
        if classifier.is_state(&spec.name) {
            if !claimed[index] {
                return Err(PortResolutionError::UnmatchedStateOutput {
                    name: spec.name.clone(),
                });
            }
            continue;
        }
        if let Some(first) = &audio_output {
            return Err(PortResolutionError::MultipleAudioOutputs {
                first: first.spec.name.clone(),
                second: spec.name.clone(),
            });
        }
        audio_output = Some(PortRef {
            index,
            spec: spec.clone(),
        });
    }

    Ok(ModelPortMap {
        audio_input: audio_input.ok_or(PortResolutionError::MissingAudioInput)?,
        audio_output: audio_output.ok_or(PortResolutionError::MissingAudioOutput)?,
        state_pairs,
        input_count: inputs.len(),
        output_count: outputs.len(),
    })
}
