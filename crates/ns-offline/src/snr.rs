//! Blind SNR estimate from frame energy percentiles
//!
//! Loud frames stand in for the signal level and quiet frames for the noise
//! floor. Useful to compare a file before and after denoising, not as an
//! absolute measurement.

use std::path::Path;

use crate::decoder;
use crate::error::{FileProcessingError, FileResult};

pub const FRAME_LENGTH: usize = 2048;
pub const HOP_LENGTH: usize = 512;
const EPSILON: f64 = 1e-12;

/// RMS of centered frames, zero-padded by half a frame on both sides
pub fn frame_rms(samples: &[f32], frame_length: usize, hop_length: usize) -> Vec<f64> {
    if samples.is_empty() || frame_length == 0 || hop_length == 0 {
        return Vec::new();
    }

    let pad = frame_length / 2;
    let padded_len = samples.len() + 2 * pad;
    if padded_len < frame_length {
        return Vec::new();
    }
    let frames = 1 + (padded_len - frame_length) / hop_length;

    (0..frames)
        .map(|f| {
            let start = f * hop_length;
            // Padded index i maps to sample i - pad
            let lo = start.saturating_sub(pad).min(samples.len());
            let hi = (start + frame_length).saturating_sub(pad).min(samples.len());
            let energy: f64 = samples[lo..hi].iter().map(|&s| (s as f64) * (s as f64)).sum();
            (energy / frame_length as f64).sqrt()
        })
        .collect()
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// SNR in dB: 90th percentile frame RMS over 10th percentile frame RMS
pub fn estimate_snr_db(samples: &[f32]) -> FileResult<f64> {
    if samples.is_empty() {
        return Err(FileProcessingError::EmptyAudio);
    }

    let rms = frame_rms(samples, FRAME_LENGTH, HOP_LENGTH);
    let (Some(signal), Some(noise)) = (percentile(&rms, 90.0), percentile(&rms, 10.0)) else {
        return Err(FileProcessingError::EmptyAudio);
    };

    Ok(20.0 * ((signal + EPSILON) / (noise + EPSILON)).log10())
}

/// Decode a file (average of all channels, native rate) and estimate its SNR
pub fn estimate_file_snr_db(path: &Path) -> FileResult<f64> {
    let audio = decoder::load_averaged(path)?;
    estimate_snr_db(&audio.samples)
}
