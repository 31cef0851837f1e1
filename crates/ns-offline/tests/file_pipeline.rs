//! Offline pipeline integration tests
//!
//! Runs real WAV files through the pipeline with the in-memory recurrent
//! session. Verifies:
//! - Output length equals input length (padding removed)
//! - Blocks reach the engine in order, padding included
//! - First-channel downmix and sample rate conversion
//! - Abort on inference failure, readable errors for bad paths

use std::path::Path;
use std::sync::atomic::Ordering;

use approx::assert_abs_diff_eq;
use ns_ml::testing::RecurrentMock;
use ns_ml::{DenoiseEngine, EngineConfig};
use ns_offline::{
    FileProcessingError, OfflineConfig, denoise_samples, estimate_file_snr_db, estimate_snr_db,
    process_file,
};
use tempfile::TempDir;

const SAMPLE_RATE: u32 = 16_000;
const BLOCK_SIZE: usize = 1024;

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn engine() -> DenoiseEngine {
    DenoiseEngine::with_session(
        Box::new(RecurrentMock::new(BLOCK_SIZE)),
        &EngineConfig::default(),
    )
    .unwrap()
}

/// Interleaved float WAV so values read back bit-exact
fn write_wav(path: &Path, channels: &[Vec<f32>], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..channels[0].len() {
        for channel in channels {
            writer.write_sample(channel[i]).unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn read_wav(path: &Path) -> (hound::WavSpec, Vec<f32>) {
    let reader = hound::WavReader::open(path).unwrap();
    let spec = reader.spec();
    let samples = reader.into_samples::<f32>().map(|s| s.unwrap()).collect();
    (spec, samples)
}

/// Sine wave with a slow amplitude drift
fn generate_tone(samples: usize, sample_rate: u32) -> Vec<f32> {
    (0..samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (0.3 + 0.1 * t) * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// END TO END
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_silence_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("silence.wav");
    let output = dir.path().join("out/silence_denoised.wav");

    // 3.2 s at 16 kHz: exactly 50 blocks, so one full padding block follows
    let len = 51_200;
    write_wav(&input, &[vec![0.0; len]], SAMPLE_RATE);

    let mut engine = engine();
    let report = process_file(&mut engine, &OfflineConfig::lossless(), &input, &output).unwrap();

    let (spec, samples) = read_wav(&output);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(samples.len(), len);
    for s in samples {
        assert_abs_diff_eq!(s, 0.0, epsilon = 1e-4);
    }

    assert_eq!(report.samples, len);
    assert_eq!(report.blocks, 51);
    assert_eq!(engine.chunks_processed(), 51);
    assert!(report.total >= report.inference);
    assert!(report.total >= report.inference + report.resample);
}

#[test]
fn test_unaligned_length_is_preserved() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("tone.wav");
    let output = dir.path().join("tone_out.wav");

    let len = 3000;
    write_wav(&input, &[generate_tone(len, SAMPLE_RATE)], SAMPLE_RATE);

    let mut engine = engine();
    let report = process_file(&mut engine, &OfflineConfig::lossless(), &input, &output).unwrap();

    assert_eq!(report.blocks, 3);
    assert_eq!(engine.chunks_processed(), 3);
    assert_eq!(read_wav(&output).1.len(), len);
}

#[test]
fn test_file_matches_in_memory_processing() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("tone.wav");
    let output = dir.path().join("tone_out.wav");

    let tone = generate_tone(5000, SAMPLE_RATE);
    write_wav(&input, &[tone.clone()], SAMPLE_RATE);

    process_file(&mut engine(), &OfflineConfig::lossless(), &input, &output).unwrap();
    let expected = denoise_samples(&mut engine(), &tone).unwrap();

    assert_eq!(read_wav(&output).1, expected);
}

#[test]
fn test_blocks_processed_in_order() {
    let tone = generate_tone(4 * BLOCK_SIZE, SAMPLE_RATE);
    let forward = denoise_samples(&mut engine(), &tone).unwrap();

    // Same blocks, reversed order: the last output block must differ
    let mut reversed_input = Vec::with_capacity(tone.len());
    for block in tone.chunks(BLOCK_SIZE).rev() {
        reversed_input.extend_from_slice(block);
    }
    let reversed = denoise_samples(&mut engine(), &reversed_input).unwrap();

    let first_block_forward = &forward[..BLOCK_SIZE];
    let first_block_reversed_position = &reversed[3 * BLOCK_SIZE..];
    assert_ne!(first_block_forward, first_block_reversed_position);
}

// ═══════════════════════════════════════════════════════════════════════════════
// INPUT HANDLING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_stereo_uses_first_channel() {
    let dir = TempDir::new().unwrap();
    let stereo = dir.path().join("stereo.wav");
    let mono = dir.path().join("mono.wav");

    let left = generate_tone(2000, SAMPLE_RATE);
    let right = vec![0.9f32; 2000];
    write_wav(&stereo, &[left.clone(), right], SAMPLE_RATE);
    write_wav(&mono, &[left], SAMPLE_RATE);

    let config = OfflineConfig::lossless();
    let stereo_out = dir.path().join("stereo_out.wav");
    let mono_out = dir.path().join("mono_out.wav");
    process_file(&mut engine(), &config, &stereo, &stereo_out).unwrap();
    process_file(&mut engine(), &config, &mono, &mono_out).unwrap();

    assert_eq!(read_wav(&stereo_out).1, read_wav(&mono_out).1);
}

#[cfg(feature = "resample")]
#[test]
fn test_8k_input_doubles_sample_count() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("narrowband.wav");
    let output = dir.path().join("narrowband_out.wav");

    write_wav(&input, &[generate_tone(8000, 8000)], 8000);

    let report = process_file(&mut engine(), &OfflineConfig::lossless(), &input, &output).unwrap();

    let (spec, samples) = read_wav(&output);
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(samples.len(), 16_000);
    assert_eq!(report.samples, 16_000);
    assert!(report.total >= report.resample + report.inference);
}

#[test]
fn test_missing_input_file() {
    let dir = TempDir::new().unwrap();
    let err = process_file(
        &mut engine(),
        &OfflineConfig::default(),
        &dir.path().join("missing.wav"),
        &dir.path().join("out.wav"),
    )
    .unwrap_err();
    assert!(matches!(err, FileProcessingError::InputNotFound(_)));
}

#[test]
fn test_block_size_mismatch_rejected() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("tone.wav");
    write_wav(&input, &[generate_tone(100, SAMPLE_RATE)], SAMPLE_RATE);

    let config = OfflineConfig {
        block_size: Some(512),
        ..Default::default()
    };
    let err = process_file(&mut engine(), &config, &input, &dir.path().join("out.wav"))
        .unwrap_err();
    assert!(matches!(err, FileProcessingError::InvalidConfig(_)));
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_inference_failure_aborts_without_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("tone.wav");
    let output = dir.path().join("out.wav");
    write_wav(&input, &[generate_tone(4000, SAMPLE_RATE)], SAMPLE_RATE);

    let mock = RecurrentMock::new(BLOCK_SIZE);
    mock.failure_switch().store(true, Ordering::SeqCst);
    let runs = mock.run_counter();
    let mut engine =
        DenoiseEngine::with_session(Box::new(mock), &EngineConfig::default()).unwrap();

    let err = process_file(&mut engine, &OfflineConfig::default(), &input, &output).unwrap_err();
    assert!(matches!(err, FileProcessingError::Inference(_)));
    assert!(!output.exists());
    assert_eq!(engine.chunks_processed(), 0);
    // First block fails once, nothing after it is attempted
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// SNR
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_snr_of_written_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("burst.wav");

    let mut samples = vec![0.001f32; 32_000];
    for s in &mut samples[8_000..24_000] {
        *s = 0.5;
    }
    write_wav(&path, &[samples], SAMPLE_RATE);

    let snr = estimate_file_snr_db(&path).unwrap();
    assert!(snr > 50.0, "snr {snr}");
}

#[test]
fn test_snr_averages_stereo_channels() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stereo_burst.wav");

    let mut left = vec![0.001f32; 32_000];
    for s in &mut left[8_000..24_000] {
        *s = 0.5;
    }
    let right = vec![0.3f32; 32_000];
    let averaged: Vec<f32> = left.iter().zip(&right).map(|(l, r)| (l + r) / 2.0).collect();
    write_wav(&path, &[left.clone(), right], SAMPLE_RATE);

    let snr = estimate_file_snr_db(&path).unwrap();
    assert_abs_diff_eq!(snr, estimate_snr_db(&averaged).unwrap(), epsilon = 1e-9);

    // Left alone reads far cleaner than the mix
    let left_only = estimate_snr_db(&left).unwrap();
    assert!(left_only - snr > 30.0, "left {left_only} vs mix {snr}");
}
