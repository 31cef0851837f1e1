//! File-to-file denoising
//!
//! load (first channel) → resample to the model rate → pad to whole blocks →
//! process blocks in order → truncate → write mono WAV

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use ns_ml::DenoiseEngine;

use crate::config::OfflineConfig;
use crate::decoder;
use crate::encoder;
use crate::error::{FileProcessingError, FileResult};
use crate::resample;

// ═══════════════════════════════════════════════════════════════════════════════
// TIMING
// ═══════════════════════════════════════════════════════════════════════════════

/// Wall-clock breakdown of one file
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingReport {
    /// Time spent converting the sample rate
    pub resample: Duration,
    /// Time spent inside the engine
    pub inference: Duration,
    /// Decode, padding and encode (= total - resample - inference)
    pub other: Duration,
    /// End to end
    pub total: Duration,
    /// Samples at the processing rate before padding
    pub samples: usize,
    /// Blocks fed to the engine, padding included
    pub blocks: usize,
    /// Processing sample rate
    pub sample_rate: u32,
}

impl TimingReport {
    /// Seconds of audio processed
    pub fn audio_duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples as f64 / self.sample_rate as f64
    }

    /// Total processing time over audio duration (< 1.0 is faster than realtime)
    pub fn realtime_factor(&self) -> f64 {
        let audio = self.audio_duration();
        if audio == 0.0 {
            return 0.0;
        }
        self.total.as_secs_f64() / audio
    }
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resample {:.1}ms, inference {:.1}ms, other {:.1}ms, total {:.1}ms ({} blocks, RTF {:.3})",
            self.resample.as_secs_f64() * 1000.0,
            self.inference.as_secs_f64() * 1000.0,
            self.other.as_secs_f64() * 1000.0,
            self.total.as_secs_f64() * 1000.0,
            self.blocks,
            self.realtime_factor()
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PADDING
// ═══════════════════════════════════════════════════════════════════════════════

/// Zeros appended before blocking. Always at least one sample, so an
/// already aligned input still gets a full extra block.
pub fn padding_for(len: usize, block_size: usize) -> usize {
    block_size - len % block_size
}

/// Length after padding
pub fn padded_len(len: usize, block_size: usize) -> usize {
    len + padding_for(len, block_size)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Run every block of `samples` through the engine in order.
///
/// Returns the processed signal truncated to the input length. Stops at the
/// first failed block.
pub fn denoise_samples(engine: &mut DenoiseEngine, samples: &[f32]) -> FileResult<Vec<f32>> {
    let block_size = engine.block_size();
    let len = samples.len();

    let mut padded = Vec::with_capacity(padded_len(len, block_size));
    padded.extend_from_slice(samples);
    padded.resize(padded_len(len, block_size), 0.0);

    let mut output = vec![0.0f32; padded.len()];
    for (input, out) in padded
        .chunks_exact(block_size)
        .zip(output.chunks_exact_mut(block_size))
    {
        engine.process_chunk_into(input, out)?;
    }

    output.truncate(len);
    Ok(output)
}

/// Denoise one file into a mono WAV at `config.sample_rate`
pub fn process_file(
    engine: &mut DenoiseEngine,
    config: &OfflineConfig,
    input: &Path,
    output: &Path,
) -> FileResult<TimingReport> {
    config.validate()?;
    let block_size = engine.block_size();
    if let Some(requested) = config.block_size
        && requested != block_size
    {
        return Err(FileProcessingError::InvalidConfig(format!(
            "block size {requested} does not match the model's {block_size}"
        )));
    }

    let start = Instant::now();

    let audio = decoder::load_mono(input)?;
    log::info!(
        "Loaded {} ({} Hz, {} channel(s), {:.2}s)",
        input.display(),
        audio.sample_rate,
        audio.source_channels,
        audio.duration()
    );
    if audio.source_channels > 1 {
        log::debug!("Using first of {} channels", audio.source_channels);
    }

    let mut resample_time = Duration::ZERO;
    let samples = if audio.sample_rate != config.sample_rate {
        if !resample::is_available() {
            return Err(FileProcessingError::ResamplerUnavailable {
                from: audio.sample_rate,
                to: config.sample_rate,
            });
        }
        let t = Instant::now();
        let converted = resample::resample(&audio.samples, audio.sample_rate, config.sample_rate)?;
        resample_time = t.elapsed();
        log::debug!(
            "Resampled {} -> {} Hz in {:.1}ms",
            audio.sample_rate,
            config.sample_rate,
            resample_time.as_secs_f64() * 1000.0
        );
        converted
    } else {
        audio.samples
    };

    let len = samples.len();
    let blocks = padded_len(len, block_size) / block_size;

    let t = Instant::now();
    let denoised = denoise_samples(engine, &samples)?;
    let inference_time = t.elapsed();

    encoder::write_mono_wav(output, &denoised, config.sample_rate, config.bit_depth)?;

    let total = start.elapsed();
    let report = TimingReport {
        resample: resample_time,
        inference: inference_time,
        other: total.saturating_sub(resample_time + inference_time),
        total,
        samples: len,
        blocks,
        sample_rate: config.sample_rate,
    };

    log::info!("Wrote {}: {}", output.display(), report);
    Ok(report)
}
