//! Realtime duplex denoising
//!
//! Capture and playback are two cpal streams on their own callback threads.
//! The capture callback owns the engine: it collects first-channel samples
//! into a fixed block, runs one inference per full block and pushes the
//! result into an SPSC ring. The playback callback drains the ring into
//! every output channel and plays silence when it runs dry.
//!
//! Neither callback allocates, logs or blocks. Problems are counted in
//! [`StreamStats`] and reported by the control thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize, BuildStreamError, Device, SampleFormat, Stream, StreamConfig, StreamError,
    SupportedStreamConfig, SupportedStreamConfigRange,
};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use ns_ml::DenoiseEngine;

use crate::config::DuplexConfig;
use crate::device::{get_host, select_input_device, select_output_device};
use crate::{AudioError, AudioResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ═══════════════════════════════════════════════════════════════════════════════
// STATISTICS
// ═══════════════════════════════════════════════════════════════════════════════

/// Counters shared between the callbacks and the control thread
#[derive(Debug, Default)]
pub struct StreamStats {
    periods: AtomicU64,
    dropped: AtomicU64,
    deadline_misses: AtomicU64,
    overruns: AtomicU64,
    underruns: AtomicU64,
    stream_errors: AtomicU64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            periods: self.periods.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Blocks run through the engine
    pub periods: u64,
    /// Blocks replaced by silence after an inference error
    pub dropped: u64,
    /// Blocks whose inference took longer than one period
    pub deadline_misses: u64,
    /// Processed blocks discarded because the playback ring was full
    pub overruns: u64,
    /// Playback callbacks that ran out of processed audio
    pub underruns: u64,
    /// Non-fatal backend notifications
    pub stream_errors: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} periods, {} dropped, {} late, {} overruns, {} underruns, {} stream errors",
            self.periods,
            self.dropped,
            self.deadline_misses,
            self.overruns,
            self.underruns,
            self.stream_errors
        )
    }
}

/// Why streaming ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Stop flag raised (Ctrl-C)
    Interrupted,
    /// A device disappeared mid-stream
    DeviceLost(String),
}

/// Summary returned when streaming ends
#[derive(Debug, Clone)]
pub struct StreamReport {
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
    pub block_size: usize,
    pub sample_rate: u32,
}

impl StreamReport {
    /// Ended by request rather than by a device failure
    pub fn is_clean(&self) -> bool {
        self.stop_reason == StopReason::Interrupted
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALLBACK STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Capture side: block accumulation and inference
pub struct CaptureProcessor {
    engine: DenoiseEngine,
    block: Vec<f32>,
    filled: usize,
    processed: Vec<f32>,
    producer: Producer<f32>,
    stats: Arc<StreamStats>,
    deadline: Duration,
}

impl CaptureProcessor {
    pub fn new(
        engine: DenoiseEngine,
        producer: Producer<f32>,
        stats: Arc<StreamStats>,
        sample_rate: u32,
    ) -> Self {
        let block_size = engine.block_size();
        Self {
            engine,
            block: vec![0.0; block_size],
            filled: 0,
            processed: vec![0.0; block_size],
            producer,
            stats,
            deadline: Duration::from_secs_f64(block_size as f64 / sample_rate.max(1) as f64),
        }
    }

    /// Consume one interleaved capture buffer of `channels` channels
    pub fn push_input(&mut self, data: &[f32], channels: usize) {
        for frame in data.chunks(channels.max(1)) {
            self.block[self.filled] = frame[0];
            self.filled += 1;
            if self.filled == self.block.len() {
                self.run_block();
                self.filled = 0;
            }
        }
    }

    fn run_block(&mut self) {
        let start = Instant::now();
        if self
            .engine
            .process_chunk_into(&self.block, &mut self.processed)
            .is_err()
        {
            // State is unchanged; this period plays silence
            self.processed.fill(0.0);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if start.elapsed() > self.deadline {
            self.stats.deadline_misses.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.periods.fetch_add(1, Ordering::Relaxed);

        if self.producer.slots() < self.processed.len() {
            self.stats.overruns.fetch_add(1, Ordering::Relaxed);
            return;
        }
        for &sample in &self.processed {
            let _ = self.producer.push(sample);
        }
    }

    pub fn engine(&self) -> &DenoiseEngine {
        &self.engine
    }
}

/// Playback side: ring drain with silence on underrun
pub struct PlaybackProcessor {
    consumer: Consumer<f32>,
    started: bool,
    stats: Arc<StreamStats>,
}

impl PlaybackProcessor {
    pub fn new(consumer: Consumer<f32>, stats: Arc<StreamStats>) -> Self {
        Self {
            consumer,
            started: false,
            stats,
        }
    }

    /// Fill one interleaved playback buffer, same sample on every channel
    pub fn fill_output(&mut self, data: &mut [f32], channels: usize) {
        let mut starved = false;
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = match self.consumer.pop() {
                Ok(sample) => {
                    self.started = true;
                    sample
                }
                Err(_) => {
                    // Silence before the first block is startup latency
                    starved |= self.started;
                    0.0
                }
            };
            frame.fill(sample);
        }
        if starved {
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Create the capture/playback pair around one engine
pub fn processor_pair(
    engine: DenoiseEngine,
    sample_rate: u32,
    ring_blocks: usize,
    stats: Arc<StreamStats>,
) -> (CaptureProcessor, PlaybackProcessor) {
    let capacity = engine.block_size() * ring_blocks.max(2);
    let (producer, consumer) = RingBuffer::<f32>::new(capacity);
    (
        CaptureProcessor::new(engine, producer, Arc::clone(&stats), sample_rate),
        PlaybackProcessor::new(consumer, stats),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════════

/// Receives cpal error notifications for both streams
#[derive(Clone)]
struct ErrorSink {
    lost: Arc<Mutex<Option<String>>>,
    stats: Arc<StreamStats>,
}

impl ErrorSink {
    fn callback(&self, label: &'static str) -> impl FnMut(StreamError) + Send + 'static {
        let sink = self.clone();
        move |err| match err {
            StreamError::DeviceNotAvailable => {
                log::error!("Audio {} device no longer available", label);
                sink.lost
                    .lock()
                    .get_or_insert_with(|| format!("{label} device no longer available"));
            }
            other => {
                log::warn!("Audio {} stream error: {}", label, other);
                sink.stats.stream_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Runs an engine against live input and output devices
pub struct DuplexController {
    config: DuplexConfig,
}

impl DuplexController {
    pub fn new(config: DuplexConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DuplexConfig {
        &self.config
    }

    /// Stream until `stop` is raised or a device is lost.
    ///
    /// Setup failures are errors. Once streaming, the outcome is always a
    /// [`StreamReport`]; check [`StreamReport::is_clean`].
    pub fn run(&self, mut engine: DenoiseEngine, stop: Arc<AtomicBool>) -> AudioResult<StreamReport> {
        let sample_rate = self.config.sample_rate;
        let block_size = engine.block_size();
        if let Some(requested) = self.config.block_size
            && requested != block_size
        {
            return Err(AudioError::BlockSizeMismatch {
                requested,
                model: block_size,
            });
        }

        let warmup = engine.warmup()?;
        log::info!(
            "Engine warm-up took {:.1}ms (period deadline {:.1}ms)",
            warmup.as_secs_f64() * 1000.0,
            block_size as f64 * 1000.0 / sample_rate as f64
        );

        let host = get_host();
        let input_device = select_input_device(&host, &self.config.input_device)?;
        let output_device = select_output_device(&host, &self.config.output_device)?;
        log::info!(
            "Input: {}, output: {}",
            input_device.name().unwrap_or_else(|_| "<unnamed>".into()),
            output_device.name().unwrap_or_else(|_| "<unnamed>".into())
        );

        let input_config = find_config(&input_device, sample_rate, true)?;
        let output_config = find_config(&output_device, sample_rate, false)?;

        let stats = Arc::new(StreamStats::default());
        let (capture, playback) =
            processor_pair(engine, sample_rate, self.config.ring_blocks, Arc::clone(&stats));
        let capture = Arc::new(Mutex::new(capture));
        let playback = Arc::new(Mutex::new(playback));

        let errors = ErrorSink {
            lost: Arc::new(Mutex::new(None)),
            stats: Arc::clone(&stats),
        };

        let input_stream = build_with_fallback("input", block_size, |buffer_size| {
            let config = stream_config(&input_config, buffer_size);
            let channels = config.channels as usize;
            let capture = Arc::clone(&capture);
            input_device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Some(mut capture) = capture.try_lock() {
                        capture.push_input(data, channels);
                    }
                },
                errors.callback("input"),
                None,
            )
        })?;

        let output_stream = build_with_fallback("output", block_size, |buffer_size| {
            let config = stream_config(&output_config, buffer_size);
            let channels = config.channels as usize;
            let playback = Arc::clone(&playback);
            output_device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    match playback.try_lock() {
                        Some(mut playback) => playback.fill_output(data, channels),
                        None => data.fill(0.0),
                    }
                },
                errors.callback("output"),
                None,
            )
        })?;

        output_stream
            .play()
            .map_err(|e| AudioError::StreamStartError {
                direction: "output",
                reason: e.to_string(),
            })?;
        input_stream
            .play()
            .map_err(|e| AudioError::StreamStartError {
                direction: "input",
                reason: e.to_string(),
            })?;

        log::info!(
            "Streaming at {} Hz, {} samples per period, {:.0}ms ring. Press Ctrl+C to stop.",
            sample_rate,
            block_size,
            self.config.ring_latency_ms(block_size)
        );

        let start = Instant::now();
        let stats_interval = Duration::from_millis(self.config.stats_interval_ms);
        let mut last_stats = start;

        let stop_reason = loop {
            if stop.load(Ordering::SeqCst) {
                break StopReason::Interrupted;
            }
            if let Some(reason) = errors.lost.lock().take() {
                break StopReason::DeviceLost(reason);
            }
            thread::sleep(POLL_INTERVAL);

            if !stats_interval.is_zero() && last_stats.elapsed() >= stats_interval {
                log::info!("Stream: {}", stats.snapshot());
                last_stats = Instant::now();
            }
        };

        log::info!("Stopping...");
        let _ = input_stream.pause();
        let _ = output_stream.pause();
        drop(input_stream);
        drop(output_stream);

        let report = StreamReport {
            stats: stats.snapshot(),
            elapsed: start.elapsed(),
            stop_reason,
            block_size,
            sample_rate,
        };
        match &report.stop_reason {
            StopReason::Interrupted => log::info!("Stream stopped: {}", report.stats),
            StopReason::DeviceLost(reason) => {
                log::error!("Stream torn down ({}): {}", reason, report.stats)
            }
        }
        Ok(report)
    }
}

fn stream_config(supported: &SupportedStreamConfig, buffer_size: BufferSize) -> StreamConfig {
    StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size,
    }
}

/// F32 configuration at `sample_rate` with the fewest channels
fn find_config(
    device: &Device,
    sample_rate: u32,
    is_input: bool,
) -> AudioResult<SupportedStreamConfig> {
    let configs: Result<Vec<SupportedStreamConfigRange>, _> = if is_input {
        device.supported_input_configs().map(|c| c.collect())
    } else {
        device.supported_output_configs().map(|c| c.collect())
    };
    let configs = configs.map_err(|e| AudioError::ConfigError(e.to_string()))?;
    pick_config(&configs, sample_rate, if is_input { "input" } else { "output" })
}

fn pick_config(
    configs: &[SupportedStreamConfigRange],
    sample_rate: u32,
    direction: &'static str,
) -> AudioResult<SupportedStreamConfig> {
    let rate = cpal::SampleRate(sample_rate);

    configs
        .iter()
        .filter(|c| {
            c.sample_format() == SampleFormat::F32
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
        .min_by_key(|c| c.channels())
        .map(|c| c.with_sample_rate(rate))
        .ok_or_else(|| AudioError::UnsupportedSampleRate {
            direction,
            rate: sample_rate,
            offered: describe_configs(configs),
        })
}

/// `"2 ch f32 44100-48000 Hz, 1 ch i16 16000 Hz"`, or `"nothing"`
fn describe_configs(configs: &[SupportedStreamConfigRange]) -> String {
    if configs.is_empty() {
        return "nothing".into();
    }
    configs
        .iter()
        .map(|c| {
            let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
            let rates = if min == max {
                format!("{min}")
            } else {
                format!("{min}-{max}")
            };
            format!("{} ch {} {} Hz", c.channels(), c.sample_format(), rates)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Try a fixed period of `block_size` frames, then the device default
fn build_with_fallback<F>(
    label: &'static str,
    block_size: usize,
    mut build: F,
) -> AudioResult<Stream>
where
    F: FnMut(BufferSize) -> Result<Stream, BuildStreamError>,
{
    match build(BufferSize::Fixed(block_size as u32)) {
        Ok(stream) => Ok(stream),
        Err(e) => {
            log::warn!(
                "{} device rejected a fixed period of {} frames ({}), using its default",
                label,
                block_size,
                e
            );
            build(BufferSize::Default).map_err(|e| AudioError::StreamBuildError {
                direction: label,
                reason: e.to_string(),
            })
        }
    }
}
