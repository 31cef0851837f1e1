//! ns-denoise: streaming noise suppression
//!
//! Usage:
//!   ns-denoise -m model.onnx [-d CPU] [-i <mic>] [-o <speakers>]   - realtime
//!   ns-denoise -m model.onnx -if noisy.wav -of clean.wav           - one file
//!   ns-denoise devices                                             - list devices
//!   ns-denoise snr a.wav b.wav [--output report.txt]               - SNR estimate

mod config;

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use ns_audio::{DeviceSelector, DuplexController};
use ns_ml::{DenoiseEngine, ExecutionProvider};

use crate::config::{Overrides, RunConfig};

#[derive(Parser)]
#[command(
    name = "ns-denoise",
    version,
    about = "Real-time and offline noise suppression with recurrent ONNX models",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args)]
struct RunArgs {
    /// Path to the ONNX model
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Device to run inference on (CPU, GPU, NPU, AUTO)
    #[arg(short, long)]
    device: Option<ExecutionProvider>,

    /// Input device index or name (microphone)
    #[arg(short = 'i', long)]
    input_device: Option<DeviceSelector>,

    /// Output device index or name (speakers or virtual cable)
    #[arg(short = 'o', long)]
    output_device: Option<DeviceSelector>,

    /// Denoise this file instead of streaming
    #[arg(long, visible_alias = "if")]
    input_file: Option<PathBuf>,

    /// Where to write the denoised file (default: <input>_denoised.wav)
    #[arg(long, visible_alias = "of", requires = "input_file")]
    output_file: Option<PathBuf>,

    /// JSON run configuration; flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output bit depth for file mode (16, 24 or 32)
    #[arg(long)]
    bit_depth: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio input and output devices
    Devices,
    /// Estimate the SNR of audio files
    Snr {
        /// Files to measure
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Write results to this text file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse_from(normalize_legacy_flags(std::env::args_os()));

    match cli.command {
        Some(Commands::Devices) => list_devices(),
        Some(Commands::Snr { files, output }) => measure_snr(&files, output.as_deref()),
        None => run(cli.run),
    }
}

/// Accept the single-dash `-if`/`-of` spellings batch scripts use
fn normalize_legacy_flags(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some("-if") => OsString::from("--input-file"),
            Some("-of") => OsString::from("--output-file"),
            _ => arg,
        })
        .collect()
}

fn run(args: RunArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let config = base.apply(Overrides {
        model: args.model,
        device: args.device,
        input_device: args.input_device,
        output_device: args.output_device,
        bit_depth: args.bit_depth,
    });

    match args.input_file {
        Some(input) => {
            let output = args
                .output_file
                .unwrap_or_else(|| default_output_path(&input));
            let name = file_label(&input);
            match run_offline(&config, &input, &output) {
                Ok(()) => {
                    println!("SUCCESS: {name}");
                    Ok(())
                }
                Err(e) => {
                    println!("ERROR: {name} -> {e:#}");
                    std::process::exit(1);
                }
            }
        }
        None => run_realtime(&config),
    }
}

fn model_path(config: &RunConfig) -> Result<&Path> {
    config
        .model
        .as_deref()
        .context("no model given (use -m/--model or \"model\" in --config)")
}

fn load_engine(config: &RunConfig) -> Result<DenoiseEngine> {
    let model = model_path(config)?;
    log::info!("Loading model from: {}", model.display());
    let engine = DenoiseEngine::new(model, &config.engine)
        .with_context(|| format!("initializing engine for {}", model.display()))?;
    log::info!("Model loaded and compiled successfully");
    Ok(engine)
}

fn run_offline(config: &RunConfig, input: &Path, output: &Path) -> Result<()> {
    let mut engine = load_engine(config)?;

    if let Ok(info) = ns_offline::probe(input) {
        log::debug!(
            "{}: {} Hz, {} channel(s), {:?} frames",
            input.display(),
            info.sample_rate,
            info.channels,
            info.frames
        );
    }

    let report = ns_offline::process_file(&mut engine, &config.offline, input, output)?;
    log::info!("Timing: {report}");
    Ok(())
}

fn run_realtime(config: &RunConfig) -> Result<()> {
    let engine = load_engine(config)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("installing Ctrl-C handler")?;
    }

    let report = DuplexController::new(config.duplex.clone())
        .run(engine, stop)
        .context("audio stream failed")?;

    if !report.is_clean() {
        bail!("stream stopped: {:?} ({})", report.stop_reason, report.stats);
    }
    println!(
        "Processed {} periods in {:.1}s ({} dropped, {} late)",
        report.stats.periods,
        report.elapsed.as_secs_f64(),
        report.stats.dropped,
        report.stats.deadline_misses
    );
    Ok(())
}

fn list_devices() -> Result<()> {
    let inputs = ns_audio::list_input_devices().context("listing input devices")?;
    let outputs = ns_audio::list_output_devices().context("listing output devices")?;

    println!("Input devices:");
    for device in &inputs {
        println!("{device}");
    }
    println!("\nOutput devices:");
    for device in &outputs {
        println!("{device}");
    }
    println!("\n* = default");
    Ok(())
}

fn measure_snr(files: &[PathBuf], output: Option<&Path>) -> Result<()> {
    let mut sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };

    let mut failures = 0;
    for path in files {
        let name = file_label(path);
        match ns_offline::estimate_file_snr_db(path) {
            Ok(snr) => {
                writeln!(sink, "{name} {snr:.2}")?;
                log::info!("{name}: {snr:.2} dB");
            }
            Err(e) => {
                failures += 1;
                writeln!(sink, "{name} ERROR")?;
                log::warn!("{name}: ERROR ({e})");
            }
        }
    }
    sink.flush()?;

    if failures > 0 {
        log::warn!("{failures} of {} file(s) failed", files.len());
    }
    Ok(())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    input.with_file_name(format!("{stem}_denoised.wav"))
}
