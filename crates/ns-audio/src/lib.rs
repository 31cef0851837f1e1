//! ns-audio: Realtime duplex driver
//!
//! Opens a capture and a playback device through cpal and runs every
//! captured block through a [`ns_ml::DenoiseEngine`] on the way to the
//! speakers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  block   ┌──────────────┐  rtrb   ┌───────────────┐
//! │ capture     │─────────▶│ DenoiseEngine│────────▶│ playback      │
//! │ callback    │          │ (owned)      │  ring   │ callback      │
//! └─────────────┘          └──────────────┘         └───────────────┘
//!        ▲                                                  │
//!   input device            StreamStats (atomics)     output device
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use ns_audio::{DuplexConfig, DuplexController};
//!
//! let stop = Arc::new(AtomicBool::new(false));
//! let report = DuplexController::new(DuplexConfig::default()).run(engine, stop)?;
//! println!("{}", report.stats);
//! ```

mod config;
mod device;
mod duplex;
mod error;

pub use config::DuplexConfig;
pub use device::{
    DeviceInfo, DeviceSelector, get_host, list_input_devices, list_output_devices,
    select_input_device, select_output_device,
};
pub use duplex::{
    CaptureProcessor, DuplexController, PlaybackProcessor, StatsSnapshot, StopReason,
    StreamReport, StreamStats, processor_pair,
};
pub use error::{AudioError, AudioResult};
