//! ns-offline: Offline file denoising
//!
//! Decodes a file, converts it to the model rate, runs it block by block
//! through a [`ns_ml::DenoiseEngine`] and writes a mono WAV.
//!
//! ## Features
//!
//! - `symphonia` (default): FLAC, MP3, OGG and other containers. WAV is
//!   always readable.
//! - `resample` (default): inputs at rates other than the model rate.

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod resample;
pub mod snr;

pub use config::OfflineConfig;
pub use decoder::{AudioInfo, Downmix, MonoAudio, load_averaged, load_mono, load_with, probe};
pub use encoder::write_mono_wav;
pub use error::{FileProcessingError, FileResult};
pub use pipeline::{TimingReport, denoise_samples, padded_len, padding_for, process_file};
pub use snr::{estimate_file_snr_db, estimate_snr_db};
