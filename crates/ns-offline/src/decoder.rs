//! Audio decoding module
//!
//! WAV is read with hound. Every other container goes through symphonia
//! when the `symphonia` feature is enabled. Multi-channel audio is reduced to
//! mono either by keeping the first channel (denoising) or by averaging all
//! channels (level measurement).

use std::path::Path;

use crate::error::{FileProcessingError, FileResult};

/// How interleaved channels become one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Downmix {
    /// Keep channel 0, ignore the rest
    #[default]
    FirstChannel,
    /// Mean of all channels per frame
    Average,
}

impl Downmix {
    /// Reduce interleaved frames of `channels` samples to one sample each
    pub fn apply(self, interleaved: &[f32], channels: usize) -> Vec<f32> {
        let channels = channels.max(1);
        match self {
            Downmix::FirstChannel => interleaved.iter().step_by(channels).copied().collect(),
            Downmix::Average => interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect(),
        }
    }
}

/// Decoded mono signal of an audio file
#[derive(Debug, Clone, PartialEq)]
pub struct MonoAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Native sample rate of the file
    pub sample_rate: u32,
    /// Channel count of the file before downmix
    pub source_channels: usize,
}

impl MonoAudio {
    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Stream parameters read from the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames per channel, when the container declares it
    pub frames: Option<u64>,
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "wav" | "wave"))
}

fn unreadable(path: &Path, reason: impl ToString) -> FileProcessingError {
    FileProcessingError::Unreadable {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Read header information without decoding samples
pub fn probe(path: &Path) -> FileResult<AudioInfo> {
    if !path.exists() {
        return Err(FileProcessingError::InputNotFound(path.display().to_string()));
    }

    if is_wav(path) {
        let reader = hound::WavReader::open(path).map_err(|e| unreadable(path, e))?;
        let spec = reader.spec();
        return Ok(AudioInfo {
            sample_rate: spec.sample_rate,
            channels: spec.channels as usize,
            frames: Some(reader.duration() as u64),
        });
    }

    #[cfg(feature = "symphonia")]
    {
        symphonia_backend::probe(path)
    }
    #[cfg(not(feature = "symphonia"))]
    {
        Err(unsupported(path))
    }
}

/// Decode the first channel of an audio file
pub fn load_mono(path: &Path) -> FileResult<MonoAudio> {
    load_with(path, Downmix::FirstChannel)
}

/// Decode an audio file to the average of its channels
pub fn load_averaged(path: &Path) -> FileResult<MonoAudio> {
    load_with(path, Downmix::Average)
}

/// Decode an audio file to mono with the given downmix
pub fn load_with(path: &Path, downmix: Downmix) -> FileResult<MonoAudio> {
    if !path.exists() {
        return Err(FileProcessingError::InputNotFound(path.display().to_string()));
    }

    if is_wav(path) {
        return load_wav(path, downmix);
    }

    #[cfg(feature = "symphonia")]
    {
        symphonia_backend::decode(path, downmix)
    }
    #[cfg(not(feature = "symphonia"))]
    {
        Err(unsupported(path))
    }
}

#[cfg(not(feature = "symphonia"))]
fn unsupported(path: &Path) -> FileProcessingError {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("unknown");
    FileProcessingError::UnsupportedFormat(format!(
        "{ext} (built without the symphonia feature, only WAV is readable)"
    ))
}

fn load_wav(path: &Path, downmix: Downmix) -> FileResult<MonoAudio> {
    let reader = hound::WavReader::open(path).map_err(|e| unreadable(path, e))?;

    let spec = reader.spec();
    let channels = (spec.channels as usize).max(1);

    let interleaved = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()
        }
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<Vec<_>, _>>(),
    }
    .map_err(|e| unreadable(path, e))?;

    Ok(MonoAudio {
        samples: downmix.apply(&interleaved, channels),
        sample_rate: spec.sample_rate,
        source_channels: channels,
    })
}

#[cfg(feature = "symphonia")]
mod symphonia_backend {
    use std::fs::File;
    use std::path::Path;

    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::{FormatOptions, FormatReader};
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    use super::{AudioInfo, Downmix, MonoAudio, unreadable};
    use crate::error::{FileProcessingError, FileResult};

    fn open(path: &Path) -> FileResult<Box<dyn FormatReader>> {
        let file = File::open(path).map_err(|e| unreadable(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => {
                    FileProcessingError::UnsupportedFormat(what.to_string())
                }
                other => unreadable(path, other),
            })?;

        Ok(probed.format)
    }

    pub(super) fn probe(path: &Path) -> FileResult<AudioInfo> {
        let format = open(path)?;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| unreadable(path, "no audio track found"))?;

        let params = &track.codec_params;
        Ok(AudioInfo {
            sample_rate: params
                .sample_rate
                .ok_or_else(|| unreadable(path, "unknown sample rate"))?,
            channels: params.channels.map(|c| c.count()).unwrap_or(1),
            frames: params.n_frames,
        })
    }

    pub(super) fn decode(path: &Path, downmix: Downmix) -> FileResult<MonoAudio> {
        let mut format = open(path)?;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| unreadable(path, "no audio track found"))?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| unreadable(path, "unknown sample rate"))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(what) => {
                    FileProcessingError::UnsupportedFormat(what.to_string())
                }
                other => unreadable(path, other),
            })?;

        let mut samples = Vec::new();
        let mut channels = codec_params.channels.map(|c| c.count()).unwrap_or(1);

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(unreadable(path, e)),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Skipping corrupt packet in {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(unreadable(path, e)),
            };

            let spec = *decoded.spec();
            channels = spec.channels.count().max(1);

            let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            buf.copy_interleaved_ref(decoded);
            samples.extend(downmix.apply(buf.samples(), channels));
        }

        Ok(MonoAudio {
            samples,
            sample_rate,
            source_channels: channels,
        })
    }
}
