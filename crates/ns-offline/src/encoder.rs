//! Mono WAV output

use std::path::Path;

use crate::error::{FileProcessingError, FileResult};

fn unwritable(path: &Path, reason: impl ToString) -> FileProcessingError {
    FileProcessingError::Unwritable {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Write mono samples as WAV, creating parent directories as needed.
///
/// 16 and 24 bit are clamped PCM, 32 bit is IEEE float.
pub fn write_mono_wav(
    path: &Path,
    samples: &[f32],
    sample_rate: u32,
    bit_depth: u16,
) -> FileResult<()> {
    let sample_format = match bit_depth {
        16 | 24 => hound::SampleFormat::Int,
        32 => hound::SampleFormat::Float,
        other => {
            return Err(FileProcessingError::InvalidConfig(format!(
                "Unsupported bit depth: {other}"
            )));
        }
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| unwritable(path, e))?;
        }
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: bit_depth,
        sample_format,
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(|e| unwritable(path, e))?;

    match bit_depth {
        16 => {
            for &sample in samples {
                let s = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                writer.write_sample(s).map_err(|e| unwritable(path, e))?;
            }
        }
        24 => {
            for &sample in samples {
                let s = (sample.clamp(-1.0, 1.0) * 8388607.0) as i32;
                writer.write_sample(s).map_err(|e| unwritable(path, e))?;
            }
        }
        _ => {
            for &sample in samples {
                writer.write_sample(sample).map_err(|e| unwritable(path, e))?;
            }
        }
    }

    writer.finalize().map_err(|e| unwritable(path, e))
}
