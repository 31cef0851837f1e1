//! Sample rate conversion
//!
//! Uses rubato's synchronous FFT resampler, which works on the exact
//! rational ratio `to / from` reduced by the GCD of both rates. Output is
//! delay-compensated and exactly `ceil(len * to / from)` samples long.

use crate::error::{FileProcessingError, FileResult};

/// Greatest common divisor
pub fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// `(up, down)` factors of the conversion `from -> to`
pub fn reduced_ratio(from: u32, to: u32) -> (u32, u32) {
    let g = gcd(from, to).max(1);
    (to / g, from / g)
}

/// Output length for `len` input samples
pub fn output_len(len: usize, from: u32, to: u32) -> usize {
    let (up, down) = reduced_ratio(from, to);
    (len as u64 * up as u64).div_ceil(down as u64) as usize
}

/// Whether this build can convert between rates
pub const fn is_available() -> bool {
    cfg!(feature = "resample")
}

/// Convert mono samples from one rate to another
pub fn resample(samples: &[f32], from: u32, to: u32) -> FileResult<Vec<f32>> {
    if from == to {
        return Ok(samples.to_vec());
    }
    if from == 0 || to == 0 {
        return Err(FileProcessingError::Resample(format!(
            "invalid rates {from} -> {to}"
        )));
    }

    #[cfg(feature = "resample")]
    {
        fft::resample(samples, from, to)
    }
    #[cfg(not(feature = "resample"))]
    {
        Err(FileProcessingError::ResamplerUnavailable { from, to })
    }
}

#[cfg(feature = "resample")]
mod fft {
    use rubato::{FftFixedInOut, Resampler};

    use super::output_len;
    use crate::error::{FileProcessingError, FileResult};

    const CHUNK: usize = 1024;

    fn resample_error(e: impl std::fmt::Display) -> FileProcessingError {
        FileProcessingError::Resample(e.to_string())
    }

    pub(super) fn resample(samples: &[f32], from: u32, to: u32) -> FileResult<Vec<f32>> {
        let expected = output_len(samples.len(), from, to);

        let mut resampler = FftFixedInOut::<f32>::new(from as usize, to as usize, CHUNK, 1)
            .map_err(resample_error)?;
        let delay = resampler.output_delay();

        let mut output = Vec::with_capacity(expected + delay + resampler.output_frames_max());
        let mut pos = 0;

        while pos < samples.len() {
            let needed = resampler.input_frames_next();
            let end = pos + needed;
            let chunk = if end <= samples.len() {
                let wave: &[&[f32]] = &[&samples[pos..end]];
                resampler.process(wave, None)
            } else {
                let wave: &[&[f32]] = &[&samples[pos..]];
                resampler.process_partial(Some(wave), None)
            }
            .map_err(resample_error)?;
            output.extend_from_slice(&chunk[0]);
            pos = end;
        }

        // Flush the filter tail until the delayed signal is complete
        while output.len() < expected + delay {
            let chunk = resampler
                .process_partial::<&[f32]>(None, None)
                .map_err(resample_error)?;
            if chunk[0].is_empty() {
                break;
            }
            output.extend_from_slice(&chunk[0]);
        }

        output.drain(..delay.min(output.len()));
        output.resize(expected, 0.0);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcd_and_ratio() {
        assert_eq!(gcd(48000, 16000), 16000);
        assert_eq!(gcd(44100, 16000), 100);
        assert_eq!(reduced_ratio(44100, 16000), (160, 441));
        assert_eq!(reduced_ratio(8000, 16000), (2, 1));
    }

    #[test]
    fn test_output_len_rounds_up() {
        assert_eq!(output_len(8000, 8000, 16000), 16000);
        assert_eq!(output_len(441, 44100, 16000), 160);
        assert_eq!(output_len(442, 44100, 16000), 161);
    }

    #[test]
    fn test_same_rate_is_identity() {
        let samples = [0.1, -0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000).unwrap(), samples);
    }

    #[cfg(feature = "resample")]
    #[test]
    fn test_upsample_doubles_length() {
        let samples: Vec<f32> = (0..8000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 8000.0).sin())
            .collect();
        let out = resample(&samples, 8000, 16000).unwrap();
        assert_eq!(out.len(), 16000);

        // Energy of a passband tone survives
        let rms_in = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
        let rms_out = (out[2000..14000].iter().map(|s| s * s).sum::<f32>() / 12000.0).sqrt();
        assert!((rms_in - rms_out).abs() < 0.05, "rms {rms_in} vs {rms_out}");
    }

    #[cfg(feature = "resample")]
    #[test]
    fn test_downsample_length() {
        let samples = vec![0.0f32; 44100];
        let out = resample(&samples, 44100, 16000).unwrap();
        assert_eq!(out.len(), 16000);
        assert!(out.iter().all(|s| s.abs() < 1e-6));
    }

    #[cfg(not(feature = "resample"))]
    #[test]
    fn test_unavailable_without_feature() {
        let err = resample(&[0.0; 10], 8000, 16000).unwrap_err();
        assert!(matches!(err, FileProcessingError::ResamplerUnavailable { .. }));
    }
}
