//! Audio file ingestion: reads WAV files and normalizes them to the 16 kHz
//! mono f32 buffers the engine expects.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::{debug, info};

/// Sample rate submitted audio is normalized to.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Reads a WAV file and converts it to 16 kHz mono f32 samples
///
/// # Errors
/// Returns error if the file cannot be opened or uses an unsupported format
pub fn load_wav(path: &Path) -> Result<Vec<f32>> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open WAV file at {}", path.display()))?;
    let spec = reader.spec();

    info!(
        path = %path.display(),
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        bits = spec.bits_per_sample,
        "reading WAV file"
    );

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .context("failed to read float samples")?,
        SampleFormat::Int => {
            // Normalize integers into -1.0..=1.0
            let max_amplitude = f32::from(i16::MAX);
            reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| f32::from(v) / max_amplitude))
                .collect::<Result<_, _>>()
                .context("failed to read integer samples")?
        }
    };

    let mono = downmix_to_mono(&samples, spec.channels);
    let resampled = resample(&mono, spec.sample_rate, TARGET_SAMPLE_RATE);

    #[allow(clippy::cast_precision_loss)]
    let duration_secs = resampled.len() as f32 / TARGET_SAMPLE_RATE as f32;
    info!(
        samples = resampled.len(),
        duration_secs = f64::from(duration_secs),
        "WAV file normalized"
    );

    Ok(resampled)
}

/// Averages interleaved channels into mono (simple downmix)
fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels_f64 = f64::from(channels);
    samples
        .chunks(channels as usize)
        .map(|frame| {
            let sum_f64: f64 = frame.iter().map(|&s| f64::from(s)).sum();
            // f64 → f32: audio samples are stored as f32, precision sufficient
            #[allow(clippy::cast_possible_truncation)]
            {
                (sum_f64 / channels_f64) as f32
            }
        })
        .collect()
}

/// Linear interpolation resampling
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate);

    // Ratio is always positive for valid sample rates
    let output_len_f64 = (samples.len() as f64) / ratio;
    let output_len = if output_len_f64.is_finite() && output_len_f64 >= 0.0 {
        output_len_f64.ceil() as usize
    } else {
        samples.len()
    };

    let mut resampled = Vec::with_capacity(output_len);
    for i in 0..output_len {
        // Source index with linear interpolation
        let src_idx_f64 = (i as f64) * ratio;

        let src_idx_floor = if src_idx_f64 >= 0.0 && src_idx_f64 < (usize::MAX as f64) {
            src_idx_f64.floor() as usize
        } else {
            0
        };

        let src_idx_ceil = (src_idx_floor + 1).min(samples.len().saturating_sub(1));
        let fract = src_idx_f64 - src_idx_f64.floor();

        let sample = if src_idx_floor < samples.len() {
            let s1 = f64::from(samples[src_idx_floor]);
            let s2 = f64::from(samples[src_idx_ceil]);
            // mul_add for better precision
            let interpolated = s1.mul_add(1.0 - fract, s2 * fract);
            interpolated as f32
        } else {
            0.0_f32
        };

        resampled.push(sample);
    }

    debug!(
        source_rate = source_rate,
        target_rate = target_rate,
        input_samples = samples.len(),
        output_samples = resampled.len(),
        "resampling completed"
    );

    resampled
}
