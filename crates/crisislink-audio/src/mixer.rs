//! Voice-over-ambience mixing.
//!
//! The background is tiled with whole copies of itself until it covers the
//! foreground plus a trailing margin, trimmed to exactly that length,
//! attenuated, and the foreground is added on top starting at sample zero.
//! There is no randomness anywhere: identical inputs give identical samples.

use tracing::debug;

use crate::track::samples_for_ms;
use crate::{AudioError, AudioTrack};

/// Fixed mixing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixParams {
    /// Gain applied to the background, in dB (negative attenuates).
    pub background_gain_db: f32,
    /// Background-only tail appended after the foreground ends.
    pub margin_ms: u32,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            background_gain_db: -5.0,
            margin_ms: 500,
        }
    }
}

/// Convert a dB offset to a linear amplitude factor.
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Tile, trim and attenuate `background` to cover `foreground_len` samples
/// plus the margin.
pub fn prepare_background(
    foreground_len: usize,
    background: &AudioTrack,
    params: &MixParams,
) -> Result<Vec<f32>, AudioError> {
    if background.is_empty() {
        return Err(AudioError::EmptyBackground);
    }

    let target = foreground_len + samples_for_ms(background.sample_rate, params.margin_ms as u64);

    let mut bed = background.samples.clone();
    if bed.len() < target {
        let copies = target.div_ceil(background.len());
        bed.reserve(copies * background.len() - bed.len());
        while bed.len() < target {
            bed.extend_from_slice(&background.samples);
        }
    }
    bed.truncate(target);

    let gain = db_to_gain(params.background_gain_db);
    for s in &mut bed {
        *s *= gain;
    }
    Ok(bed)
}

/// Overlay `foreground` onto the prepared background.
///
/// The output lasts exactly the foreground plus the margin. Summed samples
/// are clamped to [-1.0, 1.0].
pub fn mix(
    foreground: &AudioTrack,
    background: &AudioTrack,
    params: &MixParams,
) -> Result<AudioTrack, AudioError> {
    if foreground.sample_rate != background.sample_rate {
        return Err(AudioError::SampleRateMismatch {
            foreground: foreground.sample_rate,
            background: background.sample_rate,
        });
    }

    let mut out = prepare_background(foreground.len(), background, params)?;
    for (o, f) in out.iter_mut().zip(&foreground.samples) {
        *o = (*o + *f).clamp(-1.0, 1.0);
    }

    debug!(
        foreground_ms = foreground.duration_ms(),
        background_ms = background.duration_ms(),
        output_samples = out.len(),
        "Mixed foreground over background"
    );
    Ok(AudioTrack::new(foreground.sample_rate, out))
}
