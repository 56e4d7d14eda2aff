//! Sample-rate conversion between the telephony leg and speech services.
//!
//! The telephony leg runs at 8 kHz; recognizers and synthesizers typically
//! run at 16 kHz or 24 kHz. Conversions:
//!
//! | from | to | method | output length |
//! |------|----|--------|---------------|
//! | 24 kHz | 8 kHz | keep every third sample | `floor(N / 3)` |
//! | 16 kHz | 8 kHz | 7-tap causal moving average, keep every second | `floor(N / 2)` |
//! | other | 8 kHz | linear interpolation | `floor(N * 8000 / rate)` |
//! | 8 kHz | 24 kHz | original + two blended samples per pair | `3 * N` |
//! | other | other | linear interpolation | `floor(N * dst / src)` |
//!
//! ## Known aliasing on the 24 kHz path
//!
//! The 3:1 decimation has no anti-alias filter. Synthesizer output above
//! 4 kHz folds back into the telephone band. TTS voices carry little energy
//! there, so this has been acceptable; measure before adding a filter, since
//! any filter also changes latency and timbre.

use crate::error::{VoiceError, VoiceResult};

/// Telephony sample rate.
pub const TELEPHONY_RATE: u32 = 8_000;

/// Window of the moving-average low-pass applied before 2:1 decimation.
const LOW_PASS_TAPS: usize = 7;

/// Convert `samples` at `source_rate` to 8 kHz.
pub fn downsample_to_8k(samples: &[i16], source_rate: u32) -> VoiceResult<Vec<i16>> {
    match source_rate {
        0 => Err(VoiceError::InvalidSampleRate(0)),
        TELEPHONY_RATE => Ok(samples.to_vec()),
        24_000 => Ok(samples.iter().step_by(3).take(samples.len() / 3).copied().collect()),
        16_000 => Ok(low_pass_decimate_by_two(samples)),
        rate => Ok(linear_resample(samples, rate, TELEPHONY_RATE)),
    }
}

/// Convert 8 kHz samples to 24 kHz. Output is exactly three times the input.
///
/// Each adjacent pair `(a, b)` yields `a`, `0.67a + 0.33b`, `0.33a + 0.67b`;
/// the last sample is repeated three times so the buffer ends cleanly.
pub fn upsample_8k_to_24k(samples: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * 3);
    for pair in samples.windows(2) {
        let (a, b) = (pair[0] as f32, pair[1] as f32);
        out.push(pair[0]);
        out.push(to_sample(a * 0.67 + b * 0.33));
        out.push(to_sample(a * 0.33 + b * 0.67));
    }
    if let Some(&last) = samples.last() {
        out.extend_from_slice(&[last, last, last]);
    }
    out
}

/// Convert between any two rates, using the dedicated paths where they apply.
pub fn resample(samples: &[i16], source_rate: u32, dest_rate: u32) -> VoiceResult<Vec<i16>> {
    if source_rate == 0 {
        return Err(VoiceError::InvalidSampleRate(source_rate));
    }
    if dest_rate == 0 {
        return Err(VoiceError::InvalidSampleRate(dest_rate));
    }
    match (source_rate, dest_rate) {
        (src, dst) if src == dst => Ok(samples.to_vec()),
        (src, TELEPHONY_RATE) => downsample_to_8k(samples, src),
        (TELEPHONY_RATE, 24_000) => Ok(upsample_8k_to_24k(samples)),
        (src, dst) => Ok(linear_resample(samples, src, dst)),
    }
}

/// Causal moving average over the last [`LOW_PASS_TAPS`] samples, then keep
/// every second filtered sample. The first few outputs average over however
/// many samples exist so far.
fn low_pass_decimate_by_two(samples: &[i16]) -> Vec<i16> {
    let out_len = samples.len() / 2;
    let mut out = Vec::with_capacity(out_len);
    let mut window_sum: i32 = 0;

    for (i, &s) in samples.iter().enumerate().take(out_len * 2) {
        window_sum += s as i32;
        if i >= LOW_PASS_TAPS {
            window_sum -= samples[i - LOW_PASS_TAPS] as i32;
        }
        if i % 2 == 0 {
            let taps = (i + 1).min(LOW_PASS_TAPS) as f32;
            out.push(to_sample(window_sum as f32 / taps));
        }
    }
    out
}

/// Linear interpolation resampler; output length is `floor(N * dst / src)`.
fn linear_resample(samples: &[i16], source_rate: u32, dest_rate: u32) -> Vec<i16> {
    if samples.is_empty() {
        return Vec::new();
    }
    let out_len = (samples.len() as u64 * dest_rate as u64 / source_rate as u64) as usize;
    let step = source_rate as f64 / dest_rate as f64;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let pos = i as f64 * step;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let sample = match (samples.get(idx), samples.get(idx + 1)) {
            (Some(&a), Some(&b)) => to_sample(a as f32 * (1.0 - frac) + b as f32 * frac),
            (Some(&a), None) => a,
            _ => samples[samples.len() - 1],
        };
        out.push(sample);
    }
    out
}

fn to_sample(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
