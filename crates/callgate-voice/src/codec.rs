//! ITU-T G.711 μ-law companding between the telephony leg and linear PCM.
//!
//! The telephony leg carries 8-bit μ-law samples at 8 kHz; everything inside
//! the engine works on 16-bit signed linear samples. This module is the one
//! place where the two meet.
//!
//! ## Algorithm
//!
//! Encode takes sign and magnitude, clips the magnitude to [`CLIP`], adds
//! [`BIAS`], derives a 3-bit exponent from the highest set bit of the biased
//! magnitude and a 4-bit mantissa from the four bits below it, then packs
//! `!(sign | exponent << 4 | mantissa)`. Decode reverses it, reconstructing
//! the midpoint of the quantization band.
//!
//! The round trip is lossy: `decode(encode(x))` stays within one quantization
//! step (`8 << exponent`) of `x`.

/// Bias added to the magnitude before segment search.
pub const BIAS: i32 = 132;

/// Largest magnitude representable before biasing.
pub const CLIP: i32 = 32_635;

/// Encoded representation of (near-)zero amplitude.
///
/// Use this, not `0x00`, wherever silence is synthesized for the telephony
/// leg: `0x00` decodes to full-scale negative.
pub const MULAW_SILENCE: u8 = 0xFF;

/// Encode one linear sample as a μ-law byte.
pub fn encode(sample: i16) -> u8 {
    let sample = sample as i32;
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let magnitude = sample.abs().min(CLIP) + BIAS;

    // Biased magnitude lives in [132, 32767]: highest bit is 7..=14.
    let exponent = (31 - (magnitude as u32).leading_zeros()) as i32 - 7;
    let mantissa = (magnitude >> (exponent + 3)) & 0x0F;

    !(sign | ((exponent as u8) << 4) | mantissa as u8)
}

/// Decode one μ-law byte to a linear sample.
pub fn decode(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Quantization step of the band a μ-law byte falls into.
pub fn quantization_step(byte: u8) -> i32 {
    let exponent = ((!byte >> 4) & 0x07) as i32;
    8 << exponent
}

/// Encode a buffer of linear samples.
pub fn encode_buffer(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode(s)).collect()
}

/// Decode a buffer of μ-law bytes.
pub fn decode_buffer(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decode(b)).collect()
}

/// Interpret little-endian 16-bit PCM bytes as samples. A trailing odd byte is ignored.
pub fn pcm16le_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serialize samples as little-endian 16-bit PCM.
pub fn samples_to_pcm16le(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
