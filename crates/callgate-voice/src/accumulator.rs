//! Utterance buffering between turn detection and the recognizer
//!
//! Collects linear audio while the caller is speaking and seals it into an
//! [`Utterance`] when the turn ends. Sealed utterances are handed off whole
//! and never retained.

use crate::codec;
use crate::error::VoiceResult;
use crate::resample::{self, TELEPHONY_RATE};
use crate::vad::EndReason;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Default floor below which a sealed buffer is treated as noise.
pub const DEFAULT_MIN_UTTERANCE_MS: u32 = 100;

/// A completed caller utterance, ready for recognition
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Linear PCM, 16-bit little-endian, mono, at `sample_rate`
    pub audio: Vec<u8>,

    /// Duration of the captured audio in milliseconds
    pub duration_ms: u32,

    /// What ended the turn
    pub end_reason: EndReason,

    /// Sample rate of `audio`
    pub sample_rate: u32,

    /// When the turn was sealed
    pub ended_at: DateTime<Utc>,
}

impl Utterance {
    /// Decode `audio` back into samples.
    pub fn samples(&self) -> Vec<i16> {
        codec::pcm16le_to_samples(&self.audio)
    }
}

/// Growing 8 kHz buffer for the utterance in progress
#[derive(Debug)]
pub struct UtteranceAccumulator {
    buffer: Vec<u8>,
    min_utterance_ms: u32,
    output_rate: u32,
}

impl UtteranceAccumulator {
    /// `output_rate` is the rate sealed utterances are converted to.
    pub fn new(min_utterance_ms: u32, output_rate: u32) -> Self {
        Self {
            // 6 s of 8 kHz PCM16 covers a hard-capped turn without regrowth
            buffer: Vec::with_capacity(96_000),
            min_utterance_ms,
            output_rate,
        }
    }

    /// Append one frame of 8 kHz samples.
    pub fn push_frame(&mut self, samples: &[i16]) {
        for s in samples {
            self.buffer.extend_from_slice(&s.to_le_bytes());
        }
    }

    /// Close the current utterance.
    ///
    /// Returns `Ok(None)` when the buffer is shorter than the configured
    /// minimum; the buffer is cleared either way.
    pub fn seal(&mut self, end_reason: EndReason) -> VoiceResult<Option<Utterance>> {
        let duration_ms = self.duration_ms();
        let buffer = std::mem::take(&mut self.buffer);

        if duration_ms < self.min_utterance_ms {
            debug!(target: "callgate::accumulator", duration_ms, "discarding short utterance");
            return Ok(None);
        }

        let audio = if self.output_rate == TELEPHONY_RATE {
            buffer
        } else {
            let samples = codec::pcm16le_to_samples(&buffer);
            let converted = resample::resample(&samples, TELEPHONY_RATE, self.output_rate)?;
            codec::samples_to_pcm16le(&converted)
        };

        Ok(Some(Utterance {
            audio,
            duration_ms,
            end_reason,
            sample_rate: self.output_rate,
            ended_at: Utc::now(),
        }))
    }

    /// Drop whatever has been buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Duration of the buffered 8 kHz audio
    pub fn duration_ms(&self) -> u32 {
        let samples = (self.buffer.len() / 2) as u64;
        (samples * 1000 / TELEPHONY_RATE as u64) as u32
    }
}
