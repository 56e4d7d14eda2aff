//! Adaptive energy-based turn detection
//!
//! Decides, frame by frame, whether the caller is speaking. The detector
//! tracks a smoothed level and a noise floor learned from the line itself,
//! and uses two thresholds derived from that floor so brief dips inside a
//! word do not end the turn.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for turn detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Duration of one frame in milliseconds (default: 20ms)
    pub frame_ms: u32,

    /// Initial window used only to learn the noise floor (default: 800ms)
    pub calibration_ms: u32,

    /// Smoothing factor of the level EMA (default: 0.2)
    pub level_alpha: f32,

    /// Smoothing factor of the noise floor EMA after calibration (default: 0.05)
    pub noise_alpha: f32,

    /// Entry threshold = floor × `entry_ratio` + `entry_offset`
    pub entry_ratio: f32,
    pub entry_offset: f32,

    /// Exit threshold = floor × `exit_ratio` + `exit_offset`
    pub exit_ratio: f32,
    pub exit_offset: f32,

    /// Quiet time required before speech may end (default: 250ms)
    pub hangover_ms: u32,

    /// Minimum time in speech before it may end on silence (default: 500ms)
    pub min_speech_ms: u32,

    /// Speech is force-ended after this long (default: 6000ms)
    pub max_utterance_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            frame_ms: 20,
            calibration_ms: 800,
            level_alpha: 0.2,
            noise_alpha: 0.05,
            entry_ratio: 2.5,
            entry_offset: 0.003,
            exit_ratio: 1.6,
            exit_offset: 0.002,
            hangover_ms: 250,
            min_speech_ms: 500,
            max_utterance_ms: 6000,
        }
    }
}

impl VadConfig {
    /// Reject configurations that cannot produce sensible turns.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.frame_ms == 0 {
            return Err(VoiceError::Config("frame_ms must be positive".into()));
        }
        for (name, alpha) in [("level_alpha", self.level_alpha), ("noise_alpha", self.noise_alpha)] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(VoiceError::Config(format!("{name} must be in (0, 1], got {alpha}")));
            }
        }
        if self.entry_ratio < self.exit_ratio || self.entry_offset < self.exit_offset {
            return Err(VoiceError::Config(
                "entry threshold must not sit below exit threshold".into(),
            ));
        }
        if self.max_utterance_ms < self.min_speech_ms {
            return Err(VoiceError::Config(format!(
                "max_utterance_ms ({}) is shorter than min_speech_ms ({})",
                self.max_utterance_ms, self.min_speech_ms
            )));
        }
        Ok(())
    }
}

/// Speech/silence state of the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadState {
    Silence,
    Speech,
}

/// Why a stretch of speech ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Hangover and minimum speech time both satisfied
    SilenceTimeout,
    /// Speech ran for the configured maximum
    HardCap,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::SilenceTimeout => "silence_timeout",
            EndReason::HardCap => "hard_cap",
        }
    }
}

/// Transitions reported by [`TurnDetector::process_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStarted,
    SpeechEnded { reason: EndReason, speech_ms: u32 },
}

/// Per-call adaptive voice activity detector.
///
/// Owned by exactly one call; not shared.
#[derive(Debug, Clone)]
pub struct TurnDetector {
    config: VadConfig,
    state: VadState,
    level: f32,
    noise_floor: f32,
    calibration_remaining_ms: u32,
    state_ms: u32,
    since_voice_ms: u32,
}

impl TurnDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            calibration_remaining_ms: config.calibration_ms,
            config,
            state: VadState::Silence,
            level: 0.0,
            noise_floor: 0.0,
            state_ms: 0,
            since_voice_ms: 0,
        }
    }

    /// Feed one frame of linear samples; returns the transition it caused, if any.
    ///
    /// Empty frames are ignored and leave every piece of state untouched.
    pub fn process_frame(&mut self, samples: &[i16]) -> Option<VadEvent> {
        if samples.is_empty() {
            return None;
        }

        let rms = frame_rms(samples);
        self.level += self.config.level_alpha * (rms - self.level);

        if self.calibration_remaining_ms > 0 {
            self.noise_floor = self.level;
            self.calibration_remaining_ms =
                self.calibration_remaining_ms.saturating_sub(self.config.frame_ms);
            if self.calibration_remaining_ms == 0 {
                debug!(target: "callgate::vad", noise_floor = self.noise_floor, "calibration complete");
            }
            return None;
        }

        if self.level < self.entry_threshold() {
            self.noise_floor += self.config.noise_alpha * (self.level - self.noise_floor);
        }

        match self.state {
            VadState::Silence => {
                if self.level > self.entry_threshold() {
                    self.state = VadState::Speech;
                    self.state_ms = self.config.frame_ms;
                    self.since_voice_ms = 0;
                    debug!(target: "callgate::vad", level = self.level, entry = self.entry_threshold(), "speech started");
                    return Some(VadEvent::SpeechStarted);
                }
                self.state_ms = self.state_ms.saturating_add(self.config.frame_ms);
                None
            }
            VadState::Speech => {
                self.state_ms = self.state_ms.saturating_add(self.config.frame_ms);
                if self.level < self.exit_threshold() {
                    self.since_voice_ms = self.since_voice_ms.saturating_add(self.config.frame_ms);
                } else {
                    self.since_voice_ms = 0;
                }

                let reason = if self.state_ms >= self.config.max_utterance_ms {
                    EndReason::HardCap
                } else if self.since_voice_ms >= self.config.hangover_ms
                    && self.state_ms >= self.config.min_speech_ms
                {
                    EndReason::SilenceTimeout
                } else {
                    return None;
                };

                let speech_ms = self.state_ms;
                self.state = VadState::Silence;
                self.state_ms = 0;
                self.since_voice_ms = 0;
                debug!(target: "callgate::vad", speech_ms, reason = reason.as_str(), "speech ended");
                Some(VadEvent::SpeechEnded { reason, speech_ms })
            }
        }
    }

    /// Return to silence with zeroed timers. The learned noise floor, the
    /// level EMA and calibration progress survive.
    pub fn reset(&mut self) {
        self.state = VadState::Silence;
        self.state_ms = 0;
        self.since_voice_ms = 0;
    }

    /// Drop the current turn without ending it. Like [`reset`](Self::reset),
    /// but the level EMA also falls back to the noise floor so audio that was
    /// never seen cannot reopen speech on the next frame.
    pub fn abandon_turn(&mut self) {
        self.reset();
        self.level = self.noise_floor;
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn is_speaking(&self) -> bool {
        self.state == VadState::Speech
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration_remaining_ms > 0
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn entry_threshold(&self) -> f32 {
        self.noise_floor * self.config.entry_ratio + self.config.entry_offset
    }

    pub fn exit_threshold(&self) -> f32 {
        self.noise_floor * self.config.exit_ratio + self.config.exit_offset
    }

    /// Time spent in the current state
    pub fn state_ms(&self) -> u32 {
        self.state_ms
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

/// RMS of a frame with samples normalized to [-1, 1].
pub fn frame_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let x = s as f64 / 32768.0;
            x * x
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}
