//! # Callgate Voice - Real-Time Turn-Taking for Telephony
//!
//! This crate is the audio core of the callgate gateway. It decides when a
//! caller is speaking, hands finished utterances to the speech/language
//! collaborators, and paces their reply audio back onto the line at exactly
//! one frame every 20 ms, stopping instantly when the caller barges in.
//!
//! ## Architecture
//!
//! ```text
//!  inbound μ-law (160 B / 20 ms)
//!        │
//!  ┌─────▼─────┐   ┌──────────────┐   ┌──────────────┐
//!  │   Codec   │ → │ TurnDetector │ → │ Accumulator  │ → UtteranceHandler
//!  │  decode   │   │  (adaptive)  │   │ (+resample)  │   (recognizer / LLM / TTS)
//!  └───────────┘   └──────┬───────┘   └──────────────┘          │
//!                         │ barge-in                            │ CallHandle
//!  ┌───────────┐   ┌──────▼───────┐   ┌──────────────┐          │
//!  │   Pacer   │ ← │PlaybackQueue │ ← │Codec+Resample│ ←────────┘
//!  │ 20 ms tick│   │   (+marks)   │   │   encode     │
//!  └─────┬─────┘   └──────────────┘   └──────────────┘
//!        ▼
//!  outbound μ-law (160 B / 20 ms)          all inside one call actor task
//! ```

pub mod accumulator;
pub mod call;
pub mod codec;
pub mod error;
pub mod pacer;
pub mod resample;
pub mod session;
pub mod vad;

/// Bytes in one 20 ms μ-law frame at 8 kHz.
pub const FRAME_BYTES: usize = 160;

/// Duration of one frame in milliseconds.
pub const FRAME_MS: u32 = 20;

pub use accumulator::{Utterance, UtteranceAccumulator};
pub use call::{run_call, CallActor, CallHandle, InboundEvent, Outbound, UtteranceHandler};
pub use codec::MULAW_SILENCE;
pub use error::{VoiceError, VoiceResult};
pub use pacer::{FrameKind, PacedFrame, PacerClock, PlaybackQueue};
pub use resample::TELEPHONY_RATE;
pub use session::{CallSession, SessionConfig, SessionEffects, SessionStats, TurnSource};
pub use vad::{EndReason, TurnDetector, VadConfig, VadEvent, VadState};
