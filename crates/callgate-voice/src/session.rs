//! Per-call composition of the turn-taking engine
//!
//! A [`CallSession`] owns everything one call needs: the turn detector, the
//! utterance accumulator, the playback queue and the running statistics.
//! It is a plain synchronous state machine; the async call actor in
//! [`crate::call`] drives it and carries its effects to collaborators.

use crate::accumulator::{Utterance, UtteranceAccumulator, DEFAULT_MIN_UTTERANCE_MS};
use crate::codec;
use crate::error::{VoiceError, VoiceResult};
use crate::pacer::{FrameKind, PacedFrame, PlaybackQueue};
use crate::resample::{self, TELEPHONY_RATE};
use crate::vad::{EndReason, TurnDetector, VadConfig, VadEvent};
use crate::FRAME_BYTES;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Recognizer rates the accumulator can convert to.
pub const SUPPORTED_RECOGNIZER_RATES: [u32; 3] = [8_000, 16_000, 24_000];

/// Cancelled response ids remembered for late-audio rejection.
const CANCELLED_HISTORY: usize = 8;

/// Where speech start/stop decisions come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnSource {
    /// The built-in adaptive detector
    Local,
    /// `speech_started` / `speech_stopped` signals from an upstream service
    External,
}

/// Configuration for one call session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Turn detector tuning
    pub vad: VadConfig,

    /// Caller speech interrupts reply playback (default: true).
    /// When false the call is half-duplex: caller audio is ignored while a
    /// reply is playing.
    pub barge_in_enabled: bool,

    /// Source of turn decisions (default: local)
    pub turn_source: TurnSource,

    /// Sample rate utterances are delivered at (default: 8000 Hz)
    pub recognizer_rate: u32,

    /// Utterances shorter than this are discarded (default: 100ms)
    pub min_utterance_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            barge_in_enabled: true,
            turn_source: TurnSource::Local,
            recognizer_rate: TELEPHONY_RATE,
            min_utterance_ms: DEFAULT_MIN_UTTERANCE_MS,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> VoiceResult<()> {
        self.vad.validate()?;
        if !SUPPORTED_RECOGNIZER_RATES.contains(&self.recognizer_rate) {
            return Err(VoiceError::Config(format!(
                "recognizer_rate must be one of {:?}, got {}",
                SUPPORTED_RECOGNIZER_RATES, self.recognizer_rate
            )));
        }
        Ok(())
    }
}

/// Running counters for one call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_in: u64,
    pub frames_dropped: u64,
    /// Caller frames skipped while half-duplex playback was active
    pub frames_ignored: u64,
    pub frames_out: u64,
    pub padded_frames: u64,
    pub silence_frames: u64,
    pub utterances: u64,
    pub hard_caps: u64,
    pub short_utterances: u64,
    pub barge_ins: u64,
    pub reply_bytes_accepted: u64,
    pub reply_bytes_dropped: u64,
    pub marks_sent: u64,
    /// Caller turns dropped because half-duplex playback started mid-turn
    pub turns_abandoned: u64,
}

/// What the caller of a session operation must act on
#[derive(Debug, Default)]
pub struct SessionEffects {
    /// Completed utterances to hand to the recognizer, oldest first
    pub utterances: Vec<Utterance>,

    /// Responses whose generation must be cancelled (barge-in), oldest first
    pub cancelled: Vec<String>,

    /// Caller speech began during this operation
    pub speech_started: bool,
}

impl SessionEffects {
    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty() && self.cancelled.is_empty() && !self.speech_started
    }
}

#[derive(Debug)]
struct ActiveReply {
    response_id: String,
    finished: bool,
}

/// Turn-taking state of a single call
#[derive(Debug)]
pub struct CallSession {
    call_id: String,
    config: SessionConfig,
    detector: TurnDetector,
    accumulator: UtteranceAccumulator,
    queue: PlaybackQueue,
    /// Replies with queued or still-generating audio, in arrival order
    replies: Vec<ActiveReply>,
    cancelled: VecDeque<String>,
    external_speaking: bool,
    stats: SessionStats,
    closed: bool,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>, config: SessionConfig) -> VoiceResult<Self> {
        config.validate()?;
        let call_id = call_id.into();
        info!(
            target: "callgate::session",
            call_id = %call_id,
            barge_in = config.barge_in_enabled,
            turn_source = ?config.turn_source,
            "📞 Call session created"
        );
        Ok(Self {
            detector: TurnDetector::new(config.vad.clone()),
            accumulator: UtteranceAccumulator::new(config.min_utterance_ms, config.recognizer_rate),
            queue: PlaybackQueue::new(),
            replies: Vec::new(),
            cancelled: VecDeque::with_capacity(CANCELLED_HISTORY),
            external_speaking: false,
            stats: SessionStats::default(),
            closed: false,
            call_id,
            config,
        })
    }

    /// Ingest one inbound μ-law payload.
    ///
    /// A payload shorter than one frame is dropped. Longer payloads are cut
    /// into whole frames and the remainder is dropped.
    pub fn ingest_media(&mut self, mulaw: &[u8]) -> SessionEffects {
        let mut effects = SessionEffects::default();
        if self.closed {
            return effects;
        }
        if mulaw.len() < FRAME_BYTES {
            self.stats.frames_dropped += 1;
            debug!(target: "callgate::session", call_id = %self.call_id, len = mulaw.len(), "dropping undersized frame");
            return effects;
        }
        let chunks = mulaw.chunks_exact(FRAME_BYTES);
        if !chunks.remainder().is_empty() {
            self.stats.frames_dropped += 1;
            debug!(
                target: "callgate::session",
                call_id = %self.call_id,
                remainder = chunks.remainder().len(),
                "dropping partial frame tail"
            );
        }
        for frame in chunks {
            self.ingest_frame(frame, &mut effects);
        }
        effects
    }

    fn ingest_frame(&mut self, mulaw: &[u8], effects: &mut SessionEffects) {
        if !self.config.barge_in_enabled && self.is_playing() {
            self.stats.frames_ignored += 1;
            return;
        }
        self.stats.frames_in += 1;
        let samples = codec::decode_buffer(mulaw);

        match self.config.turn_source {
            TurnSource::Local => {
                let was_speaking = self.detector.is_speaking();
                let event = self.detector.process_frame(&samples);
                if was_speaking || self.detector.is_speaking() {
                    self.accumulator.push_frame(&samples);
                }
                match event {
                    Some(VadEvent::SpeechStarted) => self.on_speech_started(effects),
                    Some(VadEvent::SpeechEnded { reason, .. }) => self.seal(reason, effects),
                    None => {}
                }
            }
            TurnSource::External => {
                if self.external_speaking {
                    self.accumulator.push_frame(&samples);
                    if self.accumulator.duration_ms() >= self.config.vad.max_utterance_ms {
                        self.external_speaking = false;
                        self.seal(EndReason::HardCap, effects);
                    }
                }
            }
        }
    }

    /// External signal: the caller started speaking.
    pub fn speech_started(&mut self) -> SessionEffects {
        let mut effects = SessionEffects::default();
        if self.closed || self.external_speaking {
            return effects;
        }
        if !self.config.barge_in_enabled && self.is_playing() {
            debug!(target: "callgate::session", call_id = %self.call_id, "ignoring speech start during half-duplex playback");
            return effects;
        }
        if self.config.turn_source == TurnSource::External {
            self.external_speaking = true;
        }
        self.on_speech_started(&mut effects);
        effects
    }

    /// External signal: the caller stopped speaking.
    pub fn speech_stopped(&mut self) -> SessionEffects {
        let mut effects = SessionEffects::default();
        if self.closed || !self.external_speaking {
            return effects;
        }
        self.external_speaking = false;
        self.seal(EndReason::SilenceTimeout, &mut effects);
        effects
    }

    fn on_speech_started(&mut self, effects: &mut SessionEffects) {
        effects.speech_started = true;
        if self.config.barge_in_enabled && self.is_playing() {
            effects.cancelled = self.barge_in();
        }
    }

    /// Stop playback now. Returns every response whose generation must be cancelled.
    fn barge_in(&mut self) -> Vec<String> {
        let dropped = self.queue.clear();
        self.stats.barge_ins += 1;
        let cancelled: Vec<String> = self.replies.drain(..).map(|r| r.response_id).collect();
        info!(
            target: "callgate::session",
            call_id = %self.call_id,
            responses = ?cancelled,
            dropped_bytes = dropped,
            "🛑 Barge-in: reply playback cleared"
        );
        for response_id in &cancelled {
            self.remember_cancelled(response_id);
        }
        cancelled
    }

    fn remember_cancelled(&mut self, response_id: &str) {
        if self.cancelled.iter().any(|id| id == response_id) {
            return;
        }
        if self.cancelled.len() == CANCELLED_HISTORY {
            self.cancelled.pop_front();
        }
        self.cancelled.push_back(response_id.to_string());
    }

    /// Half-duplex playback is starting while the caller is mid-turn. The
    /// caller's next frames will be ignored, so the partial turn cannot be
    /// continued: drop it instead of splicing it onto audio after the reply.
    fn abandon_turn(&mut self) {
        let partial_ms = self.accumulator.duration_ms();
        self.detector.abandon_turn();
        self.accumulator.clear();
        self.external_speaking = false;
        self.stats.turns_abandoned += 1;
        debug!(target: "callgate::session", call_id = %self.call_id, partial_ms, "abandoning caller turn for half-duplex playback");
    }

    fn seal(&mut self, reason: EndReason, effects: &mut SessionEffects) {
        if reason == EndReason::HardCap {
            self.stats.hard_caps += 1;
        }
        match self.accumulator.seal(reason) {
            Ok(Some(utterance)) => {
                self.stats.utterances += 1;
                info!(
                    target: "callgate::session",
                    call_id = %self.call_id,
                    duration_ms = utterance.duration_ms,
                    reason = reason.as_str(),
                    "🗣️ Utterance complete"
                );
                effects.utterances.push(utterance);
            }
            Ok(None) => self.stats.short_utterances += 1,
            Err(e) => warn!(target: "callgate::session", call_id = %self.call_id, "failed to seal utterance: {}", e),
        }
    }

    /// Queue linear PCM16LE reply audio produced at `source_rate`.
    ///
    /// Returns the number of μ-law bytes queued; audio for a response that
    /// was cancelled by barge-in is dropped and reports zero.
    pub fn append_reply_audio(
        &mut self,
        response_id: &str,
        pcm16le: &[u8],
        source_rate: u32,
    ) -> VoiceResult<usize> {
        if self.closed {
            return Err(VoiceError::SessionClosed);
        }
        let samples = codec::pcm16le_to_samples(pcm16le);
        let samples = resample::downsample_to_8k(&samples, source_rate)?;
        let mulaw = codec::encode_buffer(&samples);
        Ok(self.enqueue_reply(response_id, &mulaw))
    }

    /// Queue reply audio already encoded as 8 kHz μ-law.
    pub fn append_reply_mulaw(&mut self, response_id: &str, mulaw: &[u8]) -> VoiceResult<usize> {
        if self.closed {
            return Err(VoiceError::SessionClosed);
        }
        Ok(self.enqueue_reply(response_id, mulaw))
    }

    fn enqueue_reply(&mut self, response_id: &str, mulaw: &[u8]) -> usize {
        if self.cancelled.iter().any(|id| id == response_id) {
            self.stats.reply_bytes_dropped += mulaw.len() as u64;
            debug!(target: "callgate::session", call_id = %self.call_id, response_id, "dropping audio for cancelled response");
            return 0;
        }
        if !self.config.barge_in_enabled
            && !self.is_playing()
            && (self.detector.is_speaking() || self.external_speaking)
        {
            self.abandon_turn();
        }
        if !self.replies.iter().any(|r| r.response_id == response_id) {
            self.replies.push(ActiveReply {
                response_id: response_id.to_string(),
                finished: false,
            });
        }
        self.queue.push(mulaw);
        self.stats.reply_bytes_accepted += mulaw.len() as u64;
        mulaw.len()
    }

    /// The collaborator has produced all audio for `response_id`.
    pub fn finish_reply(&mut self, response_id: &str) {
        if let Some(reply) = self.replies.iter_mut().find(|r| r.response_id == response_id) {
            reply.finished = true;
        }
        if self.queue.is_empty() {
            self.retire_finished_reply();
        }
    }

    /// Place a named mark after the audio queued so far.
    pub fn mark(&mut self, name: impl Into<String>) {
        if !self.closed {
            self.queue.push_mark(name);
        }
    }

    /// Produce the next outbound frame. Never fails; an empty queue yields silence.
    pub fn tick(&mut self) -> PacedFrame {
        let frame = self.queue.next_frame();
        self.stats.frames_out += 1;
        self.stats.marks_sent += frame.marks.len() as u64;
        match frame.kind {
            FrameKind::Audio => {}
            FrameKind::Padded => self.stats.padded_frames += 1,
            FrameKind::Silence => self.stats.silence_frames += 1,
        }
        if self.queue.is_empty() {
            self.retire_finished_reply();
        }
        frame
    }

    /// Only called with an empty queue: finished replies have nothing left to play.
    fn retire_finished_reply(&mut self) {
        self.replies.retain(|r| !r.finished);
    }

    /// Reply audio is queued or a reply is still being generated.
    pub fn is_playing(&self) -> bool {
        !self.queue.is_empty() || self.replies.iter().any(|r| !r.finished)
    }

    /// Responses generating or playing, oldest first.
    pub fn active_responses(&self) -> impl Iterator<Item = &str> {
        self.replies.iter().map(|r| r.response_id.as_str())
    }

    /// Tear down the session. Returns true only on the first call.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        self.queue.clear();
        self.accumulator.clear();
        self.detector.reset();
        self.external_speaking = false;
        info!(
            target: "callgate::session",
            call_id = %self.call_id,
            frames_in = self.stats.frames_in,
            frames_out = self.stats.frames_out,
            utterances = self.stats.utterances,
            barge_ins = self.stats.barge_ins,
            "📴 Call session closed"
        );
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn detector(&self) -> &TurnDetector {
        &self.detector
    }

    pub fn queued_bytes(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MULAW_SILENCE;

    fn silent_frame() -> Vec<u8> {
        vec![MULAW_SILENCE; FRAME_BYTES]
    }

    fn loud_frame() -> Vec<u8> {
        let samples: Vec<i16> = (0..FRAME_BYTES).map(|i| if i % 2 == 0 { 6000 } else { -6000 }).collect();
        codec::encode_buffer(&samples)
    }

    fn session(config: SessionConfig) -> CallSession {
        let mut s = CallSession::new("CA-test", config).unwrap();
        for _ in 0..40 {
            assert!(s.ingest_media(&silent_frame()).is_empty());
        }
        s
    }

    #[test]
    fn undersized_and_oversized_payloads() {
        let mut s = CallSession::new("CA-1", SessionConfig::default()).unwrap();
        s.ingest_media(&[0xFF; 80]);
        s.ingest_media(&[]);
        assert_eq!(s.stats().frames_dropped, 2);
        assert_eq!(s.stats().frames_in, 0);

        // two whole frames plus a 40-byte tail
        s.ingest_media(&[0xFF; 360]);
        assert_eq!(s.stats().frames_in, 2);
        assert_eq!(s.stats().frames_dropped, 3);
    }

    #[test]
    fn local_turn_produces_one_utterance() {
        let mut s = session(SessionConfig::default());
        let started = s.ingest_media(&loud_frame());
        assert!(started.speech_started);
        assert!(started.cancelled.is_empty());

        for _ in 0..29 {
            assert!(s.ingest_media(&loud_frame()).utterances.is_empty());
        }
        let mut utterances = Vec::new();
        for _ in 0..60 {
            utterances.extend(s.ingest_media(&silent_frame()).utterances);
        }
        assert_eq!(utterances.len(), 1);
        let u = &utterances[0];
        assert_eq!(u.end_reason, EndReason::SilenceTimeout);
        assert!(u.duration_ms >= 600);
        assert_eq!(u.audio.len() as u32, u.duration_ms * 16);
        assert_eq!(s.stats().utterances, 1);
    }

    #[test]
    fn barge_in_clears_queue_and_rejects_late_audio() {
        let mut s = session(SessionConfig::default());
        assert_eq!(s.append_reply_mulaw("r1", &[0x11; 1600]).unwrap(), 1600);
        s.tick();
        assert!(s.is_playing());

        let effects = s.ingest_media(&loud_frame());
        assert!(effects.speech_started);
        assert_eq!(effects.cancelled, vec!["r1".to_string()]);
        assert_eq!(s.queued_bytes(), 0);
        assert!(!s.is_playing());
        assert_eq!(s.stats().barge_ins, 1);

        // late audio from the interrupted reply
        assert_eq!(s.append_reply_mulaw("r1", &[0x11; 320]).unwrap(), 0);
        assert_eq!(s.stats().reply_bytes_dropped, 320);
        let frame = s.tick();
        assert_eq!(frame.kind, FrameKind::Silence);

        // a new reply plays normally
        assert_eq!(s.append_reply_mulaw("r2", &[0x22; 160]).unwrap(), 160);
        assert_eq!(s.tick().payload, [0x22; FRAME_BYTES]);
    }

    #[test]
    fn barge_in_cancels_every_overlapping_reply() {
        let mut s = session(SessionConfig::default());
        s.append_reply_mulaw("r1", &[0x11; 800]).unwrap();
        s.append_reply_mulaw("r2", &[0x22; 800]).unwrap();
        assert_eq!(s.active_responses().collect::<Vec<_>>(), ["r1", "r2"]);

        let effects = s.ingest_media(&loud_frame());
        assert_eq!(effects.cancelled, vec!["r1".to_string(), "r2".to_string()]);
        assert_eq!(s.active_responses().count(), 0);
        assert_eq!(s.stats().barge_ins, 1);

        // both generators may still be mid-stream
        assert_eq!(s.append_reply_mulaw("r1", &[0x11; 160]).unwrap(), 0);
        assert_eq!(s.append_reply_mulaw("r2", &[0x22; 160]).unwrap(), 0);
        assert_eq!(s.queued_bytes(), 0);
        assert_eq!(s.tick().kind, FrameKind::Silence);
        assert_eq!(s.stats().reply_bytes_dropped, 320);
    }

    #[test]
    fn finished_reply_is_still_cancelled_while_its_audio_plays() {
        let mut s = session(SessionConfig::default());
        s.append_reply_mulaw("r1", &[0x11; 480]).unwrap();
        s.finish_reply("r1");
        s.append_reply_mulaw("r2", &[0x22; 480]).unwrap();
        s.tick();

        let effects = s.ingest_media(&loud_frame());
        assert_eq!(effects.cancelled, vec!["r1".to_string(), "r2".to_string()]);
    }

    #[test]
    fn half_duplex_playback_abandons_partial_turn() {
        let config = SessionConfig { barge_in_enabled: false, ..Default::default() };
        let mut s = session(config.clone());
        for _ in 0..10 {
            s.ingest_media(&loud_frame());
        }
        assert!(s.detector().is_speaking());

        // a reply starts mid-turn; the caller keeps talking through it
        s.append_reply_mulaw("r1", &[0x11; 800]).unwrap();
        assert_eq!(s.stats().turns_abandoned, 1);
        assert!(!s.detector().is_speaking());
        for _ in 0..400 {
            assert!(s.ingest_media(&loud_frame()).is_empty());
        }
        assert_eq!(s.stats().frames_ignored, 400);
        s.finish_reply("r1");
        for _ in 0..5 {
            s.tick();
        }
        assert!(!s.is_playing());

        // silence after playback must not reopen or close the dropped turn
        for _ in 0..40 {
            assert!(s.ingest_media(&silent_frame()).is_empty());
        }

        // a fresh turn carries none of the audio from before the gap
        let mut fresh = session(config);
        let mut utterances = Vec::new();
        let mut expected = Vec::new();
        for frame in std::iter::repeat(loud_frame()).take(30).chain(std::iter::repeat(silent_frame()).take(60)) {
            utterances.extend(s.ingest_media(&frame).utterances);
            expected.extend(fresh.ingest_media(&frame).utterances);
        }
        assert_eq!(utterances.len(), 1);
        assert_eq!(expected.len(), 1);
        assert_eq!(utterances[0].duration_ms, expected[0].duration_ms);
        assert_eq!(utterances[0].audio, expected[0].audio);
        assert_eq!(s.stats().hard_caps, 0);
    }

    #[test]
    fn half_duplex_playback_abandons_external_turn() {
        let config = SessionConfig {
            barge_in_enabled: false,
            turn_source: TurnSource::External,
            ..Default::default()
        };
        let mut s = CallSession::new("CA-ext", config).unwrap();
        s.speech_started();
        for _ in 0..10 {
            s.ingest_media(&loud_frame());
        }
        s.append_reply_mulaw("r1", &[0x11; 160]).unwrap();
        assert_eq!(s.stats().turns_abandoned, 1);
        assert!(s.speech_stopped().utterances.is_empty());
    }

    #[test]
    fn half_duplex_ignores_caller_while_playing() {
        let config = SessionConfig { barge_in_enabled: false, ..Default::default() };
        let mut s = session(config);
        s.append_reply_mulaw("r1", &[0x11; 480]).unwrap();
        s.finish_reply("r1");

        for _ in 0..3 {
            let effects = s.ingest_media(&loud_frame());
            assert!(effects.is_empty());
        }
        assert_eq!(s.stats().frames_ignored, 3);
        assert_eq!(s.queued_bytes(), 480);

        for _ in 0..3 {
            s.tick();
        }
        assert!(!s.is_playing());
        assert!(s.ingest_media(&loud_frame()).speech_started);
    }

    #[test]
    fn external_turn_signals_drive_utterances() {
        let config = SessionConfig { turn_source: TurnSource::External, ..Default::default() };
        let mut s = CallSession::new("CA-ext", config).unwrap();

        // no signal yet: audio is not buffered
        s.ingest_media(&loud_frame());
        assert!(s.speech_stopped().utterances.is_empty());

        assert!(s.speech_started().speech_started);
        for _ in 0..10 {
            s.ingest_media(&silent_frame());
        }
        let effects = s.speech_stopped();
        assert_eq!(effects.utterances.len(), 1);
        assert_eq!(effects.utterances[0].duration_ms, 200);
    }

    #[test]
    fn external_barge_in_cancels_generation() {
        let config = SessionConfig { turn_source: TurnSource::External, ..Default::default() };
        let mut s = CallSession::new("CA-ext", config).unwrap();
        s.append_reply_mulaw("r7", &[0x33; 800]).unwrap();
        let effects = s.speech_started();
        assert_eq!(effects.cancelled, vec!["r7".to_string()]);
        assert_eq!(s.queued_bytes(), 0);
    }

    #[test]
    fn external_hard_cap() {
        let config = SessionConfig { turn_source: TurnSource::External, ..Default::default() };
        let mut s = CallSession::new("CA-ext", config).unwrap();
        s.speech_started();
        let mut utterances = Vec::new();
        for _ in 0..310 {
            utterances.extend(s.ingest_media(&silent_frame()).utterances);
        }
        assert_eq!(utterances.len(), 1);
        assert_eq!(utterances[0].end_reason, EndReason::HardCap);
        assert_eq!(utterances[0].duration_ms, 6000);
        assert_eq!(s.stats().hard_caps, 1);
    }

    #[test]
    fn reply_audio_is_downsampled_and_encoded() {
        let mut s = CallSession::new("CA-tts", SessionConfig::default()).unwrap();
        let pcm = codec::samples_to_pcm16le(&vec![1000i16; 480]);
        assert_eq!(s.append_reply_audio("r1", &pcm, 24_000).unwrap(), 160);
        let frame = s.tick();
        assert_eq!(frame.kind, FrameKind::Audio);
        assert!(frame.payload.iter().all(|&b| b == codec::encode(1000)));

        assert!(matches!(
            s.append_reply_audio("r1", &pcm, 0),
            Err(VoiceError::InvalidSampleRate(0))
        ));
    }

    #[test]
    fn marks_flow_through_tick() {
        let mut s = CallSession::new("CA-mark", SessionConfig::default()).unwrap();
        s.append_reply_mulaw("r1", &[0x44; 160]).unwrap();
        s.mark("r1-end");
        let frame = s.tick();
        assert_eq!(frame.marks, vec!["r1-end".to_string()]);
        assert_eq!(s.stats().marks_sent, 1);
    }

    #[test]
    fn finished_reply_retires_when_drained() {
        let mut s = CallSession::new("CA-r", SessionConfig::default()).unwrap();
        s.append_reply_mulaw("r1", &[0x55; 200]).unwrap();
        s.finish_reply("r1");
        assert_eq!(s.active_responses().collect::<Vec<_>>(), ["r1"]);
        s.tick();
        assert_eq!(s.tick().kind, FrameKind::Padded);
        assert_eq!(s.active_responses().count(), 0);
        assert_eq!(s.stats().padded_frames, 1);
    }

    #[test]
    fn close_is_idempotent() {
        let mut s = CallSession::new("CA-close", SessionConfig::default()).unwrap();
        s.append_reply_mulaw("r1", &[0x66; 160]).unwrap();
        assert!(s.close());
        assert!(!s.close());
        assert!(s.is_closed());
        assert!(matches!(s.append_reply_mulaw("r1", &[1]), Err(VoiceError::SessionClosed)));
        assert!(s.ingest_media(&loud_frame()).is_empty());
        assert_eq!(s.tick().kind, FrameKind::Silence);
    }

    #[test]
    fn config_rejects_unsupported_recognizer_rate() {
        let config = SessionConfig { recognizer_rate: 11_025, ..Default::default() };
        assert!(matches!(CallSession::new("x", config), Err(VoiceError::Config(_))));

        let parsed: SessionConfig =
            serde_json::from_str(r#"{"barge_in_enabled": false, "turn_source": "external", "vad": {"hangover_ms": 300}}"#)
                .unwrap();
        assert!(!parsed.barge_in_enabled);
        assert_eq!(parsed.turn_source, TurnSource::External);
        assert_eq!(parsed.vad.hangover_ms, 300);
        assert_eq!(parsed.recognizer_rate, 8_000);
    }

    #[test]
    fn stats_serialize() {
        let s = CallSession::new("CA-s", SessionConfig::default()).unwrap();
        let json = serde_json::to_value(s.stats()).unwrap();
        assert_eq!(json["frames_in"], 0);
        assert_eq!(json["barge_ins"], 0);
    }
}
