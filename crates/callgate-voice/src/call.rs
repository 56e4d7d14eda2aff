//! **Call actor**: one task per call serializing ingestion, collaborator
//! callbacks and the 20 ms playback tick.
//!
//! The actor owns the [`CallSession`]. Inbound transport frames, commands from
//! collaborators (through a [`CallHandle`]) and the pacer deadline all funnel
//! into one `select!` loop, so a barge-in is always applied before the next
//! outbound frame is produced.

use crate::accumulator::Utterance;
use crate::error::{VoiceError, VoiceResult};
use crate::pacer::PacerClock;
use crate::session::{CallSession, SessionEffects, SessionStats};
use crate::FRAME_BYTES;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Consumer of completed utterances and producer of reply audio.
///
/// Calls happen on the call actor's task and must return promptly; do the
/// slow work (recognition, generation, synthesis) elsewhere and push audio
/// back through the [`CallHandle`].
pub trait UtteranceHandler: Send + Sync {
    /// A caller utterance is complete.
    fn on_utterance(&self, utterance: Utterance, handle: CallHandle);

    /// The caller barged in; stop producing audio for `response_id`.
    fn cancel_generation(&self, response_id: &str);

    /// The call is gone. Release anything held for it.
    fn call_ended(&self, _call_id: &str) {}
}

/// Inbound transport events for one call
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Raw μ-law payload, normally one 160-byte frame
    Media(Vec<u8>),
    /// The transport ended the stream
    Stop,
}

/// Outbound transport messages for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Media([u8; FRAME_BYTES]),
    /// All audio queued before this mark has been sent
    Mark(String),
}

#[derive(Debug)]
enum Command {
    ReplyAudio { response_id: String, pcm16le: Vec<u8>, source_rate: u32 },
    ReplyMulaw { response_id: String, mulaw: Vec<u8> },
    FinishReply(String),
    Mark(String),
    SpeechStarted,
    SpeechStopped,
}

/// Cloneable handle collaborators use to talk back to a running call.
///
/// Every method is non-blocking. Once the call has ended they return
/// [`VoiceError::SessionClosed`].
#[derive(Debug, Clone)]
pub struct CallHandle {
    call_id: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    stats: watch::Receiver<SessionStats>,
}

impl CallHandle {
    fn send(&self, command: Command) -> VoiceResult<()> {
        self.commands.send(command).map_err(|_| VoiceError::SessionClosed)
    }

    /// Queue linear PCM16LE reply audio produced at `source_rate`.
    pub fn append_reply_audio(
        &self,
        response_id: impl Into<String>,
        pcm16le: Vec<u8>,
        source_rate: u32,
    ) -> VoiceResult<()> {
        self.send(Command::ReplyAudio {
            response_id: response_id.into(),
            pcm16le,
            source_rate,
        })
    }

    /// Queue reply audio already encoded as 8 kHz μ-law.
    pub fn append_reply_mulaw(&self, response_id: impl Into<String>, mulaw: Vec<u8>) -> VoiceResult<()> {
        self.send(Command::ReplyMulaw {
            response_id: response_id.into(),
            mulaw,
        })
    }

    /// No more audio will follow for `response_id`.
    pub fn finish_reply(&self, response_id: impl Into<String>) -> VoiceResult<()> {
        self.send(Command::FinishReply(response_id.into()))
    }

    /// Ask for `name` to be reported once everything queued so far has been sent.
    pub fn mark(&self, name: impl Into<String>) -> VoiceResult<()> {
        self.send(Command::Mark(name.into()))
    }

    /// External turn signal: caller started speaking.
    pub fn speech_started(&self) -> VoiceResult<()> {
        self.send(Command::SpeechStarted)
    }

    /// External turn signal: caller stopped speaking.
    pub fn speech_stopped(&self) -> VoiceResult<()> {
        self.send(Command::SpeechStopped)
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Latest statistics snapshot published by the actor.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// The per-call task. Build it, hand out [`CallHandle`]s, then [`run`](Self::run) it.
pub struct CallActor {
    session: CallSession,
    handler: Arc<dyn UtteranceHandler>,
    handle: CallHandle,
    commands: mpsc::UnboundedReceiver<Command>,
    stats_tx: watch::Sender<SessionStats>,
}

impl CallActor {
    pub fn new(session: CallSession, handler: Arc<dyn UtteranceHandler>) -> Self {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = watch::channel(session.stats().clone());
        let handle = CallHandle {
            call_id: Arc::from(session.call_id()),
            commands: command_tx,
            stats: stats_rx,
        };
        Self {
            session,
            handler,
            handle,
            commands,
            stats_tx,
        }
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }

    /// Drive the call until the transport stops or either channel closes.
    /// Returns the final statistics.
    pub async fn run(
        mut self,
        mut inbound_rx: mpsc::Receiver<InboundEvent>,
        outbound_tx: mpsc::Sender<Outbound>,
    ) -> SessionStats {
        info!(target: "callgate::call", call_id = %self.handle.call_id, "▶️ Call actor started");

        let mut clock = PacerClock::new(Instant::now());
        let mut deadline = clock.start();

        loop {
            tokio::select! {
                biased;

                event = inbound_rx.recv() => match event {
                    Some(InboundEvent::Media(payload)) => {
                        let effects = self.session.ingest_media(&payload);
                        self.apply(effects);
                    }
                    Some(InboundEvent::Stop) => {
                        debug!(target: "callgate::call", call_id = %self.handle.call_id, "transport stop");
                        break;
                    }
                    None => {
                        debug!(target: "callgate::call", call_id = %self.handle.call_id, "inbound channel closed");
                        break;
                    }
                },

                Some(command) = self.commands.recv() => self.execute(command),

                _ = sleep_until(deadline) => {
                    let frame = self.session.tick();
                    if outbound_tx.send(Outbound::Media(frame.payload)).await.is_err() {
                        warn!(target: "callgate::call", call_id = %self.handle.call_id, "outbound channel closed");
                        break;
                    }
                    let mut closed = false;
                    for name in frame.marks {
                        if outbound_tx.send(Outbound::Mark(name)).await.is_err() {
                            closed = true;
                            break;
                        }
                    }
                    if closed {
                        break;
                    }
                    self.stats_tx.send_replace(self.session.stats().clone());
                    deadline = clock.next_deadline(Instant::now());
                }
            }
        }

        self.teardown()
    }

    fn apply(&mut self, effects: SessionEffects) {
        for response_id in &effects.cancelled {
            self.handler.cancel_generation(response_id);
        }
        for utterance in effects.utterances {
            self.handler.on_utterance(utterance, self.handle.clone());
        }
    }

    fn execute(&mut self, command: Command) {
        let result = match command {
            Command::ReplyAudio { response_id, pcm16le, source_rate } => self
                .session
                .append_reply_audio(&response_id, &pcm16le, source_rate)
                .map(|_| ()),
            Command::ReplyMulaw { response_id, mulaw } => self
                .session
                .append_reply_mulaw(&response_id, &mulaw)
                .map(|_| ()),
            Command::FinishReply(response_id) => {
                self.session.finish_reply(&response_id);
                Ok(())
            }
            Command::Mark(name) => {
                self.session.mark(name);
                Ok(())
            }
            Command::SpeechStarted => {
                let effects = self.session.speech_started();
                self.apply(effects);
                Ok(())
            }
            Command::SpeechStopped => {
                let effects = self.session.speech_stopped();
                self.apply(effects);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(target: "callgate::call", call_id = %self.handle.call_id, "rejected reply audio: {}", e);
        }
    }

    fn teardown(mut self) -> SessionStats {
        let in_flight: Vec<String> = self.session.active_responses().map(str::to_owned).collect();
        for response_id in &in_flight {
            self.handler.cancel_generation(response_id);
        }
        if self.session.close() {
            self.handler.call_ended(&self.handle.call_id);
        }
        let stats = self.session.stats().clone();
        self.stats_tx.send_replace(stats.clone());
        info!(
            target: "callgate::call",
            call_id = %self.handle.call_id,
            frames_in = stats.frames_in,
            frames_out = stats.frames_out,
            utterances = stats.utterances,
            barge_ins = stats.barge_ins,
            "⏹️ Call actor finished"
        );
        stats
    }
}

/// Run one call to completion. See [`CallActor`] when handles are needed
/// before the first utterance, e.g. for external turn signals.
pub async fn run_call(
    session: CallSession,
    handler: Arc<dyn UtteranceHandler>,
    inbound_rx: mpsc::Receiver<InboundEvent>,
    outbound_tx: mpsc::Sender<Outbound>,
) -> SessionStats {
    CallActor::new(session, handler).run(inbound_rx, outbound_tx).await
}
