//! Placeholder collaborators for running the gateway without speech services.
//!
//! Real deployments plug a recognizer → LLM → synthesizer chain in behind
//! [`UtteranceHandler`]. These stand-ins exercise the same contract:
//! the echo responder streams the caller's own words back as reply audio and
//! stops the moment the call barges in; the silent responder only logs.

use crate::config::EchoConfig;
use callgate_voice::{CallHandle, Utterance, UtteranceHandler};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct Generation {
    call_id: String,
    cancelled: Arc<AtomicBool>,
}

/// Replies to each utterance with the utterance itself.
pub struct EchoResponder {
    config: EchoConfig,
    generations: Arc<DashMap<String, Generation>>,
}

impl EchoResponder {
    pub fn new(config: EchoConfig) -> Self {
        Self {
            config,
            generations: Arc::new(DashMap::new()),
        }
    }

    /// Replies still generating
    pub fn in_flight(&self) -> usize {
        self.generations.len()
    }
}

impl UtteranceHandler for EchoResponder {
    fn on_utterance(&self, utterance: Utterance, handle: CallHandle) {
        let response_id = uuid::Uuid::new_v4().to_string();
        let cancelled = Arc::new(AtomicBool::new(false));
        self.generations.insert(
            response_id.clone(),
            Generation {
                call_id: handle.call_id().to_string(),
                cancelled: cancelled.clone(),
            },
        );

        info!(
            target: "callgate::responder",
            call_id = handle.call_id(),
            response_id = %response_id,
            duration_ms = utterance.duration_ms,
            reason = utterance.end_reason.as_str(),
            "🔁 Echoing utterance"
        );

        let delay = Duration::from_millis(self.config.reply_delay_ms);
        let chunk_bytes = (utterance.sample_rate as usize * self.config.chunk_ms as usize / 1000) * 2;
        let chunk_pause = Duration::from_millis(self.config.chunk_ms as u64 / 2);
        let generations = self.generations.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !cancelled.load(Ordering::SeqCst) {
                debug!(
                    target: "callgate::responder",
                    response_id = %response_id,
                    latency_ms = reply_latency_ms(&utterance),
                    "reply audio starting"
                );
            }
            for chunk in utterance.audio.chunks(chunk_bytes.max(2)) {
                if cancelled.load(Ordering::SeqCst) {
                    debug!(target: "callgate::responder", response_id = %response_id, "generation cancelled");
                    break;
                }
                if let Err(e) =
                    handle.append_reply_audio(response_id.as_str(), chunk.to_vec(), utterance.sample_rate)
                {
                    warn!(target: "callgate::responder", response_id = %response_id, "call gone: {}", e);
                    break;
                }
                // synthesizers stream faster than real time
                tokio::time::sleep(chunk_pause).await;
            }
            if !cancelled.load(Ordering::SeqCst) {
                let _ = handle.finish_reply(response_id.as_str());
                let _ = handle.mark(response_id.as_str());
            }
            generations.remove(&response_id);
        });
    }

    fn cancel_generation(&self, response_id: &str) {
        if let Some(generation) = self.generations.get(response_id) {
            generation.cancelled.store(true, Ordering::SeqCst);
            info!(target: "callgate::responder", response_id, "✋ Reply cancelled by barge-in");
        }
    }

    fn call_ended(&self, call_id: &str) {
        self.generations.retain(|_, generation| {
            if generation.call_id == call_id {
                generation.cancelled.store(true, Ordering::SeqCst);
                false
            } else {
                true
            }
        });
        debug!(target: "callgate::responder", call_id, in_flight = self.in_flight(), "released call generations");
    }
}

/// Time from the end of the caller's turn until now.
fn reply_latency_ms(utterance: &Utterance) -> i64 {
    (Utc::now() - utterance.ended_at).num_milliseconds().max(0)
}

/// Logs utterances and never replies.
pub struct SilentResponder;

impl UtteranceHandler for SilentResponder {
    fn on_utterance(&self, utterance: Utterance, handle: CallHandle) {
        info!(
            target: "callgate::responder",
            call_id = handle.call_id(),
            duration_ms = utterance.duration_ms,
            bytes = utterance.audio.len(),
            reason = utterance.end_reason.as_str(),
            "🗣️ Utterance received (silent responder)"
        );
    }

    fn cancel_generation(&self, _response_id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use callgate_voice::codec::{self, MULAW_SILENCE};
    use callgate_voice::{CallActor, CallSession, InboundEvent, Outbound, SessionConfig, FRAME_BYTES};
    use tokio::sync::mpsc;

    fn voiced_frame() -> Vec<u8> {
        let samples: Vec<i16> = (0..FRAME_BYTES).map(|i| if i % 2 == 0 { 3277 } else { -3277 }).collect();
        codec::encode_buffer(&samples)
    }

    fn spawn_call(
        responder: Arc<EchoResponder>,
        frames: Vec<Vec<u8>>,
    ) -> (
        mpsc::Sender<InboundEvent>,
        mpsc::Receiver<Outbound>,
        tokio::task::JoinHandle<callgate_voice::SessionStats>,
    ) {
        let session = CallSession::new("CA-echo", SessionConfig::default()).unwrap();
        let actor = CallActor::new(session, responder);
        let (inbound_tx, inbound_rx) = mpsc::channel(512);
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        for frame in frames {
            inbound_tx.try_send(InboundEvent::Media(frame)).unwrap();
        }
        let task = tokio::spawn(actor.run(inbound_rx, outbound_tx));
        (inbound_tx, outbound_rx, task)
    }

    fn turn() -> Vec<Vec<u8>> {
        let mut frames = vec![vec![MULAW_SILENCE; FRAME_BYTES]; 40];
        frames.extend(std::iter::repeat(voiced_frame()).take(30));
        frames.extend(std::iter::repeat(vec![MULAW_SILENCE; FRAME_BYTES]).take(40));
        frames
    }

    #[test]
    fn latency_is_measured_from_turn_end() {
        let utterance = Utterance {
            audio: Vec::new(),
            duration_ms: 0,
            end_reason: callgate_voice::EndReason::SilenceTimeout,
            sample_rate: 8_000,
            ended_at: Utc::now() - chrono::Duration::milliseconds(250),
        };
        assert!(reply_latency_ms(&utterance) >= 250);

        let future = Utterance { ended_at: Utc::now() + chrono::Duration::seconds(5), ..utterance };
        assert_eq!(reply_latency_ms(&future), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn echo_plays_utterance_back_and_marks_the_end() {
        let responder = Arc::new(EchoResponder::new(EchoConfig::default()));
        let (inbound_tx, mut outbound_rx, task) = spawn_call(responder.clone(), turn());

        let voiced = voiced_frame()[0];
        let mut echoed = 0;
        let mut mark = None;
        for _ in 0..1000 {
            match outbound_rx.recv().await {
                Some(Outbound::Media(payload)) if payload.contains(&voiced) => echoed += 1,
                Some(Outbound::Media(_)) => {}
                Some(Outbound::Mark(name)) => {
                    mark = Some(name);
                    break;
                }
                None => break,
            }
        }
        assert_eq!(echoed, 30);
        assert!(mark.is_some());
        assert_eq!(responder.in_flight(), 0);

        inbound_tx.send(InboundEvent::Stop).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn barge_in_stops_the_echo() {
        let responder = Arc::new(EchoResponder::new(EchoConfig::default()));
        let (inbound_tx, mut outbound_rx, task) = spawn_call(responder.clone(), turn());

        let voiced = voiced_frame()[0];
        // wait for the echo to start playing
        loop {
            if let Some(Outbound::Media(payload)) = outbound_rx.recv().await {
                if payload.contains(&voiced) {
                    break;
                }
            }
        }
        while outbound_rx.try_recv().is_ok() {}
        inbound_tx.try_send(InboundEvent::Media(voiced_frame())).unwrap();
        // the interrupting caller keeps talking; what we read back must be silence
        for _ in 0..100 {
            match outbound_rx.recv().await {
                Some(Outbound::Media(payload)) => assert!(payload.iter().all(|&b| b == MULAW_SILENCE)),
                Some(Outbound::Mark(name)) => panic!("cancelled reply reached its mark {name}"),
                None => break,
            }
        }

        inbound_tx.send(InboundEvent::Stop).await.unwrap();
        let stats = task.await.unwrap();
        assert_eq!(stats.barge_ins, 1);
        assert_eq!(responder.in_flight(), 0);
    }
}
