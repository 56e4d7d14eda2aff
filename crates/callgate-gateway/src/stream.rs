//! Media-stream WebSocket handler: one socket, one call actor.
//!
//! The reader half parses carrier messages and feeds the actor; a writer
//! task forwards paced frames and marks back to the carrier. The call ends
//! on `stop`, socket close, or a socket error, and is always unregistered.

use crate::protocol::{self, InboundMessage, OutboundMessage, StartMeta};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use callgate_voice::{CallActor, CallHandle, CallSession, InboundEvent};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn media_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let Some(start) = wait_for_start(&mut stream).await else {
        debug!(target: "callgate::stream", "socket closed before start");
        return;
    };
    if let Some(format) = &start.media_format {
        if !format.is_supported() {
            warn!(
                target: "callgate::stream",
                encoding = %format.encoding,
                sample_rate = format.sample_rate,
                "unsupported media format, closing stream"
            );
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    }

    let call_id = start
        .call_sid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let session = match CallSession::new(call_id.clone(), state.config.session.clone()) {
        Ok(session) => session,
        Err(e) => {
            warn!(target: "callgate::stream", call_id = %call_id, "cannot create session: {}", e);
            return;
        }
    };

    let actor = CallActor::new(session, state.responder.clone());
    let handle = actor.handle();
    state.calls.insert(&start.stream_sid, handle.clone());
    info!(
        target: "callgate::stream",
        call_id = %call_id,
        stream_sid = %start.stream_sid,
        active_calls = state.calls.len(),
        "📞 Media stream started"
    );

    let (inbound_tx, inbound_rx) = mpsc::channel(state.config.inbound_queue);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(state.config.outbound_queue);
    let actor_task = tokio::spawn(actor.run(inbound_rx, outbound_tx));

    let stream_sid = start.stream_sid.clone();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            let text = match OutboundMessage::from_outbound(&stream_sid, outbound).to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "callgate::stream", "cannot encode outbound message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                debug!(target: "callgate::stream", stream_sid = %stream_sid, "socket write failed");
                break;
            }
        }
    });

    read_loop(&mut stream, &inbound_tx, &handle).await;
    drop(inbound_tx);

    match actor_task.await {
        Ok(stats) => info!(
            target: "callgate::stream",
            call_id = %call_id,
            frames_in = stats.frames_in,
            frames_dropped = stats.frames_dropped,
            utterances = stats.utterances,
            barge_ins = stats.barge_ins,
            "📴 Media stream ended"
        ),
        Err(e) => warn!(target: "callgate::stream", call_id = %call_id, "call actor failed: {}", e),
    }
    let _ = writer.await;
    state.calls.remove(&start.stream_sid);
}

/// Read until `start`. Messages before it carry no call and are skipped.
async fn wait_for_start(stream: &mut SplitStream<WebSocket>) -> Option<StartMeta> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => match protocol::parse_inbound(&text) {
                Ok(InboundMessage::Start { start }) => return Some(start),
                Ok(InboundMessage::Connected { protocol }) => {
                    debug!(target: "callgate::stream", ?protocol, "carrier connected");
                }
                Ok(other) => debug!(target: "callgate::stream", ?other, "ignoring message before start"),
                Err(e) => debug!(target: "callgate::stream", "malformed message: {}", e),
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => {}
            Err(e) => {
                warn!(target: "callgate::stream", "socket error before start: {}", e);
                return None;
            }
        }
    }
    None
}

async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    inbound_tx: &mpsc::Sender<InboundEvent>,
    handle: &CallHandle,
) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(target: "callgate::stream", call_id = handle.call_id(), "socket error: {}", e);
                break;
            }
        };

        let message = match protocol::parse_inbound(&text) {
            Ok(message) => message,
            Err(e) => {
                debug!(target: "callgate::stream", call_id = handle.call_id(), "dropping malformed message: {}", e);
                continue;
            }
        };

        let delivered = match message {
            InboundMessage::Media { media } if media.track.as_deref().is_some_and(|t| t != "inbound") => true,
            InboundMessage::Media { media } => match protocol::decode_payload(&media.payload) {
                Ok(bytes) => inbound_tx.send(InboundEvent::Media(bytes)).await.is_ok(),
                Err(e) => {
                    debug!(target: "callgate::stream", call_id = handle.call_id(), "dropping media: {}", e);
                    true
                }
            },
            InboundMessage::Stop => {
                let _ = inbound_tx.send(InboundEvent::Stop).await;
                break;
            }
            InboundMessage::SpeechStarted => handle.speech_started().is_ok(),
            InboundMessage::SpeechStopped => handle.speech_stopped().is_ok(),
            InboundMessage::Mark { mark } => {
                debug!(target: "callgate::stream", call_id = handle.call_id(), mark = %mark.name, "carrier played mark");
                true
            }
            InboundMessage::Start { .. } | InboundMessage::Connected { .. } | InboundMessage::Unknown => true,
        };
        if !delivered {
            // actor is gone
            break;
        }
    }
}
