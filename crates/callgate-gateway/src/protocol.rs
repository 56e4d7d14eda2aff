//! Media-stream WebSocket messages
//!
//! JSON text frames keyed by `event`, in the shape telephony carriers use
//! for bidirectional media streams: `connected`, `start`, `media`, `mark`
//! and `stop` inbound; `media` and `mark` outbound. Audio payloads are
//! base64 of 8 kHz μ-law. `speech_started` / `speech_stopped` are a gateway
//! extension carrying external turn signals.

use crate::error::GatewayResult;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use callgate_voice::Outbound;
use serde::{Deserialize, Serialize};

/// Messages received from the carrier
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundMessage {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StartMeta,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        mark: MarkPayload,
    },
    Stop,
    SpeechStarted,
    SpeechStopped,
    /// Anything else is ignored
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub stream_sid: String,
    #[serde(default)]
    pub call_sid: Option<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_channels() -> u16 {
    1
}

impl MediaFormat {
    /// 8 kHz mono μ-law, the only format the engine speaks.
    pub fn is_supported(&self) -> bool {
        self.encoding == "audio/x-mulaw" && self.sample_rate == 8_000 && self.channels == 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Messages sent to the carrier
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundMessage {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
}

impl OutboundMessage {
    pub fn from_outbound(stream_sid: &str, outbound: Outbound) -> Self {
        match outbound {
            Outbound::Media(frame) => OutboundMessage::Media {
                stream_sid: stream_sid.to_string(),
                media: MediaPayload {
                    payload: BASE64.encode(frame),
                    track: None,
                },
            },
            Outbound::Mark(name) => OutboundMessage::Mark {
                stream_sid: stream_sid.to_string(),
                mark: MarkPayload { name },
            },
        }
    }

    pub fn to_json(&self) -> GatewayResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn parse_inbound(text: &str) -> GatewayResult<InboundMessage> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a base64 media payload to μ-law bytes.
pub fn decode_payload(payload: &str) -> GatewayResult<Vec<u8>> {
    Ok(BASE64.decode(payload)?)
}
