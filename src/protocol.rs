//! # Wire Protocol Envelopes
//!
//! Closed tagged-variant types for the client-facing WebSocket protocol.
//! Validation happens once, at deserialization time on the transport
//! boundary — the core only ever sees these variants, never raw JSON.
//!
//! ## Message Format:
//! - **Client → Server**: `{"type": "REALTIME_TRANSCRIBE", "sessionId": "...", "message": "<base64 audio>"}`
//! - **Server → Client**: `{"status": "CONNECTED" | "REALTIME_TRANSCRIBE" | "REALTIME_TRANSCRIBE_PARTIAL" | "ERROR", "message": "...", "sessionId": "..."}`

use actix::Message;
use serde::{Deserialize, Serialize};

/// Inbound message envelope, already parsed and validated.
///
/// Unknown `type` tags or missing fields fail deserialization and are
/// dropped at the gateway with a log line; they never reach the core.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// A chunk of live audio for a session, base64-encoded. The payload
    /// may carry a `data:audio/pcm;base64,` prefix from the browser's
    /// capture pipeline.
    #[serde(rename = "REALTIME_TRANSCRIBE")]
    RealtimeTranscribe {
        #[serde(rename = "sessionId")]
        session_id: String,
        message: String,
    },
}

/// Outbound message envelope written to the client connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum OutboundMessage {
    /// Sent once, immediately on session registration, carrying the
    /// newly assigned session id.
    #[serde(rename = "CONNECTED")]
    Connected {
        message: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// A final (utterance-complete) transcription result.
    #[serde(rename = "REALTIME_TRANSCRIBE")]
    Transcript {
        message: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// An in-progress transcription result, superseded by later events.
    #[serde(rename = "REALTIME_TRANSCRIBE_PARTIAL")]
    TranscriptPartial {
        message: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// A session-scoped error with a stable, non-leaking description.
    #[serde(rename = "ERROR")]
    Error {
        message: String,
        #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl OutboundMessage {
    /// Build the connection handshake envelope.
    pub fn connected(session_id: &str) -> Self {
        OutboundMessage::Connected {
            message: "Connected to server".to_string(),
            session_id: session_id.to_string(),
        }
    }

    /// Build an error envelope scoped to a session (if known).
    pub fn error(message: &str, session_id: Option<String>) -> Self {
        OutboundMessage::Error {
            message: message.to_string(),
            session_id,
        }
    }

    /// Serialize to the wire representation.
    ///
    /// Serialization of these variants cannot fail in practice; a defect
    /// here is logged and yields an empty frame rather than a panic.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            tracing::error!("Failed to serialize outbound message: {}", err);
            String::new()
        })
    }
}

/// Actor message used to deliver an outbound envelope to the WebSocket
/// actor that owns the client connection.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SendOutbound(pub OutboundMessage);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_envelope_parsing() {
        let raw = r#"{"type":"REALTIME_TRANSCRIBE","sessionId":"S1","message":"AAAA"}"#;
        let msg: InboundMessage = serde_json::from_str(raw).unwrap();
        let InboundMessage::RealtimeTranscribe { session_id, message } = msg;
        assert_eq!(session_id, "S1");
        assert_eq!(message, "AAAA");
    }

    #[test]
    fn test_inbound_rejects_unknown_type() {
        let raw = r#"{"type":"BATCH_TRANSCRIBE","sessionId":"S1","message":"AAAA"}"#;
        assert!(serde_json::from_str::<InboundMessage>(raw).is_err());
    }

    #[test]
    fn test_inbound_rejects_missing_fields() {
        let raw = r#"{"type":"REALTIME_TRANSCRIBE","sessionId":"S1"}"#;
        assert!(serde_json::from_str::<InboundMessage>(raw).is_err());
    }

    #[test]
    fn test_outbound_envelope_field_names() {
        let json = OutboundMessage::connected("S1").to_json();
        assert!(json.contains(r#""status":"CONNECTED""#));
        assert!(json.contains(r#""sessionId":"S1""#));
        assert!(json.contains("Connected to server"));

        let json = OutboundMessage::TranscriptPartial {
            message: "hel".to_string(),
            session_id: "S1".to_string(),
        }
        .to_json();
        assert!(json.contains(r#""status":"REALTIME_TRANSCRIBE_PARTIAL""#));
    }

    #[test]
    fn test_error_envelope_omits_missing_session() {
        let json = OutboundMessage::error("transcription engine error", None).to_json();
        assert!(json.contains(r#""status":"ERROR""#));
        assert!(!json.contains("sessionId"));
    }
}
