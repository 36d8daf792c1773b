//! Codec for encoding and decoding mentorlink envelopes.
//!
//! The wire format is a single JSON document per WebSocket message. Decoding
//! distinguishes malformed input (the sender gets a `system:error` reply)
//! from unknown-but-well-formed kinds (ignored for forward compatibility),
//! so the two error classes are separate variants here.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::{Envelope, MessageKind};

/// Maximum envelope size in bytes (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    TooLarge(usize),

    /// Not valid JSON, or valid JSON that does not match the envelope shape.
    #[error("Invalid message: {0}")]
    Invalid(#[from] serde_json::Error),

    /// Well-formed JSON missing a required envelope field.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Well-formed envelope with a kind tag this deployment does not know.
    #[error("Unknown message kind: {0}")]
    UnknownKind(String),
}

/// Encode an envelope to its JSON wire form.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(envelope)?;
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(text.len()));
    }
    Ok(text)
}

/// Decode an envelope from raw bytes.
///
/// Validation happens before the typed parse so the caller can tell the
/// error classes apart: size and JSON syntax first, then presence of the
/// `kind` and `timestamp` fields, then whether the kind is known at all.
///
/// # Errors
///
/// Returns an error if the data is oversized, malformed, incomplete, or of
/// an unknown kind.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(data.len()));
    }

    let value: Value = serde_json::from_slice(data)?;

    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingField("kind"))?;

    if !MessageKind::is_known(kind) {
        return Err(ProtocolError::UnknownKind(kind.to_string()));
    }

    if value.get("timestamp").is_none() {
        return Err(ProtocolError::MissingField("timestamp"));
    }

    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Body, ChatPayload, ContentKind, SystemAction};

    #[test]
    fn test_encode_decode_roundtrip() {
        let envelopes = vec![
            Envelope::chat(ChatPayload {
                id: None,
                content: "Hello, world!".into(),
                content_kind: ContentKind::Text,
                room: Some("physics-help".into()),
                sender_name: None,
            })
            .with_sender("u1"),
            Envelope::system(SystemAction::Ping),
            Envelope::room_ack(SystemAction::JoinedRoom, "essay-review"),
            Envelope::system_error("bad input"),
            Envelope::connected(30_000),
        ];

        for envelope in envelopes {
            let encoded = encode(&envelope).unwrap();
            let decoded = decode(encoded.as_bytes()).unwrap();
            assert_eq!(envelope, decoded);
        }
    }

    #[test]
    fn test_decode_malformed() {
        match decode(b"not json at all") {
            Err(ProtocolError::Invalid(_)) => {}
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_kind() {
        match decode(br#"{"payload": {}, "timestamp": "2026-01-01T00:00:00Z"}"#) {
            Err(ProtocolError::MissingField("kind")) => {}
            other => panic!("Expected MissingField(kind), got {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_timestamp() {
        match decode(br#"{"kind": "system", "payload": {"action": "ping"}}"#) {
            Err(ProtocolError::MissingField("timestamp")) => {}
            other => panic!("Expected MissingField(timestamp), got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_kind() {
        let data = br#"{"kind": "presence", "payload": {}, "timestamp": "2026-01-01T00:00:00Z"}"#;
        match decode(data) {
            Err(ProtocolError::UnknownKind(kind)) => assert_eq!(kind, "presence"),
            other => panic!("Expected UnknownKind, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_too_large() {
        let data = vec![b'a'; MAX_MESSAGE_SIZE + 1];
        match decode(&data) {
            Err(ProtocolError::TooLarge(_)) => {}
            other => panic!("Expected TooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_known_kind_bad_payload_is_invalid() {
        // Known kind with a payload that does not match its schema is a
        // malformed message, not an unknown one.
        let data = br#"{"kind": "chat", "payload": {"nope": 1}, "timestamp": "2026-01-01T00:00:00Z"}"#;
        match decode(data) {
            Err(ProtocolError::Invalid(_)) => {}
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_client_chat_shape() {
        // What a browser client actually sends: no id, no senderName.
        let data = br#"{
            "kind": "chat",
            "payload": {"content": "can someone review my intro?", "room": "essay-review"},
            "timestamp": "2026-03-02T10:15:00Z"
        }"#;
        let envelope = decode(data).unwrap();
        match envelope.body {
            Body::Chat(ref chat) => {
                assert_eq!(chat.content, "can someone review my intro?");
                assert_eq!(chat.content_kind, ContentKind::Text);
                assert!(chat.id.is_none());
            }
            ref other => panic!("Expected chat body, got {:?}", other),
        }
    }
}
