//! # mentorlink-protocol
//!
//! Wire protocol definitions for the mentorlink realtime gateway.
//!
//! This crate defines the JSON envelope exchanged between clients and the
//! gateway: one tagged union over the message kinds, a codec with layered
//! validation, and the close codes used when a transport is terminated.
//!
//! ## Message kinds
//!
//! - `chat` - Messages between identities or into rooms
//! - `notification` - Server-initiated pushes
//! - `essay-update` / `feedback-update` - Domain state changes
//! - `mentor-request` - Student escalation fanned out to mentors
//! - `system` - Control traffic (ping/pong, room join/leave, errors)
//!
//! ## Example
//!
//! ```rust
//! use mentorlink_protocol::{codec, Envelope, SystemAction};
//!
//! let envelope = Envelope::system(SystemAction::Ping);
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(encoded.as_bytes()).unwrap();
//! assert_eq!(envelope, decoded);
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError, MAX_MESSAGE_SIZE};
pub use envelope::{
    Body, ChatPayload, CloseCode, ContentKind, Envelope, EssayAction, EssayUpdatePayload,
    FeedbackStatus, FeedbackUpdatePayload, MentorRequestPayload, MessageKind,
    NotificationPayload, Priority, Severity, SystemAction, SystemPayload,
};
