//! Envelope types for the mentorlink protocol.
//!
//! Every message exchanged with a client is an `Envelope`: a kind tag, a
//! kind-specific payload, a timestamp, and optional sender/recipient
//! identities. Payload fields are only reachable after matching on the kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Chat,
    Notification,
    EssayUpdate,
    FeedbackUpdate,
    MentorRequest,
    System,
}

impl MessageKind {
    /// All kinds the gateway understands, as they appear on the wire.
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Chat,
        MessageKind::Notification,
        MessageKind::EssayUpdate,
        MessageKind::FeedbackUpdate,
        MessageKind::MentorRequest,
        MessageKind::System,
    ];

    /// Get the wire tag for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::Chat => "chat",
            MessageKind::Notification => "notification",
            MessageKind::EssayUpdate => "essay-update",
            MessageKind::FeedbackUpdate => "feedback-update",
            MessageKind::MentorRequest => "mentor-request",
            MessageKind::System => "system",
        }
    }

    /// Check whether a wire tag names a known kind.
    #[must_use]
    pub fn is_known(tag: &str) -> bool {
        MessageKind::ALL.iter().any(|k| k.as_str() == tag)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat content kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    #[default]
    Text,
    Markdown,
    Code,
}

/// Notification and mentor-request priority levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Lifecycle actions reported by an essay update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EssayAction {
    Created,
    Updated,
    Submitted,
    Deleted,
}

/// Review state carried by a feedback update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    Pending,
    InReview,
    Resolved,
}

/// Severity of a feedback item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Minor,
    Major,
    Critical,
}

/// Control actions carried by `system` messages.
///
/// Unrecognized actions deserialize to `Unknown` so newer clients can talk
/// to older deployments mid-rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemAction {
    Ping,
    Pong,
    JoinRoom,
    LeaveRoom,
    JoinedRoom,
    LeftRoom,
    Connected,
    Shutdown,
    Error,
    #[serde(other)]
    Unknown,
}

/// A chat message between advisees, mentors, or rooms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// Server-stamped message id; absent on inbound messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub content: String,
    #[serde(default)]
    pub content_kind: ContentKind,
    /// Target room; mutually exclusive with the envelope's recipient.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Sender display name, resolved by the server on relay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

/// A server-initiated notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub category: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub priority: Priority,
    /// Optional deep-link into the application.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// A push about an essay changing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EssayUpdatePayload {
    pub essay_id: String,
    pub action: EssayAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A push about feedback on an essay changing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackUpdatePayload {
    pub essay_id: String,
    pub feedback_id: String,
    pub status: FeedbackStatus,
    pub severity: Severity,
}

/// A student asking for mentor attention on an essay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MentorRequestPayload {
    pub essay_id: String,
    #[serde(default)]
    pub urgency: Priority,
    pub message: String,
}

/// A control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPayload {
    pub action: SystemAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Probe interval advertised in the `connected` acknowledgment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_ms: Option<u64>,
}

/// The kind-specific body of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum Body {
    #[serde(rename = "chat")]
    Chat(ChatPayload),
    #[serde(rename = "notification")]
    Notification(NotificationPayload),
    #[serde(rename = "essay-update")]
    EssayUpdate(EssayUpdatePayload),
    #[serde(rename = "feedback-update")]
    FeedbackUpdate(FeedbackUpdatePayload),
    #[serde(rename = "mentor-request")]
    MentorRequest(MentorRequestPayload),
    #[serde(rename = "system")]
    System(SystemPayload),
}

/// A protocol envelope.
///
/// Inbound envelopes are built by clients; outbound ones by the gateway.
/// Neither side persists them once delivered or dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub body: Body,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "senderIdentity", skip_serializing_if = "Option::is_none")]
    pub sender_identity: Option<String>,
    #[serde(rename = "recipientIdentity", skip_serializing_if = "Option::is_none")]
    pub recipient_identity: Option<String>,
}

impl Envelope {
    /// Create an envelope with a fresh timestamp and no identities.
    #[must_use]
    pub fn new(body: Body) -> Self {
        Self {
            body,
            timestamp: Utc::now(),
            sender_identity: None,
            recipient_identity: None,
        }
    }

    /// Get the envelope's kind.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self.body {
            Body::Chat(_) => MessageKind::Chat,
            Body::Notification(_) => MessageKind::Notification,
            Body::EssayUpdate(_) => MessageKind::EssayUpdate,
            Body::FeedbackUpdate(_) => MessageKind::FeedbackUpdate,
            Body::MentorRequest(_) => MessageKind::MentorRequest,
            Body::System(_) => MessageKind::System,
        }
    }

    /// Create a chat envelope.
    #[must_use]
    pub fn chat(payload: ChatPayload) -> Self {
        Self::new(Body::Chat(payload))
    }

    /// Create a notification envelope.
    #[must_use]
    pub fn notification(payload: NotificationPayload) -> Self {
        Self::new(Body::Notification(payload))
    }

    /// Create an essay-update envelope.
    #[must_use]
    pub fn essay_update(payload: EssayUpdatePayload) -> Self {
        Self::new(Body::EssayUpdate(payload))
    }

    /// Create a feedback-update envelope.
    #[must_use]
    pub fn feedback_update(payload: FeedbackUpdatePayload) -> Self {
        Self::new(Body::FeedbackUpdate(payload))
    }

    /// Create a bare system envelope for the given action.
    #[must_use]
    pub fn system(action: SystemAction) -> Self {
        Self::new(Body::System(SystemPayload {
            action,
            room: None,
            message: None,
            heartbeat_ms: None,
        }))
    }

    /// Create a system acknowledgment referencing a room.
    #[must_use]
    pub fn room_ack(action: SystemAction, room: impl Into<String>) -> Self {
        Self::new(Body::System(SystemPayload {
            action,
            room: Some(room.into()),
            message: None,
            heartbeat_ms: None,
        }))
    }

    /// Create a `system:error` reply.
    #[must_use]
    pub fn system_error(message: impl Into<String>) -> Self {
        Self::new(Body::System(SystemPayload {
            action: SystemAction::Error,
            room: None,
            message: Some(message.into()),
            heartbeat_ms: None,
        }))
    }

    /// Create the `system:connected` acknowledgment sent after admission.
    #[must_use]
    pub fn connected(heartbeat_ms: u64) -> Self {
        Self::new(Body::System(SystemPayload {
            action: SystemAction::Connected,
            room: None,
            message: None,
            heartbeat_ms: Some(heartbeat_ms),
        }))
    }

    /// Set the sender identity.
    #[must_use]
    pub fn with_sender(mut self, identity: impl Into<String>) -> Self {
        self.sender_identity = Some(identity.into());
        self
    }

    /// Set the recipient identity.
    #[must_use]
    pub fn with_recipient(mut self, identity: impl Into<String>) -> Self {
        self.recipient_identity = Some(identity.into());
        self
    }
}

/// Close codes used when terminating a transport.
///
/// Each failure class has a distinct code so clients can tell retryable
/// closures from terminal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Orderly close, including replacement by a newer session.
    Normal,
    /// No credential was supplied on the handshake.
    MissingCredential,
    /// The supplied credential failed verification.
    AuthenticationFailed,
    /// The gateway hit an unexpected error on this connection.
    Internal,
    /// The gateway is shutting down.
    ServerShutdown,
}

impl CloseCode {
    /// Get the WebSocket close code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::MissingCredential => 4001,
            CloseCode::AuthenticationFailed => 4002,
            CloseCode::Internal => 4003,
            CloseCode::ServerShutdown => 4004,
        }
    }

    /// Get the human-readable close reason.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            CloseCode::Normal => "closed",
            CloseCode::MissingCredential => "missing credential",
            CloseCode::AuthenticationFailed => "authentication failed",
            CloseCode::Internal => "internal error",
            CloseCode::ServerShutdown => "server shutdown",
        }
    }
}
