//! Message routing for mentorlink.
//!
//! The router is the only component that touches raw inbound bytes. It
//! decodes them into envelopes, dispatches by kind, and exposes the
//! outbound send operations the rest of the application uses to push
//! messages to connected clients.

use std::sync::Arc;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use mentorlink_protocol::{
    codec, Body, ChatPayload, Envelope, EssayUpdatePayload, FeedbackUpdatePayload,
    MentorRequestPayload, NotificationPayload, ProtocolError, SystemAction, SystemPayload,
};

use crate::identity::{ProfileDirectory, Role};
use crate::registry::{ConnectionRegistry, SendOutcome};
use crate::rooms::RoomManager;

/// Category stamped on notifications synthesized from mentor requests.
const MENTOR_REQUEST_CATEGORY: &str = "mentor-request";

/// Gateway statistics.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    /// Number of registered connections.
    pub connected_count: usize,
    /// Number of active rooms.
    pub active_room_count: usize,
    /// Total memberships across all rooms.
    pub total_membership_count: usize,
}

/// The central message router.
///
/// Holds the registry and room manager as opaque services; all mutation of
/// either goes through their public operations.
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    directory: Arc<dyn ProfileDirectory>,
}

impl Router {
    /// Create a router over the given registries and profile directory.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        directory: Arc<dyn ProfileDirectory>,
    ) -> Self {
        Self {
            registry,
            rooms,
            directory,
        }
    }

    /// Process one inbound message from an authenticated sender.
    ///
    /// Malformed input earns the sender a `system:error` reply and nothing
    /// else; unknown kinds are logged and ignored so newer clients keep
    /// working against this deployment. Neither case closes the connection.
    pub async fn handle_inbound(&self, sender_identity: &str, data: &[u8]) {
        let envelope = match codec::decode(data) {
            Ok(envelope) => envelope,
            Err(ProtocolError::UnknownKind(kind)) => {
                debug!(identity = %sender_identity, kind = %kind, "Ignoring unknown message kind");
                return;
            }
            Err(err) => {
                warn!(identity = %sender_identity, error = %err, "Malformed inbound message");
                self.reply_error(sender_identity, err.to_string());
                return;
            }
        };

        let kind = envelope.kind();
        let recipient = envelope.recipient_identity.clone();
        match envelope.body {
            Body::Chat(payload) => self.handle_chat(sender_identity, payload, recipient).await,
            Body::System(payload) => self.handle_system(sender_identity, payload),
            Body::MentorRequest(payload) => {
                self.handle_mentor_request(sender_identity, payload).await;
            }
            // Reserved for server-initiated pushes; clients have no business
            // sending these inbound.
            Body::Notification(_) | Body::EssayUpdate(_) | Body::FeedbackUpdate(_) => {
                debug!(
                    identity = %sender_identity,
                    kind = %kind,
                    "Ignoring outbound-only kind on inbound channel"
                );
            }
        }
    }

    async fn handle_chat(
        &self,
        sender_identity: &str,
        mut payload: ChatPayload,
        recipient: Option<String>,
    ) {
        // Display name resolution is the only await on this path and runs
        // before any registry or room access.
        payload.sender_name = Some(self.resolve_display_name(sender_identity).await);
        payload.id = Some(Uuid::new_v4());
        let room = payload.room.clone();

        if let Some(recipient) = recipient {
            let envelope = Arc::new(
                Envelope::chat(payload)
                    .with_sender(sender_identity)
                    .with_recipient(&recipient),
            );
            // Fire-and-forget: an unreachable recipient is dropped silently.
            let outcome = self.registry.send(&recipient, envelope);
            trace!(identity = %sender_identity, recipient = %recipient, ?outcome, "Chat unicast");
        } else if let Some(room) = room {
            let envelope = Arc::new(Envelope::chat(payload).with_sender(sender_identity));
            let delivered =
                self.rooms
                    .broadcast(&self.registry, &room, envelope, Some(sender_identity));
            trace!(identity = %sender_identity, room = %room, delivered, "Chat room broadcast");
        } else {
            debug!(identity = %sender_identity, "Chat with neither recipient nor room dropped");
        }
    }

    fn handle_system(&self, sender_identity: &str, payload: SystemPayload) {
        match payload.action {
            SystemAction::Ping => {
                self.registry.send(
                    sender_identity,
                    Arc::new(Envelope::system(SystemAction::Pong).with_recipient(sender_identity)),
                );
            }
            SystemAction::Pong => self.registry.mark_alive(sender_identity),
            SystemAction::JoinRoom => match payload.room {
                Some(room) => {
                    self.rooms.join(&room, sender_identity);
                    self.registry.send(
                        sender_identity,
                        Arc::new(
                            Envelope::room_ack(SystemAction::JoinedRoom, room)
                                .with_recipient(sender_identity),
                        ),
                    );
                }
                None => self.reply_error(sender_identity, "join_room requires a room"),
            },
            SystemAction::LeaveRoom => match payload.room {
                Some(room) => {
                    self.rooms.leave(&room, sender_identity);
                    self.registry.send(
                        sender_identity,
                        Arc::new(
                            Envelope::room_ack(SystemAction::LeftRoom, room)
                                .with_recipient(sender_identity),
                        ),
                    );
                }
                None => self.reply_error(sender_identity, "leave_room requires a room"),
            },
            action => {
                debug!(identity = %sender_identity, ?action, "Ignoring system action");
            }
        }
    }

    async fn handle_mentor_request(&self, sender_identity: &str, payload: MentorRequestPayload) {
        let sender_name = self.resolve_display_name(sender_identity).await;

        let notification = NotificationPayload {
            category: MENTOR_REQUEST_CATEGORY.to_string(),
            title: format!("Mentor request from {sender_name}"),
            body: payload.message,
            priority: payload.urgency,
            link: Some(format!("/essays/{}", payload.essay_id)),
        };
        let envelope = Arc::new(Envelope::notification(notification).with_sender(sender_identity));

        let delivered =
            self.registry
                .broadcast_to_role(Role::Mentor, envelope, Some(sender_identity));
        debug!(
            identity = %sender_identity,
            essay = %payload.essay_id,
            delivered,
            "Mentor request fanned out"
        );
    }

    /// Push a notification to a single identity.
    pub fn send_notification(&self, identity: &str, payload: NotificationPayload) -> SendOutcome {
        self.registry.send(
            identity,
            Arc::new(Envelope::notification(payload).with_recipient(identity)),
        )
    }

    /// Push an essay update to a single identity.
    pub fn send_essay_update(&self, identity: &str, payload: EssayUpdatePayload) -> SendOutcome {
        self.registry.send(
            identity,
            Arc::new(Envelope::essay_update(payload).with_recipient(identity)),
        )
    }

    /// Push a feedback update to a single identity.
    pub fn send_feedback_update(
        &self,
        identity: &str,
        payload: FeedbackUpdatePayload,
    ) -> SendOutcome {
        self.registry.send(
            identity,
            Arc::new(Envelope::feedback_update(payload).with_recipient(identity)),
        )
    }

    /// Deliver an envelope to every connection holding a role.
    ///
    /// Returns the number of connections reached.
    pub fn broadcast_to_role(&self, role: Role, envelope: Envelope) -> usize {
        self.registry
            .broadcast_to_role(role, Arc::new(envelope), None)
    }

    /// Get a snapshot of gateway statistics.
    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            connected_count: self.registry.len(),
            active_room_count: self.rooms.room_count(),
            total_membership_count: self.rooms.membership_count(),
        }
    }

    fn reply_error(&self, identity: &str, detail: impl Into<String>) {
        self.registry.send(
            identity,
            Arc::new(Envelope::system_error(detail).with_recipient(identity)),
        );
    }

    async fn resolve_display_name(&self, identity: &str) -> String {
        match self.directory.display_name(identity).await {
            Ok(name) => name,
            Err(err) => {
                warn!(identity = %identity, error = %err, "Display name lookup failed");
                identity.to_string()
            }
        }
    }
}
