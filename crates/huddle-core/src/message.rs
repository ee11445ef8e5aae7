//! Outbound messages and their JSON wire shape.
//!
//! [`OutboundMessage`] is the routed form: an exclusive [`RouteTarget`], the
//! optional sender used for echo suppression, and a typed [`Payload`].
//! [`WireMessage`] is the flat JSON object delivered to clients and carried on
//! the broadcast topic:
//!
//! ```text
//! {"type": "...", "conversationId"?, "channelId"?, "message"?, "event"?, "reaction"?, "data"?}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::ids::{ChannelId, ConversationId, UserId};
use crate::presence::PresenceUpdate;

/// Values of the wire `type` discriminator the core understands.
pub mod kinds {
    /// A chat message created in a channel or conversation.
    pub const MESSAGE: &str = "message";
    /// A reaction added to or removed from a message.
    pub const REACTION: &str = "reaction";
    /// A user started typing.
    pub const TYPING: &str = "typing";
    /// A user stopped typing.
    pub const STOP_TYPING: &str = "stop_typing";
    /// A user-level presence change.
    pub const USER_STATUS: &str = "user_status";
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing target
// ─────────────────────────────────────────────────────────────────────────────

/// Which connections a message is meant for.
///
/// A message belongs to exactly one channel, exactly one conversation, or to
/// everyone (presence fan-out). The exclusivity is enforced here so routing
/// never has to pick between two targets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum RouteTarget {
    /// Every registered connection.
    #[default]
    Everyone,
    /// Connections subscribed to the channel.
    Channel(ChannelId),
    /// Connections subscribed to the conversation.
    Conversation(ConversationId),
}

impl RouteTarget {
    /// Build a target from the two optional wire fields. Empty ids count as
    /// absent; both present is rejected.
    pub fn from_parts(
        channel: Option<ChannelId>,
        conversation: Option<ConversationId>,
    ) -> Result<Self, DecodeError> {
        let channel = channel.filter(|id| !id.is_empty());
        let conversation = conversation.filter(|id| !id.is_empty());
        match (channel, conversation) {
            (Some(_), Some(_)) => Err(DecodeError::AmbiguousTarget),
            (Some(channel), None) => Ok(Self::Channel(channel)),
            (None, Some(conversation)) => Ok(Self::Conversation(conversation)),
            (None, None) => Ok(Self::Everyone),
        }
    }

    /// Channel id, when channel-targeted.
    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Self::Channel(id) => Some(id),
            _ => None,
        }
    }

    /// Conversation id, when conversation-targeted.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::Conversation(id) => Some(id),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload records
// ─────────────────────────────────────────────────────────────────────────────

/// A chat message as rendered for clients.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatMessage {
    /// Message id.
    pub id: String,
    /// Body text.
    pub content: String,
    /// Body format, e.g. `text`.
    pub content_type: String,
    /// Parent message when this is a reply.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reply_to_message_id: String,
    /// Whether the body was edited.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_edited: bool,
    /// Legacy single-file path.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    /// Author user id; the echo-suppression key.
    pub sender_id: String,
    /// Author display name.
    pub sender_name: String,
    /// Author avatar URL.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sender_avatar: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Owning channel, when channel-scoped.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    /// Owning conversation, when direct.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub conversation_id: String,
    /// Set per recipient by the producer; passed through unchanged.
    pub is_me: bool,
    /// Reaction tallies.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<ReactionSummary>,
    /// Attached files.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChatMessage {
    /// Author of the message, if known.
    pub fn sender(&self) -> Option<UserId> {
        (!self.sender_id.is_empty()).then(|| UserId::from_raw(self.sender_id.clone()))
    }
}

/// File attached to a chat message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Attachment {
    /// Attachment id.
    pub id: String,
    /// Original file name.
    pub file_name: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Coarse kind (image, video, file).
    pub file_type: String,
    /// MIME type.
    pub content_type: String,
    /// Download URL.
    pub url: String,
}

/// Aggregated reactions of one emoji on a message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReactionSummary {
    /// The emoji.
    pub emoji: String,
    /// How many users reacted with it.
    pub count: u32,
    /// Who reacted.
    pub users: Vec<ReactionUser>,
    /// Whether the viewing user is among them.
    pub has_reacted: bool,
}

/// A user who reacted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReactionUser {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Avatar URL.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub avatar: String,
}

/// Whether a reaction was added or removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    /// Reaction added.
    Add,
    /// Reaction removed.
    Remove,
}

/// A single reaction record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageReaction {
    /// Reaction id.
    pub id: String,
    /// The emoji.
    pub emoji: String,
    /// Message reacted to.
    pub message_id: String,
    /// Reacting user.
    pub user_id: String,
    /// Reacting user avatar URL.
    pub user_avatar: String,
    /// Reacting user display name.
    pub user_display_name: String,
}

/// A reaction change on a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEvent {
    /// Message reacted to.
    pub message_id: String,
    /// The reaction record.
    pub reaction: MessageReaction,
    /// Added or removed.
    pub action: ReactionAction,
}

/// A typing indicator, enriched with the typist's display metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypingEvent {
    /// The user who is typing.
    pub user_id: UserId,
    /// Display name from the persistence layer.
    pub user_display_name: Option<String>,
    /// Avatar URL from the persistence layer.
    pub user_avatar: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTyping {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user_avatar: Option<String>,
    #[serde(default)]
    user_display_name: Option<String>,
}

impl TypingEvent {
    /// Decode the `data` body. `sender` (the wire `message.senderId`) wins
    /// over `data.userId`, which is only the fallback.
    fn from_value(value: Value, sender: Option<UserId>) -> Result<Self, DecodeError> {
        let raw: RawTyping = serde_json::from_value(value)?;
        let user_id = sender
            .or_else(|| raw.user_id.filter(|s| !s.is_empty()).map(UserId::from_raw))
            .ok_or(DecodeError::EmptyField("userId"))?;
        Ok(Self {
            user_id,
            user_display_name: raw.user_display_name,
            user_avatar: raw.user_avatar,
        })
    }

    fn to_value(&self, kind: &str, target: &RouteTarget) -> Value {
        serde_json::json!({
            "type": kind,
            "channelId": target.channel_id(),
            "conversationId": target.conversation_id(),
            "userId": self.user_id,
            "userAvatar": self.user_avatar,
            "userDisplayName": self.user_display_name,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound message
// ─────────────────────────────────────────────────────────────────────────────

/// What an outbound message carries.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// A chat message.
    Message(ChatMessage),
    /// A reaction change.
    Reaction(ReactionEvent),
    /// Typing started.
    Typing(TypingEvent),
    /// Typing stopped.
    StopTyping(TypingEvent),
    /// Presence change, delivered to everyone.
    UserStatus(PresenceUpdate),
    /// Any other broadcast-worthy event (edits, deletions, ...), passed
    /// through untouched.
    Event {
        /// Wire `type`.
        kind: String,
        /// Optional `event` sub-discriminator.
        event: Option<String>,
        /// Optional `data` body.
        data: Option<Value>,
        /// Optional `message` body.
        message: Option<ChatMessage>,
    },
}

/// A message ready for routing to local connections.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    target: RouteTarget,
    sender: Option<UserId>,
    payload: Payload,
}

impl OutboundMessage {
    /// A chat message; the sender is the message author.
    pub fn chat(target: RouteTarget, message: ChatMessage) -> Self {
        Self {
            target,
            sender: message.sender(),
            payload: Payload::Message(message),
        }
    }

    /// A reaction change, optionally attributed to a sender.
    pub fn reaction(target: RouteTarget, reaction: ReactionEvent, sender: Option<UserId>) -> Self {
        Self {
            target,
            sender,
            payload: Payload::Reaction(reaction),
        }
    }

    /// A typing indicator; the typist is the sender.
    pub fn typing(target: RouteTarget, typing: TypingEvent, stopped: bool) -> Self {
        let sender = Some(typing.user_id.clone());
        let payload = if stopped {
            Payload::StopTyping(typing)
        } else {
            Payload::Typing(typing)
        };
        Self {
            target,
            sender,
            payload,
        }
    }

    /// A presence change, routed to every connection without echo suppression.
    pub fn user_status(update: PresenceUpdate) -> Self {
        Self {
            target: RouteTarget::Everyone,
            sender: None,
            payload: Payload::UserStatus(update),
        }
    }

    /// Routing target.
    pub fn target(&self) -> &RouteTarget {
        &self.target
    }

    /// User whose own connections must not receive this message.
    pub fn sender(&self) -> Option<&UserId> {
        self.sender.as_ref()
    }

    /// Typed payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Wire `type` discriminator.
    pub fn kind(&self) -> &str {
        match &self.payload {
            Payload::Message(_) => kinds::MESSAGE,
            Payload::Reaction(_) => kinds::REACTION,
            Payload::Typing(_) => kinds::TYPING,
            Payload::StopTyping(_) => kinds::STOP_TYPING,
            Payload::UserStatus(_) => kinds::USER_STATUS,
            Payload::Event { kind, .. } => kind,
        }
    }

    /// Whether delivering to a connection owned by `user` would echo the
    /// message back to its sender.
    pub fn is_echo_to(&self, user: &UserId) -> bool {
        self.sender.as_ref() == Some(user)
    }

    /// Flatten into the wire shape.
    pub fn to_wire(&self) -> WireMessage {
        let mut wire = WireMessage {
            kind: self.kind().to_owned(),
            channel_id: self.target.channel_id().cloned(),
            conversation_id: self.target.conversation_id().cloned(),
            ..WireMessage::default()
        };
        match &self.payload {
            Payload::Message(message) => wire.message = Some(message.clone()),
            Payload::Reaction(reaction) => wire.reaction = Some(reaction.clone()),
            Payload::Typing(typing) | Payload::StopTyping(typing) => {
                wire.message = Some(ChatMessage {
                    sender_id: typing.user_id.to_string(),
                    ..ChatMessage::default()
                });
                wire.data = Some(typing.to_value(self.kind(), &self.target));
            }
            Payload::UserStatus(update) => {
                wire.data = serde_json::to_value(update).ok();
            }
            Payload::Event {
                event,
                data,
                message,
                ..
            } => {
                wire.event.clone_from(event);
                wire.data.clone_from(data);
                wire.message.clone_from(message);
            }
        }
        wire
    }

    /// Serialize to the JSON object sent to clients and the bus.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_wire())
    }

    /// Decode a broadcast topic payload.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let wire: WireMessage = serde_json::from_str(payload)?;
        Self::try_from(wire)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shape
// ─────────────────────────────────────────────────────────────────────────────

/// The flat JSON object exchanged with clients and over the broadcast topic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Message type discriminator.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Conversation target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Channel target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    /// Chat message body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    /// Event sub-discriminator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Reaction body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<ReactionEvent>,
    /// Free-form body (typing, status, custom events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TryFrom<WireMessage> for OutboundMessage {
    type Error = DecodeError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let WireMessage {
            kind,
            conversation_id,
            channel_id,
            message,
            event,
            reaction,
            data,
        } = wire;
        let target = RouteTarget::from_parts(channel_id, conversation_id)?;
        let message_sender = message.as_ref().and_then(ChatMessage::sender);

        match kind.as_str() {
            "" => Err(DecodeError::MissingType),
            kinds::MESSAGE => {
                let message = message.ok_or(DecodeError::MissingField("message"))?;
                Ok(Self::chat(target, message))
            }
            kinds::REACTION => {
                let reaction = reaction.ok_or(DecodeError::MissingField("reaction"))?;
                Ok(Self::reaction(target, reaction, message_sender))
            }
            kinds::TYPING | kinds::STOP_TYPING => {
                let data = data.ok_or(DecodeError::MissingField("data"))?;
                let typing = TypingEvent::from_value(data, message_sender)?;
                Ok(Self::typing(target, typing, kind == kinds::STOP_TYPING))
            }
            kinds::USER_STATUS => {
                let data = data.ok_or(DecodeError::MissingField("data"))?;
                Ok(Self::user_status(PresenceUpdate::from_value(data)?))
            }
            _ => Ok(Self {
                target,
                sender: message_sender,
                payload: Payload::Event {
                    kind,
                    event,
                    data,
                    message,
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceStatus;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn typing_from(user: &str) -> TypingEvent {
        TypingEvent {
            user_id: UserId::from_raw(user),
            user_display_name: Some("Alice".into()),
            user_avatar: Some("https://cdn/a.png".into()),
        }
    }

    #[test]
    fn decode_channel_message() {
        let msg = OutboundMessage::decode(
            r#"{"type":"message","channelId":"C1","message":{"senderId":"A","content":"hi"}}"#,
        )
        .unwrap();
        assert_eq!(msg.target(), &RouteTarget::Channel(ChannelId::from_raw("C1")));
        assert_eq!(msg.sender(), Some(&UserId::from_raw("A")));
        assert_eq!(msg.kind(), kinds::MESSAGE);
        assert_matches!(msg.payload(), Payload::Message(m) if m.content == "hi");
    }

    #[test]
    fn decode_rejects_both_targets() {
        let err = OutboundMessage::decode(
            r#"{"type":"message","channelId":"C1","conversationId":"CV1","message":{"senderId":"A"}}"#,
        )
        .unwrap_err();
        assert_matches!(err, DecodeError::AmbiguousTarget);
    }

    #[test]
    fn empty_ids_are_absent() {
        let msg = OutboundMessage::decode(
            r#"{"type":"message","channelId":"","conversationId":"CV1","message":{"senderId":"A"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.target(),
            &RouteTarget::Conversation(ConversationId::from_raw("CV1"))
        );
    }

    #[test]
    fn decode_requires_type() {
        assert_matches!(
            OutboundMessage::decode(r#"{"channelId":"C1"}"#),
            Err(DecodeError::MissingType)
        );
    }

    #[test]
    fn decode_message_requires_body() {
        assert_matches!(
            OutboundMessage::decode(r#"{"type":"message","channelId":"C1"}"#),
            Err(DecodeError::MissingField("message"))
        );
    }

    #[test]
    fn decode_garbage_is_json_error() {
        assert_matches!(OutboundMessage::decode("{nope"), Err(DecodeError::Json(_)));
    }

    #[test]
    fn message_without_sender_has_no_echo_suppression() {
        let msg = OutboundMessage::decode(r#"{"type":"message","channelId":"C1","message":{}}"#)
            .unwrap();
        assert!(msg.sender().is_none());
        assert!(!msg.is_echo_to(&UserId::from_raw("")));
    }

    #[test]
    fn decode_reaction() {
        let msg = OutboundMessage::decode(
            r#"{"type":"reaction","channelId":"C1","reaction":{"messageId":"m1","action":"add","reaction":{"emoji":"+1","userId":"B"}}}"#,
        )
        .unwrap();
        assert!(msg.sender().is_none());
        assert_matches!(
            msg.payload(),
            Payload::Reaction(r) if r.action == ReactionAction::Add && r.reaction.emoji == "+1"
        );
    }

    #[test]
    fn decode_reaction_with_bad_action_fails() {
        let err = OutboundMessage::decode(
            r#"{"type":"reaction","channelId":"C1","reaction":{"messageId":"m1","action":"toggle","reaction":{}}}"#,
        )
        .unwrap_err();
        assert_matches!(err, DecodeError::Json(_));
    }

    #[test]
    fn typing_roundtrip_keeps_sender_and_metadata() {
        let target = RouteTarget::Conversation(ConversationId::from_raw("CV1"));
        let msg = OutboundMessage::typing(target.clone(), typing_from("A"), false);
        let json = msg.encode().unwrap();

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "typing");
        assert_eq!(value["conversationId"], "CV1");
        assert!(value.get("channelId").is_none());
        assert_eq!(value["data"]["userId"], "A");
        assert_eq!(value["data"]["userDisplayName"], "Alice");
        assert_eq!(value["data"]["conversationId"], "CV1");

        let back = OutboundMessage::decode(&json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.sender(), Some(&UserId::from_raw("A")));
    }

    #[test]
    fn stop_typing_kind() {
        let msg = OutboundMessage::typing(RouteTarget::Everyone, typing_from("A"), true);
        assert_eq!(msg.kind(), kinds::STOP_TYPING);
        let back = OutboundMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_matches!(back.payload(), Payload::StopTyping(_));
    }

    #[test]
    fn typing_requires_user() {
        let err = OutboundMessage::decode(r#"{"type":"typing","channelId":"C1","data":{}}"#)
            .unwrap_err();
        assert_matches!(err, DecodeError::EmptyField("userId"));
    }

    #[test]
    fn typing_carries_sender_in_message() {
        let target = RouteTarget::Channel(ChannelId::from_raw("C1"));
        let msg = OutboundMessage::typing(target, typing_from("A"), false);
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["message"]["senderId"], "A");
    }

    #[test]
    fn typing_sender_from_message_when_data_user_empty() {
        let msg = OutboundMessage::decode(
            r#"{"type":"typing","conversationId":"CV1","message":{"senderId":"A"},"data":{"userId":"","userDisplayName":"Alice"}}"#,
        )
        .unwrap();
        assert_eq!(msg.sender(), Some(&UserId::from_raw("A")));
        assert_matches!(
            msg.payload(),
            Payload::Typing(t) if t.user_id == UserId::from_raw("A")
                && t.user_display_name.as_deref() == Some("Alice")
        );
    }

    #[test]
    fn typing_message_sender_wins_over_data_user() {
        let msg = OutboundMessage::decode(
            r#"{"type":"stop_typing","channelId":"C1","message":{"senderId":"A"},"data":{"userId":"B"}}"#,
        )
        .unwrap();
        assert_eq!(msg.sender(), Some(&UserId::from_raw("A")));
        assert!(msg.is_echo_to(&UserId::from_raw("A")));
        assert!(!msg.is_echo_to(&UserId::from_raw("B")));
        assert_matches!(msg.payload(), Payload::StopTyping(t) if t.user_id == UserId::from_raw("A"));
    }

    #[test]
    fn typing_falls_back_to_data_user() {
        let msg = OutboundMessage::decode(
            r#"{"type":"typing","channelId":"C1","data":{"userId":"B"}}"#,
        )
        .unwrap();
        assert_eq!(msg.sender(), Some(&UserId::from_raw("B")));
    }

    #[test]
    fn user_status_shape() {
        let msg = OutboundMessage::user_status(PresenceUpdate::new(
            UserId::from_raw("A"),
            PresenceStatus::Offline,
        ));
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "user_status", "data": {"userId": "A", "status": "offline"}})
        );
        assert_eq!(msg.target(), &RouteTarget::Everyone);
        assert!(msg.sender().is_none());
    }

    #[test]
    fn unknown_type_passes_through() {
        let msg = OutboundMessage::decode(
            r#"{"type":"message_update","conversationId":"CV1","event":"edited","data":{"messageId":"m1","content":"x"},"message":{"senderId":"A"}}"#,
        )
        .unwrap();
        assert_eq!(msg.kind(), "message_update");
        assert_eq!(msg.sender(), Some(&UserId::from_raw("A")));

        let wire = msg.to_wire();
        assert_eq!(wire.event.as_deref(), Some("edited"));
        assert_eq!(wire.data.unwrap()["messageId"], "m1");
    }

    #[test]
    fn chat_message_omits_empty_optionals() {
        let message = ChatMessage {
            id: "m1".into(),
            sender_id: "A".into(),
            ..ChatMessage::default()
        };
        let value = serde_json::to_value(&message).unwrap();
        assert!(value.get("replyToMessageId").is_none());
        assert!(value.get("isEdited").is_none());
        assert!(value.get("attachments").is_none());
        assert_eq!(value["senderId"], "A");
        assert_eq!(value["isMe"], false);
    }
}
