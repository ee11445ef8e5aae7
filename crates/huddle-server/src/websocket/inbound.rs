//! Frames sent by clients.
//!
//! Only typing indicators are acted on. They are enriched with the typist's
//! display metadata and published to the broadcast topic, so every instance,
//! this one included, routes them from the bridge.

use std::sync::Arc;

use huddle_bus::SharedBus;
use huddle_core::message::kinds;
use huddle_core::{ChannelId, ConversationId, OutboundMessage, RouteTarget, Topic, TypingEvent};
use huddle_store::Directory;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::metrics::TYPING_EVENTS_TOTAL;
use crate::registry::{Connection, RegistryHandle};

/// What happened to one client frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundOutcome {
    /// Published to the broadcast topic.
    Published(OutboundMessage),
    /// Dropped, with the reason.
    Ignored(&'static str),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientFrame {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    channel_id: Option<ChannelId>,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
}

/// Handles text frames for every session on this instance.
#[derive(Clone)]
pub struct InboundHandler {
    registry: RegistryHandle,
    directory: Arc<dyn Directory>,
    bus: SharedBus,
}

impl InboundHandler {
    /// Handler publishing to `bus`.
    pub fn new(registry: RegistryHandle, directory: Arc<dyn Directory>, bus: SharedBus) -> Self {
        Self {
            registry,
            directory,
            bus,
        }
    }

    /// Act on one text frame from `connection`.
    pub async fn handle(&self, connection: &Connection, text: &str) -> InboundOutcome {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(conn_id = %connection.id, %error, "ignoring malformed client frame");
                return InboundOutcome::Ignored("malformed");
            }
        };
        let stopped = match frame.kind.as_str() {
            kinds::TYPING => false,
            kinds::STOP_TYPING => true,
            _ => return InboundOutcome::Ignored("unsupported type"),
        };

        let Ok(target) = RouteTarget::from_parts(frame.channel_id, frame.conversation_id) else {
            return InboundOutcome::Ignored("ambiguous target");
        };
        if target == RouteTarget::Everyone {
            return InboundOutcome::Ignored("no target");
        }
        let subscribed = self
            .registry
            .registry()
            .subscriptions(&connection.id)
            .is_some_and(|subs| subs.accepts(&target));
        if !subscribed {
            debug!(conn_id = %connection.id, ?target, "typing outside subscriptions");
            return InboundOutcome::Ignored("not subscribed");
        }

        let directory = Arc::clone(&self.directory);
        let user = connection.user_id.clone();
        let profile = match tokio::task::spawn_blocking(move || directory.profile(&user)).await {
            Ok(Ok(Some(profile))) => profile,
            Ok(Ok(None)) => return InboundOutcome::Ignored("unknown user"),
            Ok(Err(error)) => {
                warn!(user_id = %connection.user_id, %error, "profile lookup failed");
                return InboundOutcome::Ignored("profile lookup failed");
            }
            Err(_) => return InboundOutcome::Ignored("profile lookup failed"),
        };

        let message = OutboundMessage::typing(
            target,
            TypingEvent {
                user_id: connection.user_id.clone(),
                user_display_name: Some(profile.display_name),
                user_avatar: Some(profile.avatar),
            },
            stopped,
        );
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "failed to encode typing event");
                return InboundOutcome::Ignored("encode failed");
            }
        };
        if let Err(error) = self.bus.publish(Topic::Broadcast, payload).await {
            warn!(user_id = %connection.user_id, %error, "failed to publish typing event");
            return InboundOutcome::Ignored("publish failed");
        }
        counter!(TYPING_EVENTS_TOTAL, "kind" => message.kind().to_owned()).increment(1);
        InboundOutcome::Published(message)
    }
}
