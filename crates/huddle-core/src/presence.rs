//! User-level presence.
//!
//! Presence is tracked per user, not per connection: a user is online while at
//! least one of their connections is registered anywhere this process knows of.

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::ids::UserId;

/// Online/offline state of a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// The user has at least one live connection.
    Online,
    /// The user's last live connection closed.
    Offline,
}

impl PresenceStatus {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// A presence transition, as published on the presence topic and carried in
/// `user_status` messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    /// User whose status changed.
    pub user_id: UserId,
    /// New status.
    pub status: PresenceStatus,
}

/// Lenient shape used for decoding; validation happens afterwards so that a
/// partially-empty payload is reported precisely.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPresence {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl PresenceUpdate {
    /// Create a presence update.
    pub fn new(user_id: UserId, status: PresenceStatus) -> Self {
        Self { user_id, status }
    }

    /// Decode a presence topic payload.
    ///
    /// Rejects payloads whose `userId` or `status` is missing or empty, and
    /// statuses other than `online`/`offline`.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let raw: RawPresence = serde_json::from_str(payload)?;
        Self::from_raw(raw)
    }

    /// Decode from an already-parsed JSON value (the `data` of a `user_status`
    /// message).
    pub fn from_value(value: serde_json::Value) -> Result<Self, DecodeError> {
        let raw: RawPresence = serde_json::from_value(value)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawPresence) -> Result<Self, DecodeError> {
        let user_id = raw
            .user_id
            .filter(|s| !s.is_empty())
            .ok_or(DecodeError::EmptyField("userId"))?;
        let status = raw
            .status
            .filter(|s| !s.is_empty())
            .ok_or(DecodeError::EmptyField("status"))?;
        let status = PresenceStatus::parse(&status).ok_or(DecodeError::InvalidStatus(status))?;
        Ok(Self {
            user_id: UserId::from_raw(user_id),
            status,
        })
    }

    /// Encode for the presence topic.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
