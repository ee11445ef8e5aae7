//! Logical topics on the distributed bus.

use std::fmt;

/// One of the two append-only streams every instance subscribes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// User-level presence transitions (`{userId, status}`).
    Presence,
    /// Every other broadcast-worthy event (a serialized `WireMessage`).
    Broadcast,
}

impl Topic {
    /// Both topics, in subscription order.
    pub const ALL: [Topic; 2] = [Topic::Presence, Topic::Broadcast];

    /// Bare topic name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Presence => "user_online_status",
            Self::Broadcast => "broadcast",
        }
    }

    /// Channel name on the bus, with an optional deployment namespace.
    pub fn channel_name(self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if !ns.is_empty() => format!("{ns}:{}", self.name()),
            _ => self.name().to_owned(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
