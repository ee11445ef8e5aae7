//! # huddle-bus
//!
//! The distributed publish/subscribe bus that connects server instances.
//!
//! Every instance publishes presence transitions and broadcast-worthy events
//! to a [`Topic`], and every instance (including the publisher) consumes both
//! topics. Two implementations:
//!
//! - [`MemoryBus`]: in-process `tokio::sync::broadcast`, for a single instance
//!   and for tests
//! - [`RedisBus`]: Redis `PUBLISH`/`SUBSCRIBE` over a minimal RESP client

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use huddle_core::Topic;

pub use errors::{BusError, Result};
pub use memory::MemoryBus;
pub use redis::{RedisBus, RedisConfig};

/// Stream of raw payloads received on one topic, in bus order.
///
/// The stream ends when the underlying subscription is lost.
pub type BusSubscription = BoxStream<'static, String>;

/// Fire-and-forget publish/subscribe over named topics.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a payload to every current subscriber of `topic`, on every
    /// instance.
    async fn publish(&self, topic: Topic, payload: String) -> Result<()>;

    /// Open a long-lived subscription to `topic`.
    async fn subscribe(&self, topic: Topic) -> Result<BusSubscription>;
}

/// Shared handle to a bus implementation.
pub type SharedBus = Arc<dyn Bus>;
