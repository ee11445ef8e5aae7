//! # huddle-server
//!
//! The real-time fan-out tier: holds client WebSocket connections, tracks what
//! each one is subscribed to, and delivers chat messages, reactions, typing
//! indicators and presence changes to the right subset of them.
//!
//! - [`registry`]: the connection registry, its subscription index, and the
//!   task that serializes every mutation
//! - [`router`]: filters the registry for a message and enqueues it
//! - [`presence`]: publishes user-level online/offline transitions
//! - [`bridge`]: consumes the bus topics and feeds the router
//! - [`liveness`]: periodic probes and dead-client detection
//! - [`websocket`], [`auth`], [`server`]: transport glue and HTTP surface

#![deny(unsafe_code)]

pub mod auth;
pub mod bridge;
pub mod config;
pub mod health;
pub mod liveness;
pub mod metrics;
pub mod presence;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AuthError, AuthenticatedUser, TokenValidator};
pub use bridge::Bridge;
pub use config::ServerConfig;
pub use presence::{PresenceAggregator, PresenceQueue};
pub use registry::{Connection, Registry, RegistryHandle, Subscriptions, TeardownReason};
pub use router::{BroadcastRouter, RouteReport};
pub use server::{AppState, HuddleServer};
pub use shutdown::ShutdownCoordinator;
