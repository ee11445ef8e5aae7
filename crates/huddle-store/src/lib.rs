//! # huddle-store
//!
//! The persistence collaborator: which channels and conversations a user
//! belongs to, and the display metadata shown with their typing indicators.
//!
//! Queries are synchronous. Async callers run them on the blocking pool.
//!
//! - [`MemoryDirectory`]: mutable in-process directory for tests and demos
//! - [`SqliteDirectory`]: `rusqlite` behind an `r2d2` pool, migrated on open

#![deny(unsafe_code)]

pub mod directory;
pub mod errors;
pub mod memory;
pub mod sqlite;

pub use directory::{Directory, Memberships, UserProfile};
pub use errors::{Result, StoreError};
pub use memory::MemoryDirectory;
pub use sqlite::SqliteDirectory;
