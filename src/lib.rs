//! # VOIDFALL - Persistent Multiplayer Space Combat Server
//!
//! The state-management core of a persistent multiplayer space combat
//! game: players fly ships across a shared toroidal world, accrue
//! resources, research weapons and defenses, and fight tick-driven
//! battles.
//!
//! ## Architecture
//!
//! - `locking`: hierarchical lock discipline keeping handlers and the
//!   scheduler deadlock-free
//! - `model`: plain-data entities (users, world, battles, messages)
//! - `store`: SQLite persistence with per-table write coordination
//! - `cache`: write-back caches owning the authoritative in-memory state
//! - `battle`: the pure combat engine and the periodic battle scheduler
//! - `runtime`: the dependency-injected root context and its timers
//!
//! HTTP handlers and client rendering sit outside this crate; they call
//! the cache and scheduler APIs re-exported here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod battle;
pub mod cache;
pub mod config;
pub mod error;
pub mod locking;
pub mod model;
pub mod runtime;
pub mod store;
pub mod time;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{GameError, Result};
pub use runtime::GameRuntime;

/// Crate version from the manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name from the manifest.
pub const NAME: &str = env!("CARGO_PKG_NAME");
