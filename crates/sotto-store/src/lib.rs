//! Ephemeral TTL key-value store for the relay.
//!
//! Everything the server persists lives here, always with an explicit
//! lifetime: chats, invitations, queued ciphertext, key bundles, push
//! registrations and abuse state. Two backends implement the same [`Store`]
//! trait: [`RedisStore`] for deployment (composite invariants run as atomic
//! Lua scripts) and [`MemoryStore`] for tests and single-node development.

pub mod keyspace;
pub mod memory;
pub mod redis;
pub mod types;

mod error;
mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use store::{AbuseAction, MessageVerdict, Store};
pub use types::*;

pub use self::redis::RedisStore;
