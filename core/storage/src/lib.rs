//! Local persistence for postsync.
//!
//! This module provides trait-based interfaces for the local post store and
//! the durable key-value slot used by the pending queue, a SQLite backend
//! that serializes every operation onto one worker thread, and in-memory
//! fakes for tests.
//!
//! # Design Principles
//! - Local store is the system of record for reads
//! - Every store operation is transactional: it succeeds completely or leaves
//!   the store unchanged
//! - Upsert-by-id: the store never holds two records for the same post id

pub mod memory;
pub mod provider;
pub mod sqlite;

pub use memory::{MemorySlot, MemoryStore};
pub use provider::{KeyValueSlot, LocalStore, StoredPost};
pub use sqlite::SqliteStore;
