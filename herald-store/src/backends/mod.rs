//! Backing store implementations
//!
//! - `memory`: sharded in-memory maps, for tests and single-process use
//! - `sqlite`: durable storage through `sqlx`

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackingStore;
pub use sqlite::SqliteBackingStore;
