pub mod backends;
pub mod config;
pub mod error;
pub mod r#trait;
pub mod transitions;

pub use backends::{MemoryBackingStore, SqliteBackingStore, sqlite::SqliteConfig};
pub use config::StoreConfig;
pub use error::{Result, StoreError, TransitionError};
pub use r#trait::{AuditFilter, BackingStore, BatchFilter};
pub use transitions::{BatchTransitions, EmailTransitions};
