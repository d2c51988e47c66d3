use std::sync::Arc;

use serde::Deserialize;

use crate::{
    backends::{MemoryBackingStore, SqliteBackingStore, sqlite::SqliteConfig},
    r#trait::BackingStore,
};

/// Which backing store to use
///
/// SQLite in RON config:
/// ```ron
/// Herald (
///     store: Sqlite((
///         url: "sqlite:///var/lib/herald/herald.db",
///     )),
/// )
/// ```
///
/// Memory store for testing (state is lost on restart):
/// ```ron
/// Herald (
///     store: Memory,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum StoreConfig {
    Memory,
    Sqlite(SqliteConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Sqlite(SqliteConfig::default())
    }
}

impl StoreConfig {
    /// Open the configured store
    pub async fn open(&self) -> crate::Result<Arc<dyn BackingStore>> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryBackingStore::new()),
            Self::Sqlite(config) => Arc::new(SqliteBackingStore::connect(config).await?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory() {
        let config: StoreConfig = ron::from_str("Memory").expect("parse");
        assert!(matches!(config, StoreConfig::Memory));
    }

    #[test]
    fn test_parse_sqlite_with_defaults() {
        let config: StoreConfig =
            ron::from_str(r#"Sqlite((url: "sqlite::memory:"))"#).expect("parse");

        let StoreConfig::Sqlite(sqlite) = config else {
            panic!("expected sqlite config");
        };
        assert_eq!(sqlite.url, "sqlite::memory:");
        assert_eq!(sqlite.max_connections, 8);
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = StoreConfig::Memory.open().await.expect("open");
        assert!(store.list_emails(None).await.expect("list").is_empty());
    }
}
