//! Store configuration.
//!
//! [`StoreConfig`] is the surface the excluded bootstrap layer feeds into
//! this core: where the database lives, how results are paged, and the
//! connection pool / timeout knobs applied to every pooled connection.

use std::path::PathBuf;

/// Configuration for a persistence engine instance.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Database file path. `None` opens a shared in-memory database.
    pub path: Option<PathBuf>,
    /// Rows per page for paged queries. 0 disables server-side paging.
    pub page_size: usize,
    /// Maximum pool size (default: 16).
    pub pool_size: u32,
    /// Statement/busy timeout in milliseconds (default: 30000).
    pub busy_timeout_ms: u32,
    /// Cache size in KiB (default: 8192 = 8 MB).
    pub cache_size_kib: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            page_size: 512,
            pool_size: 16,
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
        }
    }
}

impl StoreConfig {
    /// Configuration for a file-backed store at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Configuration for an in-memory store.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Override the page size used by paged queries.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Override the maximum pool size.
    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = StoreConfig::default();
        assert!(config.path.is_none());
        assert_eq!(config.page_size, 512);
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.busy_timeout_ms, 30_000);
        assert_eq!(config.cache_size_kib, 8192);
    }

    #[test]
    fn file_config_sets_path() {
        let config = StoreConfig::file("/tmp/store.db");
        assert_eq!(config.path, Some(PathBuf::from("/tmp/store.db")));
    }

    #[test]
    fn builders_override_defaults() {
        let config = StoreConfig::in_memory().with_page_size(2).with_pool_size(1);
        assert_eq!(config.page_size, 2);
        assert_eq!(config.pool_size, 1);
    }
}
