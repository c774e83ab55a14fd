//! Engine configuration.

use std::time::Duration;

use crate::error::{DbError, Result};
use crate::{DEFAULT_BUFFER_POOL_PAGES, DEFAULT_PAGE_SIZE};

/// Smallest page that still leaves room for a bitmap byte and one `Int` tuple.
pub const MIN_PAGE_SIZE: usize = 64;

/// Configuration for a storage engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Size in bytes of every page in every heap file.
    pub page_size: usize,
    /// Maximum number of pages resident in the buffer pool.
    pub buffer_pool_pages: usize,
    /// Upper bound on a single lock wait. `None` relies on deadlock detection alone.
    pub lock_wait_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_pages: DEFAULT_BUFFER_POOL_PAGES,
            lock_wait_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Builds a configuration from the defaults, overridden by
    /// `STRATA_PAGE_SIZE`, `STRATA_BUFFER_POOL_PAGES` and `STRATA_LOCK_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(page_size) = env_usize("STRATA_PAGE_SIZE")? {
            config.page_size = page_size;
        }
        if let Some(pages) = env_usize("STRATA_BUFFER_POOL_PAGES")? {
            config.buffer_pool_pages = pages;
        }
        if let Some(ms) = env_usize("STRATA_LOCK_TIMEOUT_MS")? {
            config.lock_wait_timeout = Some(Duration::from_millis(ms as u64));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_buffer_pool_pages(mut self, pages: usize) -> Self {
        self.buffer_pool_pages = pages;
        self
    }

    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(DbError::InvalidConfig(format!(
                "page_size must be at least {MIN_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.page_size > u32::MAX as usize {
            return Err(DbError::InvalidConfig(format!(
                "page_size {} does not fit a u32 offset",
                self.page_size
            )));
        }
        if self.buffer_pool_pages == 0 {
            return Err(DbError::InvalidConfig(
                "buffer_pool_pages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| DbError::InvalidConfig(format!("{name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
