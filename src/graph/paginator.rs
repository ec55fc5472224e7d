use crate::error::{Error, Result};

/// Window handed to the graph store: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub start: u64,
    pub end: u64,
}

/// State machine behind the graph store's adaptive page sizing. On a
/// payload-too-large signal the page size halves and the same window start
/// is replayed; on success the cursor advances and the page size resets to
/// the configured default.
#[derive(Debug, Clone)]
pub struct AdaptivePager {
    default_page_size: u64,
    page_size: u64,
    start: u64,
}

impl AdaptivePager {
    pub fn new(default_page_size: u64) -> Self {
        Self {
            default_page_size,
            page_size: default_page_size,
            start: 0,
        }
    }

    pub fn window(&self) -> PageWindow {
        PageWindow {
            start: self.start,
            end: self.start + self.page_size,
        }
    }

    pub fn advance(&mut self) {
        self.start += self.page_size;
        self.page_size = self.default_page_size;
    }

    /// Halves the page for a replay of the same window start. A window that
    /// can no longer shrink propagates the failure.
    pub fn halve(&mut self) -> Result<()> {
        if self.page_size <= 1 {
            return Err(Error::PayloadTooLarge);
        }
        self.page_size /= 2;
        Ok(())
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }
}
