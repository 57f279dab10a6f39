// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared update bookkeeping for the stateful indexers.
//!
//! Each indexer composes a [`SyncCursor`] rather than inheriting any
//! behavior: the cursor tracks the next block to search and whether at
//! least one update pass has completed. Concurrent `update()` calls on
//! one instance are not supported; callers serialize them.

use async_trait::async_trait;

use crate::error::IngestResult;

/// Block-range bookkeeping for one event-sourced state container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncCursor {
    pub first_block_to_search: u64,
    pub latest_block_searched: u64,
    pub updated: bool,
}

impl SyncCursor {
    pub fn new(deployment_block: u64) -> Self {
        Self {
            first_block_to_search: deployment_block,
            latest_block_searched: deployment_block.saturating_sub(1),
            updated: false,
        }
    }

    /// The `[from, to]` range to fetch next, or `None` when the source
    /// has produced nothing new.
    pub fn search_range(&self, latest_block: u64) -> Option<(u64, u64)> {
        if latest_block < self.first_block_to_search {
            return None;
        }
        Some((self.first_block_to_search, latest_block))
    }

    /// Marks `[..=to_block]` as ingested.
    pub fn advance(&mut self, to_block: u64) {
        self.latest_block_searched = to_block;
        self.first_block_to_search = to_block + 1;
        self.updated = true;
    }
}

/// Capability shared by the event-sourced state containers.
#[async_trait]
pub trait StateIndexer: Send {
    fn cursor(&self) -> &SyncCursor;

    /// Fetches any new block range from the event source and folds it
    /// into state. All-or-nothing per batch: on error, prior state is
    /// left untouched.
    async fn update(&mut self) -> IngestResult<()>;

    fn first_block_to_search(&self) -> u64 {
        self.cursor().first_block_to_search
    }

    fn latest_block_searched(&self) -> u64 {
        self.cursor().latest_block_searched
    }

    fn is_updated(&self) -> bool {
        self.cursor().updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_starts_at_deployment_block() {
        let cursor = SyncCursor::new(100);
        assert_eq!(cursor.first_block_to_search, 100);
        assert_eq!(cursor.latest_block_searched, 99);
        assert!(!cursor.updated);
        assert_eq!(cursor.search_range(99), None);
        assert_eq!(cursor.search_range(250), Some((100, 250)));
    }

    #[test]
    fn advance_moves_the_window() {
        let mut cursor = SyncCursor::new(100);
        cursor.advance(250);
        assert_eq!(cursor.first_block_to_search, 251);
        assert_eq!(cursor.latest_block_searched, 250);
        assert!(cursor.updated);
        assert_eq!(cursor.search_range(250), None);
        assert_eq!(cursor.search_range(251), Some((251, 251)));
    }

    #[test]
    fn zero_deployment_block_does_not_underflow() {
        let cursor = SyncCursor::new(0);
        assert_eq!(cursor.latest_block_searched, 0);
        assert_eq!(cursor.search_range(0), Some((0, 0)));
    }
}
