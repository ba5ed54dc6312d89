//! Deferred pixmap release
//!
//! A pixmap that backed a compositor buffer stays referenced until the
//! compositor has round-tripped past the request that replaced or destroyed
//! that buffer. Entries are tagged with the sync token sent right after the
//! replacing request and released once that token (or a later one) completes.

use crate::protocol::SyncToken;
use crate::server::PixmapId;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct ReleaseQueue {
    pending: VecDeque<(SyncToken, PixmapId)>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer releasing `pixmap` until `token` completes
    pub fn defer(&mut self, token: SyncToken, pixmap: PixmapId) {
        debug_assert!(
            self.pending.back().map_or(true, |(last, _)| *last <= token),
            "sync tokens must be monotonic"
        );
        self.pending.push_back((token, pixmap));
    }

    /// Pixmaps whose round-trip has completed, oldest first
    pub fn complete(&mut self, done: SyncToken) -> Vec<PixmapId> {
        let mut ready = Vec::new();
        while let Some(&(token, pixmap)) = self.pending.front() {
            if token > done {
                break;
            }
            self.pending.pop_front();
            ready.push(pixmap);
        }
        ready
    }

    /// Everything still waiting, used on shutdown
    pub fn drain(&mut self) -> Vec<PixmapId> {
        self.pending.drain(..).map(|(_, p)| p).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
