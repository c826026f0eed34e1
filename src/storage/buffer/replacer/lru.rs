use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Holds the set of frames that are currently unpinned and thus eligible for
/// eviction, ordered from least to most recently unpinned. The insertion-ordered
/// map gives O(1) membership checks, removal, and front pops.
pub struct LRUReplacer {
    lru: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LRUReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            lru: Mutex::new(LinkedHashMap::with_capacity(pool_size)),
        }
    }

    /// Admit a frame as an eviction candidate. No-op if it is already one.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut lru = self.lru.lock();
        if lru.contains_key(&frame_id) {
            return;
        }
        lru.insert(frame_id, ());
    }

    /// Remove a frame from the eviction candidates. No-op if absent.
    pub fn pin(&self, frame_id: FrameId) {
        self.lru.lock().remove(&frame_id);
    }

    /// Evict the least recently used frame, if any.
    pub fn victim(&self) -> Option<FrameId> {
        self.lru.lock().pop_front().map(|(frame_id, _)| frame_id)
    }

    /// Number of frames eligible for eviction.
    pub fn size(&self) -> usize {
        self.lru.lock().len()
    }
}
