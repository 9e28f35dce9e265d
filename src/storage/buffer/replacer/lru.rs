use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Tracks at most `capacity` unpinned frames in order of last unpin;
/// the least recently unpinned frame is evicted first. The recency list
/// and membership map are one structure, so every operation is O(1).
pub struct LRUReplacer {
    capacity: usize,
    // Front is least recently unpinned, back is most recent.
    frames: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LRUReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: Mutex::new(LinkedHashMap::with_capacity(capacity)),
        }
    }

    /// Evict the least recently unpinned frame, if any.
    pub fn victim(&self) -> Option<FrameId> {
        let mut frames = self.frames.lock();
        frames.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// A pinned frame is no longer eligible for eviction.
    pub fn pin(&self, frame_id: FrameId) {
        let mut frames = self.frames.lock();
        frames.remove(&frame_id);
    }

    /// An unpinned frame becomes eligible for eviction, as the most
    /// recently used entry. At capacity the oldest entry is evicted
    /// first; that case only arises transiently.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut frames = self.frames.lock();
        if frames.contains_key(&frame_id) {
            return;
        }
        if frames.len() >= self.capacity {
            frames.pop_front();
        }
        frames.insert(frame_id, ());
    }

    /// Number of frames currently eligible for eviction.
    pub fn size(&self) -> usize {
        self.frames.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn victims_come_in_unpin_order() {
        let replacer = LRUReplacer::new(4);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        assert_eq!(replacer.size(), 3);
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn pin_removes_a_candidate() {
        let replacer = LRUReplacer::new(4);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.pin(1);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn unpin_is_idempotent() {
        let replacer = LRUReplacer::new(4);
        replacer.unpin(7);
        replacer.unpin(7);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(7));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn overflow_evicts_the_oldest() {
        let replacer = LRUReplacer::new(2);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);

        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));
    }
}
