//! Outbound msg_seq counters.
//!
//! The platform rejects duplicate `(msg_id, msg_seq)` pairs, so every reply
//! to the same inbound message needs a strictly increasing sequence number.
//! A bounded LRU over the most recent message ids keeps memory flat.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

const TRACKED_MSG_IDS: usize = 100;

/// Per-`msg_id` monotonically increasing counters.
pub struct MsgSeqManager {
    counters: Mutex<LruCache<String, u32>>,
    // Replies without an inbound msg_id still need unique sequence numbers.
    untracked: AtomicU32,
}

impl MsgSeqManager {
    /// Creates a manager tracking the most recent message ids.
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(LruCache::new(
                NonZeroUsize::new(TRACKED_MSG_IDS).expect("non-zero capacity"),
            )),
            untracked: AtomicU32::new(1000),
        }
    }

    /// Returns the next sequence number for `msg_id` (1, 2, 3, ...), or a
    /// process-unique fallback when no message id is available.
    pub fn next(&self, msg_id: Option<&str>) -> u32 {
        let Some(msg_id) = msg_id.filter(|id| !id.is_empty()) else {
            return self.untracked.fetch_add(1, Ordering::Relaxed);
        };

        let mut counters = self.counters.lock();
        let seq = counters.get_mut(msg_id).map(|c| *c + 1).unwrap_or(1);
        counters.put(msg_id.to_string(), seq);
        seq
    }
}

impl Default for MsgSeqManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_increments_per_msg_id() {
        let seq = MsgSeqManager::new();
        assert_eq!(seq.next(Some("m1")), 1);
        assert_eq!(seq.next(Some("m1")), 2);
        assert_eq!(seq.next(Some("m2")), 1);
        assert_eq!(seq.next(Some("m1")), 3);
    }

    #[test]
    fn test_untracked_ids_are_unique() {
        let seq = MsgSeqManager::new();
        let a = seq.next(None);
        let b = seq.next(Some(""));
        assert_ne!(a, b);
    }

    #[test]
    fn test_lru_evicts_oldest() {
        let seq = MsgSeqManager::new();
        seq.next(Some("old"));
        for i in 0..TRACKED_MSG_IDS {
            seq.next(Some(&format!("m{i}")));
        }
        // "old" was evicted; its counter restarts.
        assert_eq!(seq.next(Some("old")), 1);
    }
}
