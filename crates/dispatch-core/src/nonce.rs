//! Single-use nonce cache for replay protection.
//!
//! A size-bounded map from nonce value to first-seen time. Reclamation is
//! bulk and threshold-triggered rather than running on a timer, the same
//! "check size on the hot path, sweep only when warranted" posture this
//! codebase's subsystem caches use for their own bounded maps.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{DispatchError, DispatchErrorKind};

/// Above this many entries, a successful insert also sweeps every entry
/// older than the validity window before returning.
const RECLAIM_THRESHOLD: usize = 10_000;

struct Entry {
    first_seen_at: u64,
}

/// Process-local, size-bounded nonce cache. Cheap to clone via `Arc` at the
/// call site; the cache itself owns its lock.
pub struct NonceCache {
    entries: Mutex<HashMap<String, Entry>>,
    validity_window_secs: u64,
}

impl NonceCache {
    /// Build an empty cache with the given signature validity window.
    pub fn new(validity_window_secs: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            validity_window_secs,
        }
    }

    /// Check a nonce for replay and, if unseen, record it at `now`.
    ///
    /// Returns [`DispatchErrorKind::ReplayedNonce`] if `nonce` was already
    /// observed within the validity window. A nonce whose prior sighting has
    /// aged out of the window is treated as unseen and re-recorded.
    pub fn check_and_insert(&self, nonce: &str, now: u64) -> Result<(), DispatchError> {
        let mut entries = self.entries.lock().expect("nonce cache lock poisoned");

        if let Some(existing) = entries.get(nonce) {
            let age = now.saturating_sub(existing.first_seen_at);
            if age <= self.validity_window_secs {
                return Err(DispatchError::bare(DispatchErrorKind::ReplayedNonce));
            }
        }

        entries.insert(nonce.to_string(), Entry { first_seen_at: now });

        if entries.len() > RECLAIM_THRESHOLD {
            let window = self.validity_window_secs;
            entries.retain(|_, entry| now.saturating_sub(entry.first_seen_at) <= window);
        }

        Ok(())
    }

    /// Current entry count, for the health endpoint's diagnostics and the
    /// `NONCE_CACHE_SIZE` gauge.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("nonce cache lock poisoned").len()
    }

    /// True when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_accepted_and_recorded() {
        let cache = NonceCache::new(300);
        assert!(cache.check_and_insert("n1", 1_000).is_ok());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn replay_within_window_is_rejected() {
        let cache = NonceCache::new(300);
        cache.check_and_insert("n1", 1_000).unwrap();
        let err = cache.check_and_insert("n1", 1_000 + 1).unwrap_err();
        assert_eq!(err.kind, DispatchErrorKind::ReplayedNonce);
    }

    #[test]
    fn replay_one_millisecond_after_insertion_is_rejected() {
        // Timestamps are whole seconds on the wire; the finest resolution
        // this cache can observe is one second, so "one millisecond after"
        // collapses to "the same second" at this layer.
        let cache = NonceCache::new(300);
        cache.check_and_insert("n1", 1_000).unwrap();
        assert!(cache.check_and_insert("n1", 1_000).is_err());
    }

    #[test]
    fn replay_after_the_validity_window_has_elapsed_is_accepted() {
        let cache = NonceCache::new(300);
        cache.check_and_insert("n1", 1_000).unwrap();
        assert!(cache.check_and_insert("n1", 1_000 + 301).is_ok());
    }

    #[test]
    fn exceeding_the_reclaim_threshold_sweeps_aged_entries() {
        let cache = NonceCache::new(5);
        for i in 0..RECLAIM_THRESHOLD {
            cache
                .check_and_insert(&format!("old-{i}"), 0)
                .expect("unique nonce");
        }
        // This insert pushes the cache over the threshold; every entry from
        // t=0 is now 1_000s old, far past the 5s window, and gets swept.
        cache.check_and_insert("fresh", 1_000).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
