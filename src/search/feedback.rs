//! Implicit usefulness feedback
//!
//! Ids returned by a search are tracked with a short TTL. A subsequent get
//! of one of those ids within the TTL counts as an implicit usefulness
//! signal. Entries remember which scoring signal ranked the result highest
//! so the weight tuner can attribute feedback per signal. The map is
//! process-local and bounded by expiry sweeps.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default TTL for search-result tracking
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry {
    at: Instant,
    top_signal: Option<String>,
}

/// Tracks recently returned search-result ids
pub struct FeedbackTracker {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl Default for FeedbackTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl FeedbackTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Register ids from a fresh result set without signal attribution
    pub fn register<I>(&self, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.insert(ids.into_iter().map(|id| (id, None)));
    }

    /// Register ids together with the signal that ranked each one highest
    pub fn register_with_signals<I>(&self, items: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.insert(items.into_iter().map(|(id, s)| (id, Some(s))));
    }

    fn insert<I>(&self, items: I)
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        for (id, top_signal) in items {
            entries.insert(id, Entry { at: now, top_signal });
        }
        // Opportunistic sweep keeps the map bounded
        let ttl = self.ttl;
        entries.retain(|_, e| now.duration_since(e.at) <= ttl);
    }

    /// Consume a tracked id. Returns `Some(top_signal)` when the id was
    /// registered within the TTL; each registration yields at most one hit.
    pub fn take_hit(&self, id: &str) -> Option<Option<String>> {
        let mut entries = self.entries.lock();
        let entry = entries.remove(id)?;
        if entry.at.elapsed() <= self.ttl {
            Some(entry.top_signal)
        } else {
            None
        }
    }

    /// Number of currently tracked ids (diagnostics)
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything (tests)
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
