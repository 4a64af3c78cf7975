//! Echo suppression: keeping the mirror's own writes out of the queue.
//!
//! Two strategies:
//! - `WatchControl`: the dispatcher unwatches the opposite root for the
//!   duration of a mirrored write. External changes landing there during
//!   that window are lost.
//! - `RecentWrites`: every mirror target is recorded with a timestamp and the
//!   intake drops events on recorded paths until the TTL elapses. Only the
//!   touched paths are blind, and only briefly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hotcopy_core::HotcopyResult;

/// Subscription control over one watched root.
pub trait WatchControl: Send {
    /// Stop receiving events for `root` (recursively).
    fn suspend(&mut self, root: &Path) -> HotcopyResult<()>;

    /// Start receiving events for `root` again (recursively).
    fn resume(&mut self, root: &Path) -> HotcopyResult<()>;
}

#[derive(Debug, Clone, Copy)]
struct Mark {
    at: Instant,
    /// Also covers every descendant (recursive removals)
    tree: bool,
}

/// Thread-safe set of paths recently written by the mirror, with TTL expiry.
#[derive(Debug)]
pub struct RecentWrites {
    entries: Mutex<HashMap<PathBuf, Mark>>,
    ttl: Duration,
}

impl RecentWrites {
    pub fn new(ttl: Duration) -> Self {
        RecentWrites {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a write to exactly `path`.
    pub fn mark(&self, path: &Path) {
        self.insert(path, false);
    }

    /// Record a write to `path` and everything below it.
    pub fn mark_tree(&self, path: &Path) {
        self.insert(path, true);
    }

    /// True if an event on `path` is most likely the mirror's own write.
    pub fn is_echo(&self, path: &Path) -> bool {
        let map = self.lock();
        let fresh = |mark: &Mark| mark.at.elapsed() < self.ttl;

        if map.get(path).is_some_and(fresh) {
            return true;
        }
        path.ancestors()
            .skip(1)
            .any(|ancestor| map.get(ancestor).is_some_and(|m| m.tree && fresh(m)))
    }

    /// Drop every entry whose TTL has elapsed.
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        self.lock().retain(|_, mark| mark.at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn insert(&self, path: &Path, tree: bool) {
        let ttl = self.ttl;
        let mut map = self.lock();
        map.retain(|_, mark| mark.at.elapsed() < ttl);

        let tree = tree || map.get(path).is_some_and(|m| m.tree);
        map.insert(
            path.to_path_buf(),
            Mark {
                at: Instant::now(),
                tree,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Mark>> {
        self.entries.lock().expect("recent writes lock poisoned")
    }
}
