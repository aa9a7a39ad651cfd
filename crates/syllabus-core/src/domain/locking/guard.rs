//! Lock guards for RAII-style lock management
//!
//! Every title lock held by a batch lives in one [`TitleLockGuard`]; dropping the
//! guard releases them all, including on early return or panic.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

/// A set of held title locks
#[derive(Debug)]
pub struct TitleLockGuard {
    /// Normalized keys, sorted, in acquisition order
    keys: Vec<String>,

    /// Held mutex guards, parallel to `keys`
    guards: Vec<OwnedMutexGuard<()>>,

    acquired_at: Instant,
}

impl TitleLockGuard {
    pub(crate) fn new(keys: Vec<String>, guards: Vec<OwnedMutexGuard<()>>) -> Self {
        Self {
            keys,
            guards,
            acquired_at: Instant::now(),
        }
    }

    /// Keys held by this guard, sorted
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Whether this guard holds `key`
    pub fn covers(&self, key: &str) -> bool {
        self.keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok()
    }

    /// Whether this guard holds every key in `keys`
    pub fn covers_all<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> bool {
        keys.into_iter().all(|k| self.covers(k))
    }

    /// Union of held keys and `extra`, for re-acquiring an expanded set
    pub fn expanded_with<'a>(&self, extra: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
        self.keys.iter().cloned().chain(extra.into_iter().cloned()).collect()
    }

    /// Number of locks held
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Whether no locks are held
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// How long the locks have been held
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Explicitly release all locks (normally done automatically on drop)
    pub fn release(self) {}
}

impl fmt::Display for TitleLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TitleLocks[{}]", self.keys.join(", "))
    }
}
