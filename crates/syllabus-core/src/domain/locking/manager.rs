//! Lock manager for per-title merge serialization
//!
//! Each normalized concept name maps to an in-process mutex. A batch acquires
//! every key it needs in sorted order; the fixed order is the lock hierarchy
//! that keeps two batches from deadlocking on overlapping title sets.

use super::guard::TitleLockGuard;
use super::types::{LockConfig, LockError, LockResult};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info};

/// Lock manager for title keys
#[derive(Debug, Default)]
pub struct TitleLockManager {
    config: LockConfig,

    /// key -> mutex; entries are created on demand and pruned when idle
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TitleLockManager {
    /// Create a new lock manager with the given configuration
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Create a lock manager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(LockConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire every key in `keys`, in sorted order
    ///
    /// `timeout` bounds the whole acquisition (None = configured default). On
    /// timeout, locks taken so far are released and the first key that could not
    /// be taken is reported.
    pub async fn acquire_titles<I>(&self, keys: I, timeout: Option<Duration>) -> LockResult<TitleLockGuard>
    where
        I: IntoIterator<Item = String>,
    {
        let keys: BTreeSet<String> = keys.into_iter().collect();
        if keys.iter().any(|k| k.is_empty()) {
            return Err(LockError::InvalidState("empty title key".to_string()));
        }

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let start = Instant::now();
        let deadline = start + timeout;

        debug!(
            keys = keys.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Attempting to acquire title locks"
        );

        let mut held = Vec::with_capacity(keys.len());
        for key in &keys {
            let mutex = self.entry(key);
            match timeout_at(deadline, mutex.lock_owned()).await {
                Ok(guard) => held.push(guard),
                Err(_) => {
                    return Err(LockError::Timeout {
                        resource: key.clone(),
                        waited: start.elapsed(),
                    });
                }
            }
        }

        let keys: Vec<String> = keys.into_iter().collect();
        debug!(
            keys = ?keys,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Title locks acquired"
        );

        if self.tracked() > self.config.prune_threshold {
            self.prune_idle();
        }

        Ok(TitleLockGuard::new(keys, held))
    }

    /// Drop table entries nobody holds or waits on; returns the number removed
    pub fn prune_idle(&self) -> usize {
        let mut locks = self.table();
        let before = locks.len();
        locks.retain(|_, mutex| Arc::strong_count(mutex) > 1 || mutex.try_lock().is_err());
        let removed = before - locks.len();
        if removed > 0 {
            info!(removed, remaining = locks.len(), "Pruned idle title locks");
        }
        removed
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.table().len()
    }

    /// Whether `key` is currently held by some batch
    pub fn is_held(&self, key: &str) -> bool {
        self.table()
            .get(key)
            .map(|mutex| mutex.try_lock().is_err())
            .unwrap_or(false)
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        self.table()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        // The table only maps keys to mutexes; a poisoned map is still consistent.
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
