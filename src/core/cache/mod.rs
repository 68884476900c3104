//! Short-lived feed snapshot cache keyed by source identity.
//!
//! Expiry is checked on read only. An elapsed entry is reported as a miss and
//! stays in the map until it is overwritten or cleared.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::core::feed::types::FeedSnapshot;
use crate::core::storage::SourceId;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = add_duration(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: SourceId,
    pub snapshot: FeedSnapshot,
    pub expires_at: DateTime<Utc>,
}

pub struct FeedCache {
    entries: Mutex<HashMap<SourceId, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl Default for FeedCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl FeedCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Returns the snapshot for `key` unless it is absent or `now >= expires_at`.
    pub fn get(&self, key: &SourceId) -> Option<FeedSnapshot> {
        let now = self.clock.now();
        self.lock()
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.snapshot.clone())
    }

    /// Stores `snapshot` for `ttl`. Last writer wins.
    pub fn put(&self, key: SourceId, snapshot: FeedSnapshot, ttl: Duration) {
        let expires_at = add_duration(self.clock.now(), ttl);
        self.lock().insert(
            key,
            CacheEntry {
                key,
                snapshot,
                expires_at,
            },
        );
    }

    /// Removes the entry for `key`; returns whether one was stored.
    pub fn clear(&self, key: &SourceId) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Stored entries, including elapsed ones that were never overwritten.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), CacheError> {
        let entries: Vec<CacheEntry> = self.lock().values().cloned().collect();
        let serialized = serde_json::to_vec(&entries)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    /// Loads a cache written by [`FeedCache::save_to_file`]. A missing file
    /// yields an empty cache.
    pub fn load_from_file(path: &Path, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        let cache = Self::new(clock);
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(cache),
            Err(error) => return Err(error.into()),
        };
        let entries: Vec<CacheEntry> = serde_json::from_slice(&raw)?;
        {
            let mut map = cache.lock();
            for entry in entries {
                map.insert(entry.key, entry);
            }
        }
        Ok(cache)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SourceId, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn add_duration(start: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
