//! Cache of load operations, so loading the same input twice shares one
//! header read and one decode.
//!
//! # Cache keys
//!
//! A key is the SHA-256 of everything that decides what a load produces:
//!
//! - the loader's operation name,
//! - the input: the path for files, the SHA-256 of the contents for
//!   buffers,
//! - every remaining loader option, in key order,
//! - the generic load settings (access, fail level, store choice).
//!
//! Keying files by path means a file rewritten in place keeps hitting the
//! old entry. Load with `revalidate` to force a fresh read; the new
//! operation replaces the old one.
//!
//! Stream inputs are never cached: a stream can only be read once.
//!
//! ## Invalidation
//!
//! An operation whose decode failed marks itself invalid. Lookups drop
//! invalid entries instead of returning them, so the next load of the same
//! input starts over with a new operation. Sequential operations read with
//! sequential access are never inserted.
//!
//! ## Eviction
//!
//! Entries are evicted oldest first once `max_entries` is reached.

use crate::io::LoadInput;
use crate::load::{LoadOperation, LoadSettings};
use crate::options::Options;
use log::debug;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Cache key for a load, or `None` for inputs that can't be cached.
pub fn load_key(
    loader: &str,
    input: &LoadInput,
    options: &Options,
    settings: &LoadSettings,
) -> Option<String> {
    let mut hasher = Sha256::new();
    hasher.update(loader.as_bytes());
    hasher.update(b"\0");
    match input {
        LoadInput::File(path) => {
            hasher.update(b"file\0");
            hasher.update(path.to_string_lossy().as_bytes());
        }
        LoadInput::Buffer(bytes) => {
            hasher.update(b"buffer\0");
            hasher.update(Sha256::digest(bytes));
        }
        LoadInput::Source(_) => return None,
    }
    hasher.update(b"\0");
    for (key, value) in options.iter() {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(
        format!(
            "{:?}:{:?}:{}:{}:{}",
            settings.access,
            settings.fail_on,
            settings.memory,
            settings.disc,
            settings.disc_threshold
        )
        .as_bytes(),
    );
    Some(format!("{:x}", hasher.finalize()))
}

/// Summary of cache performance for a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    /// Entries dropped because their operation had failed.
    pub invalidated: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.invalidated > 0 {
            write!(
                f,
                "{} cached, {} loaded, {} invalidated ({} total)",
                self.hits,
                self.misses,
                self.invalidated,
                self.total()
            )
        } else if self.hits > 0 {
            write!(
                f,
                "{} cached, {} loaded ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} loaded", self.misses)
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Arc<LoadOperation>>,
    order: VecDeque<String>,
    stats: CacheStats,
}

impl Inner {
    fn forget(&mut self, key: &str) -> Option<Arc<LoadOperation>> {
        self.order.retain(|k| k != key);
        self.entries.remove(key)
    }
}

/// Thread-safe map from cache key to load operation.
pub struct LoadCache {
    inner: Mutex<Inner>,
    max_entries: usize,
}

impl LoadCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_entries,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A live operation for `key`. Counts a hit or a miss.
    pub fn lookup(&self, key: &str) -> Option<Arc<LoadOperation>> {
        let mut inner = self.lock();
        match inner.entries.get(key).cloned() {
            Some(op) if op.is_invalid() => {
                debug!("cache: dropping failed {}", op.name());
                inner.forget(key);
                inner.stats.invalidated += 1;
                inner.stats.misses += 1;
                None
            }
            Some(op) => {
                inner.stats.hits += 1;
                Some(op)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Remember `op` under `key`, replacing any previous entry. Operations
    /// that are invalid or must not be shared are ignored.
    pub fn insert(&self, key: String, op: Arc<LoadOperation>) {
        if op.nocache() || op.is_invalid() || self.max_entries == 0 {
            return;
        }
        let mut inner = self.lock();
        inner.forget(&key);
        while inner.entries.len() >= self.max_entries {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(key, op);
    }

    pub fn remove(&self, key: &str) -> Option<Arc<LoadOperation>> {
        self.lock().forget(key)
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}
