//! Keyed cache of built event trees with single-flight builds.
//!
//! Entries are keyed by (canonical source path, configuration fingerprint) and
//! hold an `Arc<EventTree>`, so hits are handed out without copying. Each key
//! has a build gate: concurrent requests for the same key queue behind it and
//! exactly one of them runs the builder, while distinct keys build in
//! parallel. With a [`ParquetStore`] attached, misses first consult the
//! durable store and successful builds are written back to it.
//!
//! A failed build caches nothing; the error goes to the caller and the next
//! request tries again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};

use dl_core::{Error, Result};

use crate::event_tree::EventTree;
use crate::store::ParquetStore;

/// Identity of a cached build: canonical source path plus config fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source: PathBuf,
    fingerprint: String,
}

impl CacheKey {
    /// Canonicalize `path` and pair it with `fingerprint`.
    ///
    /// Fails with [`Error::SourceNotFound`] when `path` does not exist.
    pub fn new(path: impl AsRef<Path>, fingerprint: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let source = path.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::SourceNotFound(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        Ok(Self { source, fingerprint: fingerprint.into() })
    }

    /// Canonical source path.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Configuration fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Hex SHA-256 of the key, used as a file name by the durable store.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.fingerprint.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Resident entries.
    pub entries: usize,
    /// Requests served from memory.
    pub hits: u64,
    /// Requests not served from memory (includes forced reloads).
    pub misses: u64,
    /// Builder invocations that succeeded.
    pub builds: u64,
    /// Misses served by the durable store.
    pub store_hits: u64,
}

impl CacheStats {
    /// Hit rate as a fraction [0.0, 1.0].
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

type Gate = Arc<Mutex<()>>;

/// Thread-safe build cache.
#[derive(Debug, Default)]
pub struct CacheManager {
    entries: Mutex<HashMap<CacheKey, Arc<EventTree>>>,
    gates: Mutex<HashMap<CacheKey, Gate>>,
    store: Option<ParquetStore>,
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    store_hits: AtomicU64,
}

impl CacheManager {
    /// In-memory cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache backed by a durable Parquet store in `dir`.
    pub fn with_store(dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self { store: Some(ParquetStore::open(dir)?), ..Self::default() })
    }

    /// Durable store, if configured.
    pub fn store(&self) -> Option<&ParquetStore> {
        self.store.as_ref()
    }

    /// Cached tree for `key`, or the result of `builder`.
    ///
    /// With `force_reload`, existing memory and durable entries are skipped
    /// and replaced by a fresh build. Concurrent calls for the same key run
    /// `builder` at most once; the others wait and share its result.
    pub fn get_or_build<F>(&self, key: &CacheKey, force_reload: bool, builder: F) -> Result<Arc<EventTree>>
    where
        F: FnOnce() -> Result<EventTree>,
    {
        let gate = self.gate(key);
        let result = {
            let _flight = gate.lock().unwrap_or_else(PoisonError::into_inner);
            self.build_gated(key, force_reload, builder)
        };
        self.release_gate(key, gate);
        result
    }

    fn build_gated<F>(&self, key: &CacheKey, force_reload: bool, builder: F) -> Result<Arc<EventTree>>
    where
        F: FnOnce() -> Result<EventTree>,
    {
        if !force_reload {
            if let Some(tree) = self.lookup(key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(source = %key.source().display(), "cache hit");
                return Ok(tree);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        if !force_reload {
            if let Some(tree) = self.store.as_ref().and_then(|s| s.load(key)) {
                self.store_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(self.insert(key, tree));
            }
        }

        tracing::info!(
            source = %key.source().display(),
            force_reload,
            "building event tree"
        );
        let tree = builder()?;
        self.builds.fetch_add(1, Ordering::Relaxed);

        if let Some(store) = &self.store {
            if let Err(e) = store.save(key, &tree) {
                tracing::warn!(source = %key.source().display(), error = %e, "durable cache write failed");
            }
        }
        Ok(self.insert(key, tree))
    }

    /// Cached tree for `key` without building.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<EventTree>> {
        self.lookup(key)
    }

    /// Drop the entry for `key` from memory and from the durable store.
    pub fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
        match &self.store {
            Some(store) => store.remove(key),
            None => Ok(()),
        }
    }

    /// Drop every entry from memory and from the durable store.
    pub fn clear(&self) -> Result<()> {
        // Gates are left alone: a build in flight must keep excluding
        // concurrent builds of its key. Idle gates are pruned on release.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
        match &self.store {
            Some(store) => store.clear(),
            None => Ok(()),
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no entry is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
        }
    }

    fn gate(&self, key: &CacheKey) -> Gate {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(key.clone()).or_default())
    }

    /// Drop the caller's handle on `gate` and forget it once nobody else holds it.
    fn release_gate(&self, key: &CacheKey, gate: Gate) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        drop(gate);
        // Handles are only cloned under the map lock, so the count is stable here.
        if gates.get(key).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(key);
        }
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<EventTree>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn insert(&self, key: &CacheKey, tree: EventTree) -> Arc<EventTree> {
        let tree = Arc::new(tree);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), Arc::clone(&tree));
        tree
    }
}
