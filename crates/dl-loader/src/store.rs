//! Durable cache entries: one Parquet file per [`CacheKey`].
//!
//! Each file holds the Arrow form of an [`EventTree`] plus metadata tying it
//! to its key and to the state of the source file when it was built:
//!
//! | Key                | Value                                        |
//! |--------------------|----------------------------------------------|
//! | `dl.source_path`   | canonical source path                        |
//! | `dl.fingerprint`   | configuration fingerprint                    |
//! | `dl.source_stamp`  | `<byte length>:<mtime nanos since epoch>`    |
//!
//! An entry whose metadata no longer matches is ignored and rebuilt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use dl_core::{Error, Result};

use crate::cache::CacheKey;
use crate::event_tree::EventTree;
use crate::parquet_io::{read_batch, write_batch};

/// Arrow metadata key: canonical source path.
pub const META_KEY_SOURCE_PATH: &str = "dl.source_path";

/// Arrow metadata key: configuration fingerprint.
pub const META_KEY_FINGERPRINT: &str = "dl.fingerprint";

/// Arrow metadata key: source length and modification time.
pub const META_KEY_SOURCE_STAMP: &str = "dl.source_stamp";

const ENTRY_EXTENSION: &str = "parquet";

/// Directory of Parquet-encoded cache entries.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    dir: PathBuf,
}

impl ParquetStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Cache(format!("cannot create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the entry for `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{ENTRY_EXTENSION}", key.digest()))
    }

    /// Load the entry for `key` if present and still current.
    ///
    /// Stale and unreadable entries are reported as misses; unreadable ones
    /// are logged.
    pub fn load(&self, key: &CacheKey) -> Option<EventTree> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }
        match self.try_load(key, &path) {
            Ok(Some(tree)) => {
                tracing::debug!(entry = %path.display(), "durable cache hit");
                Some(tree)
            }
            Ok(None) => {
                tracing::debug!(entry = %path.display(), "durable cache entry is stale");
                None
            }
            Err(e) => {
                tracing::warn!(entry = %path.display(), error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }

    fn try_load(&self, key: &CacheKey, path: &Path) -> Result<Option<EventTree>> {
        let batch = read_batch(path)?;
        let metadata = batch.schema_ref().metadata();
        let matches = |k: &str, expected: &str| metadata.get(k).map(String::as_str) == Some(expected);

        let stamp = source_stamp(key.source())?;
        if !matches(META_KEY_SOURCE_PATH, &key.source().to_string_lossy())
            || !matches(META_KEY_FINGERPRINT, key.fingerprint())
            || !matches(META_KEY_SOURCE_STAMP, &stamp)
        {
            return Ok(None);
        }
        EventTree::from_record_batch(&batch).map(Some)
    }

    /// Write the entry for `key`, replacing any previous one.
    ///
    /// The file is written under a temporary name and renamed into place, so
    /// readers never observe a partial entry.
    pub fn save(&self, key: &CacheKey, tree: &EventTree) -> Result<()> {
        let metadata = HashMap::from([
            (META_KEY_SOURCE_PATH.to_string(), key.source().to_string_lossy().into_owned()),
            (META_KEY_FINGERPRINT.to_string(), key.fingerprint().to_string()),
            (META_KEY_SOURCE_STAMP.to_string(), source_stamp(key.source())?),
        ]);
        let batch = tree.to_record_batch_with_metadata(metadata)?;

        let path = self.entry_path(key);
        let tmp = self.dir.join(format!(
            "{}.{}-{}.tmp",
            key.digest(),
            std::process::id(),
            unique_suffix()
        ));
        if let Err(e) = write_batch(&tmp, &batch) {
            std::fs::remove_file(&tmp).ok();
            return Err(e);
        }
        std::fs::rename(&tmp, &path).map_err(|e| {
            std::fs::remove_file(&tmp).ok();
            Error::Cache(format!("cannot move entry into {}: {e}", path.display()))
        })?;
        tracing::info!(entry = %path.display(), events = tree.n_events(), "cache entry written");
        Ok(())
    }

    /// Remove the entry for `key`, if any.
    pub fn remove(&self, key: &CacheKey) -> Result<()> {
        match std::fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every entry in the store directory.
    pub fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION) {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

fn unique_suffix() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0)
}

/// `<len>:<mtime nanos>` of `path`; changes whenever the source is rewritten.
pub(crate) fn source_stamp(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::SourceNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok(format!("{}:{mtime}", meta.len()))
}
