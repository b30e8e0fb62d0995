//! Directory-sharded store for cached API responses
//!
//! Provides a `CacheStore` that persists one JSON file per fingerprint, nested
//! in directories that mirror the fingerprint's segments, with expiry
//! timestamps supporting stale-if-error fallback when the API is unavailable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::fingerprint::Fingerprint;

/// File extension of stored entries
pub const EXTENSION: &str = "json";

/// Errors that can occur when reading or writing the cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error
    #[error("Cache I/O error: {0}")]
    Io(#[from] io::Error),

    /// Entry could not be (de)serialized
    #[error("Cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Temporary file could not be moved over the entry
    #[error("Failed to persist cache entry: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// Enumeration pattern could not be built
    #[error("Invalid cache path pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// A cached response as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fingerprint key the entry was stored under
    pub key: String,
    pub status: u16,
    pub reason: String,
    /// Response headers kept for staleness decisions
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// When the data was cached
    pub cached_at: DateTime<Utc>,
    /// When the entry expires; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }
}

/// Result of reading from cache, including metadata about cache freshness
#[derive(Debug)]
pub struct CachedData<T> {
    /// The cached data
    pub data: T,
    /// When the data was originally cached
    pub cached_at: DateTime<Utc>,
    /// Whether the cache entry has expired
    pub is_expired: bool,
}

/// Reads and writes cached responses under a root directory
///
/// A fingerprint `api/v3/games/abc` is stored at `<root>/api/v3/games/abc.json`.
/// Expired entries are still returned (with `is_expired = true`) so callers can
/// fall back to them when a refresh fails.
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Directory where cache files are stored
    root: PathBuf,
    /// Guards directory creation and removal
    lock: Arc<Mutex<()>>,
}

impl CacheStore {
    /// Creates a store rooted at a custom directory
    pub fn with_dir(root: PathBuf) -> Self {
        Self {
            root,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path of the file holding the given fingerprint
    pub fn path_for(&self, key: &Fingerprint) -> PathBuf {
        let mut path = self.root.clone();
        let segments = key.segments();
        let file_suffix = format!(".{}", EXTENSION);
        for (i, segment) in segments.iter().enumerate() {
            match segment.strip_suffix(&file_suffix) {
                // A directory must never share its name with an entry file
                Some(stem) if i + 1 < segments.len() => {
                    path.push(format!("{}%2E{}", stem, EXTENSION))
                }
                _ => path.push(segment),
            }
        }
        if key.segments().is_empty() {
            path.push("_");
        }
        let mut file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        file_name.push(".");
        file_name.push(EXTENSION);
        path.set_file_name(file_name);
        path
    }

    /// Writes an entry, replacing any existing one for the same key
    ///
    /// The entry is written to a temporary file in the target directory and
    /// renamed over the old one, so readers never observe a partial entry.
    pub fn put(&self, key: &Fingerprint, entry: &CacheEntry) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        let json = serde_json::to_string_pretty(entry)?;

        self.ensure_dir(&parent)?;
        let mut tmp = match tempfile::NamedTempFile::new_in(&parent) {
            Ok(tmp) => tmp,
            // A concurrent delete pruned the shard between creation and use
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.ensure_dir(&parent)?;
                tempfile::NamedTempFile::new_in(&parent)?
            }
            Err(e) => return Err(e.into()),
        };
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&path)?;
        Ok(())
    }

    fn ensure_dir(&self, dir: &Path) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        fs::create_dir_all(dir)
    }

    /// Reads an entry
    ///
    /// Returns `None` if the entry doesn't exist or cannot be parsed.
    pub fn get(&self, key: &Fingerprint) -> Option<CacheEntry> {
        read_entry(&self.path_for(key))
    }

    /// Reads an entry along with its freshness
    pub fn read(&self, key: &Fingerprint) -> Option<CachedData<CacheEntry>> {
        let entry = self.get(key)?;
        let is_expired = entry.is_expired(Utc::now());
        Some(CachedData {
            cached_at: entry.cached_at,
            is_expired,
            data: entry,
        })
    }

    /// Whether an entry exists for the key
    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.path_for(key).is_file()
    }

    /// Whether an unexpired entry exists for the key
    pub fn contains_fresh(&self, key: &Fingerprint) -> bool {
        self.read(key).is_some_and(|cached| !cached.is_expired)
    }

    /// Removes an entry, pruning directories it leaves empty
    ///
    /// A missing entry is not an error. The root directory is never removed.
    pub fn delete(&self, key: &Fingerprint) -> Result<(), CacheError> {
        self.delete_path(&self.path_for(key))
    }

    fn delete_path(&self, path: &Path) -> Result<(), CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            let is_empty = match fs::read_dir(current) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => break,
            };
            if !is_empty {
                break;
            }
            match fs::remove_dir(current) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(_) => break,
            }
            dir = current.parent();
        }
        Ok(())
    }

    /// Lists every stored entry file, recursively
    pub fn iterate_paths(&self) -> Result<Vec<PathBuf>, CacheError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let escaped_root = glob::Pattern::escape(&self.root.to_string_lossy());
        let pattern = format!("{}/**/*.{}", escaped_root, EXTENSION);
        let mut paths: Vec<PathBuf> = glob::glob(&pattern)?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Number of stored entries
    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.iterate_paths()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Every readable entry, in path order; unreadable files are skipped
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        Ok(self
            .iterate_paths()?
            .iter()
            .filter_map(|path| read_entry(path))
            .collect())
    }

    /// Deletes every expired entry, plus unreadable ones; returns how many were removed
    pub fn delete_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut removed = 0;
        for path in self.iterate_paths()? {
            let expired = match read_entry(&path) {
                Some(entry) => entry.is_expired(now),
                None => true,
            };
            if expired {
                self.delete_path(&path)?;
                removed += 1;
            }
        }
        tracing::debug!(removed, root = %self.root.display(), "swept expired cache entries");
        Ok(removed)
    }
}

fn read_entry(path: &Path) -> Option<CacheEntry> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}
