use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::errors::AppResult;

/// Request-keyed store of raw response bodies, mirrored to a single JSON file.
///
/// Keys are fully resolved request URLs and values are the response text as
/// received. Entries never expire; deleting or editing the file is the only
/// invalidation mechanism. Every [`ResponseCache::put`] rewrites the whole
/// file while holding the lock, so concurrent writers never interleave.
pub struct ResponseCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl ResponseCache {
    /// Loads the cache file, starting empty when it is missing or unreadable.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
                Ok(entries) => {
                    debug!(
                        target: "cache",
                        path = %path.display(),
                        entries = entries.len(),
                        "response cache loaded"
                    );
                    entries
                }
                Err(err) => {
                    warn!(
                        target: "cache",
                        path = %path.display(),
                        error = ?err,
                        "cache file is malformed; starting with an empty cache"
                    );
                    BTreeMap::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                warn!(
                    target: "cache",
                    path = %path.display(),
                    error = ?err,
                    "cache file unreadable; starting with an empty cache"
                );
                BTreeMap::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    /// Stores `value` under `key` and writes the full cache to disk before returning.
    ///
    /// When the write fails the in-memory map is restored, so memory never
    /// holds an entry the file does not.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> AppResult<()> {
        let key = key.into();
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.clone(), value.into());
        if let Err(err) = persist(&self.path, &entries) {
            match previous {
                Some(previous) => entries.insert(key, previous),
                None => entries.remove(&key),
            };
            return Err(err);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// Written to a sibling file and renamed so a crash mid-write leaves the
// previous file intact instead of a truncated one.
fn persist(path: &Path, entries: &BTreeMap<String, String>) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let serialized = serde_json::to_string_pretty(entries)?;
    let staging = staging_path(path);
    fs::write(&staging, serialized)?;
    fs::rename(&staging, path)?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut buf = path.to_path_buf();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "cache.json".into());
    buf.set_file_name(format!("{name}.tmp"));
    buf
}
