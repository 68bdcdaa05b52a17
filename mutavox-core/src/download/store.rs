//! Verified-asset hash store.
//!
//! Maps destination paths to the content digest recorded after a successful,
//! verified download, so a later fetch of the same asset can skip the
//! network entirely. The store is an owned object — every read and write is
//! serialized by its own mutex, and the backing JSON file is rewritten under
//! that same lock.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::warn;

/// JSON-backed `destination path → hex digest` map.
#[derive(Debug)]
pub struct AssetHashStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl AssetHashStore {
    /// Open (or create) the store backed by `path`. A missing or corrupt
    /// file starts the store empty — entries are only trusted when they
    /// parse cleanly.
    pub fn open(path: PathBuf) -> Self {
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<HashMap<String, String>>(&raw).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Digest recorded for `dest` by a previous verified download, if any.
    pub fn recorded_hash(&self, dest: &Path) -> Option<String> {
        self.entries.lock().get(&key_for(dest)).cloned()
    }

    /// Record `digest` for `dest` and persist the store.
    pub fn record(&self, dest: &Path, digest: &str) -> std::io::Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(key_for(dest), digest.to_string());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*entries).map_err(std::io::Error::other)?;
        if let Err(e) = fs::write(&self.path, &json) {
            warn!("failed to persist asset hash store: {e}");
            return Err(e);
        }
        Ok(())
    }
}

fn key_for(dest: &Path) -> String {
    dest.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join("mutavox-hash-store-tests")
            .join(name)
    }

    #[test]
    fn empty_store_has_no_entries() {
        let store = AssetHashStore::open(temp_store_path("missing/assets.json"));
        assert_eq!(store.recorded_hash(Path::new("/models/a.bin")), None);
    }

    #[test]
    fn record_persists_across_reopen() {
        let path = temp_store_path("persist/assets.json");
        let _ = fs::remove_file(&path);

        let store = AssetHashStore::open(path.clone());
        store
            .record(Path::new("/models/a.bin"), "abc123")
            .expect("record entry");

        let reopened = AssetHashStore::open(path);
        assert_eq!(
            reopened.recorded_hash(Path::new("/models/a.bin")),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn corrupt_store_file_starts_empty() {
        let path = temp_store_path("corrupt/assets.json");
        fs::create_dir_all(path.parent().expect("parent")).expect("create dir");
        fs::write(&path, "{broken").expect("write corrupt file");

        let store = AssetHashStore::open(path);
        assert_eq!(store.recorded_hash(Path::new("/models/a.bin")), None);
    }
}
