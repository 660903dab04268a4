//! Disk cache of enriched texts keyed by a content hash.
//!
//! One JSON record `{"content": "..."}` per key, stored as `<dir>/<hash>.json`.
//! Every failure is logged and reported as a miss; the cache never fails its caller.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    content: String,
}

#[derive(Clone, Debug)]
pub struct ContentCache {
    dir: PathBuf,
    enabled: bool,
}

impl ContentCache {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        let dir = dir.into();
        if enabled {
            if let Err(e) = fs::create_dir_all(&dir) {
                warn!("cache dir {} could not be created: {e}", dir.display());
            }
        }
        Self { dir, enabled }
    }

    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let path = self.record_path(key);
        if !path.exists() {
            return None;
        }
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("cache read error for {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str::<CacheRecord>(&raw) {
            Ok(rec) => Some(rec.content),
            Err(e) => {
                warn!("cache record {} is corrupt: {e}", path.display());
                None
            }
        }
    }

    pub fn put(&self, key: &str, content: &str) {
        if !self.enabled {
            return;
        }
        let path = self.record_path(key);
        let rec = CacheRecord {
            content: content.to_string(),
        };
        let body = match serde_json::to_string(&rec) {
            Ok(body) => body,
            Err(e) => {
                warn!("cache encode error: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(&path, body) {
            warn!("cache write error for {}: {e}", path.display());
        }
    }

    /// Number of stored records (0 when disabled or unreadable).
    pub fn len(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        fs::read_dir(&self.dir)
            .map(|rd| {
                rd.flatten()
                    .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deterministic hex SHA-256 of a piece of content.
pub fn content_hash(content: &str) -> String {
    let mut h = Sha256::new();
    h.update(content.as_bytes());
    h.finalize().iter().map(|b| format!("{b:02x}")).collect()
}
