//! Fingerprint-keyed store of analysis results.
//!
//! Results live in memory for the session and, when a directory is
//! configured, as one JSON file per fingerprint so a later run on unchanged
//! content makes no external calls.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::llm::GeneratedArtifact;

/// A generated artifact plus when and by which model it was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub fingerprint: String,
    pub artifact: GeneratedArtifact,
    pub generated_at: DateTime<Utc>,
    pub model: String,
}

/// In-memory + file-based cache for analysis results
pub struct ResultCache {
    memory: RwLock<HashMap<String, AnalysisResult>>,
    cache_dir: Option<PathBuf>,
}

impl ResultCache {
    pub fn in_memory() -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            cache_dir: None,
        }
    }

    /// Cache backed by `dir`; an uncreatable directory degrades to memory only
    pub fn with_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let cache_dir = match fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                warn!("Result cache directory {} unavailable: {}", dir.display(), e);
                None
            }
        };

        Self {
            memory: RwLock::new(HashMap::new()),
            cache_dir,
        }
    }

    /// Memory first, then disk; a disk hit is promoted to memory
    pub fn get(&self, fingerprint: &str) -> Option<AnalysisResult> {
        if let Some(result) = self.get_in_memory(fingerprint) {
            return Some(result);
        }

        let result = self.read_file_cache(fingerprint)?;
        debug!("Result cache hit on disk for {}", short(fingerprint));
        self.memory
            .write()
            .insert(fingerprint.to_string(), result.clone());
        Some(result)
    }

    /// Never touches the disk
    pub fn get_in_memory(&self, fingerprint: &str) -> Option<AnalysisResult> {
        self.memory.read().get(fingerprint).cloned()
    }

    #[cfg(test)]
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.get(fingerprint).is_some()
    }

    /// Store in memory, then persist. Disk failures are logged, not fatal.
    pub fn insert(&self, result: AnalysisResult) {
        self.write_file_cache(&result);
        self.memory.write().insert(result.fingerprint.clone(), result);
    }

    pub fn len(&self) -> usize {
        self.memory.read().len()
    }

    fn read_file_cache(&self, fingerprint: &str) -> Option<AnalysisResult> {
        let path = self.cache_file_path(fingerprint)?;
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<AnalysisResult>(&content) {
            Ok(result) if result.fingerprint == fingerprint => Some(result),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write_file_cache(&self, result: &AnalysisResult) {
        let Some(path) = self.cache_file_path(&result.fingerprint) else {
            return;
        };
        let written = serde_json::to_string_pretty(result)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                // write-then-rename so readers never see a partial file
                let tmp = path.with_extension("json.tmp");
                fs::write(&tmp, content).map_err(|e| e.to_string())?;
                fs::rename(&tmp, &path).map_err(|e| e.to_string())
            });
        if let Err(e) = written {
            warn!("Failed to persist cache entry {}: {}", path.display(), e);
        }
    }

    fn cache_file_path(&self, fingerprint: &str) -> Option<PathBuf> {
        if fingerprint.is_empty() || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", fingerprint)))
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
