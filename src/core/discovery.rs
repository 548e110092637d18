//! Repository discovery.
//!
//! Walks the configured roots looking for version-control marker directories.
//! The walk is lazy: [`DiscoveryIter`] pulls directory entries on demand, so a
//! consumer that stops early never pays for the rest of the tree.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::DiscoveryConfig;
use crate::error::Result;
use super::exclusion::ExclusionRules;

/// A repository root found during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredRoot {
    /// Canonical path of the working tree root
    pub root: PathBuf,
    /// Marker directory that identified it (e.g. ".git")
    pub marker: String,
    /// True when the root sits inside another yielded repository
    pub nested: bool,
}

/// Non-fatal problem encountered while walking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryWarning {
    pub path: PathBuf,
    pub message: String,
}

pub struct RepositoryDiscoverer {
    roots: Vec<PathBuf>,
    rules: Arc<ExclusionRules>,
    markers: Vec<String>,
    include_nested: bool,
    follow_symlinks: bool,
}

impl RepositoryDiscoverer {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        Ok(Self::with_rules(
            config,
            Arc::new(ExclusionRules::new(&config.exclude_patterns)?),
        ))
    }

    pub fn with_rules(config: &DiscoveryConfig, rules: Arc<ExclusionRules>) -> Self {
        Self {
            roots: config.roots.clone(),
            rules,
            markers: config.markers.clone(),
            include_nested: config.include_nested,
            follow_symlinks: config.follow_symlinks,
        }
    }

    /// Start a fresh walk. Each call restarts discovery from the first root.
    pub fn iter(&self) -> DiscoveryIter<'_> {
        let mut warnings = Vec::new();
        let mut canonical = Vec::new();

        for root in &self.roots {
            match root.canonicalize() {
                Ok(path) if path.is_dir() => canonical.push(path),
                Ok(path) => warnings.push(DiscoveryWarning {
                    path,
                    message: "root is not a directory".to_string(),
                }),
                Err(e) => warnings.push(DiscoveryWarning {
                    path: root.clone(),
                    message: format!("unreadable root: {}", e),
                }),
            }
        }

        // Outer roots first; a root inside another root is already covered by it.
        canonical.sort();
        canonical.dedup();
        let mut pending = VecDeque::new();
        for root in canonical {
            if !pending.iter().any(|outer: &PathBuf| root.starts_with(outer)) {
                pending.push_back(root);
            }
        }

        for w in &warnings {
            warn!("Skipping root {}: {}", w.path.display(), w.message);
        }

        DiscoveryIter {
            discoverer: self,
            readable_roots: pending.len(),
            pending_roots: pending,
            current: None,
            yielded: Vec::new(),
            seen: HashSet::new(),
            warnings,
        }
    }

    fn marker_of(&self, dir: &Path) -> Option<&str> {
        self.markers
            .iter()
            .find(|m| dir.join(m.as_str()).is_dir())
            .map(String::as_str)
    }

    fn is_marker_name(&self, name: &str) -> bool {
        self.markers.iter().any(|m| m == name)
    }
}

pub struct DiscoveryIter<'a> {
    discoverer: &'a RepositoryDiscoverer,
    pending_roots: VecDeque<PathBuf>,
    current: Option<(PathBuf, walkdir::IntoIter)>,
    yielded: Vec<PathBuf>,
    seen: HashSet<PathBuf>,
    warnings: Vec<DiscoveryWarning>,
    readable_roots: usize,
}

impl<'a> DiscoveryIter<'a> {
    pub fn warnings(&self) -> &[DiscoveryWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<DiscoveryWarning> {
        self.warnings
    }

    /// Number of roots that could be opened for walking
    pub fn readable_roots(&self) -> usize {
        self.readable_roots
    }

    fn record(&mut self, path: PathBuf, message: String) {
        warn!("Skipping {}: {}", path.display(), message);
        self.warnings.push(DiscoveryWarning { path, message });
    }
}

impl<'a> Iterator for DiscoveryIter<'a> {
    type Item = DiscoveredRoot;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let root = self.pending_roots.pop_front()?;
                debug!("Walking {}", root.display());
                let walker = WalkDir::new(&root)
                    .follow_links(self.discoverer.follow_symlinks)
                    .sort_by_file_name()
                    .into_iter();
                self.current = Some((root, walker));
            }

            let next_entry = match self.current.as_mut() {
                Some((_, walker)) => walker.next(),
                None => continue,
            };

            let entry = match next_entry {
                None => {
                    self.current = None;
                    continue;
                }
                Some(Err(err)) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| PathBuf::from("<unknown>"));
                    let message = match err.loop_ancestor() {
                        Some(ancestor) => format!("symlink loop back to {}", ancestor.display()),
                        None => err
                            .io_error()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| err.to_string()),
                    };
                    self.record(path, message);
                    continue;
                }
                Some(Ok(entry)) => entry,
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            let discoverer = self.discoverer;
            let Some((walk_root, walker)) = self.current.as_mut() else {
                continue;
            };

            let name = entry.file_name().to_string_lossy();
            if entry.depth() > 0 && discoverer.is_marker_name(&name) {
                walker.skip_current_dir();
                continue;
            }

            let rel = entry.path().strip_prefix(walk_root.as_path()).unwrap_or(entry.path());
            if discoverer.rules.is_excluded(rel) {
                debug!("Excluded {}", entry.path().display());
                walker.skip_current_dir();
                continue;
            }

            let Some(marker) = discoverer.marker_of(entry.path()) else {
                continue;
            };

            let canonical = entry
                .path()
                .canonicalize()
                .unwrap_or_else(|_| entry.path().to_path_buf());
            let nested = self
                .yielded
                .iter()
                .any(|outer| canonical != *outer && canonical.starts_with(outer));

            if !discoverer.include_nested {
                walker.skip_current_dir();
            }
            if !self.seen.insert(canonical.clone()) || (nested && !discoverer.include_nested) {
                continue;
            }

            self.yielded.push(canonical.clone());
            return Some(DiscoveredRoot {
                root: canonical,
                marker: marker.to_string(),
                nested,
            });
        }
    }
}
