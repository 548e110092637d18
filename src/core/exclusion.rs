//! Exclusion rules shared by repository discovery and the per-repository file walk.
//!
//! A pattern without glob metacharacters or separators matches any single
//! path segment ("node_modules"); anything else is compiled as a glob and
//! matched against both the root-relative path and the entry's file name.

use std::collections::HashSet;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ExclusionRules {
    segments: HashSet<String>,
    globs: GlobSet,
}

impl ExclusionRules {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut segments = HashSet::new();
        let mut builder = GlobSetBuilder::new();

        for raw in patterns {
            let pattern = raw.as_ref().trim().trim_end_matches('/');
            let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
            if pattern.is_empty() {
                continue;
            }
            if is_plain_segment(pattern) {
                segments.insert(pattern.to_string());
            } else {
                builder.add(Glob::new(pattern)?);
            }
        }

        Ok(Self {
            segments,
            globs: builder.build()?,
        })
    }

    /// `rel_path` is relative to the walk root; an empty path is never excluded.
    pub fn is_excluded(&self, rel_path: &Path) -> bool {
        if rel_path.as_os_str().is_empty() {
            return false;
        }

        let segment_hit = rel_path
            .components()
            .any(|c| self.segments.contains(c.as_os_str().to_string_lossy().as_ref()));
        if segment_hit {
            return true;
        }

        if self.globs.is_empty() {
            return false;
        }
        if self.globs.is_match(rel_path) {
            return true;
        }
        rel_path
            .file_name()
            .map(|name| self.globs.is_match(Path::new(name)))
            .unwrap_or(false)
    }
}

fn is_plain_segment(pattern: &str) -> bool {
    !pattern.contains(['*', '?', '[', '{', '/', '\\'])
}
