//! Version-control metadata for discovered repositories.

use std::path::Path;
use std::process::Command;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcsMetadata {
    pub remote_url: Option<String>,
    pub default_branch: Option<String>,
    pub last_commit: Option<DateTime<Utc>>,
}

/// Reads metadata for one repository root. Missing facts are `None`, never errors.
pub trait VcsInspector: Send + Sync {
    fn inspect(&self, root: &Path) -> VcsMetadata;
}

/// Shells out to the `git` binary
#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl VcsInspector for GitCli {
    fn inspect(&self, root: &Path) -> VcsMetadata {
        let metadata = VcsMetadata {
            remote_url: remote_url(root),
            default_branch: default_branch(root),
            last_commit: last_commit(root),
        };
        debug!("VCS metadata for {}: {:?}", root.display(), metadata);
        metadata
    }
}

fn git(root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(args)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn remote_url(root: &Path) -> Option<String> {
    if let Some(url) = git(root, &["remote", "get-url", "origin"]) {
        return Some(url);
    }
    let remotes = git(root, &["remote"])?;
    let first = remotes.lines().next()?.trim().to_string();
    git(root, &["remote", "get-url", &first])
}

fn default_branch(root: &Path) -> Option<String> {
    if let Some(head) = git(root, &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"]) {
        let branch = head.strip_prefix("origin/").unwrap_or(&head);
        return Some(branch.to_string());
    }

    ["main", "master"]
        .into_iter()
        .find(|branch| {
            let reference = format!("refs/heads/{}", branch);
            git(root, &["rev-parse", "--verify", "--quiet", &reference]).is_some()
        })
        .map(str::to_string)
}

fn last_commit(root: &Path) -> Option<DateTime<Utc>> {
    let seconds: i64 = git(root, &["log", "-1", "--format=%ct"])?.parse().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    fn run(root: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(root)
            .args([
                "-c",
                "user.name=Test",
                "-c",
                "user.email=test@example.com",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn plain_directory_has_no_metadata() {
        let temp = TempDir::new().unwrap();
        assert_eq!(GitCli.inspect(temp.path()), VcsMetadata::default());
    }

    #[test]
    fn reads_remote_branch_and_last_commit() {
        if !git_available() {
            return;
        }
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        run(root, &["init", "--quiet"]);
        run(root, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        run(root, &["remote", "add", "upstream", "https://example.com/demo.git"]);
        std::fs::write(root.join("a.py"), "def a():\n    pass\n").unwrap();
        run(root, &["add", "a.py"]);
        run(root, &["commit", "--quiet", "-m", "init"]);

        let metadata = GitCli.inspect(root);
        assert_eq!(
            metadata.remote_url.as_deref(),
            Some("https://example.com/demo.git")
        );
        assert_eq!(metadata.default_branch.as_deref(), Some("main"));
        assert!(metadata.last_commit.is_some());
    }
}
