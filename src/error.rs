use std::path::PathBuf;

use thiserror::Error;

/// Main error type for repo-intel operations
#[derive(Error, Debug)]
pub enum RepoIntelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid exclusion pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("No readable root directories: {}", format_roots(.0))]
    NoReadableRoots(Vec<PathBuf>),
}

fn format_roots(roots: &[PathBuf]) -> String {
    roots
        .iter()
        .map(|r| r.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, RepoIntelError>;
