use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{DiscoveryConfig, ParsingConfig};
use crate::error::Result;
use super::discovery::DiscoveryWarning;
use super::exclusion::ExclusionRules;
use super::languages::{adapter_for, RawSymbol, SyntaxAdapter};

/// Files whose presence at a repository root identifies a dependency manifest
pub const MANIFEST_FILES: &[&str] = &[
    "requirements.txt",
    "pyproject.toml",
    "Pipfile",
    "environment.yml",
    "package.json",
    "go.mod",
    "go.sum",
    "build.gradle",
    "build.gradle.kts",
    "settings.gradle",
    "pom.xml",
    "Package.swift",
    "Podfile",
    "Cartfile",
    "Cargo.toml",
];

/// Represents a parsed source file with extracted symbols
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUnit {
    /// File path relative to the repository root
    pub path: PathBuf,

    /// Language tag of the adapter that parsed it
    pub language: String,

    /// SHA-256 of the decoded content
    pub fingerprint: String,

    pub line_count: usize,

    /// Symbols in source order
    pub symbols: Vec<RawSymbol>,

    pub imports: Vec<String>,

    /// Decoded source, kept for own-text extraction
    #[serde(skip)]
    pub content: String,
}

/// A file that was selected for parsing but could not be turned into a [`SourceUnit`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnparseableFile {
    pub path: PathBuf,
    pub language: String,
    pub reason: String,
}

/// Everything the file walk produced for one repository
#[derive(Debug, Default)]
pub struct ParsedRepository {
    /// Sorted by path
    pub units: Vec<SourceUnit>,
    pub unparseable: Vec<UnparseableFile>,
    pub warnings: Vec<DiscoveryWarning>,
}

/// Multi-language code parser that delegates to language-specific adapters
pub struct CodeParser {
    config: ParsingConfig,
    rules: Arc<ExclusionRules>,
    markers: Vec<String>,
    follow_symlinks: bool,
    /// Stop at nested repository roots; they are scanned on their own
    stop_at_nested: bool,
    adapters: HashMap<String, Box<dyn SyntaxAdapter>>,
}

impl CodeParser {
    pub fn new(
        config: &ParsingConfig,
        discovery: &DiscoveryConfig,
        rules: Arc<ExclusionRules>,
    ) -> Result<Self> {
        let mut adapters = HashMap::new();

        for language in &config.languages {
            match adapter_for(language)? {
                Some(adapter) => {
                    debug!("Registered {:?} adapter for {}", adapter.strategy(), language);
                    adapters.insert(language.clone(), adapter);
                }
                None => warn!("No syntax adapter for language '{}', skipping", language),
            }
        }

        Ok(Self {
            config: config.clone(),
            rules,
            markers: discovery.markers.clone(),
            follow_symlinks: discovery.follow_symlinks,
            stop_at_nested: discovery.include_nested,
            adapters,
        })
    }

    /// Walk one repository and parse every supported file in it
    pub fn parse_repository(&mut self, root: &Path) -> ParsedRepository {
        let mut parsed = ParsedRepository::default();

        let rules = Arc::clone(&self.rules);
        let markers = self.markers.clone();
        let stop_at_nested = self.stop_at_nested;
        let walk_root = root.to_path_buf();

        // Use ignore crate to respect .gitignore and custom patterns
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .parents(false)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                let name = entry.file_name().to_string_lossy();
                if is_dir && markers.iter().any(|m| *m == name) {
                    return false;
                }
                let rel = entry.path().strip_prefix(&walk_root).unwrap_or(entry.path());
                if rules.is_excluded(rel) {
                    return false;
                }
                !(is_dir && stop_at_nested && markers.iter().any(|m| entry.path().join(m).is_dir()))
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = error_path(&err).unwrap_or_else(|| root.to_path_buf());
                    warn!("Skipping {}: {}", path.display(), err);
                    parsed.warnings.push(DiscoveryWarning {
                        path,
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            let Some(language) = self.select(path) else {
                continue;
            };
            let rel = path.strip_prefix(root).unwrap_or(path).to_path_buf();

            match self.parse_file(path, &rel, &language) {
                Ok(Some(unit)) => parsed.units.push(unit),
                Ok(None) => {}
                Err(reason) => {
                    warn!("Unparseable file {}: {}", rel.display(), reason);
                    parsed.unparseable.push(UnparseableFile {
                        path: rel,
                        language,
                        reason,
                    });
                }
            }
        }

        parsed.units.sort_by(|a, b| a.path.cmp(&b.path));
        parsed.unparseable.sort_by(|a, b| a.path.cmp(&b.path));
        parsed
    }

    /// Read, size-check and parse one file. `Ok(None)` means the file was skipped.
    fn parse_file(
        &mut self,
        path: &Path,
        rel: &Path,
        language: &str,
    ) -> std::result::Result<Option<SourceUnit>, String> {
        let size = std::fs::metadata(path).map_err(|e| e.to_string())?.len();
        if size > self.config.max_file_size {
            debug!("Skipping {} ({} bytes exceeds size limit)", rel.display(), size);
            return Ok(None);
        }

        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        let content = decode(bytes);
        self.parse_source(rel, language, content).map(Some)
    }

    /// Run the language adapter over already-decoded content
    pub fn parse_source(
        &mut self,
        rel: &Path,
        language: &str,
        content: String,
    ) -> std::result::Result<SourceUnit, String> {
        let adapter = self
            .adapters
            .get_mut(language)
            .ok_or_else(|| format!("no adapter for {}", language))?;
        let extraction = adapter.extract(&content).map_err(|e| e.to_string())?;

        Ok(SourceUnit {
            path: rel.to_path_buf(),
            language: language.to_string(),
            fingerprint: calculate_hash(&content),
            line_count: content.lines().count(),
            symbols: extraction.symbols,
            imports: extraction.imports,
            content,
        })
    }

    /// Language tag for a path, if the file should be parsed at all
    fn select(&self, path: &Path) -> Option<String> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        if self.config.binary_extensions.iter().any(|b| *b == extension) {
            return None;
        }
        let language = self.config.file_extensions.get(&extension)?;
        self.adapters.contains_key(language).then(|| language.clone())
    }
}

/// Manifest file names present directly under `root`, in [`MANIFEST_FILES`] order
pub fn detect_manifests(root: &Path) -> Vec<String> {
    MANIFEST_FILES
        .iter()
        .filter(|name| root.join(name).is_file())
        .map(|name| name.to_string())
        .collect()
}

/// Longest manifest excerpt kept in a report
pub const MANIFEST_SNIPPET_BYTES: usize = 4_000;

/// Reported content of one dependency manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestContent {
    Text { content: String, truncated: bool },
    /// `package.json` that parsed as JSON
    Json(serde_json::Value),
}

/// Contents of every manifest under `root`, keyed by file name. Unreadable
/// manifests are skipped.
pub fn read_manifests(root: &Path) -> BTreeMap<String, ManifestContent> {
    let mut manifests = BTreeMap::new();

    for name in detect_manifests(root) {
        let bytes = match std::fs::read(root.join(&name)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to read manifest {}: {}", root.join(&name).display(), e);
                continue;
            }
        };
        let text = decode(bytes);

        if name == "package.json" {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                manifests.insert(name, ManifestContent::Json(value));
                continue;
            }
            debug!("package.json in {} is not valid JSON", root.display());
        }

        let cut = snippet_end(&text, MANIFEST_SNIPPET_BYTES);
        manifests.insert(
            name,
            ManifestContent::Text {
                truncated: cut < text.len(),
                content: text[..cut].to_string(),
            },
        );
    }

    manifests
}

/// Largest char boundary not past `limit`
fn snippet_end(text: &str, limit: usize) -> usize {
    if text.len() <= limit {
        return text.len();
    }
    (0..=limit).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0)
}

/// UTF-8 when valid, otherwise Latin-1 (every byte maps to one char)
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// Calculate SHA256 hash of content
fn calculate_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    fn parser_with(discovery: &DiscoveryConfig) -> CodeParser {
        let rules = Arc::new(ExclusionRules::new(&discovery.exclude_patterns).unwrap());
        CodeParser::new(&ParsingConfig::default(), discovery, rules).unwrap()
    }

    fn repo() -> TempDir {
        let temp = TempDir::new().unwrap();
        temp.child(".git").create_dir_all().unwrap();
        temp.child(".gitignore").write_str("generated/\n").unwrap();
        temp.child("app/main.py")
            .write_str("def main():\n    helper()\n\ndef helper():\n    pass\n")
            .unwrap();
        temp.child("app/broken.py").write_str("def broken(:\n").unwrap();
        temp.child("web/index.ts")
            .write_str("export function boot() {\n  start();\n}\n")
            .unwrap();
        temp.child("generated/out.py").write_str("def gen():\n    pass\n").unwrap();
        temp.child("node_modules/lib/index.js")
            .write_str("function lib() {}\n")
            .unwrap();
        temp.child("logo.png").write_binary(&[0x89, 0x50, 0x4e, 0x47]).unwrap();
        temp.child("vendor/inner/.git").create_dir_all().unwrap();
        temp.child("vendor/inner/lib.py").write_str("def inner():\n    pass\n").unwrap();
        temp.child("requirements.txt").write_str("requests\n").unwrap();
        temp
    }

    #[test]
    fn parses_supported_files_and_records_failures() {
        let temp = repo();
        let mut parser = parser_with(&DiscoveryConfig::default());

        let parsed = parser.parse_repository(temp.path());
        let paths: Vec<_> = parsed.units.iter().map(|u| u.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("app/main.py"),
                PathBuf::from("vendor/inner/lib.py"),
                PathBuf::from("web/index.ts"),
            ]
        );

        let main = &parsed.units[0];
        assert_eq!(main.language, "python");
        assert_eq!(main.line_count, 5);
        assert_eq!(main.symbols.len(), 2);
        assert_eq!(main.fingerprint.len(), 64);

        assert_eq!(parsed.unparseable.len(), 1);
        assert_eq!(parsed.unparseable[0].path, PathBuf::from("app/broken.py"));
        assert!(parsed.unparseable[0].reason.contains("syntax error"));
    }

    #[test]
    fn nested_roots_are_left_out_when_scanned_separately() {
        let temp = repo();
        let config = DiscoveryConfig {
            include_nested: true,
            ..DiscoveryConfig::default()
        };
        let mut parser = parser_with(&config);

        let parsed = parser.parse_repository(temp.path());
        assert!(parsed
            .units
            .iter()
            .all(|u| !u.path.starts_with("vendor/inner")));
    }

    #[test]
    fn oversize_files_are_skipped() {
        let temp = repo();
        let discovery = DiscoveryConfig::default();
        let rules = Arc::new(ExclusionRules::new(&discovery.exclude_patterns).unwrap());
        let parsing = ParsingConfig {
            max_file_size: 30,
            ..ParsingConfig::default()
        };
        let mut parser = CodeParser::new(&parsing, &discovery, rules).unwrap();

        let parsed = parser.parse_repository(temp.path());
        let paths: Vec<_> = parsed.units.iter().map(|u| u.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("vendor/inner/lib.py")]);
    }

    #[test]
    fn latin1_content_is_decoded() {
        assert_eq!(decode(vec![b'c', b'a', b'f', 0xe9]), "café");
        assert_eq!(decode("plain".as_bytes().to_vec()), "plain");
    }

    #[test]
    fn manifest_contents_are_parsed_or_truncated() {
        let temp = TempDir::new().unwrap();
        temp.child("package.json")
            .write_str(r#"{"name": "shop", "dependencies": {"left-pad": "1.0.0"}}"#)
            .unwrap();
        temp.child("requirements.txt").write_str("requests\n").unwrap();
        temp.child("go.mod")
            .write_str(&"require example.com/x v1.0.0\n".repeat(500))
            .unwrap();

        let manifests = read_manifests(temp.path());
        assert_eq!(manifests.len(), 3);

        match &manifests["package.json"] {
            ManifestContent::Json(value) => {
                assert_eq!(value["dependencies"]["left-pad"], "1.0.0");
            }
            other => panic!("expected parsed JSON, got {:?}", other),
        }
        assert_eq!(
            manifests["requirements.txt"],
            ManifestContent::Text {
                content: "requests\n".to_string(),
                truncated: false,
            }
        );
        match &manifests["go.mod"] {
            ManifestContent::Text { content, truncated } => {
                assert!(*truncated);
                assert_eq!(content.len(), MANIFEST_SNIPPET_BYTES);
            }
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[test]
    fn broken_package_json_falls_back_to_text() {
        let temp = TempDir::new().unwrap();
        temp.child("package.json").write_str("{ not json").unwrap();

        let manifests = read_manifests(temp.path());
        assert!(matches!(
            &manifests["package.json"],
            ManifestContent::Text { content, .. } if content == "{ not json"
        ));
    }

    #[test]
    fn manifests_are_listed_in_a_fixed_order() {
        let temp = repo();
        temp.child("Cargo.toml").write_str("[package]\n").unwrap();
        temp.child("package.json").write_str("{}").unwrap();

        assert_eq!(
            detect_manifests(temp.path()),
            vec!["requirements.txt", "package.json", "Cargo.toml"]
        );
    }
}
