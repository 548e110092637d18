use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{RepoIntelError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Repository discovery settings
    pub discovery: DiscoveryConfig,

    /// Source code parsing configuration
    pub parsing: ParsingConfig,

    /// Batch grouping settings
    pub grouping: GroupingConfig,

    /// Job scheduling, retry and caching settings
    pub orchestrator: OrchestratorConfig,

    /// LLM integration settings
    pub llm: LlmConfig,

    /// Output settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Root directories to search for repositories
    pub roots: Vec<PathBuf>,

    /// Path-segment or glob patterns; matching subtrees are never entered
    pub exclude_patterns: Vec<String>,

    /// Directory names that mark a repository root
    pub markers: Vec<String>,

    /// Also yield repositories nested inside another repository
    pub include_nested: bool,

    /// Follow symbolic links while walking
    pub follow_symlinks: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    /// Languages to extract symbols from
    pub languages: Vec<String>,

    /// File extension (without the dot) to language tag
    pub file_extensions: HashMap<String, String>,

    /// Maximum file size to parse (in bytes)
    pub max_file_size: u64,

    /// Extensions that are never read
    pub binary_extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Report oversize groups without submitting them
    Skip,
    /// Cut the payload down to the batch budget and submit it
    Truncate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// Maximum combined source size of one batch, in bytes
    pub batch_budget: usize,

    /// What to do with a single symbol larger than the budget
    pub overflow_policy: OverflowPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of concurrent workers
    pub workers: usize,

    /// Maximum attempts per job, including the first
    pub max_attempts: u32,

    /// Initial retry delay in milliseconds
    pub base_backoff_ms: u64,

    /// Upper bound for a single retry delay in milliseconds
    pub max_backoff_ms: u64,

    /// Global request rate limit (None = unlimited)
    pub requests_per_minute: Option<u32>,

    /// Deadline for a single external call attempt
    pub call_timeout_secs: u64,

    /// Directory for persisted analysis results (None = memory only)
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider (openai)
    pub provider: String,

    /// Model name (e.g., "gpt-4o")
    pub model: String,

    /// API key (falls back to OPENAI_API_KEY)
    pub api_key: Option<String>,

    /// Base URL for OpenAI-compatible endpoints
    pub base_url: Option<String>,

    /// Maximum tokens for LLM responses
    pub max_tokens: Option<u32>,

    /// Temperature for LLM responses (0.0 to 1.0)
    pub temperature: Option<f32>,

    /// Approximate length of each generated report, in words
    pub word_target: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving the JSON records and generated artifacts
    pub report_dir: PathBuf,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from(".")],
            exclude_patterns: [
                "node_modules", ".yarn", ".gradle", ".idea", ".vscode", ".venv", "venv", "env",
                "Pods", "build", "dist", "target", "__pycache__", ".mypy_cache", ".pytest_cache",
                ".dart_tool", ".expo", "DerivedData", "coverage",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            markers: vec![".git".to_string()],
            include_nested: false,
            follow_symlinks: false,
        }
    }
}

impl Default for ParsingConfig {
    fn default() -> Self {
        let mut file_extensions = HashMap::new();
        let table: &[(&str, &str)] = &[
            ("py", "python"),
            ("rs", "rust"),
            ("js", "javascript"),
            ("mjs", "javascript"),
            ("cjs", "javascript"),
            ("jsx", "javascript"),
            ("java", "java"),
            ("cs", "csharp"),
            ("ts", "typescript"),
            ("tsx", "typescript"),
            ("go", "go"),
            ("c", "c"),
            ("h", "c"),
            ("cc", "c"),
            ("cpp", "c"),
            ("cxx", "c"),
            ("hh", "c"),
            ("hpp", "c"),
            ("sh", "shell"),
            ("bash", "shell"),
            ("zsh", "shell"),
        ];
        for (ext, lang) in table {
            file_extensions.insert(ext.to_string(), lang.to_string());
        }

        Self {
            languages: [
                "python", "rust", "javascript", "java", "csharp", "typescript", "go", "c", "shell",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            file_extensions,
            max_file_size: 600_000,
            binary_extensions: [
                "png", "jpg", "jpeg", "gif", "webp", "ico", "bmp", "tiff", "pdf", "zip", "gz",
                "bz2", "xz", "7z", "dmg", "apk", "aab", "ipa", "mp3", "wav", "mp4", "mov", "m4a",
                "ogg", "webm", "jar", "war", "class", "o", "a", "so", "dylib", "dll", "bin", "iso",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            batch_budget: 14_000,
            overflow_policy: OverflowPolicy::Truncate,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            max_attempts: 5,
            base_backoff_ms: 1_500,
            max_backoff_ms: 60_000,
            requests_per_minute: Some(60),
            call_timeout_secs: 120,
            cache_dir: Some(PathBuf::from(".repo-intel/cache")),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: Some(0.2),
            word_target: 3000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            report_dir: PathBuf::from("repo_reports"),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| RepoIntelError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| RepoIntelError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default, then apply environment overrides
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)?
                } else {
                    return Err(RepoIntelError::Config(format!(
                        "config file not found: {}",
                        p.as_ref().display()
                    )));
                }
            }
            None => {
                let candidates = ["repo-intel.toml", ".repo-intel.toml"];
                match candidates.iter().find(|c| Path::new(c).exists()) {
                    Some(candidate) => Self::load(candidate)?,
                    None => Self::default(),
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Fill unset values from the environment (OPENAI_API_KEY, OPENAI_MODEL)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.llm.api_key.is_none() {
            self.llm.api_key = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty());
        }
        if let Some(model) = lookup("OPENAI_MODEL").filter(|m| !m.is_empty()) {
            self.llm.model = model;
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.grouping.batch_budget == 0 {
            return Err(RepoIntelError::Config("grouping.batch_budget must be positive".into()));
        }
        if self.orchestrator.workers == 0 {
            return Err(RepoIntelError::Config("orchestrator.workers must be positive".into()));
        }
        if self.orchestrator.max_attempts == 0 {
            return Err(RepoIntelError::Config("orchestrator.max_attempts must be positive".into()));
        }
        if self.discovery.markers.is_empty() {
            return Err(RepoIntelError::Config("discovery.markers must not be empty".into()));
        }
        Ok(())
    }
}
