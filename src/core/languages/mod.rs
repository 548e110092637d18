//! Language-specific syntax adapters
//!
//! Every adapter turns raw file content into the same shape: the symbols the
//! file defines (in source order), the raw callee names found in each symbol's
//! own body, and the file's imports. Two strategies exist: a tree-sitter walker
//! driven by per-language grammar tables, and a regex/brace-matching scanner
//! for languages without a parser.

mod treesitter;
mod pattern;
mod rust;
mod java;
mod python;
mod csharp;
mod javascript;

pub use treesitter::{GrammarSpec, TreeSitterAdapter};
pub use pattern::{PatternAdapter, PatternSpec};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Function => write!(f, "function"),
            SymbolKind::Class => write!(f, "class"),
        }
    }
}

/// A definition as found by an adapter, before ids are assigned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSymbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Byte offsets into the file content, end exclusive
    pub byte_range: (usize, usize),
    /// 1-based, inclusive
    pub line_range: (usize, usize),
    /// Callee names in call order, excluding calls inside nested definitions
    pub calls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub symbols: Vec<RawSymbol>,
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStrategy {
    SyntaxTree,
    Pattern,
}

/// Trait that all syntax adapters must implement
pub trait SyntaxAdapter: Send {
    /// Extract symbols, calls and imports. An error marks the file unparseable.
    fn extract(&mut self, content: &str) -> Result<Extraction>;

    /// Get the language tag
    fn language_name(&self) -> &str;

    fn strategy(&self) -> AdapterStrategy;
}

/// Build the adapter for a language tag, or None when no adapter exists
pub fn adapter_for(language: &str) -> Result<Option<Box<dyn SyntaxAdapter>>> {
    let adapter: Box<dyn SyntaxAdapter> = match language {
        "python" => Box::new(TreeSitterAdapter::new(&python::PYTHON)?),
        "rust" => Box::new(TreeSitterAdapter::new(&rust::RUST)?),
        "javascript" => Box::new(TreeSitterAdapter::new(&javascript::JAVASCRIPT)?),
        "java" => Box::new(TreeSitterAdapter::new(&java::JAVA)?),
        "csharp" => Box::new(TreeSitterAdapter::new(&csharp::CSHARP)?),
        "typescript" => Box::new(PatternAdapter::new(PatternSpec::typescript()?)),
        "go" => Box::new(PatternAdapter::new(PatternSpec::go()?)),
        "c" => Box::new(PatternAdapter::new(PatternSpec::c_family()?)),
        "shell" => Box::new(PatternAdapter::new(PatternSpec::shell()?)),
        _ => return Ok(None),
    };
    Ok(Some(adapter))
}

/// Last identifier in a callee expression: `self.store.save` -> `save`,
/// `crate::io::read` -> `read`, `List<String>` -> `List`.
pub(crate) fn trailing_identifier(text: &str) -> Option<String> {
    let head = text.split(['<', '(']).next().unwrap_or("");
    let start = head
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '$')
        .last()
        .map(|(i, _)| i)?;
    let ident = &head[start..];
    let first = ident.chars().next()?;
    if first.is_ascii_digit() {
        return None;
    }
    Some(ident.to_string())
}
