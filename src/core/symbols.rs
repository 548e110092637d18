//! Repository-wide symbol table and aggregate metrics.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::languages::SymbolKind;
use super::parser::{SourceUnit, UnparseableFile};

/// Dense, repository-unique symbol identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub kind: SymbolKind,
    pub name: String,
    /// Defining file, relative to the repository root
    pub file: PathBuf,
    pub language: String,
    pub byte_range: (usize, usize),
    pub line_range: (usize, usize),
    /// Raw callee names in call order
    pub calls: Vec<String>,
    /// Length of the own text in bytes
    pub own_size: usize,
    /// Innermost enclosing symbol in the same file
    pub parent: Option<SymbolId>,
}

/// All symbols of one repository, indexed by simple name and by file
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    own_texts: Vec<String>,
    by_name: HashMap<String, Vec<SymbolId>>,
    by_file: BTreeMap<PathBuf, Vec<SymbolId>>,
}

impl SymbolTable {
    /// Ids are assigned in (file path, source order) order regardless of input order.
    pub fn build(units: &[SourceUnit]) -> Self {
        let mut ordered: Vec<&SourceUnit> = units.iter().collect();
        ordered.sort_by(|a, b| a.path.cmp(&b.path));

        let mut table = SymbolTable::default();
        for unit in ordered {
            table.add_unit(unit);
        }
        table
    }

    fn add_unit(&mut self, unit: &SourceUnit) {
        let base = self.symbols.len();
        let mut order: Vec<usize> = (0..unit.symbols.len()).collect();
        order.sort_by_key(|&i| {
            let (start, end) = unit.symbols[i].byte_range;
            (start, std::cmp::Reverse(end))
        });

        // parent links via a stack of open spans
        let mut parents: Vec<Option<usize>> = vec![None; unit.symbols.len()];
        let mut stack: Vec<usize> = Vec::new();
        for &i in &order {
            let (start, end) = unit.symbols[i].byte_range;
            while let Some(&top) = stack.last() {
                let (top_start, top_end) = unit.symbols[top].byte_range;
                if top_start <= start && end <= top_end {
                    break;
                }
                stack.pop();
            }
            parents[i] = stack.last().copied();
            stack.push(i);
        }

        let position: HashMap<usize, usize> =
            order.iter().enumerate().map(|(pos, &i)| (i, pos)).collect();

        for (pos, &i) in order.iter().enumerate() {
            let raw = &unit.symbols[i];
            let children: Vec<usize> = order
                .iter()
                .copied()
                .filter(|&c| parents[c] == Some(i))
                .collect();
            let own_text = own_text(&unit.content, raw.byte_range, &children, unit);

            let id = SymbolId((base + pos) as u32);
            let parent = parents[i].map(|p| SymbolId((base + position[&p]) as u32));

            self.by_name.entry(raw.name.clone()).or_default().push(id);
            self.by_file.entry(unit.path.clone()).or_default().push(id);
            self.symbols.push(Symbol {
                id,
                kind: raw.kind,
                name: raw.name.clone(),
                file: unit.path.clone(),
                language: unit.language.clone(),
                byte_range: raw.byte_range,
                line_range: raw.line_range,
                calls: raw.calls.clone(),
                own_size: own_text.len(),
                parent,
            });
            self.own_texts.push(own_text);
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
        self.symbols.get(id.index())
    }

    /// Source span with directly nested definitions replaced by a placeholder line
    pub fn own_text(&self, id: SymbolId) -> &str {
        self.own_texts.get(id.index()).map(String::as_str).unwrap_or("")
    }

    /// Every symbol with this simple name, in id order
    pub fn named(&self, name: &str) -> &[SymbolId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Symbols defined in `file`, in source order
    pub fn in_file(&self, file: &Path) -> &[SymbolId] {
        self.by_file.get(file).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn own_text(content: &str, span: (usize, usize), children: &[usize], unit: &SourceUnit) -> String {
    let (start, end) = span;
    let mut text = String::new();
    let mut cursor = start;

    for &child in children {
        let nested = &unit.symbols[child];
        let (child_start, child_end) = nested.byte_range;
        if child_start < cursor || child_end > end {
            continue;
        }
        text.push_str(content.get(cursor..child_start).unwrap_or(""));
        text.push_str(&format!(
            "[{} {}: lines {}-{}]",
            nested.kind, nested.name, nested.line_range.0, nested.line_range.1
        ));
        cursor = child_end;
    }
    text.push_str(content.get(cursor..end).unwrap_or(""));
    text
}

/// Aggregate counts for one repository, reduced from its source units
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetrics {
    pub files_by_language: BTreeMap<String, usize>,
    pub total_files: usize,
    pub total_lines: usize,
    pub functions: usize,
    pub classes: usize,
    pub imports: usize,
    pub unparseable_files: Vec<UnparseableFile>,
    pub manifests: Vec<String>,
}

impl RepoMetrics {
    pub fn from_units(
        units: &[SourceUnit],
        unparseable: &[UnparseableFile],
        manifests: Vec<String>,
    ) -> Self {
        let mut metrics = RepoMetrics {
            unparseable_files: unparseable.to_vec(),
            manifests,
            ..RepoMetrics::default()
        };

        for unit in units {
            *metrics.files_by_language.entry(unit.language.clone()).or_default() += 1;
            metrics.total_files += 1;
            metrics.total_lines += unit.line_count;
            metrics.imports += unit.imports.len();
            for symbol in &unit.symbols {
                match symbol.kind {
                    SymbolKind::Function => metrics.functions += 1,
                    SymbolKind::Class => metrics.classes += 1,
                }
            }
        }

        metrics
    }

    pub fn languages(&self) -> Vec<String> {
        self.files_by_language.keys().cloned().collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::core::languages::adapter_for;
    use sha2::{Digest, Sha256};

    /// Parse `source` with the real adapter for `language`
    pub fn unit(path: &str, language: &str, source: &str) -> SourceUnit {
        let mut adapter = adapter_for(language).unwrap().unwrap();
        let extraction = adapter.extract(source).unwrap();
        SourceUnit {
            path: PathBuf::from(path),
            language: language.to_string(),
            fingerprint: format!("{:x}", Sha256::digest(source.as_bytes())),
            line_count: source.lines().count(),
            symbols: extraction.symbols,
            imports: extraction.imports,
            content: source.to_string(),
        }
    }

    pub fn python(path: &str, source: &str) -> SourceUnit {
        unit(path, "python", source)
    }
}
