use tree_sitter::{Language, Node, Parser};

use crate::error::{RepoIntelError, Result};
use super::{trailing_identifier, AdapterStrategy, Extraction, RawSymbol, SymbolKind, SyntaxAdapter};

/// A variable whose initializer is a function literal (`const f = () => {}`)
pub struct AssignedFunction {
    pub declarator: &'static str,
    pub value_field: &'static str,
    pub value_kinds: &'static [&'static str],
}

/// Node-kind tables that teach the generic walker one grammar
pub struct GrammarSpec {
    pub language: &'static str,
    pub grammar: fn() -> Language,
    pub function_kinds: &'static [&'static str],
    pub class_kinds: &'static [&'static str],
    pub assigned_functions: &'static [AssignedFunction],
    /// (call node kind, field holding the callee expression)
    pub call_kinds: &'static [(&'static str, &'static str)],
    /// Unparsed macro arguments, scanned for `name(...)` token pairs
    pub macro_token_trees: &'static [&'static str],
    pub import_kinds: &'static [&'static str],
    pub import_names: fn(Node, &str) -> Vec<String>,
}

/// Precise adapter backed by a tree-sitter grammar
pub struct TreeSitterAdapter {
    parser: Parser,
    spec: &'static GrammarSpec,
}

impl TreeSitterAdapter {
    pub fn new(spec: &'static GrammarSpec) -> Result<Self> {
        let mut parser = Parser::new();
        let language = (spec.grammar)();
        parser.set_language(&language).map_err(|e| {
            RepoIntelError::Parser(format!("Failed to set {} language: {}", spec.language, e))
        })?;

        Ok(Self { parser, spec })
    }

    fn walk(&self, node: Node, source: &str, owner: Option<usize>, out: &mut Extraction) {
        let kind = node.kind();
        let mut owner = owner;

        if let Some((name, symbol_kind)) = self.definition(node, source) {
            out.symbols.push(RawSymbol {
                name,
                kind: symbol_kind,
                byte_range: (node.start_byte(), node.end_byte()),
                line_range: (node.start_position().row + 1, node.end_position().row + 1),
                calls: Vec::new(),
            });
            owner = Some(out.symbols.len() - 1);
        } else if self.spec.import_kinds.contains(&kind) {
            out.imports.extend((self.spec.import_names)(node, source));
            return;
        } else if let Some((_, field)) = self.spec.call_kinds.iter().find(|(k, _)| *k == kind) {
            let callee = node
                .child_by_field_name(field)
                .and_then(|c| callee_name(c, source));
            if let (Some(idx), Some(name)) = (owner, callee) {
                out.symbols[idx].calls.push(name);
            }
        } else if self.spec.macro_token_trees.contains(&kind) {
            if let Some(idx) = owner {
                out.symbols[idx].calls.extend(token_tree_calls(node, source));
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, source, owner, out);
        }
    }

    fn definition(&self, node: Node, source: &str) -> Option<(String, SymbolKind)> {
        let kind = node.kind();
        let symbol_kind = if self.spec.function_kinds.contains(&kind) {
            SymbolKind::Function
        } else if self.spec.class_kinds.contains(&kind) {
            SymbolKind::Class
        } else {
            let assigned = self.spec.assigned_functions.iter().find(|a| a.declarator == kind)?;
            let value = node.child_by_field_name(assigned.value_field)?;
            if !assigned.value_kinds.contains(&value.kind()) {
                return None;
            }
            SymbolKind::Function
        };

        let name_node = node.child_by_field_name("name")?;
        let name = node_text(name_node, source);
        if trailing_identifier(&name).as_deref() != Some(name.as_str()) {
            // destructuring patterns and other non-identifier names
            return None;
        }
        Some((name, symbol_kind))
    }
}

impl SyntaxAdapter for TreeSitterAdapter {
    fn extract(&mut self, content: &str) -> Result<Extraction> {
        let tree = self.parser.parse(content, None).ok_or_else(|| {
            RepoIntelError::Parser(format!("Failed to parse {} code", self.spec.language))
        })?;

        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root).unwrap_or(root.start_position().row + 1);
            return Err(RepoIntelError::Parser(format!(
                "{} syntax error near line {}",
                self.spec.language, line
            )));
        }

        let mut out = Extraction::default();
        self.walk(root, content, None, &mut out);
        Ok(out)
    }

    fn language_name(&self) -> &str {
        self.spec.language
    }

    fn strategy(&self) -> AdapterStrategy {
        AdapterStrategy::SyntaxTree
    }
}

pub(crate) fn node_text(node: Node, source: &str) -> String {
    source[node.byte_range()].to_string()
}

/// Import statement text without its keyword and terminator, whitespace collapsed
pub(crate) fn statement_tail(node: Node, source: &str, keywords: &[&str]) -> Vec<String> {
    let text = node_text(node, source);
    let mut rest = text.trim();
    for keyword in keywords {
        if let Some(stripped) = rest.strip_prefix(keyword) {
            rest = stripped.trim_start();
        }
    }
    let rest = rest.trim_end().trim_end_matches(';').trim();
    if rest.is_empty() {
        return Vec::new();
    }
    vec![rest.split_whitespace().collect::<Vec<_>>().join(" ")]
}

fn callee_name(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" | "property_identifier" | "field_identifier" | "type_identifier" => {
            Some(node_text(node, source))
        }
        _ => {
            for field in ["attribute", "property", "field", "name", "function"] {
                if let Some(child) = node.child_by_field_name(field) {
                    return callee_name(child, source);
                }
            }
            trailing_identifier(&node_text(node, source))
        }
    }
}

/// An identifier directly followed by a parenthesized token tree. Nested
/// trees are left to the walker.
fn token_tree_calls(node: Node, source: &str) -> Vec<String> {
    let mut cursor = node.walk();
    let tokens: Vec<Node> = node.children(&mut cursor).collect();

    tokens
        .windows(2)
        .filter(|pair| {
            pair[0].kind() == "identifier"
                && pair[1].kind() == node.kind()
                && pair[1].child(0).map(|open| open.kind()) == Some("(")
        })
        .map(|pair| node_text(pair[0], source))
        .collect()
}

fn first_error_line(node: Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error_line)
}

#[cfg(test)]
mod tests {
    use super::super::python::PYTHON;
    use super::*;

    fn extract(source: &str) -> Extraction {
        TreeSitterAdapter::new(&PYTHON).unwrap().extract(source).unwrap()
    }

    #[test]
    fn nested_definitions_own_their_calls() {
        let source = r#"
class Repo:
    def load(self):
        return self.read()

    def read(self):
        def inner():
            return parse()
        return inner()

def parse():
    pass
"#;
        let out = extract(source);
        let names: Vec<_> = out.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Repo", "load", "read", "inner", "parse"]);

        assert_eq!(out.symbols[0].kind, SymbolKind::Class);
        assert!(out.symbols[0].calls.is_empty());
        assert_eq!(out.symbols[1].calls, vec!["read"]);
        assert_eq!(out.symbols[2].calls, vec!["inner"]);
        assert_eq!(out.symbols[3].calls, vec!["parse"]);
        assert_eq!(out.symbols[1].line_range, (3, 4));
    }

    #[test]
    fn spans_cover_the_definition_text() {
        let source = "def a():\n    b()\n";
        let out = extract(source);
        let (start, end) = out.symbols[0].byte_range;
        assert_eq!(&source[start..end], "def a():\n    b()");
    }

    #[test]
    fn syntax_errors_mark_the_file_unparseable() {
        let mut adapter = TreeSitterAdapter::new(&PYTHON).unwrap();
        let err = adapter.extract("def broken(:\n    pass\n").unwrap_err();
        assert!(matches!(err, RepoIntelError::Parser(msg) if msg.contains("syntax error")));
    }
}
