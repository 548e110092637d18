//! Regex and brace-matching adapter for languages without a tree-sitter grammar.
//!
//! A definition is a regex hit (name in capture group 1) followed by a braced
//! body. Comments are blanked out first (byte offsets kept), then bodies are
//! found with a string-aware brace matcher; hits without a balanced body are
//! dropped. This adapter never fails: input it cannot make sense of simply
//! yields fewer symbols.

use std::collections::HashSet;

use regex::Regex;

use super::{AdapterStrategy, Extraction, RawSymbol, SymbolKind, SyntaxAdapter};
use crate::error::{RepoIntelError, Result};

/// Regex tables for one language
pub struct PatternSpec {
    language: &'static str,
    /// Tried in order; an earlier pattern wins when two claim the same body
    definitions: Vec<(SymbolKind, Regex)>,
    call: Regex,
    /// Every matched capture group is an import; quoted strings inside a
    /// group are split out individually
    imports: Vec<Regex>,
    /// Never symbol or callee names
    keywords: &'static [&'static str],
    lexicon: &'static Lexicon,
}

/// How a language spells comments and string literals
struct Lexicon {
    line_comment: &'static str,
    /// The line comment marker only counts at the start of a word (`#` in shell)
    comment_at_word_start: bool,
    block_comments: bool,
    quotes: &'static [char],
    /// Quotes whose contents take no backslash escapes
    raw_quotes: &'static [char],
}

const TS_LEXICON: Lexicon = Lexicon {
    line_comment: "//",
    comment_at_word_start: false,
    block_comments: true,
    quotes: &['"', '\'', '`'],
    raw_quotes: &[],
};

const GO_LEXICON: Lexicon = Lexicon {
    line_comment: "//",
    comment_at_word_start: false,
    block_comments: true,
    quotes: &['"', '\'', '`'],
    raw_quotes: &['`'],
};

const C_LEXICON: Lexicon = Lexicon {
    line_comment: "//",
    comment_at_word_start: false,
    block_comments: true,
    quotes: &['"', '\''],
    raw_quotes: &[],
};

const SHELL_LEXICON: Lexicon = Lexicon {
    line_comment: "#",
    comment_at_word_start: true,
    block_comments: false,
    quotes: &['"', '\'', '`'],
    raw_quotes: &['\''],
};

const JS_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "typeof", "new", "super",
    "await", "yield", "with", "constructor",
];

const GO_KEYWORDS: &[&str] = &["if", "for", "switch", "select", "return", "func", "go", "defer"];

const C_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "return", "sizeof", "else", "do", "case", "catch",
    "alignof", "decltype",
];

const SHELL_KEYWORDS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "for", "while", "until", "do", "done", "case", "esac",
    "function", "return", "local", "export", "declare", "readonly", "in", "select", "exit",
];

impl PatternSpec {
    pub fn typescript() -> Result<Self> {
        Self::build(
            "typescript",
            &[
                (SymbolKind::Function, r"\bfunction\s*\*?\s+([A-Za-z_$][\w$]*)\s*[<(]"),
                (
                    SymbolKind::Function,
                    r"\b(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s*)?\([^)]*\)\s*(?::\s*[^={]+)?=>\s*\{",
                ),
                (
                    SymbolKind::Function,
                    r"\b(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?function\b",
                ),
                (SymbolKind::Class, r"\b(?:class|interface)\s+([A-Za-z_$][\w$]*)"),
                (
                    SymbolKind::Function,
                    r"(?m)^[ \t]*(?:(?:public|private|protected|static|async|readonly|override|get|set)\s+)*([A-Za-z_$][\w$]*)\s*\([^)]*\)\s*(?::\s*[^{;]+)?\{",
                ),
            ],
            r"\b([A-Za-z_$][\w$]*)\s*\(",
            &[
                r#"\bimport\s+(?:[^;]+?\s+from\s+)?['"]([^'"]+)['"]"#,
                r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#,
            ],
            JS_KEYWORDS,
            &TS_LEXICON,
        )
    }

    pub fn go() -> Result<Self> {
        Self::build(
            "go",
            &[
                (
                    SymbolKind::Function,
                    r"\bfunc\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)\s*(?:\[[^\]]*\])?\(",
                ),
                (SymbolKind::Class, r"\btype\s+([A-Za-z_]\w*)\s+(?:struct|interface)\b"),
            ],
            r"\b([A-Za-z_]\w*)\s*\(",
            &[r#"\bimport\s+(?:\(\s*([^)]*?)\s*\)|(?:[A-Za-z_.]\w*\s+)?"([^"]+)")"#],
            GO_KEYWORDS,
            &GO_LEXICON,
        )
    }

    /// C and C++ share one table
    pub fn c_family() -> Result<Self> {
        Self::build(
            "c",
            &[
                (
                    SymbolKind::Function,
                    r"(?m)^[A-Za-z_][\w*&\s:<>,]*?[\s*&](?:\w+::)*(~?[A-Za-z_]\w*)\s*\([^;{]*\)\s*(?:const\s*)?\{",
                ),
                (
                    SymbolKind::Class,
                    r"(?m)^[ \t]*(?:typedef\s+)?(?:struct|class|union)\s+([A-Za-z_]\w*)[^;{(]*\{",
                ),
            ],
            r"\b([A-Za-z_]\w*)\s*\(",
            &[r#"(?m)^[ \t]*#\s*include\s*[<"]([^>"]+)[>"]"#],
            C_KEYWORDS,
            &C_LEXICON,
        )
    }

    pub fn shell() -> Result<Self> {
        Self::build(
            "shell",
            &[
                (SymbolKind::Function, r"(?m)^[ \t]*(?:function\s+)?([A-Za-z_][\w-]*)\s*\(\)\s*\{"),
                (SymbolKind::Function, r"(?m)^[ \t]*function\s+([A-Za-z_][\w-]*)\s*\{"),
            ],
            // commands: first word of a line, or after ; && || | $(
            r"(?m)(?:^|[;&|]|\$\()[ \t]*([A-Za-z_][\w-]*)",
            &[r"(?m)^[ \t]*(?:source|\.)\s+(\S+)"],
            SHELL_KEYWORDS,
            &SHELL_LEXICON,
        )
    }

    fn build(
        language: &'static str,
        definitions: &[(SymbolKind, &str)],
        call: &str,
        imports: &[&str],
        keywords: &'static [&'static str],
        lexicon: &'static Lexicon,
    ) -> Result<Self> {
        let definitions = definitions
            .iter()
            .map(|(kind, src)| Ok((*kind, compile(src)?)))
            .collect::<Result<Vec<_>>>()?;
        let imports = imports.iter().map(|src| compile(src)).collect::<Result<Vec<_>>>()?;

        Ok(Self {
            language,
            definitions,
            call: compile(call)?,
            imports,
            keywords,
            lexicon,
        })
    }
}

fn compile(src: &str) -> Result<Regex> {
    Regex::new(src).map_err(|e| {
        RepoIntelError::Parser(format!("invalid adapter pattern {}: {}", src, e))
    })
}

/// Heuristic adapter driven by a [`PatternSpec`]
pub struct PatternAdapter {
    spec: PatternSpec,
}

/// A definition hit with its body located
struct Span {
    name: String,
    kind: SymbolKind,
    start: usize,
    open: usize,
    close: usize,
}

impl PatternAdapter {
    pub fn new(spec: PatternSpec) -> Self {
        Self { spec }
    }

    fn spans(&self, content: &str) -> Vec<Span> {
        let mut claimed = HashSet::new();
        let mut spans = Vec::new();

        for (kind, regex) in &self.spec.definitions {
            for caps in regex.captures_iter(content) {
                let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                if self.spec.keywords.contains(&name.as_str()) {
                    continue;
                }
                let Some(open) = opening_brace(content, whole.as_str(), whole.end()) else {
                    continue;
                };
                if !claimed.insert(open) {
                    continue;
                }
                let Some(close) = matching_brace(content, open, self.spec.lexicon) else {
                    continue;
                };
                let leading = whole.as_str().len() - whole.as_str().trim_start().len();
                spans.push(Span {
                    name: name.as_str().to_string(),
                    kind: *kind,
                    start: whole.start() + leading,
                    open,
                    close,
                });
            }
        }

        // source order; an enclosing span sorts before the spans it contains
        spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.close.cmp(&a.close)));
        spans
    }

    fn imports(&self, content: &str) -> Vec<String> {
        let mut imports = Vec::new();
        for regex in &self.spec.imports {
            for caps in regex.captures_iter(content) {
                for group in caps.iter().skip(1).flatten() {
                    let text = group.as_str();
                    let quoted = quoted_strings(text);
                    if quoted.is_empty() {
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            imports.push(trimmed.to_string());
                        }
                    } else {
                        imports.extend(quoted);
                    }
                }
            }
        }
        imports
    }
}

impl SyntaxAdapter for PatternAdapter {
    fn extract(&mut self, source: &str) -> Result<Extraction> {
        let masked = mask_comments(source, self.spec.lexicon);
        let content = masked.as_str();
        let spans = self.spans(content);
        let lines = LineIndex::new(content);

        let mut symbols: Vec<RawSymbol> = spans
            .iter()
            .map(|s| RawSymbol {
                name: s.name.clone(),
                kind: s.kind,
                byte_range: (s.start, s.close + 1),
                line_range: (lines.line_of(s.start), lines.line_of(s.close)),
                calls: Vec::new(),
            })
            .collect();

        for caps in self.spec.call.captures_iter(content) {
            let Some(callee) = caps.get(1) else { continue };
            let name = callee.as_str();
            if self.spec.keywords.contains(&name) {
                continue;
            }
            if content[callee.end()..].starts_with('=') {
                // shell assignment, not a command
                continue;
            }
            let at = callee.start();
            if spans.iter().any(|s| s.start <= at && at < s.open) {
                continue;
            }
            let owner = spans
                .iter()
                .enumerate()
                .filter(|(_, s)| s.open < at && at < s.close)
                .max_by_key(|(_, s)| s.open)
                .map(|(idx, _)| idx);
            if let Some(idx) = owner {
                symbols[idx].calls.push(name.to_string());
            }
        }

        Ok(Extraction {
            symbols,
            imports: self.imports(content),
        })
    }

    fn language_name(&self) -> &str {
        self.spec.language
    }

    fn strategy(&self) -> AdapterStrategy {
        AdapterStrategy::Pattern
    }
}

/// The body brace is the last char of the hit, or the next `{` before any `;` or `}`
fn opening_brace(content: &str, hit: &str, hit_end: usize) -> Option<usize> {
    if hit.ends_with('{') {
        return Some(hit_end - 1);
    }
    for (offset, ch) in content[hit_end..].char_indices() {
        match ch {
            '{' => return Some(hit_end + offset),
            ';' | '}' => return None,
            _ => {}
        }
    }
    None
}

/// Copy of `content` with every comment replaced by spaces. Newlines and
/// byte offsets are preserved, so spans found in the copy index the original.
fn mask_comments(content: &str, lexicon: &Lexicon) -> String {
    let mut out = String::with_capacity(content.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev: Option<char> = None;
    let mut i = 0;

    while let Some(ch) = content[i..].chars().next() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' && !lexicon.raw_quotes.contains(&q) {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            out.push(ch);
            prev = Some(ch);
            i += ch.len_utf8();
            continue;
        }

        let rest = &content[i..];
        let comment_end = if rest.starts_with(lexicon.line_comment)
            && (!lexicon.comment_at_word_start || prev.map_or(true, |p| p.is_whitespace() || p == ';'))
        {
            Some(rest.find('\n').map_or(content.len(), |n| i + n))
        } else if lexicon.block_comments && rest.starts_with("/*") {
            Some(rest[2..].find("*/").map_or(content.len(), |n| i + n + 4))
        } else {
            None
        };

        match comment_end {
            Some(end) => {
                for c in content[i..end].chars() {
                    if c == '\n' {
                        out.push('\n');
                    } else {
                        out.extend(std::iter::repeat(' ').take(c.len_utf8()));
                    }
                }
                prev = Some(' ');
                i = end;
            }
            None => {
                if lexicon.quotes.contains(&ch) {
                    quote = Some(ch);
                }
                out.push(ch);
                prev = Some(ch);
                i += ch.len_utf8();
            }
        }
    }
    out
}

/// Index of the `}` closing the brace at `open`, ignoring braces inside string
/// literals. Expects comments to be masked already.
fn matching_brace(content: &str, open: usize, lexicon: &Lexicon) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in content[open..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' && !lexicon.raw_quotes.contains(&q) {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            c if lexicon.quotes.contains(&c) => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn quoted_strings(text: &str) -> Vec<String> {
    text.split('"')
        .skip(1)
        .step_by(2)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

struct LineIndex {
    newlines: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        Self {
            newlines: content.match_indices('\n').map(|(i, _)| i).collect(),
        }
    }

    /// 1-based line containing byte `offset`
    fn line_of(&self, offset: usize) -> usize {
        self.newlines.partition_point(|&nl| nl < offset) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(spec: PatternSpec, source: &str) -> Extraction {
        PatternAdapter::new(spec).extract(source).unwrap()
    }

    fn names(out: &Extraction) -> Vec<&str> {
        out.symbols.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn typescript_functions_arrows_methods_and_imports() {
        let source = r#"import { api } from "./api";
const fs = require('fs');

export function load(path: string): string {
  return parse(fs.readFileSync(path));
}

const parse = (text: string) => {
  return JSON.parse(text);
};

class Cache {
  get(key: string): string {
    if (key) { return load(key); }
    return "}";
  }
}
"#;
        let out = extract(PatternSpec::typescript().unwrap(), source);

        assert_eq!(out.imports, vec!["./api", "fs"]);
        assert_eq!(names(&out), vec!["load", "parse", "Cache", "get"]);
        assert_eq!(out.symbols[0].calls, vec!["parse", "readFileSync"]);
        assert_eq!(out.symbols[0].line_range, (4, 6));
        assert_eq!(out.symbols[2].kind, SymbolKind::Class);
        assert!(out.symbols[2].calls.is_empty());
        assert_eq!(out.symbols[3].calls, vec!["load"]);
        assert_eq!(out.symbols[3].line_range, (13, 16));
    }

    #[test]
    fn go_receivers_types_and_import_blocks() {
        let source = r#"package store

import (
    "fmt"
    "os"
)

type Store struct {
    path string
}

func (s *Store) Save() error {
    return write(s.path)
}

func write(p string) error {
    fmt.Println(p)
    return os.WriteFile(p, nil, 0o644)
}
"#;
        let out = extract(PatternSpec::go().unwrap(), source);

        assert_eq!(out.imports, vec!["fmt", "os"]);
        assert_eq!(names(&out), vec!["Store", "Save", "write"]);
        assert_eq!(out.symbols[1].calls, vec!["write"]);
        assert_eq!(out.symbols[2].calls, vec!["Println", "WriteFile"]);
    }

    #[test]
    fn c_prototypes_are_not_definitions() {
        let source = r#"#include <stdio.h>
#include "util.h"

int helper(int x);

static int helper(int x) {
    return x * 2;
}

int main(void) {
    if (helper(1) > 0) {
        printf("ok {\n");
    }
    return 0;
}
"#;
        let out = extract(PatternSpec::c_family().unwrap(), source);

        assert_eq!(out.imports, vec!["stdio.h", "util.h"]);
        assert_eq!(names(&out), vec!["helper", "main"]);
        assert_eq!(out.symbols[1].calls, vec!["helper", "printf"]);
        assert_eq!(out.symbols[1].line_range, (10, 15));
    }

    #[test]
    fn shell_functions_call_commands() {
        let source = r#"#!/bin/sh
source ./lib.sh

build() {
  VERSION=1
  compile "$1" && package
}

function deploy {
  build release | tee log.txt
}
"#;
        let out = extract(PatternSpec::shell().unwrap(), source);

        assert_eq!(out.imports, vec!["./lib.sh"]);
        assert_eq!(names(&out), vec!["build", "deploy"]);
        assert_eq!(out.symbols[0].calls, vec!["compile", "package"]);
        assert_eq!(out.symbols[1].calls, vec!["build", "tee"]);
    }

    #[test]
    fn unbalanced_bodies_are_dropped_without_error() {
        let out = extract(
            PatternSpec::typescript().unwrap(),
            "function broken() {\n  if (x) {\n",
        );
        assert!(out.symbols.is_empty());
    }

    #[test]
    fn apostrophes_in_go_comments_do_not_hide_bodies() {
        let source = "func a() {\n\t// don't forget\n\tb()\n}\n\nfunc b() {\n}\n";
        let out = extract(PatternSpec::go().unwrap(), source);

        assert_eq!(names(&out), vec!["a", "b"]);
        assert_eq!(out.symbols[0].calls, vec!["b"]);
        assert_eq!(out.symbols[0].line_range, (1, 4));
    }

    #[test]
    fn typescript_comments_are_ignored() {
        let source = "function load() {\n  // user's cache\n  /* it's { open */\n  return parse();\n}\n\nfunction parse() {\n  const url = \"http://example.com/{\";\n  return url;\n}\n";
        let out = extract(PatternSpec::typescript().unwrap(), source);

        assert_eq!(names(&out), vec!["load", "parse"]);
        assert_eq!(out.symbols[0].calls, vec!["parse"]);
        assert_eq!(out.symbols[1].line_range, (7, 10));
    }

    #[test]
    fn c_block_and_line_comments_are_ignored() {
        let source = "int main(void) {\n  /* it's a { trap */\n  run(); // don't\n  return 0;\n}\n\nvoid run(void) {\n  char c = '}';\n}\n";
        let out = extract(PatternSpec::c_family().unwrap(), source);

        assert_eq!(names(&out), vec!["main", "run"]);
        assert_eq!(out.symbols[0].calls, vec!["run"]);
        assert_eq!(out.symbols[1].line_range, (7, 9));
    }

    #[test]
    fn shell_hash_comments_only_start_words() {
        let source = "build() {\n  # it's fine\n  make\n  echo ${#args[@]}\n}\n";
        let out = extract(PatternSpec::shell().unwrap(), source);

        assert_eq!(names(&out), vec!["build"]);
        assert_eq!(out.symbols[0].calls, vec!["make", "echo"]);
        assert_eq!(out.symbols[0].line_range, (1, 5));
    }

    #[test]
    fn masking_keeps_offsets_and_newlines() {
        let source = "a // é'\nb /* x\ny */ c";
        let masked = mask_comments(source, &C_LEXICON);
        assert_eq!(masked.len(), source.len());
        assert_eq!(masked, "a       \nb     \n     c");
    }

    #[test]
    fn line_index_is_one_based() {
        let index = LineIndex::new("a\nb\nc");
        assert_eq!(index.line_of(0), 1);
        assert_eq!(index.line_of(2), 2);
        assert_eq!(index.line_of(4), 3);
    }
}
