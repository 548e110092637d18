use tree_sitter::Node;

use super::treesitter::{node_text, AssignedFunction, GrammarSpec};

pub const JAVASCRIPT: GrammarSpec = GrammarSpec {
    language: "javascript",
    grammar: tree_sitter_javascript::language,
    function_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "method_definition",
    ],
    class_kinds: &["class_declaration"],
    assigned_functions: &[AssignedFunction {
        declarator: "variable_declarator",
        value_field: "value",
        value_kinds: &["arrow_function", "function", "function_expression"],
    }],
    call_kinds: &[("call_expression", "function"), ("new_expression", "constructor")],
    macro_token_trees: &[],
    import_kinds: &["import_statement"],
    import_names: javascript_imports,
};

fn javascript_imports(node: Node, source: &str) -> Vec<String> {
    node.child_by_field_name("source")
        .map(|s| {
            let raw = node_text(s, source);
            vec![raw.trim_matches(|c| c == '"' || c == '\'' || c == '`').to_string()]
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::languages::{SymbolKind, SyntaxAdapter, TreeSitterAdapter};

    #[test]
    fn test_javascript_declarations_arrows_and_classes() {
        let source = r#"
import { readFile } from 'fs/promises';

export class Loader {
  load(path) {
    return this.decode(readFile(path));
  }
  decode(buf) { return new TextDecoder().decode(buf); }
}

const main = async () => {
  const loader = new Loader();
  await loader.load('a.txt');
};

function helper() { return main(); }
"#;
        let mut adapter = TreeSitterAdapter::new(&JAVASCRIPT).unwrap();
        let out = adapter.extract(source).unwrap();

        assert_eq!(out.imports, vec!["fs/promises"]);
        let names: Vec<_> = out.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Loader", "load", "decode", "main", "helper"]);
        assert_eq!(out.symbols[0].kind, SymbolKind::Class);
        assert_eq!(out.symbols[1].calls, vec!["decode", "readFile"]);
        assert_eq!(out.symbols[3].calls, vec!["Loader", "load"]);
        assert_eq!(out.symbols[4].calls, vec!["main"]);
    }
}
