use tree_sitter::Node;

use super::treesitter::{statement_tail, GrammarSpec};

pub const CSHARP: GrammarSpec = GrammarSpec {
    language: "csharp",
    grammar: tree_sitter_c_sharp::language,
    function_kinds: &[
        "method_declaration",
        "constructor_declaration",
        "local_function_statement",
    ],
    class_kinds: &[
        "class_declaration",
        "struct_declaration",
        "interface_declaration",
        "record_declaration",
        "enum_declaration",
    ],
    assigned_functions: &[],
    call_kinds: &[
        ("invocation_expression", "function"),
        ("object_creation_expression", "type"),
    ],
    macro_token_trees: &[],
    import_kinds: &["using_directive"],
    import_names: csharp_imports,
};

fn csharp_imports(node: Node, source: &str) -> Vec<String> {
    statement_tail(node, source, &["global", "using", "static"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::languages::{SyntaxAdapter, TreeSitterAdapter};

    #[test]
    fn test_csharp_members_and_usings() {
        let source = r#"
using System.Text;

namespace Demo
{
    public class Greeter
    {
        public string Greet(string name)
        {
            return Format(name).Trim();
        }

        private static string Format(string n)
        {
            return new StringBuilder(n).ToString();
        }
    }
}
"#;
        let mut adapter = TreeSitterAdapter::new(&CSHARP).unwrap();
        let out = adapter.extract(source).unwrap();

        assert_eq!(out.imports, vec!["System.Text"]);
        let names: Vec<_> = out.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Greeter", "Greet", "Format"]);
        assert!(out.symbols[1].calls.contains(&"Format".to_string()));
        assert!(out.symbols[2].calls.contains(&"StringBuilder".to_string()));
    }
}
