use tree_sitter::Node;

use super::treesitter::{statement_tail, GrammarSpec};

pub const JAVA: GrammarSpec = GrammarSpec {
    language: "java",
    grammar: tree_sitter_java::language,
    function_kinds: &["method_declaration", "constructor_declaration"],
    class_kinds: &[
        "class_declaration",
        "interface_declaration",
        "enum_declaration",
        "record_declaration",
    ],
    assigned_functions: &[],
    call_kinds: &[("method_invocation", "name"), ("object_creation_expression", "type")],
    macro_token_trees: &[],
    import_kinds: &["import_declaration"],
    import_names: java_imports,
};

fn java_imports(node: Node, source: &str) -> Vec<String> {
    statement_tail(node, source, &["import", "static"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::languages::{SyntaxAdapter, TreeSitterAdapter};

    #[test]
    fn test_java_methods_constructors_and_invocations() {
        let source = r#"
import java.util.List;
import static java.lang.Math.max;

public class Greeter {
    public Greeter() { init(); }

    private void init() {}

    public String greet(String name) {
        return format(name).trim();
    }

    static String format(String n) {
        return new StringBuilder(n).toString();
    }
}
"#;
        let mut adapter = TreeSitterAdapter::new(&JAVA).unwrap();
        let out = adapter.extract(source).unwrap();

        assert_eq!(out.imports, vec!["java.util.List", "java.lang.Math.max"]);
        let names: Vec<_> = out.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Greeter", "Greeter", "init", "greet", "format"]);
        assert_eq!(out.symbols[1].calls, vec!["init"]);
        assert!(out.symbols[3].calls.contains(&"format".to_string()));
        assert!(out.symbols[4].calls.contains(&"StringBuilder".to_string()));
    }
}
