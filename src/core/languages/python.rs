use tree_sitter::Node;

use super::treesitter::{node_text, GrammarSpec};

pub const PYTHON: GrammarSpec = GrammarSpec {
    language: "python",
    grammar: tree_sitter_python::language,
    function_kinds: &["function_definition"],
    class_kinds: &["class_definition"],
    assigned_functions: &[],
    call_kinds: &[("call", "function")],
    macro_token_trees: &[],
    import_kinds: &["import_statement", "import_from_statement"],
    import_names: python_imports,
};

/// `import a.b, c as d` -> [a.b, c]; `from x.y import z` -> [x.y]
fn python_imports(node: Node, source: &str) -> Vec<String> {
    if node.kind() == "import_from_statement" {
        return node
            .child_by_field_name("module_name")
            .map(|m| vec![node_text(m, source)])
            .unwrap_or_default();
    }

    let mut cursor = node.walk();
    let names: Vec<String> = node
        .children_by_field_name("name", &mut cursor)
        .map(|child| {
            let target = if child.kind() == "aliased_import" {
                child.child_by_field_name("name").unwrap_or(child)
            } else {
                child
            };
            node_text(target, source)
        })
        .collect();
    names
}
