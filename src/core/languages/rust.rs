use tree_sitter::Node;

use super::treesitter::{statement_tail, GrammarSpec};

pub const RUST: GrammarSpec = GrammarSpec {
    language: "rust",
    grammar: tree_sitter_rust::language,
    function_kinds: &["function_item"],
    class_kinds: &["struct_item", "enum_item", "trait_item", "union_item"],
    assigned_functions: &[],
    call_kinds: &[("call_expression", "function")],
    macro_token_trees: &["token_tree"],
    import_kinds: &["use_declaration"],
    import_names: rust_imports,
};

fn rust_imports(node: Node, source: &str) -> Vec<String> {
    statement_tail(node, source, &["pub(crate)", "pub", "use"])
}
