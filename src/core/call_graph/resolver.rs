//! Best-effort name resolution of call references inside one repository.

use tracing::debug;

use super::super::symbols::{Symbol, SymbolId, SymbolTable};
use super::call_graph::{CallEdge, CallGraph, Confidence};

pub struct CallResolver<'a> {
    table: &'a SymbolTable,
}

impl<'a> CallResolver<'a> {
    pub fn new(table: &'a SymbolTable) -> Self {
        Self { table }
    }

    /// A unique match in the caller's own file wins, then a unique match
    /// anywhere in the repository. Several candidates are ambiguous, none
    /// means the callee lives outside the repository.
    pub fn resolve(&self, caller: &Symbol, name: &str) -> (Option<SymbolId>, Confidence) {
        let candidates = self.table.named(name);

        let mut same_file = candidates
            .iter()
            .copied()
            .filter(|id| self.table.get(*id).map(|s| s.file == caller.file).unwrap_or(false));
        if let (Some(only), None) = (same_file.next(), same_file.next()) {
            return (Some(only), Confidence::Resolved);
        }

        match candidates {
            [] => (None, Confidence::Unresolved),
            [only] => (Some(*only), Confidence::Resolved),
            many => (
                None,
                Confidence::Ambiguous {
                    candidates: many.len(),
                },
            ),
        }
    }

    pub fn build_graph(&self) -> CallGraph {
        let mut graph = CallGraph::new(self.table.len());

        for symbol in self.table.symbols() {
            for name in &symbol.calls {
                let (callee, confidence) = self.resolve(symbol, name);
                graph.add_edge(CallEdge {
                    caller: symbol.id,
                    callee,
                    name: name.clone(),
                    confidence,
                });
            }
        }

        let stats = graph.get_statistics();
        debug!(
            symbols = stats.symbols,
            resolved = stats.resolved,
            ambiguous = stats.ambiguous,
            unresolved = stats.unresolved,
            "Resolved call graph"
        );
        graph
    }
}
