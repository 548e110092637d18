use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::super::symbols::SymbolId;

/// How sure the resolver is about a call's target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Confidence {
    Resolved,
    Ambiguous { candidates: usize },
    Unresolved,
}

/// Edge in the call graph representing one call reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    /// Symbol making the call
    pub caller: SymbolId,
    /// Set only for resolved edges
    pub callee: Option<SymbolId>,
    /// Callee name as written at the call site
    pub name: String,
    pub confidence: Confidence,
}

/// All call edges of one repository plus adjacency over the resolved ones
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    /// Every edge, in caller then call order
    pub edges: Vec<CallEdge>,
    callees: Vec<BTreeSet<SymbolId>>,
    callers: Vec<BTreeSet<SymbolId>>,
}

impl CallGraph {
    pub fn new(symbol_count: usize) -> Self {
        Self {
            edges: Vec::new(),
            callees: vec![BTreeSet::new(); symbol_count],
            callers: vec![BTreeSet::new(); symbol_count],
        }
    }

    pub fn add_edge(&mut self, edge: CallEdge) {
        if let (Confidence::Resolved, Some(callee)) = (edge.confidence, edge.callee) {
            // self-calls never join a symbol to anything
            if callee != edge.caller {
                if let Some(out) = self.callees.get_mut(edge.caller.index()) {
                    out.insert(callee);
                }
                if let Some(inc) = self.callers.get_mut(callee.index()) {
                    inc.insert(edge.caller);
                }
            }
        }
        self.edges.push(edge);
    }

    pub fn symbol_count(&self) -> usize {
        self.callees.len()
    }

    /// Distinct symbols this one calls (resolved edges only)
    pub fn callees(&self, id: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        self.callees.get(id.index()).into_iter().flatten().copied()
    }

    /// Distinct symbols calling this one (resolved edges only)
    pub fn callers(&self, id: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        self.callers.get(id.index()).into_iter().flatten().copied()
    }

    /// Undirected neighbours over resolved edges, ascending by id
    pub fn neighbours(&self, id: SymbolId) -> BTreeSet<SymbolId> {
        self.callees(id).chain(self.callers(id)).collect()
    }

    /// Number of distinct resolved neighbours
    pub fn degree(&self, id: SymbolId) -> usize {
        self.neighbours(id).len()
    }

    pub fn get_statistics(&self) -> CallGraphStats {
        let mut stats = CallGraphStats {
            symbols: self.symbol_count(),
            ..CallGraphStats::default()
        };

        for edge in &self.edges {
            match edge.confidence {
                Confidence::Resolved => stats.resolved += 1,
                Confidence::Ambiguous { .. } => stats.ambiguous += 1,
                Confidence::Unresolved => stats.unresolved += 1,
            }
        }
        stats.max_degree = (0..self.symbol_count())
            .map(|i| self.degree(SymbolId(i as u32)))
            .max()
            .unwrap_or(0);
        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraphStats {
    pub symbols: usize,
    pub resolved: usize,
    pub ambiguous: usize,
    pub unresolved: usize,
    pub max_degree: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(caller: u32, callee: u32) -> CallEdge {
        CallEdge {
            caller: SymbolId(caller),
            callee: Some(SymbolId(callee)),
            name: format!("s{}", callee),
            confidence: Confidence::Resolved,
        }
    }

    #[test]
    fn adjacency_ignores_self_calls_and_low_confidence_edges() {
        let mut graph = CallGraph::new(3);
        graph.add_edge(resolved(0, 1));
        graph.add_edge(resolved(0, 1));
        graph.add_edge(resolved(2, 2));
        graph.add_edge(CallEdge {
            caller: SymbolId(2),
            callee: None,
            name: "print".to_string(),
            confidence: Confidence::Unresolved,
        });
        graph.add_edge(CallEdge {
            caller: SymbolId(1),
            callee: None,
            name: "load".to_string(),
            confidence: Confidence::Ambiguous { candidates: 2 },
        });

        assert_eq!(graph.callees(SymbolId(0)).collect::<Vec<_>>(), vec![SymbolId(1)]);
        assert_eq!(graph.callers(SymbolId(1)).collect::<Vec<_>>(), vec![SymbolId(0)]);
        assert_eq!(graph.degree(SymbolId(0)), 1);
        assert_eq!(graph.degree(SymbolId(2)), 0);

        let stats = graph.get_statistics();
        assert_eq!(stats.resolved, 3);
        assert_eq!(stats.ambiguous, 1);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.max_degree, 1);
        assert_eq!(graph.edges.len(), 5);
    }

    #[test]
    fn confidence_serializes_with_a_kind_tag() {
        let json = serde_json::to_string(&Confidence::Ambiguous { candidates: 3 }).unwrap();
        assert_eq!(json, r#"{"kind":"ambiguous","candidates":3}"#);
    }
}
