//! Partitioning of a repository's symbols into bounded analysis batches.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::super::symbols::{SymbolId, SymbolTable};
use super::call_graph::CallGraph;

/// A batch of related symbols analysed together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// `group-` plus 12 hex digits derived from the member keys
    pub id: String,
    /// Ascending by id
    pub members: Vec<SymbolId>,
    /// Sum of the members' own sizes
    pub size_estimate: usize,
    /// SHA-256 over the members' own texts, in member order
    pub fingerprint: String,
    /// A single symbol larger than the batch budget
    pub overflow: bool,
}

/// Splits weakly-connected call-graph components into groups within a size budget
pub struct GroupingEngine {
    budget: usize,
}

impl GroupingEngine {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    /// Every symbol ends up in exactly one group; groups come out ordered by
    /// their smallest member id.
    pub fn group(&self, table: &SymbolTable, graph: &CallGraph) -> Vec<Group> {
        let mut groups = Vec::new();

        for component in components(table, graph) {
            let mut fitting = Vec::new();
            for id in component {
                if own_size(table, id) > self.budget {
                    let name = table.get(id).map(|s| s.name.as_str()).unwrap_or("?");
                    warn!(
                        "Symbol {} ({} bytes) exceeds the batch budget of {} bytes",
                        name,
                        own_size(table, id),
                        self.budget
                    );
                    groups.push(self.seal(table, vec![id], true));
                } else {
                    fitting.push(id);
                }
            }
            if fitting.is_empty() {
                continue;
            }

            let total: usize = fitting.iter().map(|&id| own_size(table, id)).sum();
            if total <= self.budget {
                groups.push(self.seal(table, fitting, false));
            } else {
                debug!(
                    "Splitting component of {} symbols ({} bytes)",
                    fitting.len(),
                    total
                );
                for members in self.split(table, graph, fitting) {
                    groups.push(self.seal(table, members, false));
                }
            }
        }

        groups.sort_by_key(|g| g.members.first().copied());
        groups
    }

    /// Greedy split: seed at the highest-degree symbol, grow breadth-first
    /// until the next neighbour does not fit, repeat.
    fn split(&self, table: &SymbolTable, graph: &CallGraph, ids: Vec<SymbolId>) -> Vec<Vec<SymbolId>> {
        let mut unassigned: BTreeSet<SymbolId> = ids.into_iter().collect();
        let mut batches = Vec::new();

        while let Some(seed) = pick_seed(table, graph, &unassigned) {
            unassigned.remove(&seed);
            let mut members = vec![seed];
            let mut size = own_size(table, seed);
            let mut queue = VecDeque::from([seed]);

            'grow: while let Some(current) = queue.pop_front() {
                let mut next: Vec<SymbolId> = graph
                    .neighbours(current)
                    .into_iter()
                    .filter(|n| unassigned.contains(n))
                    .collect();
                next.sort_by(|a, b| name_of(table, *a).cmp(name_of(table, *b)).then(a.cmp(b)));

                for neighbour in next {
                    let extra = own_size(table, neighbour);
                    if size + extra > self.budget {
                        break 'grow;
                    }
                    unassigned.remove(&neighbour);
                    members.push(neighbour);
                    size += extra;
                    queue.push_back(neighbour);
                }
            }

            batches.push(members);
        }

        batches
    }

    fn seal(&self, table: &SymbolTable, mut members: Vec<SymbolId>, overflow: bool) -> Group {
        members.sort();

        let mut id_hasher = Sha256::new();
        let mut content_hasher = Sha256::new();
        let mut size_estimate = 0;

        for &member in &members {
            if let Some(symbol) = table.get(member) {
                id_hasher.update(symbol.file.to_string_lossy().as_bytes());
                id_hasher.update(b"\0");
                id_hasher.update(symbol.name.as_bytes());
                id_hasher.update(b"\0");
                id_hasher.update(symbol.line_range.0.to_string().as_bytes());
                id_hasher.update(b"\n");
            }
            let text = table.own_text(member);
            content_hasher.update(text.as_bytes());
            content_hasher.update(b"\0");
            size_estimate += text.len();
        }

        let id_hash = format!("{:x}", id_hasher.finalize());
        Group {
            id: format!("group-{}", &id_hash[..12]),
            members,
            size_estimate,
            fingerprint: format!("{:x}", content_hasher.finalize()),
            overflow,
        }
    }

    /// Get statistics for all groups
    pub fn get_grouping_statistics(&self, groups: &[Group]) -> GroupingStats {
        let total_symbols: usize = groups.iter().map(|g| g.members.len()).sum();
        GroupingStats {
            total_groups: groups.len(),
            total_symbols,
            overflow_groups: groups.iter().filter(|g| g.overflow).count(),
            largest_group_size: groups.iter().map(|g| g.members.len()).max().unwrap_or(0),
            avg_symbols_per_group: if groups.is_empty() {
                0.0
            } else {
                total_symbols as f64 / groups.len() as f64
            },
            budget: self.budget,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingStats {
    pub total_groups: usize,
    pub total_symbols: usize,
    pub overflow_groups: usize,
    pub largest_group_size: usize,
    pub avg_symbols_per_group: f64,
    pub budget: usize,
}

/// Weakly-connected components over resolved edges, each sorted by id
fn components(table: &SymbolTable, graph: &CallGraph) -> Vec<Vec<SymbolId>> {
    let mut seen = vec![false; table.len()];
    let mut out = Vec::new();

    for symbol in table.symbols() {
        if seen[symbol.id.index()] {
            continue;
        }
        seen[symbol.id.index()] = true;
        let mut component = vec![symbol.id];
        let mut queue = VecDeque::from([symbol.id]);

        while let Some(current) = queue.pop_front() {
            for neighbour in graph.neighbours(current) {
                if let Some(flag) = seen.get_mut(neighbour.index()) {
                    if !*flag {
                        *flag = true;
                        component.push(neighbour);
                        queue.push_back(neighbour);
                    }
                }
            }
        }

        component.sort();
        out.push(component);
    }

    out
}

/// Highest degree; ties go to the smallest name, then the smallest id
fn pick_seed(table: &SymbolTable, graph: &CallGraph, unassigned: &BTreeSet<SymbolId>) -> Option<SymbolId> {
    unassigned.iter().copied().min_by(|a, b| {
        graph
            .degree(*b)
            .cmp(&graph.degree(*a))
            .then_with(|| name_of(table, *a).cmp(name_of(table, *b)))
            .then_with(|| a.cmp(b))
    })
}

fn own_size(table: &SymbolTable, id: SymbolId) -> usize {
    table.get(id).map(|s| s.own_size).unwrap_or(0)
}

fn name_of(table: &SymbolTable, id: SymbolId) -> &str {
    table.get(id).map(|s| s.name.as_str()).unwrap_or("")
}
