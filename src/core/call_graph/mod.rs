//! Call-graph resolution and grouping
//!
//! Raw callee names are resolved against the repository's symbol table with a
//! three-valued confidence; the resolved edges drive the partition of symbols
//! into bounded analysis batches.

mod call_graph;
mod resolver;
mod grouper;

pub use call_graph::{CallGraph, CallGraphStats};
pub use resolver::CallResolver;
pub use grouper::{Group, GroupingEngine, GroupingStats};
