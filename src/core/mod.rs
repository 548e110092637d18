mod engine;
mod discovery;
mod exclusion;
mod parser;
mod symbols;
mod vcs;
mod report;

// Language-specific syntax adapters
mod languages;

// Call resolution and grouping
mod call_graph;

// Generator seam and the job orchestrator
mod llm;
mod orchestrator;

pub use engine::Engine;
