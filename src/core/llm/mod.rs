//! Integration with the external documentation generator
//!
//! Groups are turned into [`GenerationRequest`]s; a [`DocGenerator`] turns a
//! request into an artifact or a typed [`GenerationError`] whose kind tells
//! the orchestrator whether a retry is worthwhile.

mod documenter;
mod prompt;
mod providers;

pub use documenter::{
    DocGenerator, FailureKind, GeneratedArtifact, GenerationError, GenerationRequest,
    GenerationStyle,
};
pub use providers::create_generator;
