use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::super::call_graph::{CallGraph, Group};
use super::super::languages::SymbolKind;
use super::super::symbols::SymbolTable;

/// One symbol's source as sent to the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanPayload {
    pub symbol: String,
    pub kind: SymbolKind,
    pub file: PathBuf,
    pub language: String,
    pub line_range: (usize, usize),
    /// Own text of the symbol
    pub text: String,
    /// In-group callees, by name
    pub calls: Vec<String>,
    /// In-group callers, by name
    pub called_by: Vec<String>,
}

/// Size and sampling knobs for a generated report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStyle {
    /// Approximate report length in words
    pub word_target: u32,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Everything the generator needs to document one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub repository: String,
    pub group_id: String,
    pub fingerprint: String,
    /// Imports of the files the members are defined in
    pub imports: Vec<String>,
    /// Member spans in member order
    pub spans: Vec<SpanPayload>,
    pub style: GenerationStyle,
    /// Set when span text was cut to fit the batch budget
    pub truncated: bool,
}

impl GenerationRequest {
    /// Assemble the request for `group`, annotating each span with its
    /// in-group call relationships.
    pub fn for_group(
        repository: &str,
        group: &Group,
        table: &SymbolTable,
        graph: &CallGraph,
        imports: Vec<String>,
        style: GenerationStyle,
    ) -> Self {
        let members: HashSet<_> = group.members.iter().copied().collect();
        let in_group_names = |ids: Vec<_>| -> Vec<String> {
            let mut names: Vec<String> = ids
                .into_iter()
                .filter(|id| members.contains(id))
                .filter_map(|id| table.get(id).map(|s| s.name.clone()))
                .collect();
            names.sort();
            names.dedup();
            names
        };

        let spans = group
            .members
            .iter()
            .filter_map(|&id| {
                let symbol = table.get(id)?;
                Some(SpanPayload {
                    symbol: symbol.name.clone(),
                    kind: symbol.kind,
                    file: symbol.file.clone(),
                    language: symbol.language.clone(),
                    line_range: symbol.line_range,
                    text: table.own_text(id).to_string(),
                    calls: in_group_names(graph.callees(id).collect()),
                    called_by: in_group_names(graph.callers(id).collect()),
                })
            })
            .collect();

        Self {
            repository: repository.to_string(),
            group_id: group.id.clone(),
            fingerprint: group.fingerprint.clone(),
            imports,
            spans,
            style,
            truncated: false,
        }
    }

    /// Combined length of all span texts
    pub fn payload_size(&self) -> usize {
        self.spans.iter().map(|s| s.text.len()).sum()
    }

    /// Cut span text so the payload fits `budget`, appending a marker to
    /// every span that lost content.
    pub fn truncate_to(&mut self, budget: usize) {
        if self.payload_size() <= budget {
            return;
        }

        let mut remaining = budget;
        for span in &mut self.spans {
            if span.text.len() <= remaining {
                remaining -= span.text.len();
                continue;
            }
            let mut cut = remaining;
            while !span.text.is_char_boundary(cut) {
                cut -= 1;
            }
            let omitted = span.text.len() - cut;
            span.text.truncate(cut);
            span.text
                .push_str(&format!("\n... [truncated: {} bytes omitted]", omitted));
            remaining = 0;
        }
        self.truncated = true;
    }
}

/// Text produced by the generator for one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub content: String,
    pub model: String,
    pub tokens_used: Option<u64>,
}

/// Why a generation attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    ServiceUnavailable,
    Timeout,
    Network,
    MalformedInput,
    Authentication,
    InvalidResponse,
}

impl FailureKind {
    /// Transient failures are worth retrying
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureKind::RateLimited
                | FailureKind::ServiceUnavailable
                | FailureKind::Timeout
                | FailureKind::Network
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::RateLimited => "rate limited",
            FailureKind::ServiceUnavailable => "service unavailable",
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network error",
            FailureKind::MalformedInput => "malformed input",
            FailureKind::Authentication => "authentication failed",
            FailureKind::InvalidResponse => "invalid response",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: FailureKind,
    pub message: String,
    /// Server-provided minimum wait before the next attempt
    pub retry_after: Option<Duration>,
}

impl GenerationError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Trait for services that turn a group of spans into a written report
#[async_trait::async_trait]
pub trait DocGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<GeneratedArtifact, GenerationError>;

    /// Get the provider name (e.g., "OpenAI")
    fn provider_name(&self) -> &str;

    /// Get the model name being used
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::call_graph::{CallResolver, GroupingEngine};
    use crate::core::symbols::fixtures::python;

    fn style() -> GenerationStyle {
        GenerationStyle {
            word_target: 3000,
            max_tokens: None,
            temperature: Some(0.2),
        }
    }

    #[test]
    fn request_carries_in_group_relationships() {
        let source = "def a():\n    b()\n    print()\n\ndef b():\n    pass\n";
        let table = SymbolTable::build(&[python("m.py", source)]);
        let graph = CallResolver::new(&table).build_graph();
        let groups = GroupingEngine::new(10_000).group(&table, &graph);

        let request =
            GenerationRequest::for_group("demo", &groups[0], &table, &graph, vec![], style());
        assert_eq!(request.spans.len(), 2);
        assert_eq!(request.spans[0].symbol, "a");
        assert_eq!(request.spans[0].calls, vec!["b"]);
        assert!(request.spans[0].called_by.is_empty());
        assert_eq!(request.spans[1].called_by, vec!["a"]);
        assert_eq!(request.fingerprint, groups[0].fingerprint);
        assert_eq!(request.payload_size(), groups[0].size_estimate);
    }

    #[test]
    fn truncation_marks_the_request_and_respects_char_boundaries() {
        let mut request = GenerationRequest {
            repository: "demo".into(),
            group_id: "group-000000000000".into(),
            fingerprint: "f".into(),
            imports: vec![],
            spans: vec![SpanPayload {
                symbol: "big".into(),
                kind: SymbolKind::Function,
                file: PathBuf::from("m.py"),
                language: "python".into(),
                line_range: (1, 1),
                text: "ééééé".into(),
                calls: vec![],
                called_by: vec![],
            }],
            style: style(),
            truncated: false,
        };

        request.truncate_to(5);
        assert!(request.truncated);
        assert!(request.spans[0].text.starts_with("éé\n... [truncated: 6 bytes omitted]"));
    }

    #[test]
    fn only_service_side_failures_are_transient() {
        assert!(FailureKind::RateLimited.is_transient());
        assert!(FailureKind::Timeout.is_transient());
        assert!(!FailureKind::Authentication.is_transient());
        assert!(!FailureKind::MalformedInput.is_transient());
        assert!(!FailureKind::InvalidResponse.is_transient());
    }
}
