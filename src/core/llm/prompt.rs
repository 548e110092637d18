use tera::{Context, Tera};

use crate::error::Result;
use super::documenter::GenerationRequest;

const SYSTEM_PROMPT: &str = "You are a senior staff software engineer and code analyst. \
Write clear, deeply technical, and precise explanations.";

const GROUP_TEMPLATE: &str = r#"Analyze the following code from repository **{{ repository }}** (batch {{ group_id }}).
{% if imports %}
Imports detected: {{ imports | join(sep=", ") }}
{% endif %}
Function relationships within this batch:
{% for span in spans -%}
- {{ span.symbol }} ({{ span.file }}): calls [{% if span.calls %}{{ span.calls | join(sep=", ") }}{% else %}none{% endif %}]; called by [{% if span.called_by %}{{ span.called_by | join(sep=", ") }}{% else %}none{% endif %}]
{% endfor %}
Your task:
- Produce a ~{{ style.word_target }} word **Markdown** report for this group of related functions.
- Explain what each function does, its parameters, return values, side effects, state and I/O, and error handling.
- Explain how the functions interact and the overall data and control flow.
- Identify edge cases, failure modes, race conditions, security issues and performance risks.
- Suggest concrete refactors, improved abstractions, and unit or integration tests.
- Provide a short pseudo-code example of the typical execution path across these functions.

Provide an honest technical critique. If something is unclear or risky, say so and propose fixes.
{% if truncated %}
Note: some source below was truncated to fit the request size limit.
{% endif %}
### Code Snippets
{% for span in spans %}
#### {{ span.kind | capitalize }} `{{ span.symbol }}` ({{ span.file }}, lines {{ span.line_range.0 }}-{{ span.line_range.1 }})
```{{ span.language }}
{{ span.text }}
```
{% endfor %}"#;

/// Renders generation requests into chat prompts
pub struct PromptRenderer {
    tera: Tera,
}

impl PromptRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template("group.md", GROUP_TEMPLATE)?;
        Ok(Self { tera })
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    pub fn render(&self, request: &GenerationRequest) -> Result<String> {
        let context = Context::from_serialize(request)?;
        let rendered = self.tera.render("group.md", &context)?;
        Ok(rendered.trim().to_string())
    }
}
