//! Context fusion: history, retrieved chunks and the question in one request.
//!
//! Pure and deterministic. The message order is fixed:
//!
//! 1. system instruction (plus any retry amendments),
//! 2. the conversation history, oldest first,
//! 3. one user message rendering the fusion template with the tagged
//!    context and the question.

use serde::{Deserialize, Serialize};

use crate::generation::{GenerationRequest, PromptMessage, PromptRole};
use crate::models::{Message, RetrievalCandidate, Role};

pub const DEFAULT_SYSTEM_TEMPLATE: &str = "\
You are a support assistant for a software product. Answer only from the \
documentation excerpts provided in the user message. If the excerpts do not \
contain the answer, say so; never invent features, menus, values or steps. \
Quote procedural steps, interface labels and field names exactly as they \
appear in the excerpts. When the answer is a procedure, write it as numbered \
steps. Use the conversation history only to understand what the user is \
referring to, never as a source of facts.";

pub const DEFAULT_FUSION_TEMPLATE: &str = "\
Documentation excerpts:\n\n{context}\n\nQuestion: {question}";

pub const DEFAULT_CANNOT_ANSWER: &str = "\
I could not find this in the documentation. Please rephrase your question \
or contact support.";

/// Instruction templates. `fusion` must contain `{context}` and `{question}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplates {
    pub system: String,
    pub fusion: String,
    pub cannot_answer: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_TEMPLATE.to_string(),
            fusion: DEFAULT_FUSION_TEMPLATE.to_string(),
            cannot_answer: DEFAULT_CANNOT_ANSWER.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Names of the placeholders missing from the fusion template.
    pub fn missing_placeholders(&self) -> Vec<&'static str> {
        ["{context}", "{question}"]
            .into_iter()
            .filter(|p| !self.fusion.contains(p))
            .collect()
    }
}

/// Render the retrieved chunks, each tagged with where it came from.
pub fn format_context(candidates: &[RetrievalCandidate]) -> String {
    candidates
        .iter()
        .map(|c| {
            let label = if c.chunk.heading_path.is_empty() {
                c.chunk.source_document.clone()
            } else {
                format!("{} ({})", c.chunk.heading_label(), c.chunk.source_document)
            };
            format!("[Source: {}]\n{}", label, c.chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Substitute `{name}` placeholders in a single pass, so substituted values
/// are never themselves expanded.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    'scan: while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        for (name, value) in values {
            let placeholder_len = name.len() + 2;
            if tail.len() >= placeholder_len
                && tail[1..].starts_with(name)
                && tail[1 + name.len()..].starts_with('}')
            {
                out.push_str(value);
                rest = &tail[placeholder_len..];
                continue 'scan;
            }
        }
        out.push('{');
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

/// Build the generation request for one attempt.
///
/// `amendments` are extra instructions for a retry (for instance, a
/// contradiction to avoid); they are appended to the system instruction.
pub fn build_prompt(
    templates: &PromptTemplates,
    history: &[Message],
    candidates: &[RetrievalCandidate],
    question: &str,
    amendments: &[String],
) -> GenerationRequest {
    let mut system = templates.system.trim().to_string();
    if !amendments.is_empty() {
        system.push_str("\n\nYour previous answer was rejected. When answering again:");
        for a in amendments {
            system.push_str("\n- ");
            system.push_str(a);
        }
    }

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::new(PromptRole::System, system));
    for m in history {
        let role = match m.role {
            Role::User => PromptRole::User,
            Role::Assistant => PromptRole::Assistant,
        };
        messages.push(PromptMessage::new(role, m.text.clone()));
    }

    let context = format_context(candidates);
    let fused = render_template(
        &templates.fusion,
        &[("context", context.as_str()), ("question", question.trim())],
    );
    messages.push(PromptMessage::new(PromptRole::User, fused));

    GenerationRequest { messages }
}
