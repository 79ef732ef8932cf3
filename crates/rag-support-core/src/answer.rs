//! Structured view of a generated answer: title, steps, interface elements.
//!
//! Models are asked for numbered procedures but may also reply with the JSON
//! procedure shape `{"title", "steps": [{"step_number", "description",
//! "interface_elements"}]}`. Both are normalised into [`StructuredAnswer`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    Markdown,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerStep {
    pub number: u32,
    pub description: String,
    pub interface_elements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    pub title: String,
    /// Markdown rendering of the answer.
    pub content: String,
    pub format: AnswerFormat,
    pub steps: Vec<AnswerStep>,
    /// Every interface element mentioned, first occurrence order.
    pub interface_elements: Vec<String>,
}

impl StructuredAnswer {
    /// A plain answer with no procedure, such as the cannot-answer reply.
    pub fn plain(title: &str, content: &str) -> Self {
        Self {
            title: title.to_string(),
            content: content.to_string(),
            format: AnswerFormat::Markdown,
            steps: Vec::new(),
            interface_elements: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct JsonProcedure {
    title: Option<String>,
    #[serde(default)]
    steps: Vec<JsonStep>,
}

#[derive(Deserialize)]
struct JsonStep {
    step_number: Option<u32>,
    description: String,
    #[serde(default)]
    interface_elements: serde_json::Value,
}

/// Parse generated text into a [`StructuredAnswer`].
///
/// `fallback_title` is used when the answer carries no title of its own.
pub fn parse_answer(text: &str, fallback_title: &str) -> StructuredAnswer {
    parse_json(text, fallback_title).unwrap_or_else(|| parse_markdown(text, fallback_title))
}

fn parse_json(text: &str, fallback_title: &str) -> Option<StructuredAnswer> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let procedure: JsonProcedure = serde_json::from_str(&text[start..=end]).ok()?;
    if procedure.steps.is_empty() {
        return None;
    }

    let title = procedure
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| fallback_title.to_string());

    let mut steps = Vec::with_capacity(procedure.steps.len());
    let mut content = format!("# {}\n", title);
    for (i, s) in procedure.steps.into_iter().enumerate() {
        let number = s.step_number.unwrap_or(i as u32 + 1);
        let mut elements = json_elements(&s.interface_elements);
        for e in interface_elements(&s.description) {
            push_unique(&mut elements, e);
        }
        content.push_str(&format!("\n{}. {}", number, s.description.trim()));
        steps.push(AnswerStep {
            number,
            description: s.description.trim().to_string(),
            interface_elements: elements,
        });
    }

    let mut all = Vec::new();
    for step in &steps {
        for e in &step.interface_elements {
            push_unique(&mut all, e.clone());
        }
    }

    Some(StructuredAnswer {
        title,
        content,
        format: AnswerFormat::Json,
        steps,
        interface_elements: all,
    })
}

fn json_elements(value: &serde_json::Value) -> Vec<String> {
    let mut out = Vec::new();
    match value {
        serde_json::Value::String(s) => {
            for part in s.split([',', ';']) {
                let part = part.trim();
                if !part.is_empty() {
                    push_unique(&mut out, part.to_string());
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter().filter_map(|v| v.as_str()) {
                let item = item.trim();
                if !item.is_empty() {
                    push_unique(&mut out, item.to_string());
                }
            }
        }
        _ => {}
    }
    out
}

fn parse_markdown(text: &str, fallback_title: &str) -> StructuredAnswer {
    let content = text.trim().to_string();
    let mut title = None;
    let mut steps = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if title.is_none() && trimmed.starts_with('#') {
            let heading = trimmed.trim_start_matches('#').trim();
            if !heading.is_empty() {
                title = Some(heading.to_string());
            }
            continue;
        }
        if let Some((number, description)) = numbered_line(trimmed) {
            steps.push(AnswerStep {
                number,
                description: description.to_string(),
                interface_elements: interface_elements(description),
            });
        }
    }

    StructuredAnswer {
        title: title.unwrap_or_else(|| fallback_title.to_string()),
        interface_elements: interface_elements(&content),
        content,
        format: AnswerFormat::Markdown,
        steps,
    }
}

/// `"3. Click Save"` or `"3) Click Save"` → `(3, "Click Save")`.
fn numbered_line(line: &str) -> Option<(u32, &str)> {
    let digits_end = line.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 || digits_end > 3 {
        return None;
    }
    let number: u32 = line[..digits_end].parse().ok()?;
    let rest = &line[digits_end..];
    let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let description = rest.trim();
    (!description.is_empty()).then_some((number, description))
}

/// Labels written as `**bold**`, `` `code` ``, "quoted", “curly” or «guillemet».
pub fn interface_elements(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (open, close) in [("**", "**"), ("`", "`"), ("\"", "\""), ("“", "”"), ("«", "»")] {
        let mut rest = text;
        while let Some(start) = rest.find(open) {
            let after = &rest[start + open.len()..];
            let Some(len) = after.find(close) else { break };
            let label = after[..len].trim();
            if !label.is_empty() && label.chars().count() <= 60 && !label.contains('\n') {
                push_unique(&mut out, label.to_string());
            }
            rest = &after[len + close.len()..];
        }
    }
    out
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !list.contains(&item) {
        list.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markdown_steps() {
        let text = "## Export invoices\n\n1. Open **Billing**.\n2) Click `Export` then \"Download CSV\".\nDone.";
        let a = parse_answer(text, "Billing");
        assert_eq!(a.format, AnswerFormat::Markdown);
        assert_eq!(a.title, "Export invoices");
        assert_eq!(a.steps.len(), 2);
        assert_eq!(a.steps[0].number, 1);
        assert_eq!(a.steps[0].interface_elements, vec!["Billing"]);
        assert_eq!(a.steps[1].interface_elements, vec!["Export", "Download CSV"]);
        assert_eq!(a.interface_elements, vec!["Billing", "Export", "Download CSV"]);
    }

    #[test]
    fn test_fallback_title() {
        let a = parse_answer("Invoices are emailed monthly.", "Billing");
        assert_eq!(a.title, "Billing");
        assert!(a.steps.is_empty());
        assert_eq!(a.content, "Invoices are emailed monthly.");
    }

    #[test]
    fn test_json_procedure() {
        let text = r#"Here you go:
{"title": "Reset password", "steps": [
  {"step_number": 1, "description": "Open Settings", "interface_elements": "Settings menu, Profile"},
  {"step_number": 2, "description": "Click **Reset**", "interface_elements": ["Reset button"]}
]}"#;
        let a = parse_answer(text, "Account");
        assert_eq!(a.format, AnswerFormat::Json);
        assert_eq!(a.title, "Reset password");
        assert_eq!(a.steps[0].interface_elements, vec!["Settings menu", "Profile"]);
        assert_eq!(a.steps[1].interface_elements, vec!["Reset button", "Reset"]);
        assert_eq!(a.content, "# Reset password\n\n1. Open Settings\n2. Click **Reset**");
    }

    #[test]
    fn test_invalid_json_falls_back_to_markdown() {
        let a = parse_answer("Use {braces} like this.", "T");
        assert_eq!(a.format, AnswerFormat::Markdown);
        assert_eq!(a.content, "Use {braces} like this.");
    }

    #[test]
    fn test_numbered_line_rejects_versions() {
        assert_eq!(numbered_line("2.5 is the version"), None);
        assert_eq!(numbered_line("2024. A year"), None);
        assert_eq!(numbered_line("12. Twelfth"), Some((12, "Twelfth")));
    }

    #[test]
    fn test_guillemets() {
        assert_eq!(interface_elements("Cliquez sur « Valider »."), vec!["Valider"]);
    }
}
