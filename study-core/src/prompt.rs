//! System prompt construction.
//!
//! Two templates: a generic tutoring persona used before any term is picked,
//! and a term-specific one with `{term}` and `{schema}` placeholders. Values are
//! inserted verbatim in a single pass; inserted text is never re-scanned, and a
//! term that happens to contain quote marks simply ends up in the prompt as-is.

use crate::config::PromptConfig;
use crate::models::TermRecord;

pub const DEFAULT_INITIAL_PROMPT: &str = "You are a tutor with university-level biology knowledge \
helping a student in a lower-division college course. Answer questions and review definitions \
concisely and accurately. The student has been asked to pick a course term, think about it for \
thirty seconds, write a simple definition with a real-world example, and then keep asking \
follow-up questions. Give formative feedback clearly and briefly, and point out any factual \
errors. Rely mainly on the Socratic method: offer hints and guiding questions so the student \
supplies what their first answer left out, and help them notice common misconceptions. Short, \
accurate analogies are welcome when they do not depend on a particular language or culture. \
Avoid filler such as 'your answer lacks a detailed explanation' and avoid generic study advice. \
Student messages are short, so keep each reply under 1000 characters and address every part of \
the student's message. As the conversation goes on, also help the student reflect on how they \
study and on good information and data literacy. If the student writes about anything unrelated \
to an undergraduate biology course, reply with: I appreciate your question, but if you would \
like to take a break from studying, might I suggest a tall glass of water and mindful relaxation.";

pub const DEFAULT_TERM_PROMPT: &str = "You are a tutor with university-level biology knowledge \
helping a student in a lower-division college course. Keep the conversation on the term \
'{term}'. The student has been asked to think about this term for thirty seconds, write a simple \
definition with a real-world example, and then keep asking follow-up questions. The course \
describes the term like this: '{schema}'. Use that description to guide your feedback, but do \
not hand the student all of it at once. Point out any factual errors. Rely mainly on the Socratic \
method: give hints so the student supplies what their answer left out, and help them notice \
common misconceptions. Keep replies short and end each one with a single guiding question; do \
not ask any other questions. If an answer is incomplete, say exactly what would make it \
accurate. Analogies are welcome if they are accurate, but never trade technical accuracy for \
simpler wording, and give the technical definition when asked to define something. Avoid filler \
such as 'your answer lacks a detailed explanation' and avoid generic study advice. Keep each \
reply under 1000 characters and address every part of the student's message. As the \
conversation goes on, also help the student reflect on how they study and on good information \
and data literacy. If the student writes about anything unrelated to an undergraduate biology \
course, reply with: I appreciate your question, but if you would like to take a break from \
studying, might I suggest a tall glass of water and mindful relaxation.";

/// Configured prompt templates.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    initial: String,
    term: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_PROMPT.to_string(),
            term: DEFAULT_TERM_PROMPT.to_string(),
        }
    }
}

impl From<&PromptConfig> for PromptTemplates {
    fn from(config: &PromptConfig) -> Self {
        Self {
            initial: config.initial.clone(),
            term: config.term.clone(),
        }
    }
}

impl PromptTemplates {
    pub fn new(initial: impl Into<String>, term: impl Into<String>) -> Self {
        Self {
            initial: initial.into(),
            term: term.into(),
        }
    }

    /// The term-agnostic prompt used before anything is selected.
    pub fn initial_prompt(&self) -> String {
        self.initial.clone()
    }

    pub fn build_prompt(&self, term: &str, schema: &str) -> String {
        interpolate(&self.term, term, schema)
    }

    /// Prompt for the given selection, falling back to the generic one.
    pub fn prompt_for(&self, selection: Option<&TermRecord>) -> String {
        match selection {
            Some(record) => self.build_prompt(&record.term, &record.schema),
            None => self.initial_prompt(),
        }
    }
}

/// Term-specific prompt from the built-in template.
pub fn build_prompt(term: &str, schema: &str) -> String {
    interpolate(DEFAULT_TERM_PROMPT, term, schema)
}

fn interpolate(template: &str, term: &str, schema: &str) -> String {
    const TERM: &str = "{term}";
    const SCHEMA: &str = "{schema}";

    let mut out = String::with_capacity(template.len() + term.len() + schema.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix(TERM) {
            out.push_str(term);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(SCHEMA) {
            out.push_str(schema);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFF_TOPIC_REPLY: &str = "I appreciate your question, but if you would like to take a \
break from studying, might I suggest a tall glass of water and mindful relaxation.";

    #[test]
    fn test_build_prompt_embeds_term_and_schema() {
        let prompt = build_prompt("mitosis", "cell division producing two identical daughter cells");
        assert!(prompt.contains("'mitosis'"));
        assert!(prompt.contains("'cell division producing two identical daughter cells'"));
        assert!(!prompt.contains("{term}"));
        assert!(!prompt.contains("{schema}"));
    }

    #[test]
    fn test_prompts_carry_off_topic_reply() {
        assert!(DEFAULT_INITIAL_PROMPT.ends_with(OFF_TOPIC_REPLY));
        assert!(DEFAULT_TERM_PROMPT.ends_with(OFF_TOPIC_REPLY));
    }

    #[test]
    fn test_initial_prompt_differs_from_term_prompt() {
        let templates = PromptTemplates::default();
        let initial = templates.initial_prompt();
        assert!(!initial.contains("{term}"));
        assert_ne!(initial, templates.build_prompt("mitosis", "division"));
    }

    #[test]
    fn test_prompt_for_falls_back_to_initial() {
        let templates = PromptTemplates::new("generic", "about {term}: {schema}");
        assert_eq!(templates.prompt_for(None), "generic");
        let record = TermRecord::new("allele", "gene variant");
        assert_eq!(templates.prompt_for(Some(&record)), "about allele: gene variant");
    }

    #[test]
    fn test_interpolation_is_single_pass() {
        let templates = PromptTemplates::new("", "[{term}] [{schema}]");
        assert_eq!(
            templates.build_prompt("{schema}", "{term}"),
            "[{schema}] [{term}]"
        );
    }

    #[test]
    fn test_interpolation_keeps_unknown_braces_and_quotes() {
        let templates = PromptTemplates::new("", "{x} '{term}' {");
        assert_eq!(templates.build_prompt("it's", "s"), "{x} 'it's' {");
    }

    #[test]
    fn test_interpolation_handles_multibyte_text() {
        let templates = PromptTemplates::new("", "é{term}ü{schema}");
        assert_eq!(templates.build_prompt("α", "β"), "éαüβ");
    }
}
