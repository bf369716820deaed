//! Built-in prompt templates for common task shapes.

use super::TaskDomainError;
use minijinja::{Environment, context};
use serde::Serialize;

/// A reusable prompt with an `{{ input }}` placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskTemplate {
    /// Stable identifier.
    pub id: &'static str,
    /// Display name, also the default task name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Jinja source of the prompt.
    pub prompt_template: &'static str,
}

const BUILT_IN_TEMPLATES: [TaskTemplate; 3] = [
    TaskTemplate {
        id: "summarize_text",
        name: "Summarize Text",
        description: "Summarize provided content into concise bullet points.",
        prompt_template: "You are an assistant producing concise summaries.\n\
            Summarize the following content into 5 bullet points with key facts.\n\n\
            {{ input }}",
    },
    TaskTemplate {
        id: "extract_action_items",
        name: "Extract Action Items",
        description: "Extract owners, deadlines, and action items from text.",
        prompt_template: "Extract concrete action items from the text below.\n\
            For each action item include owner (if known), deadline (if present), and task.\n\n\
            {{ input }}",
    },
    TaskTemplate {
        id: "rewrite_professional",
        name: "Rewrite Professional",
        description: "Rewrite rough text into clear professional communication.",
        prompt_template: "Rewrite the following message with a professional tone.\n\
            Keep the meaning unchanged and improve clarity.\n\n\
            {{ input }}",
    },
];

impl TaskTemplate {
    /// Returns every built-in template.
    #[must_use]
    pub const fn built_in() -> &'static [Self] {
        &BUILT_IN_TEMPLATES
    }

    /// Looks up a built-in template by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::UnknownTemplate`] when no template matches.
    pub fn find(id: &str) -> Result<&'static Self, TaskDomainError> {
        BUILT_IN_TEMPLATES
            .iter()
            .find(|template| template.id == id.trim())
            .ok_or_else(|| TaskDomainError::UnknownTemplate(id.to_owned()))
    }

    /// Renders the prompt with trimmed `input`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskDomainError::EmptyTemplateInput`] for blank input, or
    /// [`TaskDomainError::TemplateRender`] if rendering fails.
    pub fn render(&self, input: &str) -> Result<String, TaskDomainError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TaskDomainError::EmptyTemplateInput);
        }
        let env = Environment::new();
        env.render_str(self.prompt_template, context! { input => trimmed })
            .map_err(|err| TaskDomainError::TemplateRender {
                template_id: self.id.to_owned(),
                reason: err.to_string(),
            })
    }
}
