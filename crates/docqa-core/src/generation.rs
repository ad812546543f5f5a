//! Generation model trait.
//!
//! A [`GenerationModel`] is stateless per call: everything it needs
//! (system instruction, prior turns, the new user message and optional
//! retrieved context) arrives in one [`GenerationRequest`].

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::ChatMessage;

/// Input to a single generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub system_prompt: &'a str,
    pub history: &'a [ChatMessage],
    pub user_message: &'a str,
    /// Retrieved context, substituted into the system prompt by the model
    /// adapter via [`render_system_prompt`].
    pub context: Option<&'a str>,
}

/// Placeholder replaced by the retrieved context in system prompts.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// The system instruction with `{context}` filled in.
///
/// Prompts without the placeholder are returned unchanged.
pub fn render_system_prompt(request: &GenerationRequest<'_>) -> String {
    match request.context {
        Some(context) => request.system_prompt.replace(CONTEXT_PLACEHOLDER, context),
        None => request.system_prompt.to_string(),
    }
}

#[async_trait]
pub trait GenerationModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-2.5-flash"`).
    fn model_name(&self) -> &str;

    /// Produce a completion. An empty completion is a fatal provider error.
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_system_prompt_substitutes_context() {
        let req = GenerationRequest {
            system_prompt: "Use this.\n\nContext:\n{context}",
            history: &[],
            user_message: "q",
            context: Some("alpha\n\nbeta"),
        };
        assert_eq!(render_system_prompt(&req), "Use this.\n\nContext:\nalpha\n\nbeta");
    }

    #[test]
    fn test_render_system_prompt_without_context() {
        let req = GenerationRequest {
            system_prompt: "Rewrite it.",
            history: &[],
            user_message: "q",
            context: None,
        };
        assert_eq!(render_system_prompt(&req), "Rewrite it.");
    }
}
