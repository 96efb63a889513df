//! Prompt collaborator seam
//!
//! Prompt templating and context capture live outside this crate; the
//! session manager only needs a function from raw input plus an opaque
//! snapshot to the final prompt string.

/// Opaque snapshot of the surrounding context at generation time.
/// Produced by the embedding application's context collector.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    pub text: String,
}

impl ContextSnapshot {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Builds the final prompt handed to the engine.
pub trait PromptBuilder: Send + Sync {
    fn build_prompt(&self, input: &str, context: &ContextSnapshot) -> String;
}

/// Pass-through builder used when the application installs none.
#[derive(Debug, Default)]
pub struct PassthroughPromptBuilder;

impl PromptBuilder for PassthroughPromptBuilder {
    fn build_prompt(&self, input: &str, _context: &ContextSnapshot) -> String {
        input.to_string()
    }
}
