use crate::types::Turn;

/// Builds the completion request (system prompt + history).
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    system_prompt: String,
}

impl ContextBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// Prepend the system instruction to the user's history.
    pub fn build_messages(&self, history: &[Turn]) -> Vec<Turn> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Turn::system(&self.system_prompt));
        messages.extend_from_slice(history);
        messages
    }
}
