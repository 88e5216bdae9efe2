//! Rough token estimates for logging prompt sizes.
//!
//! Approximation: ~4 characters per token, plus a small per-message overhead.
//! Good enough to spot a schema that blows past a model's context window.

pub struct TokenCounter;

impl TokenCounter {
    pub fn estimate_tokens(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.len() + 3) / 4
    }

    /// Estimate for a chat exchange of `(role, content)` messages.
    pub fn estimate_messages_tokens(messages: &[(&str, &str)]) -> usize {
        let wrapper_tokens = messages.len() * 4;
        let content_tokens: usize = messages
            .iter()
            .map(|(role, content)| Self::estimate_tokens(role) + Self::estimate_tokens(content))
            .sum();
        wrapper_tokens + content_tokens
    }
}
