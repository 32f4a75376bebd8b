//! Prompt assembly.
//!
//! The prompt is built from three typed slots (persona, retrieved context,
//! user message) plus the deflection line the model must use when the
//! context does not answer the question.

use parley_core::config::PromptConfig;
use parley_core::types::RetrievedPassage;

use crate::completion::PromptMessage;

const PASSAGE_SEPARATOR: &str = "\n---\n";

// =============================================================================
// ContextBlock
// =============================================================================

/// Retrieved passages, clipped to a character budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBlock {
    passages: Vec<String>,
    truncated: bool,
}

impl ContextBlock {
    /// Take passages in order until `max_chars` is spent.
    ///
    /// The passage that crosses the budget is cut at a char boundary; anything
    /// after it is dropped.
    pub fn from_passages(passages: &[RetrievedPassage], max_chars: usize) -> Self {
        let mut block = ContextBlock::default();
        let mut remaining = max_chars;

        for passage in passages {
            let text = passage.text.trim();
            if text.is_empty() {
                continue;
            }
            if remaining == 0 {
                block.truncated = true;
                break;
            }
            let len = text.chars().count();
            if len <= remaining {
                block.passages.push(text.to_string());
                remaining -= len;
            } else {
                block.passages.push(text.chars().take(remaining).collect());
                block.truncated = true;
                break;
            }
        }

        block
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Whether the budget cut anything off.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Total characters of passage text (separators excluded).
    pub fn char_count(&self) -> usize {
        self.passages.iter().map(|p| p.chars().count()).sum()
    }

    pub fn render(&self) -> String {
        self.passages.join(PASSAGE_SEPARATOR)
    }
}

// =============================================================================
// Slots and rendering
// =============================================================================

/// Named inputs of the prompt.
#[derive(Debug, Clone, Copy)]
pub struct PromptSlots<'a> {
    pub persona: &'a str,
    pub context: &'a ContextBlock,
    pub user_message: &'a str,
    pub deflection: &'a str,
}

impl PromptSlots<'_> {
    /// Render the slots into a system message and a user message.
    pub fn render(&self) -> Vec<PromptMessage> {
        let system = format!(
            "{persona}\n\n\
             If the context below does not contain the answer, reply with exactly: \
             \"{deflection}\"\n\n\
             Context:\n{context}",
            persona = self.persona.trim(),
            deflection = self.deflection.trim(),
            context = self.context.render(),
        );
        vec![
            PromptMessage::system(system),
            PromptMessage::user(self.user_message.trim()),
        ]
    }
}

/// A rendered prompt together with the context it was built from.
#[derive(Debug, Clone)]
pub struct ComposedPrompt {
    pub context: ContextBlock,
    pub messages: Vec<PromptMessage>,
}

/// Config-driven prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    persona: String,
    deflection: String,
    max_context_chars: usize,
}

impl PromptTemplate {
    pub fn new(
        persona: impl Into<String>,
        deflection: impl Into<String>,
        max_context_chars: usize,
    ) -> Self {
        Self {
            persona: persona.into(),
            deflection: deflection.into(),
            max_context_chars,
        }
    }

    pub fn from_config(config: &PromptConfig) -> Self {
        Self::new(
            config.persona.clone(),
            config.no_information_message.clone(),
            config.max_context_chars,
        )
    }

    /// The reply used when nothing relevant was retrieved.
    pub fn deflection(&self) -> &str {
        &self.deflection
    }

    pub fn context_block(&self, passages: &[RetrievedPassage]) -> ContextBlock {
        ContextBlock::from_passages(passages, self.max_context_chars)
    }

    pub fn compose(&self, passages: &[RetrievedPassage], user_message: &str) -> ComposedPrompt {
        let context = self.context_block(passages);
        let messages = PromptSlots {
            persona: &self.persona,
            context: &context,
            user_message,
            deflection: &self.deflection,
        }
        .render();
        ComposedPrompt { context, messages }
    }
}
