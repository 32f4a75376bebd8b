//! RAG chat engine: central coordinator wiring retrieval, prompt and completion.
//!
//! One call to [`RagChatEngine::answer`] runs the whole sequence for a query:
//! retrieve, drop passages under the similarity cutoff, compose the prompt,
//! complete, clean up the text. Retrieval always finishes before completion
//! starts. Nothing is retried.

use std::sync::Arc;

use parley_core::config::ParleyConfig;
use parley_core::types::RetrievedPassage;

use crate::completion::CompletionClient;
use crate::error::RagError;
use crate::prompt::PromptTemplate;
use crate::response::strip_citations;
use crate::retrieval::Retriever;

/// Outcome of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    /// Text returned to the caller.
    pub content: String,
    /// Passages that made it into the prompt.
    pub passages_used: usize,
    /// False when the deflection was returned without calling the model.
    pub grounded: bool,
}

/// Answers queries from the hosted index and model.
pub struct RagChatEngine {
    retriever: Arc<dyn Retriever>,
    completion: Arc<dyn CompletionClient>,
    template: PromptTemplate,
    similarity_cutoff: Option<f32>,
}

impl RagChatEngine {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        completion: Arc<dyn CompletionClient>,
        template: PromptTemplate,
        similarity_cutoff: Option<f32>,
    ) -> Self {
        Self {
            retriever,
            completion,
            template,
            similarity_cutoff,
        }
    }

    /// Build an engine with the template and cutoff taken from config.
    pub fn from_config(
        config: &ParleyConfig,
        retriever: Arc<dyn Retriever>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self::new(
            retriever,
            completion,
            PromptTemplate::from_config(&config.prompt),
            config.retrieval.cutoff(),
        )
    }

    /// Answer `query` from retrieved context.
    pub async fn answer(&self, query: &str) -> Result<RagAnswer, RagError> {
        let retrieved = self.retriever.retrieve(query).await?;
        let retrieved_count = retrieved.len();
        let passages = apply_cutoff(retrieved, self.similarity_cutoff);

        tracing::debug!(
            retrieved = retrieved_count,
            kept = passages.len(),
            cutoff = ?self.similarity_cutoff,
            "Similarity cutoff applied"
        );

        let prompt = self.template.compose(&passages, query);
        if prompt.context.is_empty() {
            tracing::info!(retrieved = retrieved_count, "No relevant passages; deflecting");
            return Ok(RagAnswer {
                content: self.template.deflection().to_string(),
                passages_used: 0,
                grounded: false,
            });
        }
        if prompt.context.is_truncated() {
            tracing::debug!(chars = prompt.context.char_count(), "Context clipped to budget");
        }

        let raw = self.completion.complete(&prompt.messages).await?;
        let content = strip_citations(&raw);
        if content.is_empty() {
            return Err(RagError::EmptyCompletion);
        }

        tracing::info!(
            passages = prompt.context.len(),
            answer_len = content.len(),
            "Answer generated"
        );

        Ok(RagAnswer {
            content,
            passages_used: prompt.context.len(),
            grounded: true,
        })
    }
}

/// Keep passages scoring at or above `cutoff`; keep everything when unset.
pub fn apply_cutoff(passages: Vec<RetrievedPassage>, cutoff: Option<f32>) -> Vec<RetrievedPassage> {
    match cutoff {
        Some(min) => passages.into_iter().filter(|p| p.score >= min).collect(),
        None => passages,
    }
}
