//! Retrieval-augmented answering for Parley.
//!
//! Wraps the hosted retrieval index and the hosted completion model behind
//! traits, assembles the prompt from a typed template, and runs the
//! retrieve -> filter -> prompt -> complete sequence in [`RagChatEngine`].

pub mod completion;
pub mod engine;
pub mod error;
pub mod prompt;
pub mod response;
pub mod retrieval;

pub use completion::{CompletionClient, OpenAiCompletion, PromptMessage, Role};
pub use engine::{apply_cutoff, RagAnswer, RagChatEngine};
pub use error::RagError;
pub use prompt::{ComposedPrompt, ContextBlock, PromptSlots, PromptTemplate};
pub use response::strip_citations;
pub use retrieval::{LlamaCloudRetriever, RetrievalParams, Retriever};
