//! Error types for retrieval and completion.

use parley_core::error::ParleyError;

/// Errors from the RAG pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("index '{index}' not found in project '{project}'")]
    IndexNotFound { index: String, project: String },
    #[error("completion failed: {0}")]
    Completion(String),
    #[error("completion returned no content")]
    EmptyCompletion,
    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },
}

impl From<RagError> for ParleyError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Retrieval(_) | RagError::IndexNotFound { .. } => {
                ParleyError::Retrieval(err.to_string())
            }
            RagError::Http {
                service: "retrieval",
                ..
            } => ParleyError::Retrieval(err.to_string()),
            _ => ParleyError::Completion(err.to_string()),
        }
    }
}
