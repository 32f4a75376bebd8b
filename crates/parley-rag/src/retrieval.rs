//! Hosted index lookup.
//!
//! [`Retriever`] is the seam the engine depends on; [`LlamaCloudRetriever`]
//! talks to the LlamaCloud pipelines API. The index is addressed by name and
//! resolved to a pipeline id once, on the first query.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::config::RetrievalConfig;
use parley_core::types::RetrievedPassage;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::RagError;

/// Retrieval knobs sent with every query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    pub similarity_top_k: u32,
    pub sparse_similarity_top_k: u32,
    pub alpha: f32,
    pub enable_reranking: bool,
    pub rerank_top_n: u32,
    pub retrieval_mode: String,
}

impl RetrievalParams {
    /// Upper bound on the number of passages a single query may return.
    pub fn result_limit(&self) -> usize {
        if self.enable_reranking {
            self.rerank_top_n as usize
        } else {
            (self.similarity_top_k + self.sparse_similarity_top_k) as usize
        }
    }
}

impl From<&RetrievalConfig> for RetrievalParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            similarity_top_k: config.similarity_top_k,
            sparse_similarity_top_k: config.sparse_similarity_top_k,
            alpha: config.alpha,
            enable_reranking: config.enable_reranking,
            rerank_top_n: config.rerank_top_n,
            retrieval_mode: config.retrieval_mode.clone(),
        }
    }
}

/// Returns ranked passages for a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Fetch passages for `query`, best first.
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedPassage>, RagError>;
}

// =============================================================================
// LlamaCloud
// =============================================================================

#[derive(Debug, Serialize)]
struct RetrieveRequest<'a> {
    query: &'a str,
    dense_similarity_top_k: u32,
    sparse_similarity_top_k: u32,
    alpha: f32,
    enable_reranking: bool,
    rerank_top_n: u32,
    retrieval_mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    retrieval_nodes: Vec<ScoredNode>,
}

#[derive(Debug, Deserialize)]
struct ScoredNode {
    node: TextNode,
    #[serde(default)]
    score: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(default)]
    id_: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PipelineSummary {
    id: String,
    name: String,
}

/// Retriever backed by a LlamaCloud index.
pub struct LlamaCloudRetriever {
    http: Client,
    base_url: String,
    api_key: String,
    index_name: String,
    project_name: String,
    params: RetrievalParams,
    pipeline_id: OnceCell<String>,
}

impl LlamaCloudRetriever {
    /// Build a retriever from config. No network call is made here.
    pub fn new(config: &RetrievalConfig, api_key: impl Into<String>) -> Result<Self, RagError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Retrieval(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            index_name: config.index_name.clone(),
            project_name: config.project_name.clone(),
            params: RetrievalParams::from(config),
            pipeline_id: OnceCell::new_with(config.pipeline_id.clone()),
        })
    }

    async fn pipeline_id(&self) -> Result<&str, RagError> {
        let id = self
            .pipeline_id
            .get_or_try_init(|| self.resolve_pipeline())
            .await?;
        Ok(id.as_str())
    }

    async fn resolve_pipeline(&self) -> Result<String, RagError> {
        let url = format!("{}/api/v1/pipelines", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(&[
                ("project_name", self.project_name.as_str()),
                ("pipeline_name", self.index_name.as_str()),
            ])
            .send()
            .await
            .map_err(|e| RagError::Retrieval(format!("pipeline lookup failed: {e}")))?;

        let pipelines: Vec<PipelineSummary> = read_json(response).await?;
        let found = pipelines
            .into_iter()
            .find(|p| p.name == self.index_name)
            .ok_or_else(|| RagError::IndexNotFound {
                index: self.index_name.clone(),
                project: self.project_name.clone(),
            })?;

        tracing::info!(index = %self.index_name, pipeline_id = %found.id, "Resolved retrieval index");
        Ok(found.id)
    }
}

#[async_trait]
impl Retriever for LlamaCloudRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedPassage>, RagError> {
        let pipeline_id = self.pipeline_id().await?;
        let url = format!("{}/api/v1/pipelines/{}/retrieve", self.base_url, pipeline_id);

        let body = RetrieveRequest {
            query,
            dense_similarity_top_k: self.params.similarity_top_k,
            sparse_similarity_top_k: self.params.sparse_similarity_top_k,
            alpha: self.params.alpha,
            enable_reranking: self.params.enable_reranking,
            rerank_top_n: self.params.rerank_top_n,
            retrieval_mode: &self.params.retrieval_mode,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Retrieval(format!("retrieve request failed: {e}")))?;

        let parsed: RetrieveResponse = read_json(response).await?;
        let passages: Vec<RetrievedPassage> = parsed
            .retrieval_nodes
            .into_iter()
            .take(self.params.result_limit())
            .map(|scored| RetrievedPassage {
                text: scored.node.text,
                score: scored.score.unwrap_or(0.0),
                node_id: scored.node.id_,
                metadata: scored.node.metadata,
            })
            .collect();

        tracing::debug!(count = passages.len(), "Retrieved passages");
        Ok(passages)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RagError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RagError::Http {
            service: "retrieval",
            status: status.as_u16(),
            body,
        });
    }
    response
        .json()
        .await
        .map_err(|e| RagError::Retrieval(format!("failed to parse response: {e}")))
}
