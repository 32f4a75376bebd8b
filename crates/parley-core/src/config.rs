use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ParleyError, Result};

/// Top-level configuration for the Parley server.
///
/// Loaded from `~/.parley/config.toml` by default. API keys are never stored
/// here; see [`ApiKeys`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub avatar: AvatarConfig,
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ParleyConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would leave the server unable to answer.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.max_context_chars == 0 {
            return Err(ParleyError::Config(
                "prompt.max_context_chars must be greater than 0".to_string(),
            ));
        }
        let cutoff = self.retrieval.similarity_cutoff;
        if !(0.0..=1.0).contains(&cutoff) {
            return Err(ParleyError::Config(format!(
                "retrieval.similarity_cutoff must be within 0.0..=1.0, got {}",
                cutoff
            )));
        }
        Ok(())
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Interface the HTTP server binds to.
    pub host: String,
    /// HTTP server port.
    pub port: u16,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// Requests per second allowed on the API routes.
    pub rate_limit_per_sec: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            rate_limit_per_sec: 20,
        }
    }
}

/// Hosted RAG index lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Base URL of the retrieval platform.
    pub base_url: String,
    /// Index name, resolved to a pipeline id on first use.
    pub index_name: String,
    /// Project the index lives in.
    pub project_name: String,
    /// Pipeline id; skips name resolution when set.
    pub pipeline_id: Option<String>,
    /// Number of dense results.
    pub similarity_top_k: u32,
    /// Number of sparse results.
    pub sparse_similarity_top_k: u32,
    /// Dense/sparse fusion weight (0.0 = sparse only, 1.0 = dense only).
    pub alpha: f32,
    /// Whether the service reranks the candidate set.
    pub enable_reranking: bool,
    /// Number of results kept after reranking.
    pub rerank_top_n: u32,
    /// Retrieval granularity: "chunks" or "files_via_content".
    pub retrieval_mode: String,
    /// Minimum relevance score a passage needs to reach the prompt.
    /// 0.0 keeps every passage.
    pub similarity_cutoff: f32,
    /// HTTP timeout for retrieval calls.
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cloud.llamaindex.ai".to_string(),
            index_name: "llamacloud-index-2025-05-28".to_string(),
            project_name: "Default".to_string(),
            pipeline_id: None,
            similarity_top_k: 3,
            sparse_similarity_top_k: 3,
            alpha: 0.5,
            enable_reranking: true,
            rerank_top_n: 3,
            retrieval_mode: "chunks".to_string(),
            similarity_cutoff: 0.3,
            timeout_secs: 60,
        }
    }
}

impl RetrievalConfig {
    /// The cutoff to apply, or `None` when filtering is off.
    pub fn cutoff(&self) -> Option<f32> {
        (self.similarity_cutoff > 0.0).then_some(self.similarity_cutoff)
    }
}

/// Language-model completion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature; a negative value leaves it to the provider.
    pub temperature: f32,
    /// Maximum tokens to generate; 0 leaves it to the provider.
    pub max_tokens: u32,
    /// HTTP timeout for completion calls.
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 300,
            timeout_secs: 60,
        }
    }
}

impl CompletionConfig {
    pub fn temperature(&self) -> Option<f32> {
        (self.temperature >= 0.0).then_some(self.temperature)
    }

    pub fn max_tokens(&self) -> Option<u32> {
        (self.max_tokens > 0).then_some(self.max_tokens)
    }
}

/// Prompt wording and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Fixed system instruction.
    pub persona: String,
    /// Reply used when nothing relevant was retrieved.
    pub no_information_message: String,
    /// Upper bound on the characters of retrieved context put in the prompt.
    /// Must be greater than 0.
    pub max_context_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            persona: "You are a warm, knowledgeable storyteller who answers questions about \
                      the people whose biographies are stored in your knowledge base. \
                      Answer in two or three sentences of plain narrative prose, using only \
                      the facts in the provided context. Never include citations, footnote \
                      markers or source references."
                .to_string(),
            no_information_message: "I'm sorry, I can only answer questions about the \
                                     biographies I have stored."
                .to_string(),
            max_context_chars: 6000,
        }
    }
}

/// Rendering quality requested from the avatar service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarQuality {
    #[default]
    Low,
    Medium,
    High,
}

/// How the avatar turns text into speech.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakMode {
    /// Speak the text verbatim.
    #[default]
    Repeat,
    /// Let the avatar service generate its own reply to the text.
    Chat,
}

/// Streaming avatar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Whether the avatar endpoints are served.
    pub enabled: bool,
    /// Base URL of the avatar streaming API.
    pub base_url: String,
    /// Avatar identity to render.
    pub avatar_name: String,
    /// Rendering quality.
    pub quality: AvatarQuality,
    /// Speak mode for chat answers.
    pub speak_mode: SpeakMode,
    /// Seconds to wait for the stream-ready signal before giving up.
    pub ready_timeout_secs: u64,
    /// HTTP timeout for avatar calls.
    pub timeout_secs: u64,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.heygen.com".to_string(),
            avatar_name: "Wayne_20240711".to_string(),
            quality: AvatarQuality::Low,
            speak_mode: SpeakMode::Repeat,
            ready_timeout_secs: 30,
            timeout_secs: 30,
        }
    }
}

/// API keys for the hosted services, read from the environment.
///
/// Missing keys are not an error here: the affected calls fail downstream
/// with an authentication error instead.
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub llama_cloud: String,
    pub openai: String,
    pub heygen: String,
}

impl ApiKeys {
    pub const LLAMA_CLOUD_ENV: &'static str = "LLAMA_CLOUD_API_KEY";
    pub const OPENAI_ENV: &'static str = "OPENAI_API_KEY";
    pub const HEYGEN_ENV: &'static str = "HEYGEN_API_KEY";

    /// Read all keys from the process environment.
    pub fn from_env() -> Self {
        Self {
            llama_cloud: read_key(Self::LLAMA_CLOUD_ENV),
            openai: read_key(Self::OPENAI_ENV),
            heygen: read_key(Self::HEYGEN_ENV),
        }
    }
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("llama_cloud", &mask(&self.llama_cloud))
            .field("openai", &mask(&self.openai))
            .field("heygen", &mask(&self.heygen))
            .finish()
    }
}

fn read_key(var: &str) -> String {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => {
            warn!(var, "API key not set; calls to this service will fail");
            String::new()
        }
    }
}

fn mask(key: &str) -> &'static str {
    if key.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}
