//! Application state shared across all route handlers.
//!
//! Clients are built once by the binary and injected here; handlers only read
//! them. The avatar actor is the one piece of mutable state and it owns itself.

use std::sync::Arc;
use std::time::Instant;

use parley_avatar::{AvatarHandle, BroadcastMediaSink};
use parley_core::config::ParleyConfig;
use parley_rag::RagChatEngine;

use crate::error::ApiError;

/// Avatar half of the state; present only when avatar support is enabled.
#[derive(Clone)]
pub struct AvatarContext {
    pub handle: AvatarHandle,
    pub media: Arc<BroadcastMediaSink>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, read-only after startup.
    pub config: Arc<ParleyConfig>,
    /// Retrieval-augmented answering.
    pub engine: Arc<RagChatEngine>,
    pub avatar: Option<AvatarContext>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: ParleyConfig, engine: RagChatEngine) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            avatar: None,
            start_time: Instant::now(),
        }
    }

    /// Attach a running avatar actor and the sink it binds media through.
    pub fn with_avatar(mut self, handle: AvatarHandle, media: Arc<BroadcastMediaSink>) -> Self {
        self.avatar = Some(AvatarContext { handle, media });
        self
    }

    /// The avatar context, or 503 when avatar support is disabled.
    pub fn avatar(&self) -> Result<&AvatarContext, ApiError> {
        self.avatar
            .as_ref()
            .ok_or_else(|| ApiError::ServiceUnavailable("avatar support is disabled".to_string()))
    }
}
