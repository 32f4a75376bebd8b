//! Route handler functions for all API endpoints.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use parley_avatar::{AvatarEvent, AvatarState, AvatarStream, MediaEvent};
use parley_core::types::{ChatRequest, ChatResponse};

use crate::error::ApiError;
use crate::state::AppState;

/// Longest query the chat endpoint accepts, in characters.
pub const MAX_QUERY_CHARS: usize = 2000;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AvatarStateResponse {
    pub state: AvatarState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvatarStartResponse {
    pub state: AvatarState,
    pub stream: AvatarStream,
}

#[derive(Debug, Deserialize)]
pub struct AvatarEventRequest {
    pub event: AvatarEvent,
    /// Session the event was raised for.
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub model: String,
    pub avatar_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_state: Option<AvatarState>,
}

// =============================================================================
// Chat
// =============================================================================

/// POST /api, POST /api/route - answer a query from the stored documents.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Field 'query' must not be empty".to_string()));
    }
    let chars = query.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Field 'query' is {} characters; the limit is {}",
            chars, MAX_QUERY_CHARS
        )));
    }

    let answer = state.engine.answer(query).await.map_err(|e| {
        tracing::error!(error = %e, "Chat request failed");
        ApiError::from(e)
    })?;

    tracing::info!(
        passages = answer.passages_used,
        grounded = answer.grounded,
        response = %answer.content,
        "Chat response"
    );

    if let Some(avatar) = &state.avatar {
        if avatar.handle.state() == AvatarState::Active {
            let handle = avatar.handle.clone();
            let text = answer.content.clone();
            tokio::spawn(async move {
                match handle.speak(text).await {
                    Ok(true) => {}
                    Ok(false) => tracing::debug!("Avatar not active; answer not spoken"),
                    Err(e) => tracing::warn!(error = %e, "Failed to queue avatar speech"),
                }
            });
        }
    }

    Ok(Json(ChatResponse::new(answer.content)))
}

// =============================================================================
// Avatar
// =============================================================================

/// POST /api/avatar/start - open a streaming avatar session.
pub async fn avatar_start(
    State(state): State<AppState>,
) -> Result<Json<AvatarStartResponse>, ApiError> {
    let avatar = state.avatar()?;
    let stream = avatar.handle.start().await?;
    Ok(Json(AvatarStartResponse {
        state: avatar.handle.state(),
        stream,
    }))
}

/// POST /api/avatar/stop - tear the session down.
pub async fn avatar_stop(
    State(state): State<AppState>,
) -> Result<Json<AvatarStateResponse>, ApiError> {
    let avatar = state.avatar()?;
    avatar.handle.stop().await?;
    Ok(Json(AvatarStateResponse {
        state: avatar.handle.state(),
    }))
}

/// GET /api/avatar/state
pub async fn avatar_state(
    State(state): State<AppState>,
) -> Result<Json<AvatarStateResponse>, ApiError> {
    let avatar = state.avatar()?;
    Ok(Json(AvatarStateResponse {
        state: avatar.handle.state(),
    }))
}

/// POST /api/avatar/events - media-side signal from the page.
pub async fn avatar_event(
    State(state): State<AppState>,
    Json(request): Json<AvatarEventRequest>,
) -> Result<Json<AvatarStateResponse>, ApiError> {
    let avatar = state.avatar()?;
    let next = avatar
        .handle
        .notify(request.event, request.session_id)
        .await?;
    Ok(Json(AvatarStateResponse { state: next }))
}

/// GET /api/avatar/stream - SSE feed of media bindings and state changes.
///
/// A subscriber joining mid-session first receives the current binding.
pub async fn avatar_stream(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    let avatar = state.avatar()?;

    let current = avatar.media.bound().map(MediaEvent::Attach);
    let media = tokio_stream::iter(current)
        .chain(BroadcastStream::new(avatar.media.subscribe()).filter_map(|r| r.ok()))
        .map(|event| Ok::<_, Infallible>(sse_event("media", &event)));

    let transitions = BroadcastStream::new(avatar.handle.subscribe_transitions())
        .filter_map(|r| r.ok())
        .map(|transition| Ok::<_, Infallible>(sse_event("state", &transition)));

    Ok(Sse::new(media.merge(transitions))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn sse_event<T: Serialize>(name: &str, value: &T) -> Event {
    let data = serde_json::to_string(value).unwrap_or_default();
    Event::default().event(name).data(data)
}

// =============================================================================
// Health and page
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        model: state.config.completion.model.clone(),
        avatar_enabled: state.avatar.is_some(),
        avatar_state: state.avatar.as_ref().map(|a| a.handle.state()),
    })
}

/// GET / - the self-contained chat page.
pub async fn index() -> impl IntoResponse {
    Html(parley_ui::page::CHAT_HTML)
}
