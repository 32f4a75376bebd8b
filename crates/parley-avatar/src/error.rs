//! Error types for the avatar session.

use parley_core::error::ParleyError;

use crate::state::AvatarState;

/// Errors from the avatar lifecycle and the avatar service.
#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    #[error("avatar session already {0}")]
    AlreadyStarted(AvatarState),
    #[error("invalid avatar state transition: {0} -> {1}")]
    InvalidTransition(AvatarState, AvatarState),
    #[error("token request failed: {0}")]
    Token(String),
    #[error("session request failed: {0}")]
    Session(String),
    #[error("avatar service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("avatar service returned no {0}")]
    MissingField(&'static str),
    #[error("avatar session task is not running")]
    Unavailable,
}

impl From<AvatarError> for ParleyError {
    fn from(err: AvatarError) -> Self {
        ParleyError::Avatar(err.to_string())
    }
}
