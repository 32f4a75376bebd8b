//! Parley API crate - axum HTTP server for the chat endpoint, avatar control
//! and the embedded chat page.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
