//! The browser chat page.
//!
//! One HTML file with inline CSS and JavaScript. It posts `{query}` to `/api`,
//! appends the user's bubble before the request resolves, and appends the
//! reply with the opposite sender. When the server reports avatar support in
//! `/health`, it also shows the avatar controls and binds the video element
//! from the `/api/avatar/stream` event feed.

/// The complete self-contained chat page.
pub const CHAT_HTML: &str = include_str!("../assets/chat.html");
