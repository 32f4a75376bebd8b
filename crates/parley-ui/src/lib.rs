//! Parley UI crate - the embedded chat page and the chat transcript model.
//!
//! - [`page`]: self-contained chat page served from `/`, embedded with
//!   `include_str!`.
//! - [`transcript`]: [`ChatController`], the submit/append flow behind a chat
//!   box, usable from any front end.
//! - [`transport`]: how the controller reaches the chat endpoint.
//!
//! ```rust,ignore
//! use parley_ui::{ChatController, HttpChatTransport};
//!
//! let transport = HttpChatTransport::new("http://127.0.0.1:3000", 60)?;
//! let chat = ChatController::new(Arc::new(transport));
//! if let Some(reply) = chat.submit("Who was Ada Lovelace?").await {
//!     println!("{}", reply.content);
//! }
//! ```

pub mod page;
pub mod transcript;
pub mod transport;

pub use transcript::ChatController;
pub use transport::{ChatTransport, HttpChatTransport};
