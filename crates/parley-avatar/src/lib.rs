//! Streaming avatar session lifecycle.
//!
//! A single actor task owns the session and its state machine:
//! Absent -> Initializing -> Active -> Absent. Start, stop, speak and
//! media-side events all go through the actor's command queue, so two rapid
//! starts can never create two sessions.

pub mod client;
pub mod error;
pub mod media;
pub mod session;
pub mod state;

pub use client::{AvatarService, AvatarStream, HeyGenClient};
pub use error::AvatarError;
pub use media::{BroadcastMediaSink, MediaEvent, MediaSink};
pub use session::{AvatarEvent, AvatarHandle, AvatarSession, SessionOptions};
pub use state::{AvatarState, StateMachine, Transition};
