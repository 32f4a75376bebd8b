//! Binding between the avatar session and the video element.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::client::AvatarStream;

/// Where the session's media stream gets attached.
pub trait MediaSink: Send + Sync {
    /// Bind the stream to the video element.
    fn attach(&self, stream: &AvatarStream);

    /// Clear the video element's media source.
    fn clear(&self);
}

/// Media binding instruction, as sent to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaEvent {
    Attach(AvatarStream),
    Clear,
}

/// Publishes binding changes on a broadcast channel and remembers the
/// current binding.
#[derive(Debug)]
pub struct BroadcastMediaSink {
    tx: broadcast::Sender<MediaEvent>,
    bound: Mutex<Option<AvatarStream>>,
}

impl Default for BroadcastMediaSink {
    fn default() -> Self {
        Self::new(32)
    }
}

impl BroadcastMediaSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            bound: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.tx.subscribe()
    }

    /// The stream currently bound to the video element, if any.
    pub fn bound(&self) -> Option<AvatarStream> {
        self.bound.lock().ok().and_then(|b| b.clone())
    }

    fn publish(&self, event: MediaEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No media subscribers");
        }
    }
}

impl MediaSink for BroadcastMediaSink {
    fn attach(&self, stream: &AvatarStream) {
        if let Ok(mut bound) = self.bound.lock() {
            *bound = Some(stream.clone());
        }
        tracing::info!(session_id = %stream.session_id, "Avatar media attached");
        self.publish(MediaEvent::Attach(stream.clone()));
    }

    fn clear(&self) {
        let previous = self.bound.lock().ok().and_then(|mut b| b.take());
        if let Some(stream) = previous {
            tracing::info!(session_id = %stream.session_id, "Avatar media cleared");
        }
        self.publish(MediaEvent::Clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> AvatarStream {
        AvatarStream {
            session_id: "s1".to_string(),
            url: "wss://media.example".to_string(),
            access_token: "at".to_string(),
        }
    }

    #[test]
    fn test_attach_then_clear() {
        let sink = BroadcastMediaSink::default();
        let mut rx = sink.subscribe();

        sink.attach(&stream());
        assert_eq!(sink.bound(), Some(stream()));
        assert_eq!(rx.try_recv().unwrap(), MediaEvent::Attach(stream()));

        sink.clear();
        assert!(sink.bound().is_none());
        assert_eq!(rx.try_recv().unwrap(), MediaEvent::Clear);
    }

    #[test]
    fn test_publish_without_subscribers_does_not_panic() {
        let sink = BroadcastMediaSink::default();
        sink.attach(&stream());
        sink.clear();
        assert!(sink.bound().is_none());
    }

    #[test]
    fn test_media_event_wire_shape() {
        let json = serde_json::to_value(MediaEvent::Attach(stream())).unwrap();
        assert_eq!(json["type"], "attach");
        assert_eq!(json["session_id"], "s1");
        assert_eq!(
            serde_json::to_value(MediaEvent::Clear).unwrap(),
            serde_json::json!({"type": "clear"})
        );
    }
}
